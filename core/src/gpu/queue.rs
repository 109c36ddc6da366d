use super::*;

pub struct Submission<'a, B: GPUBackend> {
  pub command_buffers: &'a [&'a B::CommandBuffer],
  pub signal_fences: &'a [FenceValuePairRef<'a, B>],
}

pub trait Queue<B: GPUBackend> {
  unsafe fn submit(&self, submissions: &[Submission<B>]);
  unsafe fn wait_for_idle(&self);
}
