use super::*;

pub trait Fence {
  fn value(&self) -> u64;
  fn await_value(&self, value: u64);
}

pub struct FenceValuePairRef<'a, B: GPUBackend> {
  pub fence: &'a B::Fence,
  pub value: u64
}
