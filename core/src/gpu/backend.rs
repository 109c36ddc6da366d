use super::*;

pub trait GPUBackend: 'static + Sized {
  type Device: Device<Self> + Send + Sync;
  type CommandBuffer: CommandBuffer<Self> + Send;
  type Buffer: Buffer + Send + Sync;
  type Fence: Fence + Send + Sync;
  type Queue: Queue<Self> + Send + Sync;
  type QueryPool: QueryPool + Send + Sync;
  type AccelerationStructure: AccelerationStructure + Send + Sync;
  type DeferredOperation: DeferredOperation + Send + Sync;

  fn name() -> &'static str;
}
