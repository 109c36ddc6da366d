use raycts_core::gpu::GPUBackend;

use crate::*;

pub enum SoftBackend {}

impl GPUBackend for SoftBackend {
    type Device = SoftDevice;
    type CommandBuffer = SoftCommandBuffer;
    type Buffer = SoftBuffer;
    type Fence = SoftFence;
    type Queue = SoftQueue;
    type QueryPool = SoftQueryPool;
    type AccelerationStructure = SoftAccelerationStructure;
    type DeferredOperation = SoftDeferredOperation;

    fn name() -> &'static str {
        "software"
    }
}
