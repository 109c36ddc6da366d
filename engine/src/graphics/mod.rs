pub use bottom_level::*;
pub use buffer::*;
pub use context::*;
pub use deferred::*;
pub use device::*;
pub use error::*;
pub use geometry::*;
pub use instance::*;
pub use ray_query::*;
pub use serial_storage::*;
pub use size_query::*;
pub use structure::*;
pub use top_level::*;
use destroyer::*;

mod bottom_level;
mod buffer;
mod context;
mod deferred;
mod destroyer;
mod device;
mod error;
mod geometry;
mod instance;
mod ray_query;
mod serial_storage;
mod size_query;
mod structure;
mod top_level;

pub use raycts_core::gpu;

mod active_gpu_backend {
    pub use raycts_software::SoftBackend as Backend;
    pub use raycts_software::SoftDevice as Device;
    pub use raycts_software::SoftDeviceConfig as DeviceConfig;
    pub use raycts_software::SoftBuffer as Buffer;
    pub use raycts_software::SoftAccelerationStructure as AccelerationStructure;
    pub use raycts_software::SoftCommandBuffer as CommandBuffer;
    pub use raycts_software::SoftFence as Fence;
    pub use raycts_software::SoftQueryPool as QueryPool;
    pub use raycts_software::SoftDeferredOperation as DeferredOperation;
    pub type FenceValuePairRef<'a> = super::gpu::FenceValuePairRef<'a, self::Backend>;
    pub type Submission<'a> = super::gpu::Submission<'a, self::Backend>;
    pub type AccelerationStructureInfo<'a> = super::gpu::AccelerationStructureInfo<'a, self::Backend>;
    pub type AccelerationStructureBuildInfo<'a> = super::gpu::AccelerationStructureBuildInfo<'a, self::Backend>;
    pub type AccelerationStructureGeometry<'a> = super::gpu::AccelerationStructureGeometry<'a, self::Backend>;
    pub type AccelerationStructureInputs<'a> = super::gpu::AccelerationStructureInputs<'a, self::Backend>;
    pub type RayQueryDispatchInfo<'a> = super::gpu::RayQueryDispatchInfo<'a, self::Backend>;
}

pub use active_gpu_backend::DeviceConfig;
