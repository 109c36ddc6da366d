use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;

use super::gpu::{
    AccelerationStructureCompatibility,
    BufferInfo,
    Device as _,
    SerializedHeader,
};
use super::*;

/// Owns the backend device. Resources created through it stay valid until dropped, the
/// backend objects behind them are released once no pending submission uses them.
pub struct GPUDevice {
    device: Arc<active_gpu_backend::Device>,
    destroyer: Arc<DeferredDestroyer>,
    has_context: Arc<AtomicBool>,
}

impl GPUDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        let device = Arc::new(active_gpu_backend::Device::new(config.clone()));
        log::debug!("Created {} device", <active_gpu_backend::Backend as super::gpu::GPUBackend>::name());
        let destroyer = Arc::new(DeferredDestroyer::new(&device));
        Self {
            device,
            destroyer,
            has_context: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Only one context may exist at a time, it owns the command stream of the device.
    pub fn create_context(&self) -> ExecutionContext {
        assert!(!self.has_context.swap(true, Ordering::AcqRel));
        ExecutionContext::new(&self.device, &self.destroyer, &self.has_context)
    }

    pub fn create_buffer(&self, info: &BufferInfo, name: Option<&str>) -> Result<Buffer> {
        Buffer::new(&self.device, &self.destroyer, info, name)
    }

    pub fn is_compatible(&self, header: &SerializedHeader) -> bool {
        self.device.acceleration_structure_compatibility(header) == AccelerationStructureCompatibility::Compatible
    }

    /// Bytes held by live backend buffers, including ones waiting in the destroyer.
    pub fn allocated_memory(&self) -> u64 {
        self.device.allocated_memory()
    }

    /// Backend objects dropped but not yet released.
    pub fn pending_destructions(&self) -> usize {
        self.destroyer.pending_count()
    }

    pub fn status(&self) -> Result<()> {
        self.device.status()?;
        Ok(())
    }
}

impl Drop for GPUDevice {
    fn drop(&mut self) {
        unsafe { self.device.wait_for_idle() };
        self.destroyer.destroy_all();
    }
}
