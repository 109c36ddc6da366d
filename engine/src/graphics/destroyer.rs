use std::sync::Arc;

use parking_lot::{
    Mutex,
    MutexGuard,
};

use super::gpu::Device as _;
use super::*;

/// Keeps dropped backend objects alive until the submission that was being recorded when
/// they were dropped has completed.
pub(super) struct DeferredDestroyer {
    device: Arc<active_gpu_backend::Device>,
    inner: Mutex<DeferredDestroyerInner>,
}

struct DeferredDestroyerInner {
    current_counter: u64,
    buffers: Vec<(u64, active_gpu_backend::Buffer)>,
    acceleration_structures: Vec<(u64, active_gpu_backend::AccelerationStructure)>,
    query_pools: Vec<(u64, active_gpu_backend::QueryPool)>,
}

impl DeferredDestroyer {
    pub(super) fn new(device: &Arc<active_gpu_backend::Device>) -> Self {
        Self {
            device: device.clone(),
            inner: Mutex::new(DeferredDestroyerInner {
                current_counter: 1u64,
                buffers: Vec::new(),
                acceleration_structures: Vec::new(),
                query_pools: Vec::new(),
            }),
        }
    }

    pub(super) fn destroy_buffer(&self, buffer: active_gpu_backend::Buffer) {
        let mut guard = self.inner.lock();
        let counter = guard.current_counter;
        guard.buffers.push((counter, buffer));
    }

    pub(super) fn destroy_acceleration_structure(&self, acceleration_structure: active_gpu_backend::AccelerationStructure) {
        let mut guard = self.inner.lock();
        let counter = guard.current_counter;
        guard.acceleration_structures.push((counter, acceleration_structure));
    }

    pub(super) fn destroy_query_pool(&self, query_pool: active_gpu_backend::QueryPool) {
        let mut guard = self.inner.lock();
        let counter = guard.current_counter;
        guard.query_pools.push((counter, query_pool));
    }

    pub(super) fn counter(&self) -> u64 {
        self.inner.lock().current_counter
    }

    pub(super) fn set_counter(&self, counter: u64) {
        let mut guard = self.inner.lock();
        assert!(guard.current_counter <= counter);
        guard.current_counter = counter;
    }

    /// Releases everything dropped while recording submissions up to and including `counter`.
    pub(super) fn destroy_unused(&self, counter: u64) {
        let mut guard = self.inner.lock();
        Self::destroy_unused_locked(&mut guard, counter);
    }

    /// The device must be idle.
    pub(super) fn destroy_all(&self) {
        let mut guard = self.inner.lock();
        let counter = guard.current_counter;
        Self::destroy_unused_locked(&mut guard, counter);
    }

    pub(super) fn pending_count(&self) -> usize {
        let guard = self.inner.lock();
        guard.buffers.len() + guard.acceleration_structures.len() + guard.query_pools.len()
    }

    fn destroy_unused_locked(guard: &mut MutexGuard<'_, DeferredDestroyerInner>, counter: u64) {
        assert!(guard.current_counter >= counter);
        guard
            .acceleration_structures
            .retain(|(resource_counter, _)| *resource_counter > counter);
        guard
            .buffers
            .retain(|(resource_counter, _)| *resource_counter > counter);
        guard
            .query_pools
            .retain(|(resource_counter, _)| *resource_counter > counter);
    }
}

impl Drop for DeferredDestroyer {
    fn drop(&mut self) {
        let pending = self.pending_count();
        if pending != 0 {
            log::debug!("Waiting for the device before releasing {} remaining objects", pending);
            unsafe { self.device.wait_for_idle() };
            self.destroy_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::gpu::{
        BufferInfo,
        BufferUsage,
        MemoryKind,
    };
    use super::*;

    fn buffer(device: &active_gpu_backend::Device) -> active_gpu_backend::Buffer {
        let info = BufferInfo {
            size: 256,
            usage: BufferUsage::STORAGE,
            memory_kind: MemoryKind::RAM,
        };
        unsafe { device.create_buffer(&info, None).unwrap() }
    }

    #[test]
    fn objects_live_until_their_submission_completed() {
        let device = Arc::new(active_gpu_backend::Device::default());
        let destroyer = DeferredDestroyer::new(&device);

        destroyer.destroy_buffer(buffer(&device));
        destroyer.set_counter(2);
        destroyer.destroy_buffer(buffer(&device));
        assert_eq!(destroyer.pending_count(), 2);
        assert_eq!(device.allocated_memory(), 512);

        destroyer.destroy_unused(1);
        assert_eq!(destroyer.pending_count(), 1);
        assert_eq!(device.allocated_memory(), 256);

        destroyer.destroy_all();
        assert_eq!(destroyer.pending_count(), 0);
        assert_eq!(device.allocated_memory(), 0);
    }
}
