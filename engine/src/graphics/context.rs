use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;

use log::{
    trace,
    warn,
};

use super::gpu::{
    Barrier,
    BufferInfo,
    BufferUsage,
    CommandBuffer as _,
    Device as _,
    Fence as _,
    Queue as _,
};
use super::*;

/// One linear command stream. Device work is recorded here and only becomes observable
/// after [`ExecutionContext::submit_and_wait`]; host work runs immediately.
pub struct ExecutionContext {
    device: Arc<active_gpu_backend::Device>,
    destroyer: Arc<DeferredDestroyer>,
    fence: active_gpu_backend::Fence,
    command_buffer: active_gpu_backend::CommandBuffer,
    recorded_commands: u32,
    current_submission: u64,
    completed_submission: u64,
    has_context: Arc<AtomicBool>,
}

impl ExecutionContext {
    pub(super) fn new(device: &Arc<active_gpu_backend::Device>, destroyer: &Arc<DeferredDestroyer>, has_context: &Arc<AtomicBool>) -> Self {
        let current_submission = destroyer.counter();
        Self {
            device: device.clone(),
            destroyer: destroyer.clone(),
            fence: unsafe { device.create_fence() },
            command_buffer: unsafe { device.create_command_buffer() },
            recorded_commands: 0,
            current_submission,
            completed_submission: current_submission - 1,
            has_context: has_context.clone(),
        }
    }

    #[inline(always)]
    pub(super) fn device(&self) -> &active_gpu_backend::Device {
        &self.device
    }

    pub(super) fn create_buffer(&self, info: &BufferInfo, name: Option<&str>) -> Result<Buffer> {
        Buffer::new(&self.device, &self.destroyer, info, name)
    }

    pub(super) fn create_buffer_with_data(&self, data: &[u8], usage: BufferUsage, name: Option<&str>) -> Result<Buffer> {
        Buffer::with_data(&self.device, &self.destroyer, data, usage, name)
    }

    #[inline(always)]
    pub(super) fn destroyer(&self) -> &Arc<DeferredDestroyer> {
        &self.destroyer
    }

    pub(super) fn record<F>(&mut self, func: F)
    where
        F: FnOnce(&mut active_gpu_backend::CommandBuffer),
    {
        if self.recorded_commands == 0 {
            unsafe { self.command_buffer.begin() };
        }
        self.recorded_commands += 1;
        func(&mut self.command_buffer);
    }

    /// Makes acceleration structure writes visible to later builds, copies, queries and traces.
    pub(super) fn record_structure_barrier(&mut self) {
        self.record(|command_buffer| unsafe {
            command_buffer.barrier(&[Barrier::acceleration_structure_write_to_read()]);
        });
    }

    pub fn has_pending_commands(&self) -> bool {
        self.recorded_commands != 0
    }

    /// Number of the submission currently being recorded.
    pub fn current_submission(&self) -> u64 {
        self.current_submission
    }

    pub fn completed_submission(&self) -> u64 {
        self.completed_submission
    }

    /// Submits everything recorded so far, blocks until the device finished it and reports
    /// the first failure the device ran into.
    pub fn submit_and_wait(&mut self) -> Result<()> {
        if self.recorded_commands != 0 {
            unsafe { self.command_buffer.finish() };
            trace!("Submitting {} commands as submission {}", self.recorded_commands, self.current_submission);
            let signal = [active_gpu_backend::FenceValuePairRef {
                fence: &self.fence,
                value: self.current_submission,
            }];
            let command_buffers = [&self.command_buffer];
            unsafe {
                self.device.queue().submit(&[active_gpu_backend::Submission {
                    command_buffers: &command_buffers,
                    signal_fences: &signal,
                }]);
            }
            self.fence.await_value(self.current_submission);
            unsafe { self.command_buffer.reset() };
            self.recorded_commands = 0;
        }

        self.completed_submission = self.current_submission;
        self.current_submission += 1;
        self.destroyer.set_counter(self.current_submission);
        self.destroyer.destroy_unused(self.completed_submission);

        self.device.status()?;
        Ok(())
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.recorded_commands != 0 {
            warn!("Dropping an execution context with {} commands that were never submitted", self.recorded_commands);
            unsafe { self.command_buffer.reset() };
        }
        unsafe { self.device.wait_for_idle() };
        self.destroyer.set_counter(self.current_submission + 1);
        self.destroyer.destroy_unused(self.current_submission);
        self.has_context.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::gpu::MemoryKind;
    use super::*;

    #[test]
    fn submissions_release_dropped_buffers() {
        let device = GPUDevice::new(&DeviceConfig::default());
        let mut context = device.create_context();
        assert_eq!(context.current_submission(), 1);
        assert_eq!(context.completed_submission(), 0);

        let info = BufferInfo {
            size: 1024,
            usage: BufferUsage::STORAGE,
            memory_kind: MemoryKind::VRAM,
        };
        let buffer = context.create_buffer(&info, Some("scratch")).unwrap();
        drop(buffer);
        assert_eq!(device.pending_destructions(), 1);
        assert_eq!(device.allocated_memory(), 1024);

        context.submit_and_wait().unwrap();
        assert_eq!(context.completed_submission(), 1);
        assert_eq!(device.pending_destructions(), 0);
        assert_eq!(device.allocated_memory(), 0);
    }

    #[test]
    fn a_new_context_continues_the_submission_numbering() {
        let device = GPUDevice::new(&DeviceConfig::default());
        {
            let mut context = device.create_context();
            context.submit_and_wait().unwrap();
            context.submit_and_wait().unwrap();
        }
        let context = device.create_context();
        assert!(context.current_submission() > 2);
        assert!(!context.has_pending_commands());
    }
}
