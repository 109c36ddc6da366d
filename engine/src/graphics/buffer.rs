use std::fmt::{
    Debug,
    Formatter,
};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use log::trace;

use super::gpu::{
    Buffer as _,
    BufferInfo,
    BufferUsage,
    Device as _,
    MemoryKind,
};
use super::*;

pub struct Buffer {
    buffer: ManuallyDrop<active_gpu_backend::Buffer>,
    destroyer: Arc<DeferredDestroyer>,
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(Buffer: {:#x} (size: {}, {:?}))", self.va(), self.size(), self.info().memory_kind)
    }
}

impl Buffer {
    pub(super) fn new(
        device: &active_gpu_backend::Device,
        destroyer: &Arc<DeferredDestroyer>,
        info: &BufferInfo,
        name: Option<&str>,
    ) -> Result<Self> {
        let buffer = unsafe { device.create_buffer(info, name)? };
        trace!("Created buffer {:?}: {} bytes of {:?}", name, info.size, info.memory_kind);
        Ok(Self {
            buffer: ManuallyDrop::new(buffer),
            destroyer: destroyer.clone(),
        })
    }

    /// Creates a host visible buffer holding `data`.
    pub(super) fn with_data(
        device: &active_gpu_backend::Device,
        destroyer: &Arc<DeferredDestroyer>,
        data: &[u8],
        usage: BufferUsage,
        name: Option<&str>,
    ) -> Result<Self> {
        let info = BufferInfo {
            size: data.len() as u64,
            usage: usage | BufferUsage::SHADER_DEVICE_ADDRESS,
            memory_kind: MemoryKind::RAM,
        };
        let buffer = Self::new(device, destroyer, &info, name)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    #[inline(always)]
    pub(super) fn handle(&self) -> &active_gpu_backend::Buffer {
        &self.buffer
    }

    #[inline(always)]
    pub fn info(&self) -> &BufferInfo {
        self.buffer.info()
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.info().size
    }

    #[inline(always)]
    pub fn va(&self) -> u64 {
        self.buffer.va()
    }

    /// Only valid for host visible memory that no pending submission writes to.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        unsafe { self.buffer.write_data(offset, data)? };
        Ok(())
    }

    pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut data = vec![0u8; length as usize];
        unsafe { self.buffer.read_data(offset, &mut data)? };
        Ok(data)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let buffer = unsafe { ManuallyDrop::take(&mut self.buffer) };
        self.destroyer.destroy_buffer(buffer);
    }
}
