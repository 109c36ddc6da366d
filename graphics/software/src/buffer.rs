use std::hash::{
    Hash,
    Hasher,
};
use std::sync::Arc;

use parking_lot::RwLock;
use raycts_core::gpu::{
    BackendError,
    Buffer,
    BufferInfo,
    OutOfMemoryError,
};

use crate::SoftShared;

pub(crate) struct BufferMemory {
    info: BufferInfo,
    va: u64,
    data: RwLock<Vec<u8>>,
    shared: Arc<SoftShared>,
    name: Option<String>,
}

impl BufferMemory {
    #[inline(always)]
    pub(crate) fn info(&self) -> &BufferInfo {
        &self.info
    }
}

impl Drop for BufferMemory {
    fn drop(&mut self) {
        log::trace!("Freeing buffer {:?} at {:#x}", self.name, self.va);
        self.shared.unregister_buffer(self.va);
        self.shared.free(self.info.size);
    }
}

/// Cheap handle, clones refer to the same memory.
#[derive(Clone)]
pub struct SoftBuffer {
    memory: Arc<BufferMemory>,
}

impl SoftBuffer {
    pub(crate) fn new(shared: &Arc<SoftShared>, info: &BufferInfo, name: Option<&str>) -> Result<Self, OutOfMemoryError> {
        let va = shared.allocate(info.size)?;
        let memory = Arc::new(BufferMemory {
            info: info.clone(),
            va,
            data: RwLock::new(vec![0u8; info.size as usize]),
            shared: shared.clone(),
            name: name.map(|name| name.to_string()),
        });
        shared.register_buffer(va, &memory);
        log::trace!("Created buffer {:?} at {:#x}, {} bytes", name, va, info.size);
        Ok(Self { memory })
    }

    pub(crate) fn from_memory(memory: Arc<BufferMemory>) -> Self {
        Self { memory }
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.memory.info.size
    }

    pub fn is_host_visible(&self) -> bool {
        self.memory.info.memory_kind.is_host_visible()
    }

    fn check_range(&self, offset: u64, length: u64) -> Result<(), BackendError> {
        let end = offset.checked_add(length);
        if end.map(|end| end > self.size()).unwrap_or(true) {
            return Err(BackendError::invalid_usage(format!(
                "range {}..{} is out of bounds of buffer {:?} with size {}",
                offset,
                offset.saturating_add(length),
                self.memory.name,
                self.size()
            )));
        }
        Ok(())
    }

    /// Device side access, ignores the memory kind.
    pub(crate) fn read_bytes(&self, offset: u64, length: u64) -> Result<Vec<u8>, BackendError> {
        self.check_range(offset, length)?;
        let data = self.memory.data.read();
        Ok(data[offset as usize..(offset + length) as usize].to_vec())
    }

    pub(crate) fn write_bytes(&self, offset: u64, bytes: &[u8]) -> Result<(), BackendError> {
        self.check_range(offset, bytes.len() as u64)?;
        let mut data = self.memory.data.write();
        data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn require_host_visible(&self, usage: &str) -> Result<(), BackendError> {
        if !self.is_host_visible() {
            return Err(BackendError::invalid_usage(format!(
                "{} requires host visible memory but buffer {:?} is device local",
                usage, self.memory.name
            )));
        }
        Ok(())
    }
}

impl Buffer for SoftBuffer {
    fn info(&self) -> &BufferInfo {
        &self.memory.info
    }

    fn va(&self) -> u64 {
        self.memory.va
    }

    unsafe fn write_data(&self, offset: u64, data: &[u8]) -> Result<(), BackendError> {
        self.require_host_visible("mapping")?;
        self.write_bytes(offset, data)
    }

    unsafe fn read_data(&self, offset: u64, data: &mut [u8]) -> Result<(), BackendError> {
        self.require_host_visible("mapping")?;
        self.check_range(offset, data.len() as u64)?;
        let memory = self.memory.data.read();
        data.copy_from_slice(&memory[offset as usize..offset as usize + data.len()]);
        Ok(())
    }
}

impl Hash for SoftBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.memory.va.hash(state);
    }
}

impl PartialEq for SoftBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.memory.va == other.memory.va
    }
}

impl Eq for SoftBuffer {}
