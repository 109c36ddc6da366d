use std::collections::{
    BTreeMap,
    HashMap,
};
use std::any::Any;
use std::panic::{
    catch_unwind,
    AssertUnwindSafe,
};
use std::sync::{
    Arc,
    Weak,
};

use parking_lot::Mutex;
use raycts_core::gpu::{
    BackendError,
    OutOfMemoryError,
};
use raycts_core::align_up_64;

use crate::buffer::BufferMemory;
use crate::rt::StructureInner;
use crate::{
    SoftAccelerationStructure,
    SoftBuffer,
    SoftDeviceConfig,
};

pub(crate) const ADDRESS_ALIGNMENT: u64 = 256;
const FIRST_ADDRESS: u64 = 0x1_0000;

/// Runs `work`, turning a panic into `DeviceLost`.
pub(crate) fn catch_panic<F>(work: F) -> Result<(), BackendError>
where
    F: FnOnce() -> Result<(), BackendError>,
{
    catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| Err(BackendError::DeviceLost(panic_message(payload))))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic".to_string()
    }
}

/// State shared by the device, its queue thread and every resource.
pub(crate) struct SoftShared {
    config: SoftDeviceConfig,
    memory: Mutex<MemoryState>,
    buffers: Mutex<BTreeMap<u64, Weak<BufferMemory>>>,
    structures: Mutex<HashMap<u64, Weak<StructureInner>>>,
    device_errors: Mutex<Vec<BackendError>>,
}

struct MemoryState {
    allocated: u64,
    // Addresses are never handed out twice, so a stale reference can never alias a live resource.
    next_address: u64,
}

impl SoftShared {
    pub(crate) fn new(config: SoftDeviceConfig) -> Self {
        Self {
            config,
            memory: Mutex::new(MemoryState {
                allocated: 0,
                next_address: FIRST_ADDRESS,
            }),
            buffers: Mutex::new(BTreeMap::new()),
            structures: Mutex::new(HashMap::new()),
            device_errors: Mutex::new(Vec::new()),
        }
    }

    #[inline(always)]
    pub(crate) fn config(&self) -> &SoftDeviceConfig {
        &self.config
    }

    /// Reserves `size` bytes of the budget and returns the device address of the allocation.
    pub(crate) fn allocate(&self, size: u64) -> Result<u64, OutOfMemoryError> {
        let mut memory = self.memory.lock();
        let available = self.config.memory_budget.saturating_sub(memory.allocated);
        if size > available {
            return Err(OutOfMemoryError {
                requested: size,
                available,
            });
        }
        memory.allocated += size;
        let address = memory.next_address;
        memory.next_address = align_up_64(address + size.max(1), ADDRESS_ALIGNMENT);
        Ok(address)
    }

    pub(crate) fn free(&self, size: u64) {
        let mut memory = self.memory.lock();
        memory.allocated = memory.allocated.saturating_sub(size);
    }

    pub(crate) fn allocated(&self) -> u64 {
        self.memory.lock().allocated
    }

    pub(crate) fn register_buffer(&self, va: u64, memory: &Arc<BufferMemory>) {
        self.buffers.lock().insert(va, Arc::downgrade(memory));
    }

    pub(crate) fn unregister_buffer(&self, va: u64) {
        self.buffers.lock().remove(&va);
    }

    /// Finds the buffer containing `address` and the offset of the address inside it.
    pub(crate) fn resolve_buffer(&self, address: u64) -> Option<(SoftBuffer, u64)> {
        // Upgrade outside the lock, dropping the last reference unregisters the buffer.
        let (va, memory) = {
            let buffers = self.buffers.lock();
            let (va, memory) = buffers.range(..=address).next_back()?;
            (*va, memory.clone())
        };
        let memory = memory.upgrade()?;
        let offset = address - va;
        if offset >= memory.info().size {
            return None;
        }
        Some((SoftBuffer::from_memory(memory), offset))
    }

    pub(crate) fn register_structure(&self, address: u64, structure: &Arc<StructureInner>) {
        self.structures.lock().insert(address, Arc::downgrade(structure));
    }

    pub(crate) fn unregister_structure(&self, address: u64, structure: *const StructureInner) {
        let mut structures = self.structures.lock();
        let registered = structures
            .get(&address)
            .map(|existing| std::ptr::eq(existing.as_ptr(), structure))
            .unwrap_or(false);
        if registered {
            structures.remove(&address);
        }
    }

    pub(crate) fn resolve_structure(&self, address: u64) -> Option<SoftAccelerationStructure> {
        let inner = self.structures.lock().get(&address)?.clone();
        let inner = inner.upgrade()?;
        Some(SoftAccelerationStructure::from_inner(inner))
    }

    pub(crate) fn record_device_error(&self, error: BackendError) {
        self.device_errors.lock().push(error);
    }

    pub(crate) fn first_device_error(&self) -> Option<BackendError> {
        self.device_errors.lock().first().cloned()
    }
}
