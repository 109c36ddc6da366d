use std::sync::Arc;

use raycts_core::gpu::{
    AccelerationStructureBuildInfo,
    AccelerationStructureBuildType,
    AccelerationStructureCompatibility,
    AccelerationStructureInfo,
    AccelerationStructureInputs,
    AccelerationStructureSizes,
    BackendError,
    BufferInfo,
    BuildAccelerationStructureFlags,
    CopyMode,
    Device,
    HostOperationStatus,
    OutOfMemoryError,
    Queue,
    QueryType,
    SerializedHeader,
    SERIALIZED_UUID_SIZE,
};

use crate::deferred::HostTask;
use crate::geometry::{
    BuildInputsJob,
    BuildJob,
};
use crate::{
    ops,
    SoftAccelerationStructure,
    SoftBackend,
    SoftBuffer,
    SoftCommandBuffer,
    SoftDeferredOperation,
    SoftFence,
    SoftQueryPool,
    SoftQueue,
    SoftShared,
};

#[derive(Debug, Clone)]
pub struct SoftDeviceConfig {
    /// Total bytes all live buffers may occupy.
    pub memory_budget: u64,
    pub driver_uuid: [u8; SERIALIZED_UUID_SIZE],
    /// Serialized data is only accepted if both uuids match.
    pub compatibility_uuid: [u8; SERIALIZED_UUID_SIZE],
    /// Primitives or instances per unit of deferred work.
    pub primitives_per_work_unit: u32,
}

impl Default for SoftDeviceConfig {
    fn default() -> Self {
        Self {
            memory_budget: 1 << 30,
            driver_uuid: *b"raycts-software\0",
            compatibility_uuid: *b"swas-image-v1\0\0\0",
            primitives_per_work_unit: 4,
        }
    }
}

pub struct SoftDevice {
    shared: Arc<SoftShared>,
    queue: SoftQueue,
}

impl SoftDevice {
    pub fn new(config: SoftDeviceConfig) -> Self {
        log::info!("Creating software device with a budget of {} bytes", config.memory_budget);
        let shared = Arc::new(SoftShared::new(config));
        let queue = SoftQueue::new(&shared);
        Self { shared, queue }
    }

    /// Bytes currently allocated by live buffers.
    pub fn allocated_memory(&self) -> u64 {
        self.shared.allocated()
    }

    fn run_host(&self, deferred_operation: Option<&SoftDeferredOperation>, task: HostTask) -> Result<HostOperationStatus, BackendError> {
        match deferred_operation {
            Some(operation) => {
                operation.install(task)?;
                Ok(HostOperationStatus::Deferred)
            }
            None => {
                task.run()?;
                Ok(HostOperationStatus::NotDeferred)
            }
        }
    }
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new(SoftDeviceConfig::default())
    }
}

fn require_host_build(job: &BuildJob) -> Result<(), BackendError> {
    job.dst.require_host_visible("host build destination")?;
    job.scratch.require_host_visible("host build scratch")?;
    match &job.inputs {
        BuildInputsJob::Bottom(_) => Ok(()),
        BuildInputsJob::Top(instances) => instances.buffer.require_host_visible("host build instances"),
    }
}

impl Device<SoftBackend> for SoftDevice {
    unsafe fn create_buffer(&self, info: &BufferInfo, name: Option<&str>) -> Result<SoftBuffer, OutOfMemoryError> {
        SoftBuffer::new(&self.shared, info, name)
    }

    unsafe fn create_acceleration_structure(
        &self,
        info: &AccelerationStructureInfo<SoftBackend>,
        name: Option<&str>,
    ) -> Result<SoftAccelerationStructure, BackendError> {
        SoftAccelerationStructure::new(&self.shared, info, name)
    }

    unsafe fn create_query_pool(&self, query_type: QueryType, query_count: u32) -> SoftQueryPool {
        SoftQueryPool::new(query_type, query_count)
    }

    unsafe fn create_fence(&self) -> SoftFence {
        SoftFence::new()
    }

    unsafe fn create_command_buffer(&self) -> SoftCommandBuffer {
        SoftCommandBuffer::new()
    }

    unsafe fn create_deferred_operation(&self) -> Result<SoftDeferredOperation, BackendError> {
        Ok(SoftDeferredOperation::new())
    }

    unsafe fn get_acceleration_structure_build_sizes(
        &self,
        _build_type: AccelerationStructureBuildType,
        inputs: &AccelerationStructureInputs<SoftBackend>,
        flags: BuildAccelerationStructureFlags,
    ) -> AccelerationStructureSizes {
        ops::build_sizes(inputs, flags)
    }

    unsafe fn build_acceleration_structures(
        &self,
        deferred_operation: Option<&SoftDeferredOperation>,
        infos: &[AccelerationStructureBuildInfo<SoftBackend>],
    ) -> Result<HostOperationStatus, BackendError> {
        let mut tasks = Vec::with_capacity(infos.len());
        for info in infos {
            let job = BuildJob::from_info(info)?;
            require_host_build(&job)?;
            tasks.push(ops::build_task(&self.shared, job)?);
        }
        self.run_host(deferred_operation, HostTask::merge(tasks))
    }

    unsafe fn copy_acceleration_structure(
        &self,
        deferred_operation: Option<&SoftDeferredOperation>,
        src: &SoftAccelerationStructure,
        dst: &SoftAccelerationStructure,
        mode: CopyMode,
    ) -> Result<HostOperationStatus, BackendError> {
        src.require_host_visible("host copy source")?;
        dst.require_host_visible("host copy destination")?;
        self.run_host(deferred_operation, ops::copy_task(src, dst, mode)?)
    }

    unsafe fn copy_acceleration_structure_to_memory(
        &self,
        deferred_operation: Option<&SoftDeferredOperation>,
        src: &SoftAccelerationStructure,
        dst: &SoftBuffer,
        dst_offset: u64,
    ) -> Result<HostOperationStatus, BackendError> {
        src.require_host_visible("host serialization source")?;
        dst.require_host_visible("host serialization destination")?;
        self.run_host(deferred_operation, ops::serialize_task(&self.shared, src, dst, dst_offset))
    }

    unsafe fn copy_memory_to_acceleration_structure(
        &self,
        deferred_operation: Option<&SoftDeferredOperation>,
        src: &SoftBuffer,
        src_offset: u64,
        dst: &SoftAccelerationStructure,
    ) -> Result<HostOperationStatus, BackendError> {
        src.require_host_visible("host deserialization source")?;
        dst.require_host_visible("host deserialization destination")?;
        self.run_host(deferred_operation, ops::deserialize_task(&self.shared, src, src_offset, dst))
    }

    unsafe fn write_acceleration_structures_properties(
        &self,
        acceleration_structures: &[&SoftAccelerationStructure],
        query_type: QueryType,
        results: &mut [u64],
    ) -> Result<(), BackendError> {
        if results.len() < acceleration_structures.len() {
            return Err(BackendError::invalid_usage("result slice is shorter than the structure list"));
        }
        let mut structures = Vec::with_capacity(acceleration_structures.len());
        for structure in acceleration_structures {
            structure.require_host_visible("host property query")?;
            structures.push((*structure).clone());
        }
        let values = ops::properties(&structures, query_type)?;
        results[..values.len()].copy_from_slice(&values);
        Ok(())
    }

    fn acceleration_structure_compatibility(&self, header: &SerializedHeader) -> AccelerationStructureCompatibility {
        ops::compatibility(&self.shared, header)
    }

    fn queue(&self) -> &SoftQueue {
        &self.queue
    }

    unsafe fn wait_for_idle(&self) {
        self.queue.wait_for_idle();
    }

    fn status(&self) -> Result<(), BackendError> {
        match self.shared.first_device_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
