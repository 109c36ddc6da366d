use super::*;

pub trait Device<B: GPUBackend> {
  unsafe fn create_buffer(&self, info: &BufferInfo, name: Option<&str>) -> Result<B::Buffer, OutOfMemoryError>;
  unsafe fn create_acceleration_structure(&self, info: &AccelerationStructureInfo<B>, name: Option<&str>) -> Result<B::AccelerationStructure, BackendError>;
  unsafe fn create_query_pool(&self, query_type: QueryType, query_count: u32) -> B::QueryPool;
  unsafe fn create_fence(&self) -> B::Fence;
  unsafe fn create_command_buffer(&self) -> B::CommandBuffer;
  unsafe fn create_deferred_operation(&self) -> Result<B::DeferredOperation, BackendError>;

  unsafe fn get_acceleration_structure_build_sizes(
    &self,
    build_type: AccelerationStructureBuildType,
    inputs: &AccelerationStructureInputs<B>,
    flags: BuildAccelerationStructureFlags
  ) -> AccelerationStructureSizes;

  // Host commands. The acceleration structures and buffers they touch must live in host visible memory.
  unsafe fn build_acceleration_structures(
    &self,
    deferred_operation: Option<&B::DeferredOperation>,
    infos: &[AccelerationStructureBuildInfo<B>]
  ) -> Result<HostOperationStatus, BackendError>;
  unsafe fn copy_acceleration_structure(
    &self,
    deferred_operation: Option<&B::DeferredOperation>,
    src: &B::AccelerationStructure,
    dst: &B::AccelerationStructure,
    mode: CopyMode
  ) -> Result<HostOperationStatus, BackendError>;
  unsafe fn copy_acceleration_structure_to_memory(
    &self,
    deferred_operation: Option<&B::DeferredOperation>,
    src: &B::AccelerationStructure,
    dst: &B::Buffer,
    dst_offset: u64
  ) -> Result<HostOperationStatus, BackendError>;
  unsafe fn copy_memory_to_acceleration_structure(
    &self,
    deferred_operation: Option<&B::DeferredOperation>,
    src: &B::Buffer,
    src_offset: u64,
    dst: &B::AccelerationStructure
  ) -> Result<HostOperationStatus, BackendError>;
  unsafe fn write_acceleration_structures_properties(
    &self,
    acceleration_structures: &[&B::AccelerationStructure],
    query_type: QueryType,
    results: &mut [u64]
  ) -> Result<(), BackendError>;

  fn acceleration_structure_compatibility(&self, header: &SerializedHeader) -> AccelerationStructureCompatibility;

  fn queue(&self) -> &B::Queue;
  unsafe fn wait_for_idle(&self);

  /// Reports the first failure of submitted work, if any.
  fn status(&self) -> Result<(), BackendError>;
}
