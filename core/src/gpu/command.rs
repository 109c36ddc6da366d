use super::*;

bitflags! {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
  pub struct BarrierSync: u32 {
    const COPY                              = 0b1;
    const HOST                              = 0b10;
    const ACCELERATION_STRUCTURE_BUILD      = 0b100;
    const ACCELERATION_STRUCTURE_COPY       = 0b1000;
    const RAY_QUERY                         = 0b10000;
    const QUERY                             = 0b100000;
  }
}

bitflags! {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
  pub struct BarrierAccess: u32 {
    const COPY_READ                    = 0b1;
    const COPY_WRITE                   = 0b10;
    const SHADER_READ                  = 0b100;
    const SHADER_WRITE                 = 0b1000;
    const HOST_READ                    = 0b10000;
    const HOST_WRITE                   = 0b100000;
    const ACCELERATION_STRUCTURE_READ  = 0b1000000;
    const ACCELERATION_STRUCTURE_WRITE = 0b10000000;
  }
}

impl BarrierAccess {
  pub fn write_mask() -> BarrierAccess {
    BarrierAccess::COPY_WRITE | BarrierAccess::SHADER_WRITE | BarrierAccess::HOST_WRITE | BarrierAccess::ACCELERATION_STRUCTURE_WRITE
  }

  pub fn is_write(&self) -> bool {
    self.intersects(Self::write_mask())
  }
}

/// Global memory barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Barrier {
  pub old_sync: BarrierSync,
  pub new_sync: BarrierSync,
  pub old_access: BarrierAccess,
  pub new_access: BarrierAccess
}

impl Barrier {
  pub fn acceleration_structure_write_to_read() -> Self {
    Self {
      old_sync: BarrierSync::ACCELERATION_STRUCTURE_BUILD | BarrierSync::ACCELERATION_STRUCTURE_COPY,
      new_sync: BarrierSync::ACCELERATION_STRUCTURE_BUILD | BarrierSync::ACCELERATION_STRUCTURE_COPY | BarrierSync::RAY_QUERY | BarrierSync::QUERY,
      old_access: BarrierAccess::ACCELERATION_STRUCTURE_WRITE,
      new_access: BarrierAccess::ACCELERATION_STRUCTURE_READ
    }
  }
}

pub trait CommandBuffer<B: GPUBackend> {
  unsafe fn begin(&mut self);
  unsafe fn finish(&mut self);
  unsafe fn reset(&mut self);

  unsafe fn begin_label(&mut self, label: &str);
  unsafe fn end_label(&mut self);
  unsafe fn barrier(&mut self, barriers: &[Barrier]);

  unsafe fn build_acceleration_structures(&mut self, infos: &[AccelerationStructureBuildInfo<B>]);
  /// Only [`CopyMode::Clone`] and [`CopyMode::Compact`] are valid here.
  unsafe fn copy_acceleration_structure(&mut self, src: &B::AccelerationStructure, dst: &B::AccelerationStructure, mode: CopyMode);
  unsafe fn copy_acceleration_structure_to_memory(&mut self, src: &B::AccelerationStructure, dst: &B::Buffer, dst_offset: u64);
  unsafe fn copy_memory_to_acceleration_structure(&mut self, src: &B::Buffer, src_offset: u64, dst: &B::AccelerationStructure);

  unsafe fn reset_query_pool(&mut self, query_pool: &B::QueryPool, first_query: u32, query_count: u32);
  unsafe fn write_acceleration_structures_properties(&mut self, acceleration_structures: &[&B::AccelerationStructure], query_pool: &B::QueryPool, first_query: u32);

  unsafe fn trace_ray_queries(&mut self, info: &RayQueryDispatchInfo<B>);
}
