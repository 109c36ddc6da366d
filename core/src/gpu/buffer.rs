use super::*;

bitflags! {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
  pub struct BufferUsage: u32 {
    const STORAGE                            = 0b1;
    const COPY_SRC                           = 0b10;
    const COPY_DST                           = 0b100;
    const ACCELERATION_STRUCTURE             = 0b1000;
    const ACCELERATION_STRUCTURE_BUILD_INPUT = 0b10000;
    const ACCELERATION_STRUCTURE_SCRATCH     = 0b100000;
    const SHADER_DEVICE_ADDRESS              = 0b1000000;
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferInfo {
  pub size: u64,
  pub usage: BufferUsage,
  pub memory_kind: MemoryKind
}

pub trait Buffer {
  fn info(&self) -> &BufferInfo;

  /// Device address of the first byte.
  fn va(&self) -> u64;

  /// Host writes are only allowed on host visible memory and must not race with
  /// submitted work that accesses the same range.
  unsafe fn write_data(&self, offset: u64, data: &[u8]) -> Result<(), BackendError>;
  unsafe fn read_data(&self, offset: u64, data: &mut [u8]) -> Result<(), BackendError>;
}
