use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum MemoryKind {
  VRAM,
  RAM
}

impl MemoryKind {
  pub fn is_host_visible(self) -> bool {
    self == MemoryKind::RAM
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("out of memory: requested {requested} bytes, {available} bytes available")]
pub struct OutOfMemoryError {
  pub requested: u64,
  pub available: u64
}
