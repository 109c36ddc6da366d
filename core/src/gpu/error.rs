use thiserror::Error;

use super::*;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
  #[error(transparent)]
  OutOfMemory(#[from] OutOfMemoryError),
  #[error("results are not available yet")]
  NotReady,
  #[error("invalid usage: {0}")]
  InvalidUsage(String),
  #[error("no acceleration structure or buffer at device address {0:#x}")]
  UnknownAddress(u64),
  #[error("serialized data was produced by an incompatible device")]
  Incompatible,
  #[error("device lost: {0}")]
  DeviceLost(String)
}

impl BackendError {
  pub fn invalid_usage(message: impl Into<String>) -> Self {
    BackendError::InvalidUsage(message.into())
  }
}
