use super::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryType {
  AccelerationStructureCompactedSize,
  AccelerationStructureSerializationSize
}

pub trait QueryPool {
  fn query_type(&self) -> QueryType;
  fn query_count(&self) -> u32;

  /// Host-side reset, marks every query unavailable.
  unsafe fn reset(&self);

  /// Fails with [`BackendError::NotReady`] if any requested query is unavailable.
  fn get_results(&self, first_query: u32, results: &mut [u64]) -> Result<(), BackendError>;
}
