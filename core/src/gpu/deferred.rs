use super::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostOperationStatus {
  /// The operation finished before the call returned.
  NotDeferred,
  /// The operation was attached to the deferred operation and must be joined.
  Deferred
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredJoinResult {
  Complete,
  ThreadDone,
  ThreadIdle
}

pub trait DeferredOperation {
  /// Number of threads that can usefully join right now. 0 once complete.
  fn max_concurrency(&self) -> u32;
  /// `Err` carries the failure of a piece of work this call executed. The operation keeps
  /// going and the thread may join again.
  unsafe fn join(&self) -> Result<DeferredJoinResult, BackendError>;
  /// `None` while the operation is still pending. Otherwise the first failure of any thread.
  fn result(&self) -> Option<Result<(), BackendError>>;
}
