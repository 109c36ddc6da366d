use thiserror::Error;

use super::gpu::{
    BackendError,
    OutOfMemoryError,
};

/// Failure of a single thread joined to a deferred host operation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("worker {worker}: {error}")]
pub struct WorkerError {
    pub worker: u32,
    pub error: BackendError,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemoryError),
    #[error("query results are not available before the recording submission completed")]
    QueryNotReady,
    #[error("incompatible build flags: {0}")]
    IncompatibleFlags(String),
    #[error("incompatible serialized data: {0}")]
    IncompatibleSerialFormat(String),
    #[error("{} deferred worker(s) failed, first: {}", .0.len(), first_worker_error(.0))]
    WorkerFailure(Vec<WorkerError>),
    #[error("invalid instance: {0}")]
    InvalidInstance(String),
    #[error("{0} has not been built")]
    NotBuilt(String),
    #[error(transparent)]
    Backend(BackendError),
}

fn first_worker_error(errors: &[WorkerError]) -> String {
    errors.first().map(|error| error.to_string()).unwrap_or_default()
}

impl From<BackendError> for Error {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::OutOfMemory(error) => Error::OutOfMemory(error),
            BackendError::NotReady => Error::QueryNotReady,
            BackendError::Incompatible => Error::IncompatibleSerialFormat("the device rejected the compatibility tag".to_string()),
            error => Error::Backend(error),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_the_taxonomy() {
        assert_eq!(Error::from(BackendError::NotReady), Error::QueryNotReady);
        assert!(matches!(Error::from(BackendError::Incompatible), Error::IncompatibleSerialFormat(_)));
        assert!(matches!(
            Error::from(BackendError::OutOfMemory(OutOfMemoryError { requested: 4, available: 0 })),
            Error::OutOfMemory(_)
        ));
        assert_eq!(Error::from(BackendError::UnknownAddress(64)), Error::Backend(BackendError::UnknownAddress(64)));
    }

    #[test]
    fn worker_failures_name_the_first_worker() {
        let error = Error::WorkerFailure(vec![
            WorkerError { worker: 2, error: BackendError::invalid_usage("broken") },
            WorkerError { worker: 0, error: BackendError::invalid_usage("broken") },
        ]);
        assert_eq!(error.to_string(), "2 deferred worker(s) failed, first: worker 2: invalid usage: broken");
    }
}
