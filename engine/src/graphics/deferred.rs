use log::{
    trace,
    warn,
};

use super::gpu::{
    self,
    BackendError,
    DeferredJoinResult,
    Device as _,
    HostOperationStatus,
};
use super::*;

/// Upper bound for the number of threads joined to one deferred operation.
pub const MAX_DEFERRED_THREADS: u32 = 256;

/// `worker_threads == 0` finishes the operation on the calling thread.
/// `u32::MAX` uses as many threads as the operation reports it can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeferredSettings {
    pub worker_threads: u32,
}

pub struct DeferredOperationCoordinator;

impl DeferredOperationCoordinator {
    /// Joins threads to `operation` until it completed and returns its result. Every
    /// failure a worker ran into is reported, tagged with that worker, once all of them returned.
    pub fn run_deferred<O>(operation: &O, thread_count: u32) -> Result<()>
    where
        O: gpu::DeferredOperation + Sync,
    {
        if thread_count == 0 {
            let mut errors = finish_on_thread(operation);
            return match errors.len() {
                0 => wait_for_result(operation).map_err(Error::from),
                1 => Err(Error::from(errors.remove(0))),
                _ => Err(Error::WorkerFailure(
                    errors.into_iter().map(|error| WorkerError { worker: 0, error }).collect(),
                )),
            };
        }

        let max_threads = operation.max_concurrency().min(MAX_DEFERRED_THREADS);
        if max_threads == 0 {
            return Err(Error::Backend(BackendError::invalid_usage(
                "deferred operation reported no possible concurrency",
            )));
        }
        let thread_count = if thread_count == u32::MAX {
            max_threads
        } else {
            thread_count.min(max_threads)
        };
        trace!("Joining {} threads to a deferred operation", thread_count);

        let results: Vec<(u32, Vec<BackendError>)> = crossbeam_utils::thread::scope(|scope| {
            let handles: Vec<_> = (1..thread_count)
                .map(|worker| scope.spawn(move |_| (worker, finish_on_thread(operation))))
                .collect();
            let mut results = vec![(0, finish_on_thread(operation))];
            for (index, handle) in handles.into_iter().enumerate() {
                let worker = index as u32 + 1;
                results.push(handle.join().unwrap_or_else(|_| {
                    (worker, vec![BackendError::DeviceLost("deferred worker panicked".to_string())])
                }));
            }
            results
        })
        .map_err(|_| Error::Backend(BackendError::DeviceLost("deferred worker panicked".to_string())))?;

        let failures: Vec<WorkerError> = results
            .into_iter()
            .flat_map(|(worker, errors)| errors.into_iter().map(move |error| WorkerError { worker, error }))
            .collect();
        if failures.is_empty() {
            wait_for_result(operation).map_err(Error::from)
        } else {
            Err(Error::WorkerFailure(failures))
        }
    }
}

/// Joins until this thread has nothing left to do and returns the failures it ran into.
fn finish_on_thread<O>(operation: &O) -> Vec<BackendError>
where
    O: gpu::DeferredOperation,
{
    let mut errors = Vec::new();
    loop {
        match unsafe { operation.join() } {
            Ok(DeferredJoinResult::ThreadIdle) => std::thread::yield_now(),
            Ok(DeferredJoinResult::Complete | DeferredJoinResult::ThreadDone) => break,
            Err(error) => errors.push(error),
        }
    }
    errors
}

fn wait_for_result<O>(operation: &O) -> std::result::Result<(), BackendError>
where
    O: gpu::DeferredOperation,
{
    // Another thread may still be finishing the last piece of work.
    loop {
        if let Some(result) = operation.result() {
            return result;
        }
        std::thread::yield_now();
    }
}

/// Runs a host command, optionally attached to a fresh deferred operation.
pub(super) fn execute_host_operation<F>(
    device: &active_gpu_backend::Device,
    deferred: Option<DeferredSettings>,
    operation: F,
) -> Result<()>
where
    F: FnOnce(Option<&active_gpu_backend::DeferredOperation>) -> std::result::Result<HostOperationStatus, BackendError>,
{
    let Some(settings) = deferred else {
        operation(None)?;
        return Ok(());
    };

    let deferred_operation = unsafe { device.create_deferred_operation()? };
    match operation(Some(&deferred_operation))? {
        HostOperationStatus::NotDeferred => {
            warn!("Host operation completed without being deferred");
            Ok(())
        }
        HostOperationStatus::Deferred => {
            DeferredOperationCoordinator::run_deferred(&deferred_operation, settings.worker_threads)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{
        AtomicU32,
        Ordering,
    };

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;

    struct MockOperation {
        units: AtomicU32,
        completed: AtomicU32,
        total: u32,
        // Handed to the first units that get claimed, one each.
        failures: Mutex<Vec<BackendError>>,
        failed: Mutex<Vec<BackendError>>,
        threads: Mutex<HashSet<std::thread::ThreadId>>,
    }

    impl MockOperation {
        fn new(total: u32, failures: Vec<BackendError>) -> Self {
            Self {
                units: AtomicU32::new(total),
                completed: AtomicU32::new(0),
                total,
                failures: Mutex::new(failures),
                failed: Mutex::new(Vec::new()),
                threads: Mutex::new(HashSet::new()),
            }
        }
    }

    impl gpu::DeferredOperation for MockOperation {
        fn max_concurrency(&self) -> u32 {
            self.units.load(Ordering::Acquire)
        }

        unsafe fn join(&self) -> std::result::Result<DeferredJoinResult, BackendError> {
            self.threads.lock().insert(std::thread::current().id());
            loop {
                let remaining = self.units.load(Ordering::Acquire);
                if remaining == 0 {
                    return Ok(if self.completed.load(Ordering::Acquire) == self.total {
                        DeferredJoinResult::Complete
                    } else {
                        DeferredJoinResult::ThreadDone
                    });
                }
                if self
                    .units
                    .compare_exchange(remaining, remaining - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    let failure = self.failures.lock().pop();
                    if let Some(error) = &failure {
                        self.failed.lock().push(error.clone());
                    }
                    self.completed.fetch_add(1, Ordering::AcqRel);
                    if let Some(error) = failure {
                        return Err(error);
                    }
                }
            }
        }

        fn result(&self) -> Option<std::result::Result<(), BackendError>> {
            if self.completed.load(Ordering::Acquire) != self.total {
                return None;
            }
            Some(match self.failed.lock().first() {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            })
        }
    }

    #[test]
    fn zero_threads_finish_on_the_caller() {
        let operation = MockOperation::new(8, Vec::new());
        DeferredOperationCoordinator::run_deferred(&operation, 0).unwrap();
        assert_eq!(operation.completed.load(Ordering::SeqCst), 8);
        let threads = operation.threads.lock();
        assert_eq!(threads.len(), 1);
        assert!(threads.contains(&std::thread::current().id()));
    }

    #[test]
    fn thread_counts_are_clamped_to_the_reported_concurrency() {
        let operation = MockOperation::new(3, Vec::new());
        DeferredOperationCoordinator::run_deferred(&operation, 8).unwrap();
        assert_eq!(operation.completed.load(Ordering::SeqCst), 3);
        assert!(operation.threads.lock().len() <= 3);

        let operation = MockOperation::new(16, Vec::new());
        DeferredOperationCoordinator::run_deferred(&operation, u32::MAX).unwrap();
        assert_eq!(operation.completed.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn operations_without_concurrency_are_rejected() {
        let operation = MockOperation::new(0, Vec::new());
        assert!(matches!(
            DeferredOperationCoordinator::run_deferred(&operation, 2),
            Err(Error::Backend(BackendError::InvalidUsage(_)))
        ));
    }

    #[test]
    fn worker_failures_are_aggregated() {
        let errors = vec![BackendError::UnknownAddress(0x111), BackendError::UnknownAddress(0x222)];
        let operation = MockOperation::new(4, errors.clone());
        match DeferredOperationCoordinator::run_deferred(&operation, 2) {
            Err(Error::WorkerFailure(failures)) => {
                assert!(failures.iter().all(|failure| failure.worker < 2));
                let mut reported: Vec<BackendError> = failures.into_iter().map(|failure| failure.error).collect();
                reported.sort_by_key(|error| error.to_string());
                assert_eq!(reported, errors);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(operation.completed.load(Ordering::SeqCst), 4);

        let operation = MockOperation::new(4, vec![BackendError::UnknownAddress(0x40)]);
        assert_eq!(
            DeferredOperationCoordinator::run_deferred(&operation, 0),
            Err(Error::Backend(BackendError::UnknownAddress(0x40)))
        );

        let operation = MockOperation::new(4, errors.clone());
        match DeferredOperationCoordinator::run_deferred(&operation, 0) {
            Err(Error::WorkerFailure(failures)) => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|failure| failure.worker == 0));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
