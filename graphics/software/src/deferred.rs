use std::sync::atomic::{
    AtomicBool,
    AtomicUsize,
    Ordering,
};
use std::sync::Arc;

use crossbeam_deque::{
    Injector,
    Steal,
};
use parking_lot::Mutex;
use raycts_core::gpu::{
    BackendError,
    DeferredJoinResult,
    DeferredOperation,
};

use crate::shared::catch_panic;

pub(crate) type Unit = Box<dyn FnOnce() -> Result<(), BackendError> + Send>;

/// Host side work split into independent units plus a final step that runs once all
/// units have succeeded.
pub(crate) struct HostTask {
    units: Vec<Unit>,
    finish: Unit,
}

impl HostTask {
    pub(crate) fn new(units: Vec<Unit>, finish: Unit) -> Self {
        Self { units, finish }
    }

    pub(crate) fn single(unit: Unit) -> Self {
        Self {
            units: Vec::new(),
            finish: unit,
        }
    }

    /// Runs the units of every task first, then every finish step in task order.
    pub(crate) fn merge(tasks: Vec<HostTask>) -> Self {
        let mut units = Vec::new();
        let mut finishes = Vec::with_capacity(tasks.len());
        for task in tasks {
            units.extend(task.units);
            finishes.push(task.finish);
        }
        Self {
            units,
            finish: Box::new(move || {
                for finish in finishes {
                    finish()?;
                }
                Ok(())
            }),
        }
    }

    pub(crate) fn run(self) -> Result<(), BackendError> {
        for unit in self.units {
            unit()?;
        }
        (self.finish)()
    }
}

struct DeferredState {
    units: Injector<Unit>,
    remaining: AtomicUsize,
    finish: Mutex<Option<Unit>>,
    errors: Mutex<Vec<BackendError>>,
    complete: AtomicBool,
}

impl DeferredState {
    fn run_unit(&self, unit: Unit) -> Result<(), BackendError> {
        let result = catch_panic(unit);
        if let Err(error) = &result {
            self.errors.lock().push(error.clone());
        }
        let finished = self.complete_unit();
        result.and(finished)
    }

    /// Retires one unit. The last one runs the finish step unless a unit failed.
    fn complete_unit(&self) -> Result<(), BackendError> {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Ok(());
        }
        let finish = self.finish.lock().take();
        let mut result = Ok(());
        if let Some(finish) = finish {
            if self.errors.lock().is_empty() {
                result = catch_panic(finish);
                if let Err(error) = &result {
                    self.errors.lock().push(error.clone());
                }
            }
        }
        self.complete.store(true, Ordering::Release);
        result
    }
}

/// Host operation that any number of threads can join. Units are handed out through a
/// work stealing injector; the thread that completes the last unit runs the finish step.
pub struct SoftDeferredOperation {
    state: Mutex<Option<Arc<DeferredState>>>,
}

impl SoftDeferredOperation {
    pub(crate) fn new() -> Self {
        Self { state: Mutex::new(None) }
    }

    pub(crate) fn install(&self, task: HostTask) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.as_ref() {
            if !existing.complete.load(Ordering::Acquire) {
                return Err(BackendError::invalid_usage("deferred operation is still in use by a pending host command"));
            }
        }

        let HostTask { mut units, finish } = task;
        if units.is_empty() {
            units.push(Box::new(|| Ok(())));
        }
        let injector = Injector::new();
        let remaining = units.len();
        for unit in units {
            injector.push(unit);
        }
        *state = Some(Arc::new(DeferredState {
            units: injector,
            remaining: AtomicUsize::new(remaining),
            finish: Mutex::new(Some(finish)),
            errors: Mutex::new(Vec::new()),
            complete: AtomicBool::new(false),
        }));
        Ok(())
    }

    fn state(&self) -> Option<Arc<DeferredState>> {
        self.state.lock().clone()
    }
}

impl DeferredOperation for SoftDeferredOperation {
    fn max_concurrency(&self) -> u32 {
        match self.state() {
            Some(state) if !state.complete.load(Ordering::Acquire) => state.units.len().max(1) as u32,
            _ => 0,
        }
    }

    unsafe fn join(&self) -> Result<DeferredJoinResult, BackendError> {
        let Some(state) = self.state() else {
            return Ok(DeferredJoinResult::Complete);
        };
        loop {
            match state.units.steal() {
                Steal::Success(unit) => {
                    state.run_unit(unit)?;
                    if state.complete.load(Ordering::Acquire) {
                        return Ok(DeferredJoinResult::Complete);
                    }
                }
                Steal::Retry => return Ok(DeferredJoinResult::ThreadIdle),
                Steal::Empty => {
                    return Ok(if state.complete.load(Ordering::Acquire) {
                        DeferredJoinResult::Complete
                    } else {
                        DeferredJoinResult::ThreadDone
                    });
                }
            }
        }
    }

    fn result(&self) -> Option<Result<(), BackendError>> {
        let state = self.state()?;
        if !state.complete.load(Ordering::Acquire) {
            return None;
        }
        let first = state.errors.lock().first().cloned();
        Some(match first {
            Some(error) => Err(error),
            None => Ok(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use pretty_assertions::assert_eq;

    use super::*;

    fn counting_task(counter: &Arc<AtomicU32>, units: u32) -> HostTask {
        let unit_list = (0..units)
            .map(|_| {
                let counter = counter.clone();
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as Unit
            })
            .collect();
        let finish_counter = counter.clone();
        HostTask::new(
            unit_list,
            Box::new(move || {
                assert_eq!(finish_counter.load(Ordering::SeqCst), units);
                finish_counter.fetch_add(100, Ordering::SeqCst);
                Ok(())
            }),
        )
    }

    #[test]
    fn single_joiner_runs_everything() {
        let counter = Arc::new(AtomicU32::new(0));
        let operation = SoftDeferredOperation::new();
        operation.install(counting_task(&counter, 5)).unwrap();
        assert_eq!(operation.max_concurrency(), 5);
        assert!(operation.result().is_none());
        assert_eq!(unsafe { operation.join() }, Ok(DeferredJoinResult::Complete));
        assert_eq!(counter.load(Ordering::SeqCst), 105);
        assert_eq!(operation.max_concurrency(), 0);
        assert_eq!(operation.result(), Some(Ok(())));
    }

    #[test]
    fn many_joiners_share_the_units() {
        let counter = Arc::new(AtomicU32::new(0));
        let operation = SoftDeferredOperation::new();
        operation.install(counting_task(&counter, 64)).unwrap();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| loop {
                    match unsafe { operation.join() } {
                        Ok(DeferredJoinResult::ThreadIdle) => std::thread::yield_now(),
                        _ => break,
                    }
                });
            }
        });
        while operation.result().is_none() {
            std::thread::yield_now();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 164);
        assert_eq!(operation.result(), Some(Ok(())));
    }

    #[test]
    fn failed_units_skip_the_finish_step() {
        let finished = Arc::new(AtomicBool::new(false));
        let finished_flag = finished.clone();
        let operation = SoftDeferredOperation::new();
        operation
            .install(HostTask::new(
                vec![Box::new(|| Err(BackendError::NotReady))],
                Box::new(move || {
                    finished_flag.store(true, Ordering::SeqCst);
                    Ok(())
                }),
            ))
            .unwrap();
        assert_eq!(unsafe { operation.join() }, Err(BackendError::NotReady));
        assert_eq!(unsafe { operation.join() }, Ok(DeferredJoinResult::Complete));
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(operation.result(), Some(Err(BackendError::NotReady)));
    }

    fn unit<F>(work: F) -> Unit
    where
        F: FnOnce() -> Result<(), BackendError> + Send + 'static,
    {
        Box::new(work)
    }

    fn drain(operation: &SoftDeferredOperation) -> Vec<BackendError> {
        let mut errors = Vec::new();
        loop {
            match unsafe { operation.join() } {
                Ok(DeferredJoinResult::ThreadIdle) => std::thread::yield_now(),
                Ok(_) => break,
                Err(error) => errors.push(error),
            }
        }
        errors
    }

    #[test]
    fn every_unit_failure_reaches_its_joiner() {
        let operation = SoftDeferredOperation::new();
        operation
            .install(HostTask::new(
                vec![
                    unit(|| Err(BackendError::UnknownAddress(0x111))),
                    unit(|| Ok(())),
                    unit(|| Err(BackendError::UnknownAddress(0x222))),
                ],
                Box::new(|| Ok(())),
            ))
            .unwrap();
        let mut errors: Vec<BackendError> = std::thread::scope(|scope| {
            let joiners: Vec<_> = (0..2).map(|_| scope.spawn(|| drain(&operation))).collect();
            joiners.into_iter().flat_map(|joiner| joiner.join().unwrap()).collect()
        });
        errors.sort_by_key(|error| match error {
            BackendError::UnknownAddress(address) => *address,
            _ => 0,
        });
        assert_eq!(
            errors,
            vec![BackendError::UnknownAddress(0x111), BackendError::UnknownAddress(0x222)]
        );
        assert!(matches!(operation.result(), Some(Err(BackendError::UnknownAddress(_)))));
    }

    #[test]
    fn panicking_units_still_complete_the_operation() {
        let counter = Arc::new(AtomicU32::new(0));
        let unit_counter = counter.clone();
        let operation = SoftDeferredOperation::new();
        operation
            .install(HostTask::new(
                vec![
                    unit(|| panic!("unit failed")),
                    unit(move || {
                        unit_counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                ],
                Box::new(|| Ok(())),
            ))
            .unwrap();
        let errors: Vec<BackendError> = std::thread::scope(|scope| {
            let joiners: Vec<_> = (0..2).map(|_| scope.spawn(|| drain(&operation))).collect();
            joiners.into_iter().flat_map(|joiner| joiner.join().unwrap()).collect()
        });
        assert_eq!(errors, vec![BackendError::DeviceLost("panic: unit failed".to_string())]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(operation.result(), Some(Err(BackendError::DeviceLost(_)))));
    }

    #[test]
    fn pending_operations_cannot_be_reused() {
        let counter = Arc::new(AtomicU32::new(0));
        let operation = SoftDeferredOperation::new();
        operation.install(counting_task(&counter, 1)).unwrap();
        assert!(operation.install(counting_task(&counter, 1)).is_err());
        unsafe { operation.join() }.unwrap();
        assert!(operation.install(HostTask::single(Box::new(|| Ok(())))).is_ok());
    }
}
