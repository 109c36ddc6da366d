use std::sync::Arc;

use parking_lot::{
    Condvar,
    Mutex,
};
use raycts_core::gpu::Fence;

struct FenceInner {
    value: Mutex<u64>,
    condvar: Condvar,
}

/// Timeline fence, the value only ever increases.
#[derive(Clone)]
pub struct SoftFence {
    inner: Arc<FenceInner>,
}

impl SoftFence {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(FenceInner {
                value: Mutex::new(0u64),
                condvar: Condvar::new(),
            }),
        }
    }

    pub(crate) fn signal(&self, value: u64) {
        let mut guard = self.inner.value.lock();
        if value > *guard {
            *guard = value;
        }
        self.inner.condvar.notify_all();
    }
}

impl Fence for SoftFence {
    fn value(&self) -> u64 {
        *self.inner.value.lock()
    }

    fn await_value(&self, value: u64) {
        let mut guard = self.inner.value.lock();
        while *guard < value {
            self.inner.condvar.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn await_returns_once_signalled_from_another_thread() {
        let fence = SoftFence::new();
        let signaller = fence.clone();
        let thread = std::thread::spawn(move || {
            signaller.signal(1);
            signaller.signal(3);
        });
        fence.await_value(3);
        thread.join().unwrap();
        assert_eq!(fence.value(), 3);
        fence.signal(2);
        assert_eq!(fence.value(), 3);
    }
}
