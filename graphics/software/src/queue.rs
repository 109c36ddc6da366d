use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{
    unbounded,
    Receiver,
    Sender,
};
use parking_lot::{
    Condvar,
    Mutex,
};
use raycts_core::gpu::{
    BackendError,
    Queue,
    Submission,
};

use crate::command::{
    execute,
    Command,
};
use crate::shared::catch_panic;
use crate::{
    SoftBackend,
    SoftFence,
    SoftShared,
};

enum QueueMessage {
    Submit {
        commands: Vec<Command>,
        signals: Vec<(SoftFence, u64)>,
    },
    Shutdown,
}

struct PendingWork {
    count: Mutex<u64>,
    condvar: Condvar,
}

impl PendingWork {
    fn finish_one(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        self.condvar.notify_all();
    }
}

/// Executes submitted command buffers in submission order on a dedicated thread.
pub struct SoftQueue {
    shared: Arc<SoftShared>,
    sender: Sender<QueueMessage>,
    pending: Arc<PendingWork>,
    thread: Option<JoinHandle<()>>,
}

impl SoftQueue {
    pub(crate) fn new(shared: &Arc<SoftShared>) -> Self {
        let (sender, receiver) = unbounded();
        let pending = Arc::new(PendingWork {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let thread_pending = pending.clone();
        let thread = std::thread::Builder::new()
            .name("SoftQueue".to_string())
            .spawn(move || queue_thread(thread_shared, thread_pending, receiver))
            .map_err(|error| log::error!("Failed to spawn the queue thread, submissions execute inline: {}", error))
            .ok();
        Self {
            shared: shared.clone(),
            sender,
            pending,
            thread,
        }
    }
}

fn execute_submission(shared: &Arc<SoftShared>, commands: &[Command], signals: &[(SoftFence, u64)]) {
    for command in commands {
        execute_guarded(shared, || execute(shared, command));
    }
    for (fence, value) in signals {
        fence.signal(*value);
    }
}

/// Failures, panics included, end up as device errors so the fences still get signalled.
fn execute_guarded<F>(shared: &SoftShared, work: F)
where
    F: FnOnce() -> Result<(), BackendError>,
{
    if let Err(error) = catch_panic(work) {
        log::error!("Queue execution failed: {}", error);
        shared.record_device_error(error);
    }
}

fn queue_thread(shared: Arc<SoftShared>, pending: Arc<PendingWork>, receiver: Receiver<QueueMessage>) {
    while let Ok(message) = receiver.recv() {
        match message {
            QueueMessage::Submit { commands, signals } => {
                execute_submission(&shared, &commands, &signals);
                pending.finish_one();
            }
            QueueMessage::Shutdown => break,
        }
    }
    log::trace!("Queue thread exiting");
}

impl Queue<SoftBackend> for SoftQueue {
    unsafe fn submit(&self, submissions: &[Submission<SoftBackend>]) {
        for submission in submissions {
            let commands: Vec<Command> = submission
                .command_buffers
                .iter()
                .flat_map(|command_buffer| command_buffer.commands().iter().cloned())
                .collect();
            let signals: Vec<(SoftFence, u64)> = submission
                .signal_fences
                .iter()
                .map(|pair| (pair.fence.clone(), pair.value))
                .collect();
            log::trace!("Submitting {} commands", commands.len());

            if self.thread.is_none() {
                execute_submission(&self.shared, &commands, &signals);
                continue;
            }
            *self.pending.count.lock() += 1;
            if let Err(error) = self.sender.send(QueueMessage::Submit { commands, signals }) {
                if let QueueMessage::Submit { commands, signals } = error.into_inner() {
                    log::warn!("Queue thread is gone, executing the submission inline");
                    execute_submission(&self.shared, &commands, &signals);
                }
                self.pending.finish_one();
            }
        }
    }

    unsafe fn wait_for_idle(&self) {
        let mut count = self.pending.count.lock();
        while *count != 0 {
            self.pending.condvar.wait(&mut count);
        }
    }
}

impl Drop for SoftQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(QueueMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Queue thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::SoftDeviceConfig;

    #[test]
    fn panicking_commands_become_device_errors() {
        let shared = SoftShared::new(SoftDeviceConfig::default());
        execute_guarded(&shared, || Ok(()));
        assert_eq!(shared.first_device_error(), None);
        execute_guarded(&shared, || panic!("command exploded"));
        execute_guarded(&shared, || Err(BackendError::NotReady));
        assert_eq!(
            shared.first_device_error(),
            Some(BackendError::DeviceLost("panic: command exploded".to_string()))
        );
    }
}
