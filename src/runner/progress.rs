// src/runner/progress.rs
//! Task handles for long-running backend work (snapshot saves).
//!
//! A `ProgressingFuture` can be polled for progress, cancelled, awaited from
//! async code with `wait()`, or joined from synchronous code with `join()`.
//! Work runs on a tokio blocking thread and checks `TaskState::checkpoint`
//! between units so that cancellation is observed promptly.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use super::error::{BackendError, BackendResult};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Receives progress updates in percent (0..=100).
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, percent: u8);
}

impl<F> ProgressReporter for F
where
    F: Fn(u8) + Send + Sync,
{
    fn report_progress(&self, percent: u8) {
        self(percent)
    }
}

/// Reporter that discards updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report_progress(&self, _percent: u8) {}
}

#[derive(Debug, Default)]
pub struct TaskState {
    progress: AtomicU8,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl TaskState {
    pub fn set_progress(&self, percent: u8) {
        self.progress.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Call between units of work; fails once cancellation was requested.
    pub fn checkpoint(&self) -> BackendResult<()> {
        if self.is_cancelled() {
            Err(BackendError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl ProgressReporter for TaskState {
    fn report_progress(&self, percent: u8) {
        self.set_progress(percent);
    }
}

/// Handle to a background task. `E` defaults to `BackendError`; callers that
/// wrap several backend tasks (the history store) use their own error type.
pub struct ProgressingFuture<T, E = BackendError> {
    state: Arc<TaskState>,
    result: oneshot::Receiver<Result<T, E>>,
}

impl<T: Send + 'static, E: Send + 'static> ProgressingFuture<T, E> {
    /// Runs `work` on the blocking pool of `handle`.
    pub fn spawn_blocking<F>(handle: &tokio::runtime::Handle, work: F) -> Self
    where
        F: FnOnce(&TaskState) -> Result<T, E> + Send + 'static,
    {
        let state = Arc::new(TaskState::default());
        let (tx, rx) = oneshot::channel();
        let task_state = Arc::clone(&state);
        handle.spawn_blocking(move || {
            let result = work(&task_state);
            if result.is_ok() {
                task_state.set_progress(100);
            }
            // The receiver may have been dropped; the work is done either way.
            let _ = tx.send(result);
            task_state.finished.store(true, Ordering::SeqCst);
        });
        ProgressingFuture { state, result: rx }
    }

    /// An already completed future.
    pub fn ready(result: Result<T, E>) -> Self {
        let state = Arc::new(TaskState::default());
        if result.is_ok() {
            state.set_progress(100);
        }
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        state.finished.store(true, Ordering::SeqCst);
        ProgressingFuture { state, result: rx }
    }
}

impl<T, E> ProgressingFuture<T, E> {
    pub fn progress(&self) -> u8 {
        self.state.progress()
    }

    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }
}

impl<T, E: From<BackendError>> ProgressingFuture<T, E> {
    pub async fn wait(self) -> Result<T, E> {
        self.result
            .await
            .map_err(|_| BackendError::Worker("task dropped before completion".to_string()))?
    }

    /// Blocks the current thread until the task completes. Must not be called
    /// from within an async context.
    pub fn join(self) -> Result<T, E> {
        self.result
            .blocking_recv()
            .map_err(|_| BackendError::Worker("task dropped before completion".to_string()))?
    }

    /// Like `join`, but forwards a cancellation of `parent` to this task while
    /// waiting for it.
    pub fn join_within(mut self, parent: &TaskState) -> Result<T, E> {
        loop {
            match self.result.try_recv() {
                Ok(result) => return result,
                Err(oneshot::error::TryRecvError::Empty) => {
                    if parent.is_cancelled() {
                        self.cancel();
                    }
                    std::thread::sleep(CANCEL_POLL_INTERVAL);
                }
                Err(oneshot::error::TryRecvError::Closed) => {
                    return Err(BackendError::Worker("task dropped before completion".to_string()).into());
                }
            }
        }
    }
}

impl<T, E> fmt::Debug for ProgressingFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressingFuture")
            .field("progress", &self.progress())
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}
