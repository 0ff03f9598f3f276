use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use papermill_store::Store;
use tracing::{debug, info};

/// Per-attempt context handed to a handler: progress reporting, logging
/// tagged with the task id, and the cooperative cancel flag.
///
/// Cancellation is never forced. The executor flips the flag when the
/// deadline fires and the handler is expected to poll `cancelled()` between
/// expensive steps and exit early.
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    store: Store,
    cancel: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(task_id: impl Into<String>, store: Store, cancel: Arc<AtomicBool>) -> Self {
        Self {
            task_id: task_id.into(),
            store,
            cancel,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Best effort: progress on a task that is no longer running is dropped
    /// by the store's status guard, which is exactly what we want for late
    /// reporters.
    pub async fn update_progress(&self, percent: f64, message: Option<&str>) {
        match self
            .store
            .update_task_progress_async(&self.task_id, percent, message)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(task = %self.task_id, "progress update ignored; task not running"),
            Err(err) => debug!(task = %self.task_id, %err, "progress update failed"),
        }
    }

    pub fn log(&self, message: &str) {
        info!(task = %self.task_id, "{message}");
    }
}
