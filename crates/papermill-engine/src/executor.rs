use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use papermill_store::{Store, TaskRow};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::TaskContext;
use crate::registry::{HandlerError, HandlerRegistry};

/// Turns claimed tasks into handler invocations with time and concurrency
/// bounds. All coordination goes through the store; the executor itself keeps
/// no durable state and any number of executors may run against the same db.
#[derive(Clone)]
pub struct Executor {
    store: Store,
    registry: Arc<HandlerRegistry>,
}

impl Executor {
    pub fn new(store: Store, registry: Arc<HandlerRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Batch drain: claim and run up to `max_tasks` sequentially. Returns the
    /// number of tasks processed. Used by the externally triggered sweep.
    pub async fn process_pending_tasks(&self, max_tasks: usize) -> anyhow::Result<usize> {
        let mut processed = 0usize;
        while processed < max_tasks {
            match self.store.claim_next_task_async().await? {
                Some(task) => {
                    self.run_claimed(task).await;
                    processed += 1;
                }
                None => break,
            }
        }
        Ok(processed)
    }

    /// Continuous pool: poll, claim while under `max_concurrent`, dispatch
    /// without waiting for completion. The returned handle halts further
    /// claiming; in-flight handlers are allowed to finish.
    pub fn start(&self, poll_interval: Duration, max_concurrent: usize) -> ExecutorHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let exec = self.clone();
        let stop_flag = stop.clone();
        let active_gauge = active.clone();
        let handle = tokio::spawn(async move {
            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                if active_gauge.load(Ordering::SeqCst) < max_concurrent {
                    match exec.store.claim_next_task_async().await {
                        Ok(Some(task)) => {
                            active_gauge.fetch_add(1, Ordering::SeqCst);
                            let exec_task = exec.clone();
                            let gauge = active_gauge.clone();
                            tokio::spawn(async move {
                                exec_task.run_claimed(task).await;
                                gauge.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(%err, "claim poll failed");
                        }
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
            info!("task processor stopped");
        });
        ExecutorHandle {
            stop,
            active,
            handle,
        }
    }

    /// Run one already-claimed task to an outcome: completed, failed (with or
    /// without requeue) or cancelled. Never returns an error; every path
    /// reports back to the queue and logs with the task id.
    pub async fn run_claimed(&self, task: TaskRow) {
        let id = task.id.clone();
        let Some(handler) = self.registry.lookup(&task.kind) else {
            warn!(task = %id, kind = %task.kind, "no handler registered");
            let _ = self
                .store
                .fail_task_async(
                    &id,
                    &format!("no handler registered for kind '{}'", task.kind),
                    false,
                )
                .await;
            return;
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = TaskContext::new(id.clone(), self.store.clone(), cancel.clone());
        let timeout_ms = task.timeout_ms.max(1) as u64;
        let handler_task = task.clone();
        let join: JoinHandle<Result<serde_json::Value, HandlerError>> =
            tokio::spawn(async move { handler.run(&handler_task, ctx).await });

        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(deadline);

        tokio::select! {
            joined = join => match joined {
                Ok(Ok(result)) => {
                    if result.get("status").and_then(|v| v.as_str()) == Some("cancelled") {
                        let _ = self.store.cancel_running_task_async(&id, &result).await;
                        info!(task = %id, "task cancelled by handler");
                    } else if self
                        .store
                        .complete_task_async(&id, &result)
                        .await
                        .unwrap_or(false)
                    {
                        info!(task = %id, kind = %task.kind, "task completed");
                    } else {
                        warn!(task = %id, "completion ignored; task no longer running");
                    }
                }
                Ok(Err(HandlerError::Fatal(msg))) => {
                    warn!(task = %id, error = %msg, "task failed (not retryable)");
                    let _ = self.store.fail_task_async(&id, &msg, false).await;
                }
                Ok(Err(HandlerError::Retryable(msg))) => {
                    let outcome = self.store.fail_task_async(&id, &msg, true).await;
                    warn!(task = %id, error = %msg, ?outcome, "task failed");
                }
                Err(join_err) => {
                    let msg = format!("handler panicked: {join_err}");
                    warn!(task = %id, error = %msg, "task failed");
                    let _ = self.store.fail_task_async(&id, &msg, true).await;
                }
            },
            _ = &mut deadline => {
                // Cooperative: flip the flag so the handler exits at its next
                // checkpoint, then fail the attempt. The detached handler's
                // late outcome is discarded by the running-status guards.
                cancel.store(true, Ordering::SeqCst);
                let msg = format!("timeout after {timeout_ms}ms");
                warn!(task = %id, error = %msg, "task timed out");
                let _ = self.store.fail_task_async(&id, &msg, true).await;
            }
        }
    }
}

/// Stop handle for the continuous pool.
pub struct ExecutorHandle {
    stop: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl ExecutorHandle {
    /// Halt further claiming. Dispatched handlers keep running.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Number of handlers currently in flight.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait for the poll loop to exit after `stop()`.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}
