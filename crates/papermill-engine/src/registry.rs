use std::collections::HashMap;
use std::sync::Arc;

use papermill_store::TaskRow;

use crate::context::TaskContext;

/// Handler failure, tagged with whether the queue should retry the task.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Configuration or content errors: retrying cannot help.
    #[error("{0}")]
    Fatal(String),
    /// Transient external failures, eligible for queue-level retry/backoff.
    #[error("{0}")]
    Retryable(String),
}

#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &TaskRow, ctx: TaskContext)
        -> Result<serde_json::Value, HandlerError>;
}

/// Process-local map from task kind to handler, built once at startup and
/// passed into the executor. Deliberately a plain value rather than a global
/// registration side effect, so handler sets are testable in isolation.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    pub fn lookup(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }
}
