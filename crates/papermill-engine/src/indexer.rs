use std::sync::Arc;
use std::time::Duration;

use papermill_store::{now_rfc3339, DocumentMetaPatch, Store, TaskRow};
use serde_json::json;
use tracing::warn;

use crate::chunker::{chunk_text, ChunkingConfig};
use crate::context::TaskContext;
use crate::embed::{EmbedError, EmbeddingClient};
use crate::registry::{HandlerError, TaskHandler};

/// Task kind the indexing handler registers under.
pub const DOC_INDEX_KIND: &str = "doc.index";

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunking: ChunkingConfig,
    /// Fixed sleep before retrying the same chunk after a rate limit.
    pub rate_limit_backoff: Duration,
    /// Non-rate-limit embedding errors tolerated before aborting the task.
    pub max_embed_errors: u32,
    /// Report progress every this many chunks (and on the last one).
    pub progress_every: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            rate_limit_backoff: Duration::from_secs(5),
            max_embed_errors: 3,
            progress_every: 5,
        }
    }
}

/// Indexes a document: chunk its text, embed each chunk, persist chunk rows
/// in index order, then flip the document's metadata to indexed.
///
/// Idempotence is keyed off persisted side effects, not task identity: any
/// existing chunk rows mean a prior run already succeeded, so re-invocation
/// (duplicate enqueue, retry after a crash that left the task running) is a
/// no-op. A cancelled run keeps its partial chunks; operators force a full
/// re-index by clearing the document's chunks first.
pub struct DocumentIndexer {
    store: Store,
    embedder: Arc<dyn EmbeddingClient>,
    cfg: IndexerConfig,
}

impl DocumentIndexer {
    pub fn new(store: Store, embedder: Arc<dyn EmbeddingClient>, cfg: IndexerConfig) -> Self {
        Self {
            store,
            embedder,
            cfg,
        }
    }
}

#[async_trait::async_trait]
impl TaskHandler for DocumentIndexer {
    async fn run(
        &self,
        task: &TaskRow,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, HandlerError> {
        let document_id = task
            .payload
            .get("document_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerError::Fatal("payload missing document_id".into()))?;

        let doc = self
            .store
            .get_document_async(document_id)
            .await
            .map_err(|e| HandlerError::Retryable(e.to_string()))?
            .ok_or_else(|| HandlerError::Fatal(format!("document {document_id} not found")))?;

        let existing = self
            .store
            .count_chunks_async(document_id)
            .await
            .map_err(|e| HandlerError::Retryable(e.to_string()))?;
        if existing > 0 {
            ctx.log("document already has chunks; skipping re-index");
            return Ok(json!({"status": "skipped", "chunks_existing": existing}));
        }

        if doc.text_content.trim().is_empty() {
            return Err(HandlerError::Fatal(format!(
                "document {document_id} has no text content"
            )));
        }

        ctx.update_progress(10.0, Some("chunking text")).await;
        let chunks = chunk_text(&doc.text_content, &self.cfg.chunking);
        let total = chunks.len();
        ctx.log(&format!("embedding {total} chunks for document {document_id}"));

        let mut embed_errors = 0u32;
        let mut persisted = 0usize;
        let mut index = 0usize;
        while index < total {
            if ctx.cancelled() {
                ctx.log(&format!(
                    "cancelled after persisting {persisted} of {total} chunks"
                ));
                return Ok(json!({
                    "status": "cancelled",
                    "chunks_created": persisted,
                    "chunks_total": total,
                }));
            }
            let content = &chunks[index];
            let vector = match self.embedder.embed(content).await {
                Ok(v) => v,
                Err(EmbedError::RateLimited) => {
                    // Same chunk index is retried; rate limits are bounded
                    // only by the task timeout, not the error budget.
                    ctx.log(&format!("rate limited on chunk {index}; backing off"));
                    tokio::time::sleep(self.cfg.rate_limit_backoff).await;
                    continue;
                }
                Err(EmbedError::Failed(msg)) => {
                    embed_errors += 1;
                    warn!(task = %ctx.task_id(), chunk = index, error = %msg, "embedding failed");
                    if embed_errors > self.cfg.max_embed_errors {
                        return Err(HandlerError::Retryable(format!(
                            "aborting after {embed_errors} embedding errors; last: {msg}"
                        )));
                    }
                    continue;
                }
            };
            self.store
                .insert_chunk_async(document_id, index as i64, content, &vector)
                .await
                .map_err(|e| HandlerError::Retryable(e.to_string()))?;
            persisted += 1;
            index += 1;
            if index % self.cfg.progress_every == 0 || index == total {
                let pct = 10.0 + 85.0 * (index as f64 / total as f64);
                ctx.update_progress(pct, Some(&format!("embedded {index} of {total} chunks")))
                    .await;
            }
        }

        self.store
            .update_document_metadata_async(
                document_id,
                &DocumentMetaPatch {
                    needs_indexing: Some(false),
                    indexed_at: Some(now_rfc3339()),
                    chunks_created: Some(total as i64),
                },
            )
            .await
            .map_err(|e| HandlerError::Retryable(e.to_string()))?;

        Ok(json!({
            "status": "indexed",
            "chunks_created": total,
            "embed_errors": embed_errors,
        }))
    }
}
