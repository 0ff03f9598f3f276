use papermill_store::{EnqueueOptions, Store};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::indexer::DOC_INDEX_KIND;

/// Characters hashed from each end of the text for the cheap fingerprint.
const FINGERPRINT_WINDOW: usize = 2048;

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub document_id: String,
    /// None when the upload was deduplicated and no indexing is needed.
    pub task_id: Option<String>,
    pub deduplicated: bool,
}

/// Cheap content fingerprint: sha256 over the first and last
/// `FINGERPRINT_WINDOW` characters plus the total length, so very large
/// documents are not hashed in full at upload time.
pub fn content_fingerprint(text: &str) -> String {
    let head: String = text.chars().take(FINGERPRINT_WINDOW).collect();
    let tail: String = {
        let mut rev: Vec<char> = text.chars().rev().take(FINGERPRINT_WINDOW).collect();
        rev.reverse();
        rev.into_iter().collect()
    };
    let mut hasher = Sha256::new();
    hasher.update(head.as_bytes());
    hasher.update(tail.as_bytes());
    hasher.update(text.len().to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Upload-time entry point: create or update the document and enqueue an
/// indexing task, deduplicating by (workspace, filename, fingerprint).
///
/// Same filename with identical fingerprint is a no-op. Same filename with
/// different content updates the existing document in place and clears its
/// chunk rows, resetting the idempotence evidence so the new task performs a
/// full re-index instead of skipping.
pub async fn ingest_document(
    store: &Store,
    workspace: &str,
    filename: &str,
    text: &str,
    opts: &EnqueueOptions,
) -> anyhow::Result<IngestOutcome> {
    anyhow::ensure!(!text.trim().is_empty(), "document text is empty");
    let hash = content_fingerprint(text);

    if let Some(existing) = store
        .find_document_by_filename_async(workspace, filename)
        .await?
    {
        if existing.content_hash == hash {
            info!(document = %existing.id, %filename, "duplicate upload; skipping");
            return Ok(IngestOutcome {
                document_id: existing.id,
                task_id: None,
                deduplicated: true,
            });
        }
        store.delete_chunks_async(&existing.id).await?;
        store
            .replace_document_content_async(&existing.id, text, &hash)
            .await?;
        let task_id = store
            .enqueue_task_async(
                DOC_INDEX_KIND,
                &json!({"document_id": existing.id, "workspace_id": workspace}),
                workspace,
                opts,
            )
            .await?;
        info!(document = %existing.id, task = %task_id, %filename, "document content replaced; re-index queued");
        return Ok(IngestOutcome {
            document_id: existing.id,
            task_id: Some(task_id),
            deduplicated: false,
        });
    }

    let document_id = store
        .insert_document_async(workspace, filename, text, &hash)
        .await?;
    let task_id = store
        .enqueue_task_async(
            DOC_INDEX_KIND,
            &json!({"document_id": document_id, "workspace_id": workspace}),
            workspace,
            opts,
        )
        .await?;
    info!(document = %document_id, task = %task_id, %filename, "document created; index queued");
    Ok(IngestOutcome {
        document_id,
        task_id: Some(task_id),
        deduplicated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_length_sensitive() {
        let a = content_fingerprint("hello world");
        assert_eq!(a, content_fingerprint("hello world"));
        assert_ne!(a, content_fingerprint("hello worlds"));
    }

    #[test]
    fn fingerprint_distinguishes_interior_edits_on_small_docs() {
        // Under 2x the window everything is hashed, so any edit is seen.
        assert_ne!(
            content_fingerprint("aaa bbb ccc"),
            content_fingerprint("aaa xxx ccc")
        );
    }

    #[test]
    fn fingerprint_ignores_mid_document_edits_beyond_the_windows() {
        // Cheapness trade-off: only the ends and the length are hashed.
        let base = "x".repeat(10_000);
        let mut edited = base.clone();
        edited.replace_range(5000..5004, "EDIT");
        assert_eq!(content_fingerprint(&base), content_fingerprint(&edited));
    }
}
