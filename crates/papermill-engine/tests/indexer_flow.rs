use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use papermill_engine::{
    ingest_document, DocumentIndexer, EmbedError, EmbeddingClient, Executor, HandlerRegistry,
    TaskContext, TaskHandler, DOC_INDEX_KIND,
};
use papermill_store::{now_rfc3339, EnqueueOptions, Store, TaskRow};
use serde_json::json;

fn open_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(dir.path()).expect("open store");
    (dir, store)
}

/// Scripted embedder: pops responses from a queue, then falls back to a fixed
/// vector. Optionally flips a cancel flag after N successful calls.
struct MockEmbedder {
    script: Mutex<VecDeque<Result<Vec<f32>, EmbedError>>>,
    calls: AtomicUsize,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl MockEmbedder {
    fn always_ok() -> Self {
        Self::scripted(Vec::new())
    }

    fn scripted(script: Vec<Result<Vec<f32>, EmbedError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            cancel_after: None,
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, flag)) = &self.cancel_after {
            if call >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        match self.script.lock().unwrap().pop_front() {
            Some(res) => res,
            None => Ok(vec![0.25, 0.5, 0.75]),
        }
    }
}

fn fast_indexer_cfg() -> papermill_engine::IndexerConfig {
    papermill_engine::IndexerConfig {
        rate_limit_backoff: Duration::from_millis(10),
        ..Default::default()
    }
}

fn indexing_executor(store: &Store, embedder: Arc<MockEmbedder>) -> Executor {
    let mut registry = HandlerRegistry::new();
    registry.register(
        DOC_INDEX_KIND,
        Arc::new(DocumentIndexer::new(
            store.clone(),
            embedder,
            fast_indexer_cfg(),
        )),
    );
    Executor::new(store.clone(), Arc::new(registry))
}

fn long_text() -> String {
    // ~2300 chars without sentence terminators: three raw-cut chunks.
    "a".repeat(2300)
}

#[tokio::test]
async fn indexes_a_document_end_to_end() {
    let (_dir, store) = open_store();
    let embedder = Arc::new(MockEmbedder::always_ok());
    let exec = indexing_executor(&store, embedder.clone());

    let outcome = ingest_document(
        &store,
        "ws",
        "notes.txt",
        &long_text(),
        &EnqueueOptions::default(),
    )
    .await
    .unwrap();
    assert!(!outcome.deduplicated);
    let task_id = outcome.task_id.clone().unwrap();

    assert_eq!(exec.process_pending_tasks(1).await.unwrap(), 1);

    let task = store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.status, "completed");
    let result = task.result.unwrap();
    assert_eq!(result["status"], "indexed");
    assert_eq!(result["chunks_created"], 3);

    let chunks = store.list_chunks(&outcome.document_id).unwrap();
    assert_eq!(
        chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
        vec![0, 1, 2],
        "chunk indices must be contiguous from zero"
    );
    assert!(chunks.iter().all(|c| !c.embedding.is_empty()));

    let doc = store.get_document(&outcome.document_id).unwrap().unwrap();
    assert!(!doc.needs_indexing);
    assert!(doc.indexed_at.is_some());
    assert_eq!(doc.chunks_created, 3);
}

#[tokio::test]
async fn reindexing_a_chunked_document_is_a_no_op() {
    let (_dir, store) = open_store();
    let embedder = Arc::new(MockEmbedder::always_ok());
    let exec = indexing_executor(&store, embedder.clone());

    let outcome = ingest_document(
        &store,
        "ws",
        "notes.txt",
        &long_text(),
        &EnqueueOptions::default(),
    )
    .await
    .unwrap();
    exec.process_pending_tasks(1).await.unwrap();
    let calls_after_first = embedder.calls.load(Ordering::SeqCst);

    // Duplicate enqueue for the same document, e.g. a crashed worker's retry.
    let dup = store
        .enqueue_task(
            DOC_INDEX_KIND,
            &json!({"document_id": outcome.document_id, "workspace_id": "ws"}),
            "ws",
            &EnqueueOptions::default(),
        )
        .unwrap();
    exec.process_pending_tasks(1).await.unwrap();

    let task = store.get_task(&dup).unwrap().unwrap();
    assert_eq!(task.status, "completed");
    assert_eq!(task.result.unwrap()["status"], "skipped");
    assert_eq!(store.count_chunks(&outcome.document_id).unwrap(), 3);
    assert_eq!(
        embedder.calls.load(Ordering::SeqCst),
        calls_after_first,
        "skip path must not call the embedding service"
    );
}

#[tokio::test]
async fn rate_limit_retries_the_same_chunk_without_duplicates() {
    let (_dir, store) = open_store();
    let embedder = Arc::new(MockEmbedder::scripted(vec![
        Err(EmbedError::RateLimited),
        Ok(vec![1.0, 2.0]),
    ]));
    let exec = indexing_executor(&store, embedder.clone());

    let outcome = ingest_document(
        &store,
        "ws",
        "short.txt",
        "just one small chunk of text",
        &EnqueueOptions::default(),
    )
    .await
    .unwrap();
    exec.process_pending_tasks(1).await.unwrap();

    let task = store
        .get_task(&outcome.task_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(task.status, "completed");
    assert_eq!(task.result.unwrap()["status"], "indexed");

    let chunks = store.list_chunks(&outcome.document_id).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[0].embedding, vec![1.0, 2.0]);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn repeated_embed_failures_abort_after_the_error_budget() {
    let (_dir, store) = open_store();
    let embedder = Arc::new(MockEmbedder::scripted(vec![
        Ok(vec![0.1]),
        Err(EmbedError::Failed("503".into())),
        Err(EmbedError::Failed("503".into())),
        Err(EmbedError::Failed("503".into())),
        Err(EmbedError::Failed("503".into())),
    ]));
    let exec = indexing_executor(&store, embedder.clone());

    let outcome = ingest_document(
        &store,
        "ws",
        "big.txt",
        &long_text(),
        &EnqueueOptions {
            max_retries: 1,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    exec.process_pending_tasks(1).await.unwrap();

    let task = store
        .get_task(&outcome.task_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(task.status, "failed");
    assert!(task.error.unwrap().contains("4 embedding errors"));

    // The chunk persisted before the failures survives; indices stay
    // contiguous from zero.
    let chunks = store.list_chunks(&outcome.document_id).unwrap();
    assert_eq!(
        chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
        vec![0]
    );
    let doc = store.get_document(&outcome.document_id).unwrap().unwrap();
    assert!(doc.needs_indexing, "partial failure must not claim success");
}

#[tokio::test]
async fn cancellation_between_chunks_preserves_partial_progress() {
    let (_dir, store) = open_store();
    let cancel = Arc::new(AtomicBool::new(false));
    let mut embedder = MockEmbedder::always_ok();
    embedder.cancel_after = Some((1, cancel.clone()));
    let indexer = DocumentIndexer::new(store.clone(), Arc::new(embedder), fast_indexer_cfg());

    let doc_id = store
        .insert_document("ws", "doc.txt", &long_text(), "hash")
        .unwrap();
    let now = now_rfc3339();
    let task = TaskRow {
        id: "task-1".into(),
        kind: DOC_INDEX_KIND.into(),
        payload: json!({"document_id": doc_id, "workspace_id": "ws"}),
        workspace: "ws".into(),
        status: "running".into(),
        priority: 0,
        scheduled_for: now.clone(),
        retries: 0,
        max_retries: 3,
        timeout_ms: 120_000,
        progress: 0.0,
        progress_msg: None,
        result: None,
        error: None,
        created: now.clone(),
        updated: now.clone(),
        started: Some(now),
    };
    let ctx = TaskContext::new("task-1", store.clone(), cancel);

    let result = indexer.run(&task, ctx).await.unwrap();
    assert_eq!(result["status"], "cancelled");
    assert_eq!(result["chunks_created"], 1);
    assert_eq!(result["chunks_total"], 3);
    assert_eq!(store.count_chunks(&doc_id).unwrap(), 1);
}

#[tokio::test]
async fn empty_document_fails_fatally() {
    let (_dir, store) = open_store();
    let exec = indexing_executor(&store, Arc::new(MockEmbedder::always_ok()));

    let doc_id = store
        .insert_document("ws", "empty.txt", "   \n\t ", "hash")
        .unwrap();
    let task_id = store
        .enqueue_task(
            DOC_INDEX_KIND,
            &json!({"document_id": doc_id, "workspace_id": "ws"}),
            "ws",
            &EnqueueOptions::default(),
        )
        .unwrap();
    exec.process_pending_tasks(1).await.unwrap();

    let task = store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.status, "failed");
    assert_eq!(task.retries, 0, "content errors are not retried");
    assert!(task.error.unwrap().contains("no text content"));
}

#[tokio::test]
async fn duplicate_upload_is_deduplicated() {
    let (_dir, store) = open_store();
    let text = long_text();
    let first = ingest_document(&store, "ws", "dup.txt", &text, &EnqueueOptions::default())
        .await
        .unwrap();
    let second = ingest_document(&store, "ws", "dup.txt", &text, &EnqueueOptions::default())
        .await
        .unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.document_id, first.document_id);
    assert!(second.task_id.is_none());
    assert_eq!(store.count_tasks_by_status("pending").unwrap(), 1);
}

#[tokio::test]
async fn changed_content_resets_the_document_for_reindex() {
    let (_dir, store) = open_store();
    let first = ingest_document(
        &store,
        "ws",
        "live.txt",
        "original content here.",
        &EnqueueOptions::default(),
    )
    .await
    .unwrap();
    // Simulate a completed index run.
    store
        .insert_chunk(&first.document_id, 0, "original content here.", &[0.5])
        .unwrap();

    let second = ingest_document(
        &store,
        "ws",
        "live.txt",
        "entirely different content now.",
        &EnqueueOptions::default(),
    )
    .await
    .unwrap();
    assert!(!second.deduplicated);
    assert_eq!(second.document_id, first.document_id);
    assert!(second.task_id.is_some());

    // Old chunks are cleared so the new task performs a full re-index.
    assert_eq!(store.count_chunks(&first.document_id).unwrap(), 0);
    let doc = store.get_document(&first.document_id).unwrap().unwrap();
    assert!(doc.needs_indexing);
    assert_eq!(doc.text_content, "entirely different content now.");
    assert_eq!(store.count_tasks_by_status("pending").unwrap(), 2);
}

#[tokio::test]
async fn missing_document_fails_fatally() {
    let (_dir, store) = open_store();
    let exec = indexing_executor(&store, Arc::new(MockEmbedder::always_ok()));
    let task_id = store
        .enqueue_task(
            DOC_INDEX_KIND,
            &json!({"document_id": "nope", "workspace_id": "ws"}),
            "ws",
            &EnqueueOptions::default(),
        )
        .unwrap();
    exec.process_pending_tasks(1).await.unwrap();
    let task = store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.status, "failed");
    assert_eq!(task.retries, 0);
    assert!(task.error.unwrap().contains("not found"));
}
