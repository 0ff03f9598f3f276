use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";

/// Durable store for task records, documents and chunk rows.
///
/// The sqlite file is the single coordination point between workers: the only
/// cross-process synchronization primitive is `claim_next_task`, a single
/// conditional UPDATE. Every other write is guarded by a status predicate so
/// late or duplicate reporters become no-ops instead of corrupting state.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskRow {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub workspace: String,
    pub status: String,
    pub priority: i64,
    pub scheduled_for: String,
    pub retries: i64,
    pub max_retries: i64,
    pub timeout_ms: i64,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created: String,
    pub updated: String,
    pub started: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub workspace: String,
    pub filename: String,
    pub text_content: String,
    pub content_hash: String,
    pub needs_indexing: bool,
    pub indexed_at: Option<String>,
    pub chunks_created: i64,
    pub created: String,
    pub updated: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChunkRow {
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: i64,
    pub timeout_ms: i64,
    pub max_retries: i64,
    /// RFC3339; tasks are invisible to claimers before this instant.
    pub scheduled_for: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            timeout_ms: 120_000,
            max_retries: 3,
            scheduled_for: None,
        }
    }
}

/// Outcome of `fail_task`, so callers can log requeue vs terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    Requeued { scheduled_for: String },
    Failed,
    NotRunning,
}

/// Patch for the document metadata written at indexing completion.
#[derive(Debug, Default, Clone)]
pub struct DocumentMetaPatch {
    pub needs_indexing: Option<bool>,
    pub indexed_at: Option<String>,
    pub chunks_created: Option<i64>,
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Exponential retry delay in seconds: 2^retries, capped at one minute.
pub fn retry_backoff_secs(retries: i64) -> i64 {
    let exp = retries.clamp(0, 6) as u32;
    (1i64 << exp).min(60)
}

impl Store {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("papermill.sqlite");
        let need_init = !db_path.exists();
        let conn = Connection::open(&db_path)?;
        // Pragmas tuned for async server usage
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let busy_ms: u64 = std::env::var("PAPERMILL_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))?;
        // Cache size: negative = KB units. Default ~= 20MB
        let cache_pages: i64 = std::env::var("PAPERMILL_SQLITE_CACHE_PAGES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(-20000);
        let _ = conn.pragma_update(None, "cache_size", cache_pages);
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");
        if need_init {
            Self::init_schema(&conn)?;
        }
        Ok(Self { db_path })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
              id TEXT PRIMARY KEY,
              kind TEXT NOT NULL,
              payload TEXT NOT NULL,
              workspace TEXT NOT NULL,
              status TEXT NOT NULL,
              priority INTEGER NOT NULL DEFAULT 0,
              scheduled_for TEXT NOT NULL,
              retries INTEGER NOT NULL DEFAULT 0,
              max_retries INTEGER NOT NULL DEFAULT 3,
              timeout_ms INTEGER NOT NULL,
              progress REAL NOT NULL DEFAULT 0,
              progress_msg TEXT,
              result TEXT,
              error TEXT,
              created TEXT NOT NULL,
              updated TEXT NOT NULL,
              started TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(status, scheduled_for, priority, created);
            CREATE INDEX IF NOT EXISTS idx_tasks_workspace ON tasks(workspace);

            CREATE TABLE IF NOT EXISTS documents (
              id TEXT PRIMARY KEY,
              workspace TEXT NOT NULL,
              filename TEXT NOT NULL,
              text_content TEXT NOT NULL,
              content_hash TEXT NOT NULL,
              needs_indexing INTEGER NOT NULL DEFAULT 1,
              indexed_at TEXT,
              chunks_created INTEGER NOT NULL DEFAULT 0,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_docs_ws_name ON documents(workspace, filename);

            -- Chunk rows are append-only; the primary key enforces that an
            -- index can never be reused for a document.
            CREATE TABLE IF NOT EXISTS doc_chunks (
              document_id TEXT NOT NULL,
              chunk_index INTEGER NOT NULL,
              content TEXT NOT NULL,
              embedding TEXT NOT NULL,
              created TEXT NOT NULL,
              PRIMARY KEY (document_id, chunk_index)
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        let busy_ms: u64 = std::env::var("PAPERMILL_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------- Task queue ----------------

    pub fn enqueue_task(
        &self,
        kind: &str,
        payload: &serde_json::Value,
        workspace: &str,
        opts: &EnqueueOptions,
    ) -> Result<String> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let scheduled = opts.scheduled_for.clone().unwrap_or_else(|| now.clone());
        let payload_s = serde_json::to_string(payload).unwrap_or("{}".to_string());
        conn.execute(
            "INSERT INTO tasks(id,kind,payload,workspace,status,priority,scheduled_for,retries,max_retries,timeout_ms,created,updated)
             VALUES(?,?,?,?,?,?,?,0,?,?,?,?)",
            params![
                id,
                kind,
                payload_s,
                workspace,
                STATUS_PENDING,
                opts.priority,
                scheduled,
                opts.max_retries,
                opts.timeout_ms,
                now,
                now
            ],
        )?;
        Ok(id)
    }

    /// Atomically claim the oldest eligible pending task, if any.
    ///
    /// Selection and the pending->running flip happen in one statement, so two
    /// workers racing on the same row cannot both receive it: the inner SELECT
    /// picks a candidate and the outer WHERE re-verifies it is still pending.
    pub fn claim_next_task(&self) -> Result<Option<TaskRow>> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let mut stmt = conn.prepare(
            "UPDATE tasks SET status='running', started=?1, updated=?1 WHERE id = (
                 SELECT id FROM tasks WHERE status='pending' AND scheduled_for <= ?1
                 ORDER BY priority ASC, created ASC LIMIT 1
             ) AND status='pending'
             RETURNING id,kind,payload,workspace,status,priority,scheduled_for,retries,max_retries,timeout_ms,progress,progress_msg,result,error,created,updated,started",
        )?;
        let mut rows = stmt.query(params![now])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(task_from_row(row)?));
        }
        Ok(None)
    }

    /// Record a successful outcome. Returns false (and changes nothing) when
    /// the task is no longer running, e.g. a handler that settled after its
    /// deadline already failed the attempt.
    pub fn complete_task(&self, id: &str, result: &serde_json::Value) -> Result<bool> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let result_s = serde_json::to_string(result).unwrap_or("{}".to_string());
        let n = conn.execute(
            "UPDATE tasks SET status='completed', result=?, progress=100, updated=? WHERE id=? AND status='running'",
            params![result_s, now, id],
        )?;
        Ok(n > 0)
    }

    /// Record a failed attempt. Retryable failures requeue with exponential
    /// backoff while the retry budget lasts; everything else is terminal.
    pub fn fail_task(&self, id: &str, error: &str, retryable: bool) -> Result<FailOutcome> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let row: Option<(i64, i64)> = conn
            .prepare("SELECT retries, max_retries FROM tasks WHERE id=? AND status='running'")?
            .query_row([id], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        let Some((retries, max_retries)) = row else {
            return Ok(FailOutcome::NotRunning);
        };
        if retryable && retries + 1 < max_retries {
            let next_retries = retries + 1;
            let delay = chrono::Duration::seconds(retry_backoff_secs(next_retries));
            let scheduled = (chrono::Utc::now() + delay)
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            let n = conn.execute(
                "UPDATE tasks SET status='pending', retries=?, scheduled_for=?, error=?, updated=? WHERE id=? AND status='running'",
                params![next_retries, scheduled, error, now, id],
            )?;
            if n == 0 {
                return Ok(FailOutcome::NotRunning);
            }
            Ok(FailOutcome::Requeued {
                scheduled_for: scheduled,
            })
        } else {
            let n = conn.execute(
                "UPDATE tasks SET status='failed', error=?, updated=? WHERE id=? AND status='running'",
                params![error, now, id],
            )?;
            if n == 0 {
                return Ok(FailOutcome::NotRunning);
            }
            Ok(FailOutcome::Failed)
        }
    }

    /// Cancel a task that has not started. Running tasks stop cooperatively
    /// via the executor's cancel flag, not through the store.
    pub fn cancel_task(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let n = conn.execute(
            "UPDATE tasks SET status='cancelled', updated=? WHERE id=? AND status='pending'",
            params![now, id],
        )?;
        Ok(n > 0)
    }

    /// Mark a claimed task as cancelled after its handler observed the cancel
    /// flag and returned early.
    pub fn cancel_running_task(&self, id: &str, result: &serde_json::Value) -> Result<bool> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let result_s = serde_json::to_string(result).unwrap_or("{}".to_string());
        let n = conn.execute(
            "UPDATE tasks SET status='cancelled', result=?, updated=? WHERE id=? AND status='running'",
            params![result_s, now, id],
        )?;
        Ok(n > 0)
    }

    pub fn update_task_progress(
        &self,
        id: &str,
        percent: f64,
        message: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let n = conn.execute(
            "UPDATE tasks SET progress=?, progress_msg=COALESCE(?,progress_msg), updated=? WHERE id=? AND status='running'",
            params![percent.clamp(0.0, 100.0), message, now, id],
        )?;
        Ok(n > 0)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<TaskRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,kind,payload,workspace,status,priority,scheduled_for,retries,max_retries,timeout_ms,progress,progress_msg,result,error,created,updated,started FROM tasks WHERE id=? LIMIT 1",
        )?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(task_from_row(row)?));
        }
        Ok(None)
    }

    pub fn count_tasks_by_status(&self, status: &str) -> Result<i64> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT COUNT(1) FROM tasks WHERE status=?")?;
        let n: i64 = stmt.query_row([status], |row| row.get(0))?;
        Ok(n)
    }

    pub fn task_status_counts(&self) -> Result<serde_json::Value> {
        let conn = self.conn()?;
        let mut out = serde_json::Map::new();
        for status in [
            STATUS_PENDING,
            STATUS_RUNNING,
            STATUS_COMPLETED,
            STATUS_FAILED,
            STATUS_CANCELLED,
        ] {
            out.insert(status.to_string(), serde_json::json!(0));
        }
        let mut stmt = conn.prepare("SELECT status, COUNT(1) FROM tasks GROUP BY status")?;
        let mut rows = stmt.query([])?;
        while let Some(r) = rows.next()? {
            let status: String = r.get(0)?;
            let count: i64 = r.get(1)?;
            out.insert(status, serde_json::json!(count));
        }
        Ok(serde_json::Value::Object(out))
    }

    pub fn list_running_tasks(&self, limit: i64) -> Result<Vec<TaskRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,kind,payload,workspace,status,priority,scheduled_for,retries,max_retries,timeout_ms,progress,progress_msg,result,error,created,updated,started FROM tasks WHERE status='running' ORDER BY started ASC LIMIT ?",
        )?;
        let mut rows = stmt.query([limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(task_from_row(row)?);
        }
        Ok(out)
    }

    /// Most recent task whose payload references the given document. Used by
    /// the status surface to distinguish "indexing" from "failed".
    pub fn latest_task_for_document(&self, document_id: &str) -> Result<Option<TaskRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,kind,payload,workspace,status,priority,scheduled_for,retries,max_retries,timeout_ms,progress,progress_msg,result,error,created,updated,started FROM tasks
             WHERE json_extract(payload, '$.document_id') = ? ORDER BY created DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([document_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(task_from_row(row)?));
        }
        Ok(None)
    }

    // ---------------- Documents ----------------

    pub fn insert_document(
        &self,
        workspace: &str,
        filename: &str,
        text_content: &str,
        content_hash: &str,
    ) -> Result<String> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO documents(id,workspace,filename,text_content,content_hash,needs_indexing,created,updated) VALUES(?,?,?,?,?,1,?,?)",
            params![id, workspace, filename, text_content, content_hash, now, now],
        )?;
        Ok(id)
    }

    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,workspace,filename,text_content,content_hash,needs_indexing,indexed_at,chunks_created,created,updated FROM documents WHERE id=? LIMIT 1",
        )?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(document_from_row(row)?));
        }
        Ok(None)
    }

    pub fn find_document_by_filename(
        &self,
        workspace: &str,
        filename: &str,
    ) -> Result<Option<DocumentRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,workspace,filename,text_content,content_hash,needs_indexing,indexed_at,chunks_created,created,updated FROM documents WHERE workspace=? AND filename=? LIMIT 1",
        )?;
        let mut rows = stmt.query(params![workspace, filename])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(document_from_row(row)?));
        }
        Ok(None)
    }

    /// Swap in new content for an existing document and reset it to the
    /// needs-indexing state. The caller is expected to delete its chunks.
    pub fn replace_document_content(
        &self,
        id: &str,
        text_content: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let n = conn.execute(
            "UPDATE documents SET text_content=?, content_hash=?, needs_indexing=1, indexed_at=NULL, chunks_created=0, updated=? WHERE id=?",
            params![text_content, content_hash, now, id],
        )?;
        Ok(n > 0)
    }

    pub fn update_document_metadata(&self, id: &str, patch: &DocumentMetaPatch) -> Result<bool> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let mut set_parts: Vec<&str> = Vec::new();
        if patch.needs_indexing.is_some() {
            set_parts.push("needs_indexing=?");
        }
        if patch.indexed_at.is_some() {
            set_parts.push("indexed_at=?");
        }
        if patch.chunks_created.is_some() {
            set_parts.push("chunks_created=?");
        }
        if set_parts.is_empty() {
            return Ok(false);
        }
        set_parts.push("updated=?");
        let sql = format!("UPDATE documents SET {} WHERE id=?", set_parts.join(", "));
        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(v) = patch.needs_indexing {
            values.push(Box::new(v as i64));
        }
        if let Some(ref v) = patch.indexed_at {
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = patch.chunks_created {
            values.push(Box::new(v));
        }
        values.push(Box::new(now));
        values.push(Box::new(id.to_string()));
        let n = stmt.execute(rusqlite::params_from_iter(values.iter().map(|b| b.as_ref())))?;
        Ok(n > 0)
    }

    // ---------------- Chunks ----------------

    pub fn insert_chunk(
        &self,
        document_id: &str,
        chunk_index: i64,
        content: &str,
        embedding: &[f32],
    ) -> Result<()> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let embed_s = serde_json::to_string(embedding)?;
        conn.execute(
            "INSERT INTO doc_chunks(document_id,chunk_index,content,embedding,created) VALUES(?,?,?,?,?)",
            params![document_id, chunk_index, content, embed_s, now],
        )?;
        Ok(())
    }

    pub fn count_chunks(&self, document_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT COUNT(1) FROM doc_chunks WHERE document_id=?")?;
        let n: i64 = stmt.query_row([document_id], |row| row.get(0))?;
        Ok(n)
    }

    pub fn delete_chunks(&self, document_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM doc_chunks WHERE document_id=?", [document_id])?;
        Ok(n as i64)
    }

    pub fn list_chunks(&self, document_id: &str) -> Result<Vec<ChunkRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT document_id,chunk_index,content,embedding FROM doc_chunks WHERE document_id=? ORDER BY chunk_index ASC",
        )?;
        let mut rows = stmt.query([document_id])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let embed_s: String = r.get(3)?;
            out.push(ChunkRow {
                document_id: r.get(0)?,
                chunk_index: r.get(1)?,
                content: r.get(2)?,
                embedding: serde_json::from_str(&embed_s).unwrap_or_default(),
            });
        }
        Ok(out)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------
    // These helpers offload rusqlite work from async executors.

    pub async fn enqueue_task_async(
        &self,
        kind: &str,
        payload: &serde_json::Value,
        workspace: &str,
        opts: &EnqueueOptions,
    ) -> Result<String> {
        let s = self.clone();
        let kind = kind.to_string();
        let payload = payload.clone();
        let workspace = workspace.to_string();
        let opts = opts.clone();
        tokio::task::spawn_blocking(move || s.enqueue_task(&kind, &payload, &workspace, &opts))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn claim_next_task_async(&self) -> Result<Option<TaskRow>> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.claim_next_task())
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn complete_task_async(&self, id: &str, result: &serde_json::Value) -> Result<bool> {
        let s = self.clone();
        let id = id.to_string();
        let result = result.clone();
        tokio::task::spawn_blocking(move || s.complete_task(&id, &result))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn fail_task_async(
        &self,
        id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome> {
        let s = self.clone();
        let id = id.to_string();
        let error = error.to_string();
        tokio::task::spawn_blocking(move || s.fail_task(&id, &error, retryable))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn cancel_task_async(&self, id: &str) -> Result<bool> {
        let s = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || s.cancel_task(&id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn cancel_running_task_async(
        &self,
        id: &str,
        result: &serde_json::Value,
    ) -> Result<bool> {
        let s = self.clone();
        let id = id.to_string();
        let result = result.clone();
        tokio::task::spawn_blocking(move || s.cancel_running_task(&id, &result))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn update_task_progress_async(
        &self,
        id: &str,
        percent: f64,
        message: Option<&str>,
    ) -> Result<bool> {
        let s = self.clone();
        let id = id.to_string();
        let message = message.map(|m| m.to_string());
        tokio::task::spawn_blocking(move || s.update_task_progress(&id, percent, message.as_deref()))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_task_async(&self, id: &str) -> Result<Option<TaskRow>> {
        let s = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || s.get_task(&id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn task_status_counts_async(&self) -> Result<serde_json::Value> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.task_status_counts())
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_running_tasks_async(&self, limit: i64) -> Result<Vec<TaskRow>> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.list_running_tasks(limit))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn latest_task_for_document_async(&self, document_id: &str) -> Result<Option<TaskRow>> {
        let s = self.clone();
        let document_id = document_id.to_string();
        tokio::task::spawn_blocking(move || s.latest_task_for_document(&document_id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn insert_document_async(
        &self,
        workspace: &str,
        filename: &str,
        text_content: &str,
        content_hash: &str,
    ) -> Result<String> {
        let s = self.clone();
        let workspace = workspace.to_string();
        let filename = filename.to_string();
        let text_content = text_content.to_string();
        let content_hash = content_hash.to_string();
        tokio::task::spawn_blocking(move || {
            s.insert_document(&workspace, &filename, &text_content, &content_hash)
        })
        .await
        .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_document_async(&self, id: &str) -> Result<Option<DocumentRow>> {
        let s = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || s.get_document(&id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn find_document_by_filename_async(
        &self,
        workspace: &str,
        filename: &str,
    ) -> Result<Option<DocumentRow>> {
        let s = self.clone();
        let workspace = workspace.to_string();
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || s.find_document_by_filename(&workspace, &filename))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn replace_document_content_async(
        &self,
        id: &str,
        text_content: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let s = self.clone();
        let id = id.to_string();
        let text_content = text_content.to_string();
        let content_hash = content_hash.to_string();
        tokio::task::spawn_blocking(move || {
            s.replace_document_content(&id, &text_content, &content_hash)
        })
        .await
        .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn update_document_metadata_async(
        &self,
        id: &str,
        patch: &DocumentMetaPatch,
    ) -> Result<bool> {
        let s = self.clone();
        let id = id.to_string();
        let patch = patch.clone();
        tokio::task::spawn_blocking(move || s.update_document_metadata(&id, &patch))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn insert_chunk_async(
        &self,
        document_id: &str,
        chunk_index: i64,
        content: &str,
        embedding: &[f32],
    ) -> Result<()> {
        let s = self.clone();
        let document_id = document_id.to_string();
        let content = content.to_string();
        let embedding = embedding.to_vec();
        tokio::task::spawn_blocking(move || {
            s.insert_chunk(&document_id, chunk_index, &content, &embedding)
        })
        .await
        .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn count_chunks_async(&self, document_id: &str) -> Result<i64> {
        let s = self.clone();
        let document_id = document_id.to_string();
        tokio::task::spawn_blocking(move || s.count_chunks(&document_id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn delete_chunks_async(&self, document_id: &str) -> Result<i64> {
        let s = self.clone();
        let document_id = document_id.to_string();
        tokio::task::spawn_blocking(move || s.delete_chunks(&document_id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}

fn task_from_row(row: &rusqlite::Row<'_>) -> Result<TaskRow> {
    let payload_s: String = row.get(2)?;
    let result_s: Option<String> = row.get(12)?;
    Ok(TaskRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        payload: serde_json::from_str(&payload_s).unwrap_or(serde_json::json!({})),
        workspace: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        scheduled_for: row.get(6)?,
        retries: row.get(7)?,
        max_retries: row.get(8)?,
        timeout_ms: row.get(9)?,
        progress: row.get(10)?,
        progress_msg: row.get(11)?,
        result: result_s.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get(13)?,
        created: row.get(14)?,
        updated: row.get(15)?,
        started: row.get(16)?,
    })
}

fn document_from_row(row: &rusqlite::Row<'_>) -> Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        workspace: row.get(1)?,
        filename: row.get(2)?,
        text_content: row.get(3)?,
        content_hash: row.get(4)?,
        needs_indexing: row.get::<_, i64>(5)? != 0,
        indexed_at: row.get(6)?,
        chunks_created: row.get(7)?,
        created: row.get(8)?,
        updated: row.get(9)?,
    })
}
