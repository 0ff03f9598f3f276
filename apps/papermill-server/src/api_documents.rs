use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use papermill_engine::ingest_document;
use papermill_store::{EnqueueOptions, STATUS_PENDING, STATUS_RUNNING};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::AppState;

#[derive(Deserialize)]
pub(crate) struct UploadReq {
    pub workspace: String,
    pub filename: String,
    pub text: String,
    #[serde(default)]
    pub priority: Option<i64>,
}

pub(crate) async fn upload_document(
    State(state): State<AppState>,
    Json(req): Json<UploadReq>,
) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "document text is empty"})),
        )
            .into_response();
    }
    let opts = EnqueueOptions {
        priority: req.priority.unwrap_or(0),
        ..Default::default()
    };
    match ingest_document(state.store(), &req.workspace, &req.filename, &req.text, &opts).await {
        Ok(outcome) => Json(json!({
            "document_id": outcome.document_id,
            "task_id": outcome.task_id,
            "deduplicated": outcome.deduplicated,
        }))
        .into_response(),
        Err(err) => {
            warn!(%err, "document ingest failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}

/// Read-only progress view for UI polling. Reports "indexing" while a task is
/// pending or running, "indexed" only once the completion metadata is set,
/// and "failed" otherwise: a partially chunked document is never a success.
pub(crate) async fn document_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let doc = match state.store().get_document_async(&id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "document not found"})),
            )
                .into_response()
        }
        Err(err) => {
            warn!(%err, "document lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };

    let task = state
        .store()
        .latest_task_for_document_async(&doc.id)
        .await
        .unwrap_or_else(|err| {
            warn!(%err, "task lookup failed");
            None
        });

    let status = if !doc.needs_indexing && doc.chunks_created > 0 {
        "indexed"
    } else {
        match task.as_ref().map(|t| t.status.as_str()) {
            Some(STATUS_PENDING) | Some(STATUS_RUNNING) => "indexing",
            // A settled task without completion metadata means the document
            // is stuck half-indexed; surface it as a failure, not a success.
            Some(_) => "failed",
            None => "indexing",
        }
    };

    Json(json!({
        "document_id": doc.id,
        "filename": doc.filename,
        "workspace": doc.workspace,
        "status": status,
        "chunks_created": doc.chunks_created,
        "indexed_at": doc.indexed_at,
        "progress": task.as_ref().map(|t| t.progress),
        "progress_msg": task.as_ref().and_then(|t| t.progress_msg.clone()),
        "error": task.as_ref().and_then(|t| t.error.clone()),
    }))
    .into_response()
}
