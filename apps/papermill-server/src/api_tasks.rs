use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{security, AppState};

fn unauthorized() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "admin token required"})),
    )
        .into_response()
}

/// Queue overview for dashboards: per-status counts plus the documents
/// currently being worked on.
pub(crate) async fn task_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !security::admin_authorized(&headers) {
        return unauthorized();
    }
    let counts = match state.store().task_status_counts_async().await {
        Ok(counts) => counts,
        Err(err) => {
            warn!(%err, "status counts failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };
    let mut running = Vec::new();
    if let Ok(tasks) = state.store().list_running_tasks_async(20).await {
        for task in tasks {
            let filename = match task.payload.get("document_id").and_then(|v| v.as_str()) {
                Some(doc_id) => state
                    .store()
                    .get_document_async(doc_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|d| d.filename),
                None => None,
            };
            running.push(json!({
                "task_id": task.id,
                "kind": task.kind,
                "filename": filename,
                "progress": task.progress,
                "progress_msg": task.progress_msg,
                "started": task.started,
            }));
        }
    }
    Json(json!({"counts": counts, "running": running})).into_response()
}

#[derive(Deserialize, Default)]
pub(crate) struct ProcessReq {
    #[serde(default)]
    pub max: Option<usize>,
}

/// Externally triggered sweep: drain up to `max` pending tasks sequentially.
pub(crate) async fn process_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<ProcessReq>>,
) -> impl IntoResponse {
    if !security::admin_authorized(&headers) {
        return unauthorized();
    }
    let max = body.and_then(|Json(req)| req.max).unwrap_or(10);
    match state.executor().process_pending_tasks(max).await {
        Ok(processed) => Json(json!({"processed": processed})).into_response(),
        Err(err) => {
            warn!(%err, "batch drain failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}

/// Cancel a task that has not started yet. Running tasks wind down on their
/// own when they hit their timeout; there is no forced interruption.
pub(crate) async fn cancel_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !security::admin_authorized(&headers) {
        return unauthorized();
    }
    match state.store().cancel_task_async(&id).await {
        Ok(cancelled) => Json(json!({"cancelled": cancelled})).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}
