use axum::routing::{get, post};
use axum::Router;

use crate::{api_documents, api_tasks, AppState};

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/documents", post(api_documents::upload_document))
        .route("/documents/{id}", get(api_documents::document_status))
        .route("/admin/tasks", get(api_tasks::task_overview))
        .route("/admin/tasks/process", post(api_tasks::process_pending))
        .route("/admin/tasks/{id}/cancel", post(api_tasks::cancel_task))
        .with_state(state)
}
