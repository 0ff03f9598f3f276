use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use papermill_engine::{
    DocumentIndexer, EmbeddingClient, Executor, HandlerRegistry, HttpEmbeddingClient,
    IndexerConfig, DOC_INDEX_KIND,
};
use papermill_store::Store;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api_documents;
mod api_tasks;
mod app_state;
mod router;
mod security;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(%err, "server exited with error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state_dir = std::env::var("PAPERMILL_STATE_DIR").unwrap_or_else(|_| "state".to_string());
    let store = Store::open(Path::new(&state_dir))?;

    let embedder: Arc<dyn EmbeddingClient> = Arc::new(HttpEmbeddingClient::from_env()?);
    let mut registry = HandlerRegistry::new();
    registry.register(
        DOC_INDEX_KIND,
        Arc::new(DocumentIndexer::new(
            store.clone(),
            embedder,
            IndexerConfig::default(),
        )),
    );
    info!(kinds = ?registry.kinds(), "handlers registered");
    let executor = Executor::new(store.clone(), Arc::new(registry));

    let poll_ms: u64 = env_parse("PAPERMILL_POLL_MS", 1000);
    let max_concurrent: usize = env_parse("PAPERMILL_MAX_CONCURRENT", 2);
    let worker = executor.start(Duration::from_millis(poll_ms), max_concurrent);
    info!(poll_ms, max_concurrent, "task processor started");

    let state = AppState::new(store, executor);
    let app = router::build_router(state);
    let bind = std::env::var("PAPERMILL_BIND").unwrap_or_else(|_| "127.0.0.1:8090".to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "papermill server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Stop claiming; handlers already dispatched are allowed to finish.
    worker.stop();
    worker.join().await;
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
