//! Background task engine: claim/execute/report loops over the papermill
//! store, plus the document indexing pipeline (chunking, embedding,
//! persistence) that runs inside it.

mod chunker;
mod context;
mod embed;
mod executor;
mod indexer;
mod ingest;
mod registry;

pub use chunker::{chunk_text, ChunkingConfig};
pub use context::TaskContext;
pub use embed::{EmbedError, EmbeddingClient, HttpEmbeddingClient};
pub use executor::{Executor, ExecutorHandle};
pub use indexer::{DocumentIndexer, IndexerConfig, DOC_INDEX_KIND};
pub use ingest::{content_fingerprint, ingest_document, IngestOutcome};
pub use registry::{HandlerError, HandlerRegistry, TaskHandler};
