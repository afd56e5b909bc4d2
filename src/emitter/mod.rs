//! Output boundary for finalized aggregates
//!
//! Backends implement `RecordEmitter` and are shared between the ingestion
//! loop and the timeout supervisor behind an `Arc`.

pub mod collect;
pub mod jsonl_writer;
pub mod retry;
pub mod sqlite_writer;

use crate::aggregator_core::output::OutputRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub use collect::CollectingEmitter;
pub use jsonl_writer::JsonlEmitter;
pub use retry::{emit_all, send_with_retry, EmitStats, RetryPolicy};
pub use sqlite_writer::SqliteEmitter;

#[derive(Debug)]
pub enum EmitError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
    /// Backend rejected the record (used by test backends)
    Rejected(String),
}

impl From<std::io::Error> for EmitError {
    fn from(err: std::io::Error) -> Self {
        EmitError::Io(err)
    }
}

impl From<serde_json::Error> for EmitError {
    fn from(err: serde_json::Error) -> Self {
        EmitError::Serialization(err)
    }
}

impl From<rusqlite::Error> for EmitError {
    fn from(err: rusqlite::Error) -> Self {
        EmitError::Database(err.to_string())
    }
}

impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmitError::Io(e) => write!(f, "IO error: {}", e),
            EmitError::Serialization(e) => write!(f, "Serialization error: {}", e),
            EmitError::Database(e) => write!(f, "Database error: {}", e),
            EmitError::Rejected(e) => write!(f, "Rejected: {}", e),
        }
    }
}

impl std::error::Error for EmitError {}

/// Backend for aggregate records
#[async_trait]
pub trait RecordEmitter: Send + Sync {
    /// Send one finalized aggregate
    async fn send(&self, record: &OutputRecord) -> Result<(), EmitError>;

    /// Flush pending writes to storage
    async fn flush(&self) -> Result<(), EmitError>;

    /// Called once after the final drain
    async fn finish(&self) -> Result<(), EmitError> {
        self.flush().await
    }

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendType {
    Jsonl,
    Sqlite,
}

/// Open the configured backend. JSONL without a path writes to stdout.
pub fn open_emitter(
    backend: BackendType,
    output: Option<PathBuf>,
    forward_eos: bool,
) -> Result<Arc<dyn RecordEmitter>, EmitError> {
    let emitter: Arc<dyn RecordEmitter> = match (backend, output) {
        (BackendType::Jsonl, Some(path)) => Arc::new(JsonlEmitter::to_file(&path, forward_eos)?),
        (BackendType::Jsonl, None) => Arc::new(JsonlEmitter::to_stdout(forward_eos)),
        (BackendType::Sqlite, Some(path)) => Arc::new(SqliteEmitter::new(&path)?),
        (BackendType::Sqlite, None) => {
            return Err(EmitError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "SQLite backend requires --output <db path>",
            )));
        }
    };

    log::info!("📝 Output backend: {}", emitter.backend_type());
    Ok(emitter)
}
