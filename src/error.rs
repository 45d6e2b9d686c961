//! Error types for trace ingestion
//!
//! Per-line problems never surface here: malformed lines, orphan EXITs and
//! failed syscalls are skipped by the component that sees them. Everything in
//! [`IngestError`] aborts the run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an ingestion run
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to read reference file {path}: {source}")]
    ReferenceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid reference file {path}: {reason}")]
    ReferenceInvalid { path: PathBuf, reason: String },

    #[error("Store write failed: {0}")]
    Store(String),

    #[error("Writer for partition {path} failed: {source}")]
    Writer {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Writer for partition {0} exited before shutdown")]
    WriterDisconnected(PathBuf),

    #[error("Worker pool failed: {0}")]
    WorkerPool(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;
