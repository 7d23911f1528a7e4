//! Error types for checkpoint migration
//!
//! Only whole-run failures are errors. Per-variable read failures and
//! per-slot outcomes are plain values collected into the migration report.

use thiserror::Error;

/// Main error type for drumscribe
#[derive(Error, Debug)]
pub enum DrumscribeError {
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Write error: {path}: {reason}")]
    Write { path: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal checkpoint failures that abort a run before any slot is processed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {path}")]
    NotFound { path: String },
    #[error("Checkpoint corrupt: {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

impl CheckpointError {
    pub fn not_found(path: impl AsRef<std::path::Path>) -> Self {
        Self::NotFound { path: path.as_ref().display().to_string() }
    }

    pub fn corrupt(path: impl AsRef<std::path::Path>, reason: impl Into<String>) -> Self {
        Self::Corrupt { path: path.as_ref().display().to_string(), reason: reason.into() }
    }
}

/// Result type alias for drumscribe operations
pub type Result<T> = std::result::Result<T, DrumscribeError>;
