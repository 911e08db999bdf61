//! Error types for the persistence codecs.

use std::path::PathBuf;

/// Result type for codec operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while rendering, parsing or replaying a save.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Failed to read a save file.
    #[error("failed to read file {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// Failed to write a save file.
    #[error("failed to write file {path}: {message}")]
    Write { path: PathBuf, message: String },

    /// A command log line did not parse.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A cell name collides with the command vocabulary or save format.
    #[error("cell name \"{name}\" is not allowed: {reason}")]
    InvalidName { name: String, reason: String },

    /// Failed to serialize the notebook-interchange rendering.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A structural operation failed during replay.
    #[error(transparent)]
    Core(#[from] satyrn_core::Error),
}
