//! Error types for the session layer.

use satyrn_sync::SyncError;

/// Result type for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Errors reported back to adapters; none are fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A structural or execution error from the engine.
    #[error(transparent)]
    Core(#[from] satyrn_core::Error),

    /// A codec or command-parse error.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A cell cannot link to itself.
    #[error("a cell cannot link to itself")]
    SelfLink,

    /// The save path's extension does not name a known format.
    #[error("unsupported save format: {0}")]
    UnsupportedFormat(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
