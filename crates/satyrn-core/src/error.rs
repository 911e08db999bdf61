//! Error types for satyrn-core.

use thiserror::Error;

/// Result type for satyrn-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cell-graph engine.
///
/// Structural errors leave the graph unchanged; the failing operation is
/// all-or-nothing. None of these are fatal to the process.
#[derive(Debug, Error)]
pub enum Error {
    /// A cell with this name already exists.
    #[error("a cell named \"{0}\" already exists")]
    NameConflict(String),

    /// No cell with this name exists.
    #[error("cell \"{0}\" does not exist")]
    UnknownName(String),

    /// Attempted to create an edge into the root cell.
    #[error("can't link to root cell")]
    RootTarget,

    /// Adding the edge would close a cycle through an existing path.
    #[error("linking \"{src}\" -> \"{dst}\" would create a cycle")]
    Cycle { src: String, dst: String },

    /// Merge or sever requested on cells with no edge between them.
    #[error("cells \"{src}\" and \"{dst}\" are not adjacent")]
    AdjacencyRequired { src: String, dst: String },

    /// A cell's content raised a fault while running.
    #[error("fault in cell \"{cell}\": {message}")]
    ExecutionFault { cell: String, message: String },

    /// Traversal execution requires a root cell to exist.
    #[error("graph has no root cell")]
    RootRequired,
}
