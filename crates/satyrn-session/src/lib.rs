//! Session layer for the Satyrn branching notebook.
//!
//! A [`Session`] owns one cell graph, one script runtime and a single
//! structural mutex, and dispatches the command language against them.
//! This is the seam external CLI/API adapters call through; the adapters
//! themselves live outside this workspace.

mod error;
mod session;

pub use error::{SessionError, SessionResult};
pub use session::{LinkCheck, Reply, Session};

// Adapters drive the session with these.
pub use satyrn_core::{Cell, CellKind, ScriptRuntime};
pub use satyrn_sync::{Command, ScriptCursor, parse_line};
