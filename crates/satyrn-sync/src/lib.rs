//! Command language and persistence codecs for Satyrn cell graphs.
//!
//! The `.satx` command log is the primary save format: a script in the
//! live command language, replayed through the same structural
//! operations used at edit time to reconstruct the graph.
//!
//! ```text
//! live input ──► Command ──► session dispatch ──► graph
//!                  ▲                               │
//!                  │ satx::parse        satx::render
//!                  └────────── .satx ◄─────────────┤
//!                                                  ├─► script::render (.py)
//!                                                  └─► ipynb::render (.ipynb)
//! ```
//!
//! The plain-script and notebook-interchange renderings are one-way
//! exports.

pub mod command;
mod error;
pub mod ipynb;
pub mod satx;
pub mod script;

pub use command::{Command, RESERVED_WORDS, SATX_EXT, ScriptCursor, parse_line, validate_cell_name};
pub use error::{SyncError, SyncResult};
pub use ipynb::{IpynbGenerator, Notebook};
pub use satx::SatxDocument;

/// Save formats, routed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// The replayable command log (`.satx`).
    Satx,
    /// The plain-script rendering (`.py`).
    Script,
    /// The notebook-interchange rendering (`.ipynb`).
    Ipynb,
}

impl ExportFormat {
    /// Pick a format from a path's extension, case-insensitively.
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(SATX_EXT) {
            Some(Self::Satx)
        } else if lower.ends_with(".py") {
            Some(Self::Script)
        } else if lower.ends_with(".ipynb") {
            Some(Self::Ipynb)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_routing() {
        assert_eq!(ExportFormat::from_path("a.satx"), Some(ExportFormat::Satx));
        assert_eq!(ExportFormat::from_path("A.SATX"), Some(ExportFormat::Satx));
        assert_eq!(ExportFormat::from_path("a.py"), Some(ExportFormat::Script));
        assert_eq!(
            ExportFormat::from_path("a.ipynb"),
            Some(ExportFormat::Ipynb)
        );
        assert_eq!(ExportFormat::from_path("a.txt"), None);
    }
}
