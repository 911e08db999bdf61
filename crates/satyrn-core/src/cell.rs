//! Cells: named units of code or documentation text.

use crate::runtime::{Namespace, RunResult, ScriptRuntime};

/// Kind of content a cell holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Executable code, run through the session's script runtime.
    Code,
    /// Documentation text, never executed.
    Markdown,
}

impl CellKind {
    /// Parse a kind token from the command language.
    ///
    /// The persisted tokens are `python` and `markdown`; `code` and `md`
    /// are accepted as aliases on input.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "python" | "code" => Some(Self::Code),
            "markdown" | "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// The token written to `.satx` files.
    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Code => "python",
            Self::Markdown => "markdown",
        }
    }
}

impl std::fmt::Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// A named unit of content plus execution metadata.
#[derive(Debug, Clone)]
pub struct Cell {
    /// Unique name within the graph; serves as the external identifier.
    pub name: String,
    /// Source code or prose.
    pub content: String,
    /// Kind of content.
    pub kind: CellKind,
    /// Text captured from the most recent execution, empty otherwise.
    pub output: String,
    /// Opaque layout coordinate, carried for frontends but never interpreted.
    pub left: String,
    /// Opaque layout coordinate, carried for frontends but never interpreted.
    pub top: String,
}

impl Cell {
    /// Create a cell with default layout coordinates and no output.
    pub fn new(name: impl Into<String>, kind: CellKind, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            kind,
            output: String::new(),
            left: "10".to_string(),
            top: "10".to_string(),
        }
    }

    /// Run this cell's content against `ns` through `runtime`.
    ///
    /// Documentation cells are inert: they produce an empty result and
    /// leave the namespace untouched.
    pub fn run(&self, runtime: &dyn ScriptRuntime, ns: &mut Namespace) -> RunResult {
        if self.kind != CellKind::Code {
            return RunResult::default();
        }
        runtime.run(&self.content, ns)
    }
}
