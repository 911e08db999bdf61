//! The command language shared by live input and the `.satx` save format.
//!
//! Commands are whitespace-tokenized lines; the first token selects the
//! command. `cell … y` and `edit` pull an inline multi-line content block
//! from the surrounding script, terminated by a line containing only `;`.

use satyrn_core::CellKind;

use crate::error::{SyncError, SyncResult};

/// Command words that cannot be used as cell names.
pub const RESERVED_WORDS: &[&str] = &[
    "help",
    "quit",
    "cell",
    "link",
    "sever",
    "execute",
    "display",
    "remove",
    "reset_runtime",
    "edit",
    "swap",
    "list",
    "reset_graph",
    "merge",
    "save",
    "rename",
];

/// Extension of the command-log save format.
pub const SATX_EXT: &str = ".satx";

/// Check a proposed cell name against the command vocabulary and the
/// save-file extension.
pub fn validate_cell_name(name: &str) -> SyncResult<()> {
    if RESERVED_WORDS.contains(&name) {
        return Err(SyncError::InvalidName {
            name: name.to_string(),
            reason: "restricted keyword".to_string(),
        });
    }
    if name.to_ascii_lowercase().contains(SATX_EXT) {
        return Err(SyncError::InvalidName {
            name: name.to_string(),
            reason: format!("cell names cannot include \"{SATX_EXT}\""),
        });
    }
    Ok(())
}

/// One parsed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a cell, with inline content when the script supplied one.
    Cell {
        name: String,
        kind: CellKind,
        content: String,
    },
    /// Remove every listed cell.
    Remove { names: Vec<String> },
    /// Replace a cell's content.
    Edit { name: String, content: String },
    /// Rename a cell.
    Rename { old: String, new: String },
    /// Add the edge `src → dst`.
    Link { src: String, dst: String },
    /// Remove the edge `src → dst`.
    Sever { src: String, dst: String },
    /// Merge two adjacent cells; the new name defaults at dispatch time.
    Merge {
        src: String,
        dst: String,
        new_name: Option<String>,
    },
    /// Exchange the payload of two cells.
    Swap { a: String, b: String },
    /// Run the listed cells in order, or the whole graph when empty;
    /// `>> outfile` additionally writes the transcript to a file.
    Execute {
        names: Vec<String>,
        redirect: Option<String>,
    },
    /// Show the graph, or one cell's content and edges.
    Display { name: Option<String> },
    /// List all cells and edges.
    List,
    /// Delete every binding in the shared environment.
    ResetRuntime,
    /// Delete all cells and bindings.
    ResetGraph,
    /// Save to a path; the extension picks the format.
    Save { path: String },
    /// Load and replay a command log.
    Load { path: String },
    /// End the session (stops replay when it appears in a script).
    Quit,
}

/// Cursor over the lines of a script, consumed front to back.
pub struct ScriptCursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> ScriptCursor<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            pos: 0,
        }
    }

    /// Consume and return the next line.
    pub fn next_line(&mut self) -> Option<&'a str> {
        let line = self.lines.get(self.pos).copied();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    /// 1-based number of the most recently returned line.
    pub fn line_no(&self) -> usize {
        self.pos
    }

    /// Pull a content block terminated by a line containing only `;`.
    fn content_block(&mut self) -> SyncResult<String> {
        let mut lines = Vec::new();
        loop {
            match self.next_line() {
                Some(line) if line.trim() == ";" => break,
                Some(line) => lines.push(line),
                None => {
                    return Err(SyncError::Parse {
                        line: self.line_no(),
                        message: "unterminated content block (missing \";\")".to_string(),
                    });
                }
            }
        }
        Ok(lines.join("\n"))
    }
}

/// Parse one command line, pulling inline content from `cursor` when the
/// command carries a block. Returns `None` for blank lines.
pub fn parse_line(line: &str, cursor: &mut ScriptCursor<'_>) -> SyncResult<Option<Command>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&word) = tokens.first() else {
        return Ok(None);
    };

    let usage = |message: &str| SyncError::Parse {
        line: cursor.line_no(),
        message: message.to_string(),
    };

    let command = match word {
        "cell" => {
            if tokens.len() != 4 {
                return Err(usage("cell takes 3 arguments: <name> <kind> <y|n>"));
            }
            let name = tokens[1].to_string();
            validate_cell_name(&name)?;
            let kind = CellKind::parse(tokens[2]).ok_or_else(|| SyncError::Parse {
                line: cursor.line_no(),
                message: format!("unknown content kind \"{}\"", tokens[2]),
            })?;
            let content = if tokens[3].starts_with('y') {
                cursor.content_block()?
            } else {
                String::new()
            };
            Command::Cell {
                name,
                kind,
                content,
            }
        }
        "remove" => {
            if tokens.len() < 2 {
                return Err(usage("remove takes at least 1 argument: <name>..."));
            }
            Command::Remove {
                names: tokens[1..].iter().map(|t| t.to_string()).collect(),
            }
        }
        "edit" => {
            if tokens.len() != 2 {
                return Err(usage("edit takes 1 argument: <name>"));
            }
            Command::Edit {
                name: tokens[1].to_string(),
                content: cursor.content_block()?,
            }
        }
        "rename" => {
            if tokens.len() != 3 {
                return Err(usage("rename takes 2 arguments: <old> <new>"));
            }
            Command::Rename {
                old: tokens[1].to_string(),
                new: tokens[2].to_string(),
            }
        }
        "link" => {
            if tokens.len() != 3 {
                return Err(usage("link takes 2 arguments: <src> <dst>"));
            }
            Command::Link {
                src: tokens[1].to_string(),
                dst: tokens[2].to_string(),
            }
        }
        "sever" => {
            if tokens.len() != 3 {
                return Err(usage("sever takes 2 arguments: <src> <dst>"));
            }
            Command::Sever {
                src: tokens[1].to_string(),
                dst: tokens[2].to_string(),
            }
        }
        "merge" => {
            if tokens.len() != 3 && tokens.len() != 4 {
                return Err(usage("merge takes 2-3 arguments: <src> <dst> [new_name]"));
            }
            Command::Merge {
                src: tokens[1].to_string(),
                dst: tokens[2].to_string(),
                new_name: tokens.get(3).map(|t| t.to_string()),
            }
        }
        "swap" => {
            if tokens.len() != 3 {
                return Err(usage("swap takes 2 arguments: <a> <b>"));
            }
            Command::Swap {
                a: tokens[1].to_string(),
                b: tokens[2].to_string(),
            }
        }
        "execute" => {
            let rest = &tokens[1..];
            if let Some(pos) = rest.iter().position(|t| *t == ">>") {
                if pos + 2 != rest.len() {
                    return Err(usage("execute redirect takes one file: ... >> <outfile>"));
                }
                Command::Execute {
                    names: rest[..pos].iter().map(|t| t.to_string()).collect(),
                    redirect: Some(rest[pos + 1].to_string()),
                }
            } else {
                Command::Execute {
                    names: rest.iter().map(|t| t.to_string()).collect(),
                    redirect: None,
                }
            }
        }
        "display" => {
            if tokens.len() > 2 {
                return Err(usage("display takes 0 or 1 arguments: [name]"));
            }
            Command::Display {
                name: tokens.get(1).map(|t| t.to_string()),
            }
        }
        "list" => Command::List,
        "reset_runtime" => Command::ResetRuntime,
        "reset_graph" => Command::ResetGraph,
        "save" => {
            if tokens.len() != 2 {
                return Err(usage("save takes 1 argument: <path>"));
            }
            Command::Save {
                path: tokens[1].to_string(),
            }
        }
        "quit" => Command::Quit,
        path if path.to_ascii_lowercase().ends_with(SATX_EXT) => Command::Load {
            path: path.to_string(),
        },
        other => {
            return Err(SyncError::Parse {
                line: cursor.line_no(),
                message: format!("command \"{other}\" not recognized"),
            });
        }
    };

    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(text: &str) -> Command {
        let mut cursor = ScriptCursor::new(text);
        let line = cursor.next_line().unwrap();
        parse_line(line, &mut cursor).unwrap().unwrap()
    }

    #[test]
    fn test_cell_without_content() {
        let command = parse_one("cell root python n");
        assert_eq!(
            command,
            Command::Cell {
                name: "root".to_string(),
                kind: CellKind::Code,
                content: String::new(),
            }
        );
    }

    #[test]
    fn test_cell_pulls_content_block() {
        let command = parse_one("cell a python y:\nx = 1\ny = 2\n;\n");
        assert_eq!(
            command,
            Command::Cell {
                name: "a".to_string(),
                kind: CellKind::Code,
                content: "x = 1\ny = 2".to_string(),
            }
        );
    }

    #[test]
    fn test_unterminated_block_is_an_error() {
        let mut cursor = ScriptCursor::new("cell a python y:\nx = 1");
        let line = cursor.next_line().unwrap();
        let err = parse_line(line, &mut cursor).unwrap_err();
        assert!(matches!(err, SyncError::Parse { .. }));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut cursor = ScriptCursor::new("cell merge python n");
        let line = cursor.next_line().unwrap();
        let err = parse_line(line, &mut cursor).unwrap_err();
        assert!(matches!(err, SyncError::InvalidName { .. }));

        assert!(validate_cell_name("notes.satx").is_err());
        assert!(validate_cell_name("notes").is_ok());
    }

    #[test]
    fn test_execute_variants() {
        assert_eq!(
            parse_one("execute"),
            Command::Execute {
                names: vec![],
                redirect: None,
            }
        );
        assert_eq!(
            parse_one("execute a b"),
            Command::Execute {
                names: vec!["a".to_string(), "b".to_string()],
                redirect: None,
            }
        );
        assert_eq!(
            parse_one("execute a >> out.txt"),
            Command::Execute {
                names: vec!["a".to_string()],
                redirect: Some("out.txt".to_string()),
            }
        );
    }

    #[test]
    fn test_merge_default_name_is_deferred() {
        assert_eq!(
            parse_one("merge a b"),
            Command::Merge {
                src: "a".to_string(),
                dst: "b".to_string(),
                new_name: None,
            }
        );
        assert_eq!(
            parse_one("merge a b ab"),
            Command::Merge {
                src: "a".to_string(),
                dst: "b".to_string(),
                new_name: Some("ab".to_string()),
            }
        );
    }

    #[test]
    fn test_bare_satx_path_loads() {
        assert_eq!(
            parse_one("notebook.satx"),
            Command::Load {
                path: "notebook.satx".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut cursor = ScriptCursor::new("frobnicate a");
        let line = cursor.next_line().unwrap();
        let err = parse_line(line, &mut cursor).unwrap_err();
        assert!(err.to_string().contains("not recognized"));
    }

    #[test]
    fn test_kind_aliases_accepted() {
        assert_eq!(
            parse_one("cell doc md n"),
            Command::Cell {
                name: "doc".to_string(),
                kind: CellKind::Markdown,
                content: String::new(),
            }
        );
    }
}
