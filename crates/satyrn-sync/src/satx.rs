//! The `.satx` command-log codec.
//!
//! The save format is not a separate schema: it is a script in the live
//! command language that reconstructs the graph when replayed, plus two
//! side-channel blocks (captured output, cell positions) consumed
//! directly instead of being dispatched.

use std::fs;
use std::path::Path;

use satyrn_core::CellGraph;

use crate::command::{Command, ScriptCursor, parse_line};
use crate::error::{SyncError, SyncResult};

/// Opens the captured-output block.
pub const DCO_START: &str = "<!--SATYRN_DCO_START-->";
/// Closes the captured-output block.
pub const DCO_END: &str = "<!--SATYRN_DCO_END-->";
/// Opens the positioning block.
pub const POSITIONING_START: &str = "<!--SATYRN_POSITIONING_START-->";
/// Closes the positioning block.
pub const POSITIONING_END: &str = "<!--SATYRN_POSITIONING_END-->";

/// Sentinel line written at the end of the captured-output block.
const EXECUTION_COMPLETE: &str = "<execution complete>";

/// A parsed command log: replayable commands plus the side channels.
#[derive(Debug, Default)]
pub struct SatxDocument {
    /// The commands, in file order, to dispatch through the same
    /// structural operations used for live edits.
    pub commands: Vec<Command>,
    /// Captured-output text carried verbatim in the DCO block.
    pub captured: String,
    /// `(name, left, top)` rows from the positioning block.
    pub positions: Vec<(String, String, String)>,
}

/// Render a graph and its captured output as a command log.
pub fn render(graph: &CellGraph, captured: &str) -> String {
    let mut out = String::new();

    for cell in graph.cells() {
        if cell.content.is_empty() {
            out.push_str(&format!("cell {} {} n\n", cell.name, cell.kind.as_token()));
        } else {
            out.push_str(&format!(
                "cell {} {} y:\n{}\n;\n",
                cell.name,
                cell.kind.as_token(),
                cell.content
            ));
        }
    }

    for (src, dst) in graph.edges() {
        out.push_str(&format!("link {src} {dst}\n"));
    }

    if !captured.is_empty() {
        out.push_str(DCO_START);
        out.push('\n');
        out.push_str(captured);
        if !captured.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(EXECUTION_COMPLETE);
        out.push('\n');
        out.push_str(DCO_END);
        out.push('\n');
    }

    if !graph.is_empty() {
        out.push_str(POSITIONING_START);
        out.push('\n');
        for cell in graph.cells() {
            out.push_str(&format!("{} {} {}\n", cell.name, cell.left, cell.top));
        }
        out.push_str(POSITIONING_END);
        out.push('\n');
    }

    tracing::debug!("rendered {} cells to a command log", graph.len());
    out
}

/// Parse a command log into commands and side channels.
pub fn parse(text: &str) -> SyncResult<SatxDocument> {
    let mut doc = SatxDocument::default();
    let mut cursor = ScriptCursor::new(text);
    let mut in_dco = false;
    let mut in_positions = false;

    while let Some(line) = cursor.next_line() {
        match line.trim() {
            DCO_START => {
                in_dco = true;
                continue;
            }
            DCO_END => {
                in_dco = false;
                // The sentinel belongs to the rendering, not the output.
                let sentinel = format!("{EXECUTION_COMPLETE}\n");
                if doc.captured.ends_with(&sentinel) {
                    let len = doc.captured.len() - sentinel.len();
                    doc.captured.truncate(len);
                }
                continue;
            }
            POSITIONING_START => {
                in_positions = true;
                continue;
            }
            POSITIONING_END => {
                in_positions = false;
                continue;
            }
            _ => {}
        }

        if in_dco {
            doc.captured.push_str(line);
            doc.captured.push('\n');
            continue;
        }

        if in_positions {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != 3 {
                return Err(SyncError::Parse {
                    line: cursor.line_no(),
                    message: "positioning rows take 3 fields: <name> <left> <top>".to_string(),
                });
            }
            doc.positions.push((
                fields[0].to_string(),
                fields[1].to_string(),
                fields[2].to_string(),
            ));
            continue;
        }

        if let Some(command) = parse_line(line, &mut cursor)? {
            doc.commands.push(command);
        }
    }

    tracing::debug!("parsed command log: {} commands", doc.commands.len());
    Ok(doc)
}

/// Read and parse a command log from disk.
pub fn read_file(path: impl AsRef<Path>) -> SyncResult<SatxDocument> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| SyncError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use satyrn_core::{Cell, CellKind};

    fn sample_graph() -> CellGraph {
        let mut graph = CellGraph::new();
        graph
            .add(Cell::new("root", CellKind::Code, "v = 1"))
            .unwrap();
        graph.add(Cell::new("x", CellKind::Code, "")).unwrap();
        graph
            .add(Cell::new("notes", CellKind::Markdown, "Some prose."))
            .unwrap();
        graph.connect("root", "x").unwrap();
        graph.connect("root", "notes").unwrap();
        graph
    }

    #[test]
    fn test_render_format() {
        let text = render(&sample_graph(), "");
        assert!(text.contains("cell root python y:\nv = 1\n;\n"));
        assert!(text.contains("cell x python n\n"));
        assert!(text.contains("cell notes markdown y:\nSome prose.\n;\n"));
        assert!(text.contains("link root x\n"));
        assert!(text.contains("link root notes\n"));
        // No output was captured, so no DCO block.
        assert!(!text.contains(DCO_START));
        assert!(text.contains(POSITIONING_START));
        assert!(text.contains("root 10 10\n"));
    }

    #[test]
    fn test_render_parse_round_trip() {
        let graph = sample_graph();
        let doc = parse(&render(&graph, "<root>\nhello\n")).unwrap();

        let cells: Vec<_> = doc
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::Cell { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(cells, vec!["root", "x", "notes"]);

        let links = doc
            .commands
            .iter()
            .filter(|c| matches!(c, Command::Link { .. }))
            .count();
        assert_eq!(links, 2);

        assert_eq!(doc.captured, "<root>\nhello\n");
        assert_eq!(doc.positions.len(), 3);
        assert_eq!(
            doc.positions[0],
            ("root".to_string(), "10".to_string(), "10".to_string())
        );
    }

    #[test]
    fn test_sentinel_stripped_from_captured_output() {
        let text = format!("{DCO_START}\nout\n{EXECUTION_COMPLETE}\n{DCO_END}\n");
        let doc = parse(&text).unwrap();
        assert_eq!(doc.captured, "out\n");
    }

    #[test]
    fn test_multi_line_content_survives() {
        let mut graph = CellGraph::new();
        graph
            .add(Cell::new("root", CellKind::Code, "a = 1\nb = 2\nprint(a + b)"))
            .unwrap();
        let doc = parse(&render(&graph, "")).unwrap();
        match &doc.commands[0] {
            Command::Cell { content, .. } => {
                assert_eq!(content, "a = 1\nb = 2\nprint(a + b)");
            }
            other => panic!("expected cell command, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_positioning_row_rejected() {
        let text = format!("{POSITIONING_START}\nroot 10\n{POSITIONING_END}\n");
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, SyncError::Parse { .. }));
    }
}
