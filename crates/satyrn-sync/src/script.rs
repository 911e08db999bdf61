//! Plain-script export.
//!
//! Concatenates cells in listing order; documentation cells are wrapped
//! as inert triple-quoted blocks. One-way: the rendering never
//! round-trips back into a graph.

use satyrn_core::{CellGraph, CellKind};

/// Render a graph as a plain script.
pub fn render(graph: &CellGraph) -> String {
    let mut out = String::new();

    for cell in graph.cells() {
        out.push_str(&format!("# <{}>\n", cell.name));
        match cell.kind {
            CellKind::Code => {
                out.push_str(&cell.content);
                out.push('\n');
            }
            CellKind::Markdown => {
                out.push_str(&format!("\"\"\"\n{}\n\"\"\"\n", cell.content));
            }
        }
    }

    out.push_str("# <EOF>");
    out
}
