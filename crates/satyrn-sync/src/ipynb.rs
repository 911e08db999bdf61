//! Notebook-interchange (`.ipynb`) export.
//!
//! Maps cells 1:1 to nbformat-4 cells preserving kind and listing order;
//! the cell name rides in cell metadata and captured output becomes a
//! stream output. One-way: the rendering never round-trips back into a
//! graph.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use satyrn_core::{Cell, CellGraph, CellKind};

use crate::error::{SyncError, SyncResult};

/// An interchange notebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    /// Notebook metadata
    pub metadata: NotebookMetadata,

    /// Format version (always 4)
    pub nbformat: u32,

    /// Minor format version
    pub nbformat_minor: u32,

    /// Notebook cells
    pub cells: Vec<NotebookCell>,
}

/// Notebook metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookMetadata {
    /// Kernel specification
    pub kernelspec: KernelSpec,

    /// Language info
    pub language_info: LanguageInfo,
}

/// Kernel specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Display name
    pub display_name: String,

    /// Language
    pub language: String,

    /// Kernel name
    pub name: String,
}

/// Language information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageInfo {
    /// File extension
    pub file_extension: String,

    /// MIME type
    pub mimetype: String,

    /// Language name
    pub name: String,
}

/// An interchange cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookCell {
    /// Cell type (`code` or `markdown`)
    pub cell_type: String,

    /// Cell metadata
    pub metadata: CellMetadata,

    /// Cell source (lines)
    pub source: Vec<String>,

    /// Cell outputs (for code cells)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<CellOutput>>,

    /// Execution count (for code cells)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u32>,
}

/// Cell metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellMetadata {
    /// The cell's graph name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Cell output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "output_type")]
pub enum CellOutput {
    /// Captured stdout text
    #[serde(rename = "stream")]
    Stream { name: String, text: Vec<String> },
}

impl Notebook {
    /// Create a new empty notebook.
    pub fn new() -> Self {
        Self {
            metadata: NotebookMetadata::default(),
            nbformat: 4,
            nbformat_minor: 5,
            cells: Vec::new(),
        }
    }

    /// Write the notebook to a file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| SyncError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

impl Default for Notebook {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for NotebookMetadata {
    fn default() -> Self {
        Self {
            kernelspec: KernelSpec {
                display_name: "Python 3".to_string(),
                language: "python".to_string(),
                name: "python3".to_string(),
            },
            language_info: LanguageInfo {
                file_extension: ".py".to_string(),
                mimetype: "text/x-python".to_string(),
                name: "python".to_string(),
            },
        }
    }
}

/// Generator for interchange notebooks from a cell graph.
pub struct IpynbGenerator {
    /// Execution counter
    execution_count: u32,
}

impl IpynbGenerator {
    /// Create a new generator.
    pub fn new() -> Self {
        Self { execution_count: 1 }
    }

    /// Generate a notebook from a graph's cells, in listing order.
    pub fn generate(&mut self, graph: &CellGraph) -> Notebook {
        let mut notebook = Notebook::new();
        for cell in graph.cells() {
            notebook.cells.push(self.convert(cell));
        }
        notebook
    }

    fn convert(&mut self, cell: &Cell) -> NotebookCell {
        let source = source_lines(&cell.content);
        let metadata = CellMetadata {
            name: Some(cell.name.clone()),
        };

        match cell.kind {
            CellKind::Markdown => NotebookCell {
                cell_type: "markdown".to_string(),
                metadata,
                source,
                outputs: None,
                execution_count: None,
            },
            CellKind::Code => {
                let exec_count = self.execution_count;
                self.execution_count += 1;

                let outputs = if cell.output.is_empty() {
                    Vec::new()
                } else {
                    vec![CellOutput::Stream {
                        name: "stdout".to_string(),
                        text: source_lines(&cell.output),
                    }]
                };

                NotebookCell {
                    cell_type: "code".to_string(),
                    metadata,
                    source,
                    outputs: Some(outputs),
                    execution_count: Some(exec_count),
                }
            }
        }
    }
}

impl Default for IpynbGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a graph as pretty-printed interchange JSON.
pub fn render(graph: &CellGraph) -> SyncResult<String> {
    let notebook = IpynbGenerator::new().generate(graph);
    Ok(serde_json::to_string_pretty(&notebook)?)
}

fn source_lines(text: &str) -> Vec<String> {
    text.lines().map(|l| format!("{l}\n")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> CellGraph {
        let mut graph = CellGraph::new();
        graph
            .add(Cell::new("root", CellKind::Code, "x = 1\nprint(x)"))
            .unwrap();
        graph
            .add(Cell::new("notes", CellKind::Markdown, "# Heading"))
            .unwrap();
        graph.cell_mut("root").unwrap().output = "1\n".to_string();
        graph
    }

    #[test]
    fn test_empty_notebook() {
        let notebook = Notebook::new();
        assert_eq!(notebook.nbformat, 4);
        assert!(notebook.cells.is_empty());
    }

    #[test]
    fn test_cells_map_one_to_one() {
        let notebook = IpynbGenerator::new().generate(&sample_graph());
        assert_eq!(notebook.cells.len(), 2);

        let code = &notebook.cells[0];
        assert_eq!(code.cell_type, "code");
        assert_eq!(code.metadata.name.as_deref(), Some("root"));
        assert_eq!(code.source, vec!["x = 1\n", "print(x)\n"]);
        assert_eq!(code.execution_count, Some(1));
        match code.outputs.as_deref() {
            Some([CellOutput::Stream { name, text }]) => {
                assert_eq!(name, "stdout");
                assert_eq!(text, &vec!["1\n".to_string()]);
            }
            other => panic!("expected one stream output, got {other:?}"),
        }

        let markdown = &notebook.cells[1];
        assert_eq!(markdown.cell_type, "markdown");
        assert!(markdown.outputs.is_none());
        assert!(markdown.execution_count.is_none());
    }

    #[test]
    fn test_render_is_valid_nbformat_json() {
        let json = render(&sample_graph()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["nbformat"], 4);
        assert_eq!(value["cells"][0]["metadata"]["name"], "root");
        assert_eq!(value["cells"][0]["outputs"][0]["output_type"], "stream");
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.ipynb");
        let notebook = IpynbGenerator::new().generate(&sample_graph());
        notebook.write_to_file(&path).unwrap();
        let read_back: Notebook =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read_back.cells.len(), 2);
    }
}
