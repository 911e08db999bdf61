//! The session: one graph, one runtime, one structural mutex.
//!
//! Every top-level command is serialized by the session's structural
//! mutex, including the entirety of an execution call; a long traversal
//! blocks structural commands until it completes, by design. The live
//! capture buffer and the executing flag sit outside that mutex so
//! adapters can poll output while a traversal is in flight.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use satyrn_core::{Cell, CellGraph, CellKind, Evaluator, ScriptRuntime, run_cells, run_graph};
use satyrn_sync::{Command, ExportFormat, SatxDocument, ipynb, satx, script, validate_cell_name};

use crate::error::{SessionError, SessionResult};

/// Filename reported until a save or load names the session.
const DEFAULT_FILENAME: &str = "Untitled.SATX";

/// Result of a link-validity query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCheck {
    /// The link is allowed.
    Ok,
    /// A cell cannot link to itself.
    SelfLink,
    /// The destination is the root.
    RootTarget,
    /// The link would close a cycle.
    Cycle,
}

/// What a dispatched command hands back to the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Nothing to show.
    None,
    /// Text for the adapter to render.
    Text(String),
    /// The session should end; stops replay when it appears in a script.
    Quit,
}

/// State guarded by the structural mutex.
struct SessionState {
    graph: CellGraph,
    filename: String,
}

/// One notebook session: a graph, a script runtime and the dispatch
/// seam external adapters call through.
pub struct Session {
    state: Mutex<SessionState>,
    /// Captured execution output, pollable without the structural mutex.
    capture: Arc<Mutex<String>>,
    /// Executing flag, shared with the graph across resets.
    executing: Arc<AtomicBool>,
    runtime: Arc<dyn ScriptRuntime>,
}

impl Session {
    /// Create a session around the bundled evaluator.
    pub fn new() -> Self {
        Self::with_runtime(Arc::new(Evaluator))
    }

    /// Create a session around a caller-supplied runtime.
    pub fn with_runtime(runtime: Arc<dyn ScriptRuntime>) -> Self {
        let graph = CellGraph::new();
        let executing = graph.executing_flag();
        Self {
            state: Mutex::new(SessionState {
                graph,
                filename: DEFAULT_FILENAME.to_string(),
            }),
            capture: Arc::new(Mutex::new(String::new())),
            executing,
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_capture(&self) -> MutexGuard<'_, String> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- command dispatch ----

    /// Dispatch one command under the structural mutex.
    pub fn dispatch(&self, command: Command) -> SessionResult<Reply> {
        let mut state = self.lock();
        self.dispatch_locked(&mut state, command)
    }

    fn dispatch_locked(
        &self,
        state: &mut SessionState,
        command: Command,
    ) -> SessionResult<Reply> {
        match command {
            Command::Cell {
                name,
                kind,
                content,
            } => {
                self.add_cell_locked(state, &name, kind, &content)?;
                Ok(Reply::None)
            }
            Command::Remove { names } => {
                for name in &names {
                    state.graph.remove(name)?;
                }
                Ok(Reply::None)
            }
            Command::Edit { name, content } => {
                state.graph.cell_mut(&name)?.content = content;
                Ok(Reply::None)
            }
            Command::Rename { old, new } => {
                validate_cell_name(&new)?;
                state.graph.rename(&old, &new)?;
                Ok(Reply::None)
            }
            Command::Link { src, dst } => {
                self.link_locked(state, &src, &dst)?;
                Ok(Reply::None)
            }
            Command::Sever { src, dst } => {
                state.graph.sever(&src, &dst)?;
                Ok(Reply::None)
            }
            Command::Merge { src, dst, new_name } => {
                self.merge_locked(state, &src, &dst, new_name.as_deref())?;
                Ok(Reply::None)
            }
            Command::Swap { a, b } => {
                state.graph.swap(&a, &b)?;
                Ok(Reply::None)
            }
            Command::Execute { names, redirect } => {
                let transcript = self.execute_locked(state, &names, redirect.as_deref())?;
                Ok(Reply::Text(transcript))
            }
            Command::Display { name: Some(name) } => {
                Ok(Reply::Text(self.display_locked(state, &name)?))
            }
            Command::Display { name: None } | Command::List => {
                Ok(Reply::Text(listing(&state.graph)))
            }
            Command::ResetRuntime => {
                state.graph.reset_env();
                Ok(Reply::None)
            }
            Command::ResetGraph => {
                self.reset_locked(state);
                Ok(Reply::None)
            }
            Command::Save { path } => {
                self.save_locked(state, &path)?;
                Ok(Reply::None)
            }
            Command::Load { path } => {
                let doc = satx::read_file(&path)?;
                self.replay_locked(state, doc)?;
                state.filename = basename(&path);
                Ok(Reply::None)
            }
            Command::Quit => Ok(Reply::Quit),
        }
    }

    // ---- locked helpers ----

    fn add_cell_locked(
        &self,
        state: &mut SessionState,
        name: &str,
        kind: CellKind,
        content: &str,
    ) -> SessionResult<()> {
        validate_cell_name(name)?;
        state.graph.add(Cell::new(name, kind, content))?;
        Ok(())
    }

    fn link_locked(&self, state: &mut SessionState, src: &str, dst: &str) -> SessionResult<()> {
        // Self-links are rejected here, before the graph sees them.
        if src == dst {
            return Err(SessionError::SelfLink);
        }
        state.graph.connect(src, dst)?;
        Ok(())
    }

    fn merge_locked(
        &self,
        state: &mut SessionState,
        src: &str,
        dst: &str,
        new_name: Option<&str>,
    ) -> SessionResult<()> {
        let resolved = match new_name {
            Some(name) => name.to_string(),
            None => format!("{src}_merged"),
        };
        validate_cell_name(&resolved)?;
        state.graph.merge(src, dst, &resolved)?;
        Ok(())
    }

    fn execute_locked(
        &self,
        state: &mut SessionState,
        names: &[String],
        redirect: Option<&str>,
    ) -> SessionResult<String> {
        let transcript = if names.is_empty() {
            run_graph(&mut state.graph, self.runtime.as_ref(), &self.capture)?
        } else {
            run_cells(&mut state.graph, self.runtime.as_ref(), names, &self.capture)
        };
        if let Some(path) = redirect {
            fs::write(path, &transcript)?;
            tracing::info!("execution transcript written to {path}");
        }
        Ok(transcript)
    }

    fn display_locked(&self, state: &SessionState, name: &str) -> SessionResult<String> {
        let content = state.graph.cell(name)?.content.trim().to_string();
        let mut text = String::new();
        if !content.is_empty() {
            text.push_str(&format!("```\n{content}\n```\n"));
        }
        let in_edges = state.graph.in_edges(name)?;
        if !in_edges.is_empty() {
            text.push_str("In Edges:\n");
            for edge in in_edges {
                text.push_str(&edge);
                text.push('\n');
            }
        }
        let out_edges = state.graph.out_edges(name)?;
        if !out_edges.is_empty() {
            text.push_str("Out Edges:\n");
            for edge in out_edges {
                text.push_str(&edge);
                text.push('\n');
            }
        }
        Ok(text)
    }

    fn save_locked(&self, state: &mut SessionState, path: &str) -> SessionResult<()> {
        let format = ExportFormat::from_path(path)
            .ok_or_else(|| SessionError::UnsupportedFormat(path.to_string()))?;
        let text = match format {
            ExportFormat::Satx => satx::render(&state.graph, self.lock_capture().as_str()),
            ExportFormat::Script => script::render(&state.graph),
            ExportFormat::Ipynb => ipynb::render(&state.graph)?,
        };
        fs::write(path, text)?;
        tracing::info!("saved graph to {path}");
        Ok(())
    }

    /// Reset the graph, environment and capture buffer.
    fn reset_locked(&self, state: &mut SessionState) {
        let mut graph = CellGraph::new();
        graph.bind_executing_flag(Arc::clone(&self.executing));
        state.graph = graph;
        self.lock_capture().clear();
        tracing::info!("graph reset");
    }

    /// Replay a parsed command log through the live dispatch path, then
    /// apply the output and position side channels.
    fn replay_locked(&self, state: &mut SessionState, doc: SatxDocument) -> SessionResult<()> {
        self.reset_locked(state);
        for command in doc.commands {
            if self.dispatch_locked(state, command)? == Reply::Quit {
                break;
            }
        }
        for (name, left, top) in doc.positions {
            if let Ok(cell) = state.graph.cell_mut(&name) {
                cell.left = left;
                cell.top = top;
            }
        }
        self.lock_capture().push_str(&doc.captured);
        Ok(())
    }

    // ---- adapter-facing operations ----

    /// Create a cell.
    pub fn create_cell(&self, name: &str, kind: CellKind, content: &str) -> SessionResult<()> {
        let mut state = self.lock();
        self.add_cell_locked(&mut state, name, kind, content)
    }

    /// Remove a cell, returning its payload for the adapter to render.
    pub fn destroy_cell(&self, name: &str) -> SessionResult<Cell> {
        Ok(self.lock().graph.remove(name)?)
    }

    /// Replace a cell's content.
    pub fn set_content(&self, name: &str, content: &str) -> SessionResult<()> {
        self.lock().graph.cell_mut(name)?.content = content.to_string();
        Ok(())
    }

    /// A cell's content.
    pub fn content(&self, name: &str) -> SessionResult<String> {
        Ok(self.lock().graph.cell(name)?.content.clone())
    }

    /// A cell's captured output.
    pub fn cell_output(&self, name: &str) -> SessionResult<String> {
        Ok(self.lock().graph.cell(name)?.output.clone())
    }

    /// Change a cell's content kind.
    pub fn set_kind(&self, name: &str, kind: CellKind) -> SessionResult<()> {
        self.lock().graph.cell_mut(name)?.kind = kind;
        Ok(())
    }

    /// A cell's content kind.
    pub fn kind(&self, name: &str) -> SessionResult<CellKind> {
        Ok(self.lock().graph.cell(name)?.kind)
    }

    /// Rename a cell.
    pub fn rename(&self, old: &str, new: &str) -> SessionResult<()> {
        validate_cell_name(new)?;
        self.lock().graph.rename(old, new)?;
        Ok(())
    }

    /// Duplicate a cell as `<name>-copy`, copying content, kind and
    /// output. Returns the copy's name.
    pub fn duplicate(&self, name: &str) -> SessionResult<String> {
        let mut state = self.lock();
        let source = state.graph.cell(name)?.clone();
        let copy_name = format!("{name}-copy");
        let mut copy = Cell::new(copy_name.clone(), source.kind, source.content);
        copy.output = source.output;
        state.graph.add(copy)?;
        Ok(copy_name)
    }

    /// Create a cell and immediately link it under `parent`.
    pub fn create_child(&self, parent: &str, child: &str, kind: CellKind) -> SessionResult<()> {
        let mut state = self.lock();
        state.graph.index_of(parent)?;
        self.add_cell_locked(&mut state, child, kind, "")?;
        if let Err(err) = self.link_locked(&mut state, parent, child) {
            // All-or-nothing: drop the freshly added child again.
            let _ = state.graph.remove(child);
            return Err(err);
        }
        Ok(())
    }

    /// Would `link(src, dst)` be accepted?
    pub fn link_check(&self, src: &str, dst: &str) -> SessionResult<LinkCheck> {
        let state = self.lock();
        state.graph.index_of(src)?;
        let dst_idx = state.graph.index_of(dst)?;
        if src == dst {
            return Ok(LinkCheck::SelfLink);
        }
        if Some(dst_idx) == state.graph.root() {
            return Ok(LinkCheck::RootTarget);
        }
        if state.graph.would_cycle(src, dst)? {
            return Ok(LinkCheck::Cycle);
        }
        Ok(LinkCheck::Ok)
    }

    /// Add the edge `src → dst`.
    pub fn link(&self, src: &str, dst: &str) -> SessionResult<()> {
        let mut state = self.lock();
        self.link_locked(&mut state, src, dst)
    }

    /// Remove the edge `src → dst`.
    pub fn sever(&self, src: &str, dst: &str) -> SessionResult<()> {
        self.lock().graph.sever(src, dst)?;
        Ok(())
    }

    /// Merge two adjacent cells; the name defaults to `<src>_merged`.
    pub fn merge(&self, src: &str, dst: &str, new_name: Option<&str>) -> SessionResult<()> {
        let mut state = self.lock();
        self.merge_locked(&mut state, src, dst, new_name)
    }

    /// Exchange the payload of two cells.
    pub fn swap(&self, a: &str, b: &str) -> SessionResult<()> {
        self.lock().graph.swap(a, b)?;
        Ok(())
    }

    /// Run the whole graph breadth-first from the root.
    pub fn run_graph(&self) -> SessionResult<String> {
        let mut state = self.lock();
        self.execute_locked(&mut state, &[], None)
    }

    /// Run the named cells in order; a single name runs one cell.
    pub fn run_cells(&self, names: &[String]) -> SessionResult<String> {
        let mut state = self.lock();
        self.execute_locked(&mut state, names, None)
    }

    /// Whether the root exists and has outgoing edges.
    pub fn root_has_children(&self) -> bool {
        self.lock().graph.root_has_children()
    }

    /// Whether a cell with this name exists.
    pub fn has_cell(&self, name: &str) -> bool {
        self.lock().graph.contains(name)
    }

    /// Snapshot of all cells in listing order.
    pub fn cells(&self) -> Vec<Cell> {
        self.lock().graph.cells().cloned().collect()
    }

    /// All edges as `(src, dst)` name pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.lock().graph.edges()
    }

    /// Longest-path layer of a cell; -1 when unreachable from root.
    pub fn layer(&self, name: &str) -> SessionResult<i64> {
        Ok(self.lock().graph.layer(name)?)
    }

    /// Update a cell's layout position.
    pub fn set_position(&self, name: &str, left: &str, top: &str) -> SessionResult<()> {
        let mut state = self.lock();
        let cell = state.graph.cell_mut(name)?;
        cell.left = left.to_string();
        cell.top = top.to_string();
        Ok(())
    }

    /// A cell's layout position as `(left, top)`.
    pub fn position(&self, name: &str) -> SessionResult<(String, String)> {
        let state = self.lock();
        let cell = state.graph.cell(name)?;
        Ok((cell.left.clone(), cell.top.clone()))
    }

    /// Render the graph as a command log.
    pub fn export_satx(&self) -> String {
        let state = self.lock();
        satx::render(&state.graph, self.lock_capture().as_str())
    }

    /// Render the graph as a plain script.
    pub fn export_script(&self) -> String {
        script::render(&self.lock().graph)
    }

    /// Render the graph as interchange JSON.
    pub fn export_ipynb(&self) -> SessionResult<String> {
        Ok(ipynb::render(&self.lock().graph)?)
    }

    /// Save to a path; the extension picks the format.
    pub fn save(&self, path: &str) -> SessionResult<()> {
        let mut state = self.lock();
        self.save_locked(&mut state, path)
    }

    /// Reset the graph and replay a command log from disk.
    pub fn load_path(&self, path: &str) -> SessionResult<()> {
        let doc = satx::read_file(path)?;
        let mut state = self.lock();
        self.replay_locked(&mut state, doc)?;
        state.filename = basename(path);
        Ok(())
    }

    /// Reset the graph and replay a command log from a string.
    pub fn load_str(&self, text: &str) -> SessionResult<()> {
        let doc = satx::parse(text)?;
        let mut state = self.lock();
        self.replay_locked(&mut state, doc)
    }

    /// Delete every binding in the shared environment.
    pub fn reset_runtime(&self) {
        self.lock().graph.reset_env();
    }

    /// Delete all cells and bindings; equivalent to a fresh session.
    pub fn reset_graph(&self) {
        let mut state = self.lock();
        self.reset_locked(&mut state);
    }

    /// Snapshot of the capture buffer. Grows while a traversal runs.
    pub fn output(&self) -> String {
        self.lock_capture().clone()
    }

    /// Clear the capture buffer.
    pub fn clear_output(&self) {
        self.lock_capture().clear();
    }

    /// Whether a traversal execution is in flight. Does not take the
    /// structural mutex, so adapters can poll during execution.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    /// The session's display filename.
    pub fn filename(&self) -> String {
        self.lock().filename.clone()
    }

    /// Set the session's display filename.
    pub fn set_filename(&self, filename: &str) {
        self.lock().filename = filename.to_string();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the cell and edge listing shared by `list` and bare `display`.
fn listing(graph: &CellGraph) -> String {
    let cells = graph.cell_names().join(", ");
    let edges = graph
        .edges()
        .iter()
        .map(|(src, dst)| format!("{src} -> {dst}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("Cells: {cells}\nEdges: {edges}")
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
