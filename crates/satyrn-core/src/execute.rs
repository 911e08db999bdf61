//! Ordered-list and breadth-first traversal execution.
//!
//! Both modes run cells against the graph's shared environment through
//! the [`ScriptRuntime`] seam. Traversal execution fans each frontier out
//! to one task per cell with a full barrier between frontiers; each task
//! merges its namespace back on completion, so siblings binding the same
//! name race last-writer-wins. That race is part of the execution
//! contract and must not be scheduled away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use petgraph::stable_graph::NodeIndex;
use rustc_hash::FxHashSet;

use crate::cell::CellKind;
use crate::error::{Error, Result};
use crate::graph::CellGraph;
use crate::runtime::{RunResult, ScriptRuntime};

/// Lock a mutex, recovering from poisoning.
///
/// A panicked cell must not poison shared state for its siblings.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn append(capture: &Mutex<String>, text: &str) {
    relock(capture).push_str(text);
}

/// Transcript entry for one finished cell: a `<name>` tag line, the
/// captured text, and the fault report when the content failed.
fn render_entry(name: &str, result: &RunResult) -> String {
    let mut entry = format!("<{name}>\n");
    entry.push_str(&result.captured);
    if let Some(message) = &result.fault {
        let fault = Error::ExecutionFault {
            cell: name.to_string(),
            message: message.clone(),
        };
        entry.push_str(&fault.to_string());
        entry.push('\n');
        tracing::warn!("{fault}");
    }
    entry
}

/// Clears the executing flag when an execution unwinds or returns.
struct ExecutingGuard(Arc<AtomicBool>);

impl ExecutingGuard {
    fn set(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Execute the named cells strictly in the given order.
///
/// Each cell runs against the current shared environment; its bindings
/// are visible to the next cell in the list. An unknown name or a fault
/// in one cell is reported in the transcript and does not stop the cells
/// after it. Documentation cells are skipped.
pub fn run_cells(
    graph: &mut CellGraph,
    runtime: &dyn ScriptRuntime,
    names: &[String],
    capture: &Mutex<String>,
) -> String {
    let env = graph.env();
    let mut transcript = String::new();

    for name in names {
        let (content, kind) = match graph.cell(name) {
            Ok(cell) => (cell.content.clone(), cell.kind),
            Err(err) => {
                let note = format!("{err}\n");
                tracing::warn!("{err}");
                append(capture, &note);
                transcript.push_str(&note);
                continue;
            }
        };
        if kind != CellKind::Code {
            continue;
        }

        let mut snapshot = relock(&env).clone();
        let result = runtime.run(&content, &mut snapshot);
        relock(&env).extend(snapshot);

        let entry = render_entry(name, &result);
        if let Ok(cell) = graph.cell_mut(name) {
            cell.output = result.captured;
        }
        append(capture, &entry);
        transcript.push_str(&entry);
    }

    transcript
}

/// Execute the whole graph breadth-first from the root.
///
/// The root runs synchronously; after that every frontier of direct
/// successors runs concurrently, one task per cell, each against a
/// snapshot of the shared environment taken when its execution starts.
/// A full barrier separates frontiers. Outputs are reported in
/// frontier-start order; each node executes at most once per traversal.
pub fn run_graph(
    graph: &mut CellGraph,
    runtime: &dyn ScriptRuntime,
    capture: &Mutex<String>,
) -> Result<String> {
    let root = graph.root().ok_or(Error::RootRequired)?;
    let _executing = ExecutingGuard::set(graph.executing_flag());
    let env = graph.env();
    let mut transcript = String::new();

    // Root first, before any fan-out.
    let root_cell = graph.cell_at(root);
    let (root_name, root_kind, root_content) = (
        root_cell.name.clone(),
        root_cell.kind,
        root_cell.content.clone(),
    );
    let result = if root_kind == CellKind::Code {
        let mut snapshot = relock(&env).clone();
        let result = runtime.run(&root_content, &mut snapshot);
        relock(&env).extend(snapshot);
        result
    } else {
        RunResult::default()
    };
    let entry = render_entry(&root_name, &result);
    graph.cell_at_mut(root).output = result.captured;
    append(capture, &entry);
    transcript.push_str(&entry);

    let mut visited: FxHashSet<NodeIndex> = FxHashSet::default();
    visited.insert(root);
    let mut frontier: Vec<NodeIndex> = Vec::new();
    for succ in graph.successors(root) {
        if visited.insert(succ) {
            frontier.push(succ);
        }
    }

    while !frontier.is_empty() {
        tracing::debug!("executing frontier of {} cells", frontier.len());

        let items: Vec<(NodeIndex, String, CellKind, String)> = frontier
            .iter()
            .map(|&idx| {
                let cell = graph.cell_at(idx);
                (idx, cell.name.clone(), cell.kind, cell.content.clone())
            })
            .collect();
        let slots: Vec<Mutex<Option<RunResult>>> =
            items.iter().map(|_| Mutex::new(None)).collect();

        rayon::scope(|scope| {
            for (i, (_, _, kind, content)) in items.iter().enumerate() {
                let env = Arc::clone(&env);
                let slot = &slots[i];
                scope.spawn(move |_| {
                    let result = if *kind == CellKind::Code {
                        // Snapshot taken when this execution starts, not
                        // when the frontier was formed.
                        let mut snapshot = relock(&env).clone();
                        let result = runtime.run(content, &mut snapshot);
                        // Merge on completion: whichever sibling merges
                        // last wins conflicting names.
                        relock(&env).extend(snapshot);
                        result
                    } else {
                        // Documentation cells never touch the environment.
                        RunResult::default()
                    };
                    *relock(slot) = Some(result);
                });
            }
        });
        // The scope is the barrier: every task of this frontier is done.

        for (i, (idx, name, _, _)) in items.iter().enumerate() {
            let result = relock(&slots[i]).take().unwrap_or_default();
            let entry = render_entry(name, &result);
            graph.cell_at_mut(*idx).output = result.captured;
            append(capture, &entry);
            transcript.push_str(&entry);
        }

        let mut next = Vec::new();
        for &idx in &frontier {
            for succ in graph.successors(idx) {
                if visited.insert(succ) {
                    next.push(succ);
                }
            }
        }
        frontier = next;
    }

    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::runtime::Evaluator;
    use serde_json::Value;

    fn capture() -> Mutex<String> {
        Mutex::new(String::new())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// root binds v, children mutate it concurrently.
    fn racing_graph() -> CellGraph {
        let mut graph = CellGraph::new();
        graph.add(Cell::new("root", CellKind::Code, "v = 1")).unwrap();
        graph.add(Cell::new("a", CellKind::Code, "v = v + 1")).unwrap();
        graph.add(Cell::new("b", CellKind::Code, "v = v * 10")).unwrap();
        graph.connect("root", "a").unwrap();
        graph.connect("root", "b").unwrap();
        graph
    }

    #[test]
    fn test_traversal_requires_root() {
        let mut graph = CellGraph::new();
        let cap = capture();
        let err = run_graph(&mut graph, &Evaluator, &cap).unwrap_err();
        assert!(matches!(err, Error::RootRequired));
    }

    #[test]
    fn test_traversal_last_writer_wins() {
        let mut graph = racing_graph();
        let cap = capture();
        run_graph(&mut graph, &Evaluator, &cap).unwrap();

        let env = graph.env_snapshot();
        let v = env.get("v").expect("v must be bound after the traversal");
        assert!(
            *v == Value::from(2) || *v == Value::from(10),
            "v must be one child's result, got {v}"
        );
        assert!(!graph.is_executing());
    }

    #[test]
    fn test_ordered_list_is_deterministic() {
        let mut graph = racing_graph();
        let cap = capture();
        run_cells(&mut graph, &Evaluator, &names(&["root", "a", "b"]), &cap);

        let env = graph.env_snapshot();
        assert_eq!(env["v"], Value::from(20));
    }

    #[test]
    fn test_fault_does_not_stop_later_cells() {
        let mut graph = CellGraph::new();
        graph.add(Cell::new("root", CellKind::Code, "x = 1")).unwrap();
        graph.add(Cell::new("bad", CellKind::Code, "y = nope")).unwrap();
        graph.add(Cell::new("tail", CellKind::Code, "z = 2")).unwrap();

        let cap = capture();
        let transcript = run_cells(
            &mut graph,
            &Evaluator,
            &names(&["root", "bad", "tail"]),
            &cap,
        );

        assert!(transcript.contains("fault in cell \"bad\""));
        let env = graph.env_snapshot();
        assert_eq!(env["x"], Value::from(1));
        assert_eq!(env["z"], Value::from(2));
    }

    #[test]
    fn test_unknown_cell_reported_and_skipped() {
        let mut graph = CellGraph::new();
        graph.add(Cell::new("root", CellKind::Code, "x = 1")).unwrap();

        let cap = capture();
        let transcript = run_cells(&mut graph, &Evaluator, &names(&["ghost", "root"]), &cap);

        assert!(transcript.contains("\"ghost\" does not exist"));
        assert_eq!(graph.env_snapshot()["x"], Value::from(1));
    }

    #[test]
    fn test_diamond_node_executes_once() {
        let mut graph = CellGraph::new();
        graph.add(Cell::new("root", CellKind::Code, "n = 0")).unwrap();
        graph.add(Cell::new("a", CellKind::Code, "a = 1")).unwrap();
        graph.add(Cell::new("b", CellKind::Code, "b = 2")).unwrap();
        graph.add(Cell::new("join", CellKind::Code, "n = n + 1")).unwrap();
        graph.connect("root", "a").unwrap();
        graph.connect("root", "b").unwrap();
        graph.connect("a", "join").unwrap();
        graph.connect("b", "join").unwrap();

        let cap = capture();
        let transcript = run_graph(&mut graph, &Evaluator, &cap).unwrap();

        assert_eq!(graph.env_snapshot()["n"], Value::from(1));
        assert_eq!(transcript.matches("<join>").count(), 1);
    }

    #[test]
    fn test_outputs_in_frontier_start_order() {
        let mut graph = CellGraph::new();
        graph
            .add(Cell::new("root", CellKind::Code, "print(\"r\")"))
            .unwrap();
        graph.add(Cell::new("a", CellKind::Code, "print(\"a\")")).unwrap();
        graph.add(Cell::new("b", CellKind::Code, "print(\"b\")")).unwrap();
        graph.connect("root", "a").unwrap();
        graph.connect("root", "b").unwrap();

        let cap = capture();
        let transcript = run_graph(&mut graph, &Evaluator, &cap).unwrap();

        let root_at = transcript.find("<root>").unwrap();
        let a_at = transcript.find("<a>").unwrap();
        let b_at = transcript.find("<b>").unwrap();
        assert!(root_at < a_at && a_at < b_at);
        assert_eq!(graph.cell("a").unwrap().output, "a\n");
    }

    #[test]
    fn test_markdown_sibling_never_merges_a_stale_snapshot() {
        let mut graph = CellGraph::new();
        graph.add(Cell::new("root", CellKind::Code, "v = 1")).unwrap();
        graph.add(Cell::new("a", CellKind::Code, "v = v + 1")).unwrap();
        graph
            .add(Cell::new("notes", CellKind::Markdown, "v = 999"))
            .unwrap();
        graph.connect("root", "a").unwrap();
        graph.connect("root", "notes").unwrap();

        let cap = capture();
        run_graph(&mut graph, &Evaluator, &cap).unwrap();

        // The markdown sibling neither executes nor merges, so `a`'s
        // update can never be overwritten by a stale copy.
        assert_eq!(graph.env_snapshot()["v"], Value::from(2));
    }

    #[test]
    fn test_capture_grows_with_the_transcript() {
        let mut graph = racing_graph();
        let cap = capture();
        let transcript = run_graph(&mut graph, &Evaluator, &cap).unwrap();
        assert_eq!(*cap.lock().unwrap(), transcript);
    }

    #[test]
    fn test_traversal_fault_leaves_siblings_unaffected() {
        let mut graph = CellGraph::new();
        graph.add(Cell::new("root", CellKind::Code, "v = 1")).unwrap();
        graph
            .add(Cell::new("bad", CellKind::Code, "w = missing"))
            .unwrap();
        graph.add(Cell::new("ok", CellKind::Code, "u = 5")).unwrap();
        graph.connect("root", "bad").unwrap();
        graph.connect("root", "ok").unwrap();

        let cap = capture();
        let transcript = run_graph(&mut graph, &Evaluator, &cap).unwrap();

        assert!(transcript.contains("fault in cell \"bad\""));
        let env = graph.env_snapshot();
        assert_eq!(env["u"], Value::from(5));
        assert_eq!(env["v"], Value::from(1));
    }
}
