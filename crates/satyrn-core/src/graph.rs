//! The cell DAG: structural operations and derived queries.
//!
//! Nodes hold [`Cell`]s; node identities are stable for the node's
//! lifetime. The node at identity 0, once assigned, is the designated
//! root: it is never the destination of an edge and is implicitly layer 0.
//! Acyclicity is enforced at edge-creation time, never through post-hoc
//! detection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::runtime::Namespace;

/// Marker line inserted between the two halves of a merged cell.
pub const MERGE_MARKER: &str = "# merge point";

/// Node identity of the root cell.
const ROOT_INDEX: usize = 0;

/// Lock a namespace, recovering from poisoning.
///
/// A panicked cell must not poison the shared namespace for its siblings.
pub(crate) fn lock_ns(env: &Mutex<Namespace>) -> MutexGuard<'_, Namespace> {
    env.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The DAG of cells plus its name index and shared environment.
pub struct CellGraph {
    /// Directed acyclic graph; node weights are the cells themselves.
    graph: StableDiGraph<Cell, ()>,
    /// Cell name → node identity. Always consistent with the node set.
    names: FxHashMap<String, NodeIndex>,
    /// Shared environment cell executions read and write.
    env: Arc<Mutex<Namespace>>,
    /// True while a traversal execution is in flight.
    executing: Arc<AtomicBool>,
}

impl CellGraph {
    /// Create an empty graph with a fresh environment.
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            names: FxHashMap::default(),
            env: Arc::new(Mutex::new(Namespace::default())),
            executing: Arc::new(AtomicBool::new(false)),
        }
    }

    // ---- structural operations ----

    /// Add a cell under a fresh node identity.
    pub fn add(&mut self, cell: Cell) -> Result<NodeIndex> {
        if self.names.contains_key(&cell.name) {
            return Err(Error::NameConflict(cell.name));
        }
        let name = cell.name.clone();
        let idx = self.graph.add_node(cell);
        self.names.insert(name.clone(), idx);
        tracing::debug!("added cell \"{}\" at {:?}", name, idx);
        Ok(idx)
    }

    /// Remove a cell and all its incident edges, returning its payload.
    pub fn remove(&mut self, name: &str) -> Result<Cell> {
        let idx = self.index_of(name)?;
        self.names.remove(name);
        let cell = self
            .graph
            .remove_node(idx)
            .ok_or_else(|| Error::UnknownName(name.to_string()))?;
        tracing::debug!("removed cell \"{}\"", name);
        Ok(cell)
    }

    /// Rename a cell; node identity and edges are untouched.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if self.names.contains_key(new) {
            return Err(Error::NameConflict(new.to_string()));
        }
        let idx = self.index_of(old)?;
        self.names.remove(old);
        self.names.insert(new.to_string(), idx);
        if let Some(cell) = self.graph.node_weight_mut(idx) {
            cell.name = new.to_string();
        }
        Ok(())
    }

    /// Exchange the content and content-kind of two cells.
    ///
    /// Node identities, edges, names, outputs and positions stay fixed;
    /// only the payload moves between the two slots.
    pub fn swap(&mut self, a: &str, b: &str) -> Result<()> {
        let idx_a = self.index_of(a)?;
        let idx_b = self.index_of(b)?;
        let (content_a, kind_a) = {
            let cell = &self.graph[idx_a];
            (cell.content.clone(), cell.kind)
        };
        let (content_b, kind_b) = {
            let cell = &self.graph[idx_b];
            (cell.content.clone(), cell.kind)
        };
        {
            let cell = &mut self.graph[idx_a];
            cell.content = content_b;
            cell.kind = kind_b;
        }
        {
            let cell = &mut self.graph[idx_b];
            cell.content = content_a;
            cell.kind = kind_a;
        }
        Ok(())
    }

    /// Add the edge `src → dst`.
    ///
    /// Fails if `dst` is the root or if `dst` can already reach `src`
    /// (the new edge would close a cycle through that path). Adding an
    /// edge that already exists is a no-op.
    pub fn connect(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_idx = self.index_of(src)?;
        let dst_idx = self.index_of(dst)?;

        if Some(dst_idx) == self.root() {
            return Err(Error::RootTarget);
        }
        if self.would_cycle(src, dst)? {
            return Err(Error::Cycle {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }
        if self.graph.find_edge(src_idx, dst_idx).is_none() {
            self.graph.add_edge(src_idx, dst_idx, ());
            tracing::debug!("linked \"{}\" -> \"{}\"", src, dst);
        }
        Ok(())
    }

    /// Whether adding the edge `src → dst` would close a cycle, i.e.
    /// whether `dst` can already reach `src`.
    pub fn would_cycle(&self, src: &str, dst: &str) -> Result<bool> {
        let src_idx = self.index_of(src)?;
        let dst_idx = self.index_of(dst)?;
        Ok(has_path_connecting(&self.graph, dst_idx, src_idx, None))
    }

    /// Remove the edge `src → dst`; fails if the edge is absent.
    pub fn sever(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_idx = self.index_of(src)?;
        let dst_idx = self.index_of(dst)?;
        match self.graph.find_edge(src_idx, dst_idx) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                tracing::debug!("severed \"{}\" -> \"{}\"", src, dst);
                Ok(())
            }
            None => Err(Error::AdjacencyRequired {
                src: src.to_string(),
                dst: dst.to_string(),
            }),
        }
    }

    /// Merge the adjacent cells `src → dst` into one cell named `new_name`.
    ///
    /// The node at `src`'s identity keeps `src`'s kind and incoming edges,
    /// receives the concatenated content, and inherits every outgoing edge
    /// of `dst`; `dst` is removed. All-or-nothing on failure.
    pub fn merge(&mut self, src: &str, dst: &str, new_name: &str) -> Result<()> {
        let src_idx = self.index_of(src)?;
        let dst_idx = self.index_of(dst)?;

        if self.graph.find_edge(src_idx, dst_idx).is_none() {
            return Err(Error::AdjacencyRequired {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }
        // `src` and `dst` are both about to give their names up.
        if new_name != src && new_name != dst && self.names.contains_key(new_name) {
            return Err(Error::NameConflict(new_name.to_string()));
        }

        let dst_successors = self.successors(dst_idx);
        let dst_cell = match self.graph.remove_node(dst_idx) {
            Some(cell) => cell,
            None => return Err(Error::UnknownName(dst.to_string())),
        };
        self.names.remove(dst);

        self.names.remove(src);
        self.names.insert(new_name.to_string(), src_idx);
        {
            let cell = &mut self.graph[src_idx];
            cell.name = new_name.to_string();
            cell.content = format!("{}\n{}\n{}", cell.content, MERGE_MARKER, dst_cell.content);
            cell.output.clear();
        }

        for succ in dst_successors {
            if self.graph.find_edge(src_idx, succ).is_none() {
                self.graph.add_edge(src_idx, succ, ());
            }
        }

        tracing::debug!("merged \"{}\" and \"{}\" into \"{}\"", src, dst, new_name);
        Ok(())
    }

    // ---- lookups ----

    /// Node identity of a named cell.
    pub fn index_of(&self, name: &str) -> Result<NodeIndex> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    /// Whether a cell with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Borrow a cell by name.
    pub fn cell(&self, name: &str) -> Result<&Cell> {
        let idx = self.index_of(name)?;
        Ok(&self.graph[idx])
    }

    /// Mutably borrow a cell by name.
    pub fn cell_mut(&mut self, name: &str) -> Result<&mut Cell> {
        let idx = self.index_of(name)?;
        Ok(&mut self.graph[idx])
    }

    /// Borrow a cell by node identity.
    pub(crate) fn cell_at(&self, idx: NodeIndex) -> &Cell {
        &self.graph[idx]
    }

    /// Mutably borrow a cell by node identity.
    pub(crate) fn cell_at_mut(&mut self, idx: NodeIndex) -> &mut Cell {
        &mut self.graph[idx]
    }

    /// The root cell's identity, if a node currently holds identity 0.
    pub fn root(&self) -> Option<NodeIndex> {
        let idx = NodeIndex::new(ROOT_INDEX);
        self.graph.contains_node(idx).then_some(idx)
    }

    /// Whether the root exists and has at least one outgoing edge.
    pub fn root_has_children(&self) -> bool {
        self.root()
            .map(|root| {
                self.graph
                    .neighbors_directed(root, Direction::Outgoing)
                    .next()
                    .is_some()
            })
            .unwrap_or(false)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no cells.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    // ---- listings ----

    /// All cells in node-identity order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    /// All cell names in node-identity order.
    pub fn cell_names(&self) -> Vec<String> {
        self.cells().map(|cell| cell.name.clone()).collect()
    }

    /// All edges as `(src, dst)` name pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_indices()
            .filter_map(|edge| self.graph.edge_endpoints(edge))
            .map(|(a, b)| (self.graph[a].name.clone(), self.graph[b].name.clone()))
            .collect()
    }

    /// Incoming edges of a cell rendered as `src -> dst` strings.
    pub fn in_edges(&self, name: &str) -> Result<Vec<String>> {
        let idx = self.index_of(name)?;
        Ok(self
            .neighbor_names(idx, Direction::Incoming)
            .into_iter()
            .map(|src| format!("{} -> {}", src, name))
            .collect())
    }

    /// Outgoing edges of a cell rendered as `src -> dst` strings.
    pub fn out_edges(&self, name: &str) -> Result<Vec<String>> {
        let idx = self.index_of(name)?;
        Ok(self
            .neighbor_names(idx, Direction::Outgoing)
            .into_iter()
            .map(|dst| format!("{} -> {}", name, dst))
            .collect())
    }

    fn neighbor_names(&self, idx: NodeIndex, dir: Direction) -> Vec<String> {
        let mut neighbors: Vec<_> = self.graph.neighbors_directed(idx, dir).collect();
        neighbors.sort_unstable();
        neighbors
            .into_iter()
            .map(|n| self.graph[n].name.clone())
            .collect()
    }

    /// Direct successors of a node, in identity order.
    pub(crate) fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut out: Vec<_> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        out.sort_unstable();
        out
    }

    /// Every node that can reach `idx`.
    pub fn ancestors(&self, idx: NodeIndex) -> FxHashSet<NodeIndex> {
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::from([idx]);
        while let Some(node) = queue.pop_front() {
            for parent in self.graph.neighbors_directed(node, Direction::Incoming) {
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        seen
    }

    // ---- layers ----

    /// Longest-path distance in edges from root, per reachable node.
    ///
    /// Walks nodes in topological order; each node takes the maximum of
    /// `layer(p) + 1` over its full ancestor set, not just its immediate
    /// predecessors. Unreachable nodes are absent from the map.
    fn layers(&self) -> FxHashMap<NodeIndex, i64> {
        let mut layers = FxHashMap::default();
        let Some(root) = self.root() else {
            return layers;
        };
        // The edge relation is kept acyclic by `connect`, so toposort
        // cannot observe a cycle.
        let Ok(order) = toposort(&self.graph, None) else {
            return layers;
        };
        layers.insert(root, 0);
        for idx in order {
            if idx == root {
                continue;
            }
            let mut best: Option<i64> = None;
            for parent in self.ancestors(idx) {
                if let Some(&parent_layer) = layers.get(&parent) {
                    let candidate = parent_layer + 1;
                    best = Some(best.map_or(candidate, |b| b.max(candidate)));
                }
            }
            if let Some(layer) = best {
                layers.insert(idx, layer);
            }
        }
        layers
    }

    /// Longest-path distance in edges from root to the named cell.
    ///
    /// Returns 0 for the root itself and -1 for cells unreachable from
    /// the root.
    pub fn layer(&self, name: &str) -> Result<i64> {
        let idx = self.index_of(name)?;
        Ok(self.layers().get(&idx).copied().unwrap_or(-1))
    }

    // ---- environment ----

    /// Handle to the shared environment.
    pub fn env(&self) -> Arc<Mutex<Namespace>> {
        Arc::clone(&self.env)
    }

    /// Delete every binding in the shared environment.
    pub fn reset_env(&self) {
        lock_ns(&self.env).clear();
        tracing::debug!("environment reset");
    }

    /// Snapshot of the shared environment.
    pub fn env_snapshot(&self) -> Namespace {
        lock_ns(&self.env).clone()
    }

    // ---- executing flag ----

    /// Handle to the executing flag, readable without any graph lock.
    pub fn executing_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.executing)
    }

    /// Whether a traversal execution is in flight.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    /// Share an externally owned executing flag.
    ///
    /// Adapters poll one flag across graph resets; a replacement graph
    /// adopts the session's flag instead of its own.
    pub fn bind_executing_flag(&mut self, flag: Arc<AtomicBool>) {
        self.executing = flag;
    }
}

impl Default for CellGraph {
    fn default() -> Self {
        Self::new()
    }
}
