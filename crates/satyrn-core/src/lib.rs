//! Core engine for the Satyrn branching-notebook environment.
//!
//! This crate provides:
//! - The cell DAG and its structural-edit operations
//! - Breadth-first concurrent traversal and ordered-list execution
//! - Longest-path layer computation
//! - The pluggable script-runtime seam and the bundled evaluator
//!
//! Cells are arranged as a DAG instead of a linear list. A traversal
//! execution walks the DAG breadth-first from the root; siblings in one
//! frontier run concurrently against snapshots of the graph's shared
//! environment and merge back last-writer-wins.

pub mod cell;
pub mod error;
pub mod execute;
pub mod graph;
pub mod runtime;

pub use cell::{Cell, CellKind};
pub use error::{Error, Result};
pub use execute::{run_cells, run_graph};
pub use graph::{CellGraph, MERGE_MARKER};
pub use runtime::{Evaluator, Namespace, RunResult, ScriptRuntime};
