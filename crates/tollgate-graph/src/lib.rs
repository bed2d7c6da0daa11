//! Tollgate Dependency Graph Validator
//!
//! Given the work items of one decomposed epic, decides whether
//! `depends_on` forms a DAG and which independent items would be unsafe to
//! run in parallel.
//!
//! - Any cycle, dangling dependency or duplicate id makes the set
//!   ill-formed (BLOCK); cycles are reported as full paths.
//! - Two items with no path between them that touch the same files are a
//!   conflict (CONCERN): serializing them resolves it.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod graph;
mod schedule;
mod validate;

pub use graph::{DanglingDependency, DependencyGraph, Reachability};
pub use schedule::{
    delivery_order, phase_inversions, validate_grouping, GraphError, GroupingViolation,
    PhaseInversion,
};
pub use validate::{file_conflicts, validate, FileConflict, ValidationReport};
