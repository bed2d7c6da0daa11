//! Delivery ordering and parallel-grouping checks
//!
//! The engine never executes work items. These helpers answer whether a
//! proposed order or grouping is safe, before or after the fact.

use crate::graph::DependencyGraph;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use tollgate_artifact::WorkItem;

/// An item depending on an item scheduled for a later phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseInversion {
    pub item: String,
    pub phase: u32,
    pub dependency: String,
    pub dependency_phase: u32,
}

/// Why a proposed parallel group is unsafe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GroupingViolation {
    /// One member transitively depends on the other
    Ordered {
        group: usize,
        dependent: String,
        dependency: String,
    },
    /// Members declare overlapping resources
    SharedFiles {
        group: usize,
        a: String,
        b: String,
        paths: Vec<String>,
    },
    /// A group names an id that is not in the work-item set
    UnknownItem { group: usize, id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cyclic(Vec<String>),

    #[error("work item {item} depends on unknown item {missing}")]
    UnknownDependency { item: String, missing: String },

    #[error("duplicate work item id: {0}")]
    DuplicateItem(String),
}

/// Items whose dependencies are planned for a later phase
#[must_use]
pub fn phase_inversions(items: &[WorkItem]) -> Vec<PhaseInversion> {
    let graph = DependencyGraph::build(items);
    let mut inversions = Vec::new();
    for id in graph.ids() {
        let Some(item) = graph.item(id) else { continue };
        for dep in graph.dependencies_of(id) {
            let Some(dependency) = graph.item(dep) else { continue };
            if dependency.phase > item.phase {
                inversions.push(PhaseInversion {
                    item: id.to_string(),
                    phase: item.phase,
                    dependency: dep.to_string(),
                    dependency_phase: dependency.phase,
                });
            }
        }
    }
    inversions
}

/// Check that every proposed group can run concurrently
///
/// Two members may share a group only if neither transitively depends on
/// the other and their `files_affected` sets are disjoint. Every violating
/// pair is reported.
#[must_use]
pub fn validate_grouping(items: &[WorkItem], groups: &[Vec<String>]) -> Vec<GroupingViolation> {
    let graph = DependencyGraph::build(items);
    let reach = graph.reachability();
    let mut violations = Vec::new();

    for (index, group) in groups.iter().enumerate() {
        let members: BTreeSet<&str> = group.iter().map(String::as_str).collect();
        let mut known = Vec::with_capacity(members.len());
        for id in members {
            match graph.item(id) {
                Some(item) => known.push(item),
                None => violations.push(GroupingViolation::UnknownItem {
                    group: index,
                    id: id.to_string(),
                }),
            }
        }

        for (i, a) in known.iter().enumerate() {
            for b in &known[i + 1..] {
                for (dependent, dependency) in [(a, b), (b, a)] {
                    if reach.depends_on(&dependent.id, &dependency.id) {
                        violations.push(GroupingViolation::Ordered {
                            group: index,
                            dependent: dependent.id.clone(),
                            dependency: dependency.id.clone(),
                        });
                    }
                }
                let paths: Vec<String> = a
                    .files_affected
                    .intersection(&b.files_affected)
                    .cloned()
                    .collect();
                if !paths.is_empty() {
                    violations.push(GroupingViolation::SharedFiles {
                        group: index,
                        a: a.id.clone(),
                        b: b.id.clone(),
                        paths,
                    });
                }
            }
        }
    }
    violations
}

/// Deterministic topological order, dependencies first
///
/// Among items that are ready at the same time, lower phase goes first,
/// then lower id.
///
/// # Errors
/// Fails on duplicate ids, unknown dependencies or cycles
pub fn delivery_order(items: &[WorkItem]) -> Result<Vec<String>, GraphError> {
    let graph = DependencyGraph::build(items);
    if let Some(dup) = graph.duplicates().first() {
        return Err(GraphError::DuplicateItem(dup.clone()));
    }
    if let Some(d) = graph.dangling().first() {
        return Err(GraphError::UnknownDependency {
            item: d.item.clone(),
            missing: d.missing.clone(),
        });
    }
    if let Some(cycle) = graph.find_cycles().into_iter().next() {
        return Err(GraphError::Cyclic(cycle));
    }

    let mut pending: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in graph.ids() {
        let deps = graph.dependencies_of(id);
        pending.insert(id, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(id);
        }
    }

    let phase_of = |id: &str| graph.item(id).map_or(0, |i| i.phase);
    let mut ready: BinaryHeap<Reverse<(u32, &str)>> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(&id, _)| Reverse((phase_of(id), id)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((_, id))) = ready.pop() {
        order.push(id.to_string());
        for &next in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(count) = pending.get_mut(next) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse((phase_of(next), next)));
                }
            }
        }
    }
    Ok(order)
}
