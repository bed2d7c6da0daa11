//! Dependency graph over one artifact's work items
//!
//! Nodes are work-item ids, edges point from an item to each item it
//! depends on. The graph is derived on demand and never stored.

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tollgate_artifact::WorkItem;

/// A `depends_on` entry naming an item that is not in the set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingDependency {
    pub item: String,
    pub missing: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

struct Frame<'a> {
    node: &'a str,
    successors: Vec<&'a str>,
    cursor: usize,
}

#[derive(Debug)]
pub struct DependencyGraph<'a> {
    items: BTreeMap<&'a str, &'a WorkItem>,
    graph: DiGraphMap<&'a str, ()>,
    dangling: Vec<DanglingDependency>,
    duplicates: Vec<String>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph; unknown dependency targets are recorded, not added
    #[must_use]
    pub fn build(items: &'a [WorkItem]) -> Self {
        let mut by_id = BTreeMap::new();
        let mut duplicates = Vec::new();
        for item in items {
            if by_id.insert(item.id.as_str(), item).is_some() && !duplicates.contains(&item.id) {
                duplicates.push(item.id.clone());
            }
        }

        let mut graph = DiGraphMap::new();
        let mut dangling = Vec::new();
        for (&id, item) in &by_id {
            graph.add_node(id);
            for dep in &item.depends_on {
                if by_id.contains_key(dep.as_str()) {
                    graph.add_edge(id, dep.as_str(), ());
                } else {
                    dangling.push(DanglingDependency {
                        item: id.to_string(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        Self {
            items: by_id,
            graph,
            dangling,
            duplicates,
        }
    }

    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Item ids in sorted order
    pub fn ids(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.items.keys().copied()
    }

    #[must_use]
    pub fn item(&self, id: &str) -> Option<&'a WorkItem> {
        self.items.get(id).copied()
    }

    #[must_use]
    pub fn dangling(&self) -> &[DanglingDependency] {
        &self.dangling
    }

    #[must_use]
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    pub(crate) fn dependencies_of(&self, id: &'a str) -> Vec<&'a str> {
        let mut deps: Vec<&'a str> = self.graph.neighbors(id).collect();
        deps.sort_unstable();
        deps
    }

    /// Every cycle reachable by an iterative three-color DFS
    ///
    /// Roots and successors are visited in id order, so the result is
    /// deterministic. Each cycle is rotated to start at its smallest id and
    /// reported once; the path follows `depends_on` edges in order.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut color: HashMap<&str, Color> =
            self.ids().map(|id| (id, Color::Unvisited)).collect();
        let mut cycles: Vec<Vec<String>> = Vec::new();

        for root in self.ids() {
            if color.get(root) != Some(&Color::Unvisited) {
                continue;
            }
            color.insert(root, Color::InProgress);
            let mut stack = vec![Frame {
                node: root,
                successors: self.dependencies_of(root),
                cursor: 0,
            }];

            while let Some(top) = stack.last_mut() {
                let next = top.successors.get(top.cursor).copied();
                top.cursor += 1;

                let Some(next) = next else {
                    if let Some(done) = stack.pop() {
                        color.insert(done.node, Color::Done);
                    }
                    continue;
                };

                match color.get(next).copied().unwrap_or(Color::Done) {
                    Color::Unvisited => {
                        color.insert(next, Color::InProgress);
                        stack.push(Frame {
                            node: next,
                            successors: self.dependencies_of(next),
                            cursor: 0,
                        });
                    }
                    Color::InProgress => {
                        if let Some(start) = stack.iter().position(|f| f.node == next) {
                            let cycle = canonical_cycle(stack[start..].iter().map(|f| f.node));
                            if !cycles.contains(&cycle) {
                                tracing::debug!(?cycle, "dependency cycle found");
                                cycles.push(cycle);
                            }
                        }
                    }
                    Color::Done => {}
                }
            }
        }
        cycles
    }

    /// Transitive dependency sets, one per item
    #[must_use]
    pub fn reachability(&self) -> Reachability<'a> {
        let mut reach = HashMap::with_capacity(self.items.len());
        for id in self.ids() {
            let mut seen = HashSet::new();
            let mut dfs = Dfs::new(&self.graph, id);
            while let Some(node) = dfs.next(&self.graph) {
                if node != id {
                    seen.insert(node);
                }
            }
            // a node on a cycle reaches itself
            if self.graph.neighbors(id).any(|dep| {
                dep == id || {
                    let mut back = Dfs::new(&self.graph, dep);
                    std::iter::from_fn(|| back.next(&self.graph)).any(|n| n == id)
                }
            }) {
                seen.insert(id);
            }
            reach.insert(id, seen);
        }
        Reachability { reach }
    }
}

fn canonical_cycle<'a>(nodes: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut cycle: Vec<String> = nodes.map(str::to_string).collect();
    if let Some(min_pos) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(min_pos);
    }
    cycle
}

/// Answers "does `a` transitively depend on `b`"
#[derive(Debug, Clone)]
pub struct Reachability<'a> {
    reach: HashMap<&'a str, HashSet<&'a str>>,
}

impl Reachability<'_> {
    #[must_use]
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        self.reach.get(a).is_some_and(|set| set.contains(b))
    }

    /// True when a path exists between the two items in either direction
    #[must_use]
    pub fn ordered(&self, a: &str, b: &str) -> bool {
        self.depends_on(a, b) || self.depends_on(b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, deps: &[&str]) -> WorkItem {
        WorkItem::new(id).depends(deps.iter().copied())
    }

    #[test]
    fn builds_edges_and_records_dangling() {
        let items = vec![item("a", &["b"]), item("b", &[]), item("c", &["zzz"])];
        let graph = DependencyGraph::build(&items);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(
            graph.dangling(),
            &[DanglingDependency {
                item: "c".into(),
                missing: "zzz".into()
            }]
        );
    }

    #[test]
    fn duplicate_ids_reported_once() {
        let items = vec![item("a", &[]), item("a", &[]), item("a", &[])];
        let graph = DependencyGraph::build(&items);
        assert_eq!(graph.duplicates(), &["a".to_string()]);
    }

    #[test]
    fn three_cycle_reported_in_order() {
        let items = vec![item("A", &["B"]), item("B", &["C"]), item("C", &["A"])];
        let cycles = DependencyGraph::build(&items).find_cycles();
        assert_eq!(cycles, vec![vec!["A", "B", "C"]]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let items = vec![item("solo", &["solo"])];
        let cycles = DependencyGraph::build(&items).find_cycles();
        assert_eq!(cycles, vec![vec!["solo"]]);
    }

    #[test]
    fn cycle_rotated_to_smallest_id() {
        let items = vec![item("m", &["z"]), item("z", &["b"]), item("b", &["m"])];
        let cycles = DependencyGraph::build(&items).find_cycles();
        assert_eq!(cycles, vec![vec!["b", "m", "z"]]);
    }

    #[test]
    fn diamond_has_no_cycle() {
        let items = vec![
            item("top", &["left", "right"]),
            item("left", &["bottom"]),
            item("right", &["bottom"]),
            item("bottom", &[]),
        ];
        let graph = DependencyGraph::build(&items);
        assert!(graph.find_cycles().is_empty());

        let reach = graph.reachability();
        assert!(reach.depends_on("top", "bottom"));
        assert!(!reach.depends_on("bottom", "top"));
        assert!(reach.ordered("bottom", "top"));
        assert!(!reach.ordered("left", "right"));
        assert!(!reach.depends_on("top", "top"));
    }

    #[test]
    fn node_on_cycle_reaches_itself() {
        let items = vec![item("a", &["b"]), item("b", &["a"])];
        let reach = DependencyGraph::build(&items).reachability();
        assert!(reach.depends_on("a", "a"));
    }
}
