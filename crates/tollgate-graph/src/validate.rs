//! Structural validation of a work-item set

use crate::graph::{DanglingDependency, DependencyGraph};
use serde::Serialize;
use tollgate_artifact::{Verdict, WorkItem};

/// Two independent work items declaring the same resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileConflict {
    pub a: String,
    pub b: String,
    pub paths: Vec<String>,
}

/// Everything the validator found in one work-item set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub cycles: Vec<Vec<String>>,
    pub conflicts: Vec<FileConflict>,
    pub dangling: Vec<DanglingDependency>,
    pub duplicates: Vec<String>,
}

impl ValidationReport {
    #[inline]
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Whether `dependsOn` is a well-formed DAG over known, unique items
    #[inline]
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.cycles.is_empty() && self.dangling.is_empty() && self.duplicates.is_empty()
    }

    /// BLOCK for any structural defect, CONCERN for file conflicts only
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        if !self.is_well_formed() {
            Verdict::Block
        } else if !self.conflicts.is_empty() {
            Verdict::Concern
        } else {
            Verdict::Pass
        }
    }
}

/// Validate acyclicity and unsafe parallelism of a work-item set
#[must_use]
pub fn validate(items: &[WorkItem]) -> ValidationReport {
    let graph = DependencyGraph::build(items);
    let report = ValidationReport {
        cycles: graph.find_cycles(),
        conflicts: file_conflicts(&graph),
        dangling: graph.dangling().to_vec(),
        duplicates: graph.duplicates().to_vec(),
    };
    tracing::debug!(
        items = items.len(),
        cycles = report.cycles.len(),
        conflicts = report.conflicts.len(),
        "work items validated"
    );
    report
}

/// Overlapping `files_affected` between items with no path in either direction
#[must_use]
pub fn file_conflicts(graph: &DependencyGraph<'_>) -> Vec<FileConflict> {
    let reach = graph.reachability();
    let ids: Vec<&str> = graph.ids().collect();
    let mut conflicts = Vec::new();

    for (i, &a) in ids.iter().enumerate() {
        let Some(item_a) = graph.item(a) else { continue };
        if item_a.files_affected.is_empty() {
            continue;
        }
        for &b in &ids[i + 1..] {
            let Some(item_b) = graph.item(b) else { continue };
            if reach.ordered(a, b) {
                continue;
            }
            let paths: Vec<String> = item_a
                .files_affected
                .intersection(&item_b.files_affected)
                .cloned()
                .collect();
            if !paths.is_empty() {
                conflicts.push(FileConflict {
                    a: a.to_string(),
                    b: b.to_string(),
                    paths,
                });
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn independent_items_sharing_schema_conflict() {
        let items = vec![
            WorkItem::new("T1").touches(["db/schema.sql"]),
            WorkItem::new("T2").touches(["db/schema.sql", "src/api.rs"]),
        ];
        let report = validate(&items);
        assert_eq!(
            report.conflicts,
            vec![FileConflict {
                a: "T1".into(),
                b: "T2".into(),
                paths: vec!["db/schema.sql".into()],
            }]
        );
        assert_eq!(report.verdict(), Verdict::Concern);
    }

    #[test]
    fn transitively_ordered_items_do_not_conflict() {
        let items = vec![
            WorkItem::new("T1").touches(["db/schema.sql"]),
            WorkItem::new("T2").depends(["T1"]),
            WorkItem::new("T3").depends(["T2"]).touches(["db/schema.sql"]),
        ];
        let report = validate(&items);
        assert!(report.conflicts.is_empty());
        assert_eq!(report.verdict(), Verdict::Pass);
    }

    #[test]
    fn cycle_blocks() {
        let items = vec![
            WorkItem::new("A").depends(["B"]),
            WorkItem::new("B").depends(["C"]),
            WorkItem::new("C").depends(["A"]),
        ];
        let report = validate(&items);
        assert_eq!(report.cycles, vec![vec!["A".to_string(), "B".into(), "C".into()]]);
        assert_eq!(report.verdict(), Verdict::Block);
    }

    #[test]
    fn dangling_dependency_blocks() {
        let items = vec![WorkItem::new("A").depends(["ghost"])];
        let report = validate(&items);
        assert!(report.is_acyclic());
        assert!(!report.is_well_formed());
        assert_eq!(report.verdict(), Verdict::Block);
    }

    #[test]
    fn empty_set_passes() {
        assert_eq!(validate(&[]).verdict(), Verdict::Pass);
    }
}
