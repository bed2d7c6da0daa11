//! Coverage over prioritized requirements

use crate::coverage::{check_coverage, ratio, CoverageReport};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tollgate_artifact::{PriorityClass, Requirement, WorkItem};

/// Forward coverage restricted to one priority class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityCoverage {
    pub priority: PriorityClass,
    pub total: usize,
    pub covered: usize,
    pub orphans: Vec<String>,
}

impl PriorityCoverage {
    #[must_use]
    pub fn pct(&self) -> f64 {
        ratio(self.covered, self.total)
    }
}

/// A [`CoverageReport`] plus a per-priority breakdown of forward coverage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequirementCoverage {
    #[serde(flatten)]
    pub report: CoverageReport,
    /// One entry per priority class present upstream, most urgent first
    pub by_priority: Vec<PriorityCoverage>,
}

impl RequirementCoverage {
    /// Forward orphans whose priority is `floor` or more urgent
    pub fn orphans_at_least(&self, floor: PriorityClass) -> impl Iterator<Item = &str> {
        self.by_priority
            .iter()
            .filter(move |p| p.priority.at_least(floor))
            .flat_map(|p| p.orphans.iter().map(String::as_str))
    }
}

/// Coverage of `requirements` by `downstream` links, broken down by priority
pub fn check_requirements<'a, D, L>(
    requirements: &'a [Requirement],
    downstream: D,
) -> RequirementCoverage
where
    D: IntoIterator<Item = (&'a str, L)>,
    L: IntoIterator<Item = &'a str>,
{
    let report = check_coverage(requirements.iter().map(|r| r.id.as_str()), downstream);
    let orphans: HashSet<&str> = report.forward_orphans.iter().map(String::as_str).collect();

    let mut seen = HashSet::new();
    let mut classes: BTreeMap<PriorityClass, PriorityCoverage> = BTreeMap::new();
    for req in requirements {
        if !seen.insert(req.id.as_str()) {
            continue;
        }
        let entry = classes.entry(req.priority).or_insert_with(|| PriorityCoverage {
            priority: req.priority,
            total: 0,
            covered: 0,
            orphans: Vec::new(),
        });
        entry.total += 1;
        if orphans.contains(req.id.as_str()) {
            entry.orphans.push(req.id.clone());
        } else {
            entry.covered += 1;
        }
    }

    RequirementCoverage {
        report,
        by_priority: classes.into_values().collect(),
    }
}

/// Links from each work item to the requirement ids it traces to
#[must_use]
pub fn work_item_links(items: &[WorkItem]) -> IndexMap<&str, Vec<&str>> {
    let mut links: IndexMap<&str, Vec<&str>> = IndexMap::with_capacity(items.len());
    for item in items {
        links
            .entry(item.id.as_str())
            .or_default()
            .extend(item.traces_to.iter().map(String::as_str));
    }
    links
}

/// Links from each lower-stage requirement to the higher-stage ids it refines
#[must_use]
pub fn requirement_links(requirements: &[Requirement]) -> IndexMap<&str, Vec<&str>> {
    let mut links: IndexMap<&str, Vec<&str>> = IndexMap::with_capacity(requirements.len());
    for req in requirements {
        links
            .entry(req.id.as_str())
            .or_default()
            .extend(req.traces_to.iter().map(String::as_str));
    }
    links
}
