//! Named gate checks
//!
//! A stage lists check names; the [`CheckRegistry`] maps each name to a
//! [`GateCheck`]. Adding a check to a stage is a change to the stage table,
//! and adding a new kind of check is one `register` call.
//!
//! Checks are pure functions of their [`CheckContext`]. They never fail:
//! every problem becomes a [`Finding`] carrying its evidence.

use crate::registry::StageDefinition;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tollgate_artifact::{Artifact, CheckRecord, Finding, PriorityClass, Requirement, Verdict};
use tollgate_graph::{
    file_conflicts, phase_inversions, validate, validate_grouping, DependencyGraph,
    GroupingViolation,
};
use tollgate_trace::{check_requirements, requirement_links, work_item_links, RequirementCoverage};

pub const STRUCTURE: &str = "structure";
pub const FORWARD_COVERAGE: &str = "forward-coverage";
pub const BACKWARD_COVERAGE: &str = "backward-coverage";
pub const DEPENDENCY_GRAPH: &str = "dependency-graph";
pub const FILE_CONFLICTS: &str = "file-conflicts";
pub const PHASE_ORDER: &str = "phase-order";
pub const PARALLEL_GROUPS: &str = "parallel-groups";
pub const MINIMUM_COUNTS: &str = "minimum-counts";

/// Checks that only make sense on artifacts carrying work items
pub const GRAPH_CHECKS: &[&str] = &[DEPENDENCY_GRAPH, FILE_CONFLICTS, PHASE_ORDER, PARALLEL_GROUPS];

/// Metadata key holding proposed parallel groups, as a list of id lists
pub const PARALLEL_GROUPS_KEY: &str = "parallel_groups";

/// Everything a check may look at
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub stage: &'a StageDefinition,
    pub subject: &'a Artifact,
    /// Latest artifact of each upstream stage, in the stage's upstream order
    pub upstream: &'a [Artifact],
}

impl CheckContext<'_> {
    /// Identifiers the subject must trace back to
    ///
    /// Requirements of every upstream artifact, plus the work items of any
    /// upstream artifact that carries them (at default priority).
    #[must_use]
    pub fn upstream_requirements(&self) -> Vec<Requirement> {
        let mut ids = Vec::new();
        for artifact in self.upstream {
            ids.extend(artifact.requirements.iter().cloned());
            ids.extend(artifact.work_items.iter().map(|item| {
                Requirement::new(item.id.clone(), artifact.id.clone(), PriorityClass::default())
            }));
        }
        ids
    }

    /// Coverage of the upstream requirements by the subject's links
    #[must_use]
    pub fn coverage(&self) -> RequirementCoverage {
        let upstream = self.upstream_requirements();
        let subject = self.subject;
        if subject.kind.carries_work_items() {
            check_requirements(&upstream, work_item_links(&subject.work_items))
        } else {
            check_requirements(&upstream, requirement_links(&subject.requirements))
        }
    }
}

/// One named, pure check run by a gate
pub trait GateCheck: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, ctx: &CheckContext<'_>) -> CheckRecord;
}

/// Name to implementation map, in registration order
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: IndexMap<String, Arc<dyn GateCheck>>,
}

impl fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("checks", &self.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CheckRegistry {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in check
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(StructureCheck);
        registry.register(ForwardCoverageCheck);
        registry.register(BackwardCoverageCheck);
        registry.register(DependencyGraphCheck);
        registry.register(FileConflictCheck);
        registry.register(PhaseOrderCheck);
        registry.register(ParallelGroupsCheck);
        registry.register(MinimumCountsCheck);
        registry
    }

    /// Register a check under its own name, replacing any previous one
    pub fn register(&mut self, check: impl GateCheck + 'static) {
        self.checks.insert(check.name().to_string(), Arc::new(check));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn GateCheck>> {
        self.checks.get(name)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.checks.keys().map(String::as_str).collect()
    }
}

/// Kind, identity uniqueness and non-empty content
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureCheck;

impl GateCheck for StructureCheck {
    fn name(&self) -> &str {
        STRUCTURE
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckRecord {
        let subject = ctx.subject;
        let mut findings = Vec::new();

        if subject.kind != ctx.stage.output {
            findings.push(Finding::block(format!(
                "artifact {} is {}, stage {} produces {}",
                subject.id, subject.kind, ctx.stage.name, ctx.stage.output
            )));
        }
        if subject.content.is_empty()
            && subject.requirements.is_empty()
            && subject.work_items.is_empty()
        {
            findings.push(Finding::block(format!("artifact {} has no content", subject.id)));
        }
        if !subject.kind.carries_work_items() && !subject.work_items.is_empty() {
            findings.push(Finding::block(format!(
                "{} artifact {} declares {} work items; only epic artifacts carry work items",
                subject.kind,
                subject.id,
                subject.work_items.len()
            )));
        }

        duplicate_ids(
            "requirement",
            subject.requirements.iter().map(|r| r.id.as_str()),
            &mut findings,
        );
        duplicate_ids(
            "work item",
            subject.work_items.iter().map(|w| w.id.as_str()),
            &mut findings,
        );

        CheckRecord::from_findings(STRUCTURE, findings).with_note(format!(
            "{} requirements, {} work items",
            subject.requirements.len(),
            subject.work_items.len()
        ))
    }
}

fn duplicate_ids<'a>(label: &str, ids: impl Iterator<Item = &'a str>, findings: &mut Vec<Finding>) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            findings.push(Finding::block(format!("{label} with an empty id")));
        } else if !seen.insert(id) && reported.insert(id) {
            findings.push(Finding::block(format!("duplicate {label} id {id}")));
        }
    }
}

fn pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Every upstream requirement must be referenced downstream
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardCoverageCheck;

impl GateCheck for ForwardCoverageCheck {
    fn name(&self) -> &str {
        FORWARD_COVERAGE
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckRecord {
        let coverage = ctx.coverage();
        let report = &coverage.report;
        if report.upstream_total == 0 {
            return CheckRecord::pass(FORWARD_COVERAGE).with_note("no upstream requirements");
        }

        let threshold = &ctx.stage.forward;
        let by_pct = threshold.classify(report.forward_pct);
        let critical: HashSet<&str> = threshold
            .critical_priority
            .map(|floor| coverage.orphans_at_least(floor).collect())
            .unwrap_or_default();

        let mut findings = Vec::new();
        let mut tolerated = Vec::new();
        for class in &coverage.by_priority {
            for orphan in &class.orphans {
                let evidence = format!(
                    "forward orphan {orphan} ({}) has no downstream reference",
                    class.priority
                );
                if critical.contains(orphan.as_str()) {
                    findings.push(Finding::block(format!("{evidence}; priority is critical")));
                } else if by_pct == Verdict::Pass {
                    tolerated.push(orphan.as_str());
                } else {
                    findings.push(Finding {
                        severity: by_pct,
                        evidence,
                    });
                }
            }
        }

        let mut record = CheckRecord::from_findings(FORWARD_COVERAGE, findings).with_note(format!(
            "forward coverage {} ({}/{}), block below {}, concern below {}",
            pct(report.forward_pct),
            report.covered(),
            report.upstream_total,
            pct(threshold.block_below),
            pct(threshold.concern_cut()),
        ));
        for class in &coverage.by_priority {
            record = record.with_note(format!(
                "{}: {}/{} covered",
                class.priority, class.covered, class.total
            ));
        }
        if !tolerated.is_empty() {
            record = record.with_note(format!("tolerated orphans: {}", tolerated.join(", ")));
        }
        record
    }
}

/// Every downstream item must reference a known upstream requirement
#[derive(Debug, Clone, Copy, Default)]
pub struct BackwardCoverageCheck;

impl GateCheck for BackwardCoverageCheck {
    fn name(&self) -> &str {
        BACKWARD_COVERAGE
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckRecord {
        let coverage = ctx.coverage();
        let report = &coverage.report;

        let mut findings: Vec<Finding> = report
            .backward_orphans
            .iter()
            .map(|item| {
                let unknown: Vec<&str> = report
                    .unknown_refs
                    .iter()
                    .filter(|r| &r.item == item)
                    .map(|r| r.reference.as_str())
                    .collect();
                if unknown.is_empty() {
                    Finding::concern(format!(
                        "backward orphan {item} references no upstream requirement"
                    ))
                } else {
                    Finding::concern(format!(
                        "backward orphan {item} references only unknown ids: {}",
                        unknown.join(", ")
                    ))
                }
            })
            .collect();
        findings.extend(
            report
                .unknown_refs
                .iter()
                .filter(|r| !report.backward_orphans.contains(&r.item))
                .map(|r| {
                    Finding::concern(format!("{} references unknown id {}", r.item, r.reference))
                }),
        );

        CheckRecord::from_findings(BACKWARD_COVERAGE, findings).with_note(format!(
            "backward coverage {} of {} downstream items",
            pct(report.backward_pct),
            report.downstream_total
        ))
    }
}

/// Work-item dependencies must form a DAG over known, unique ids
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGraphCheck;

impl GateCheck for DependencyGraphCheck {
    fn name(&self) -> &str {
        DEPENDENCY_GRAPH
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckRecord {
        let items = &ctx.subject.work_items;
        let report = validate(items);
        let mut findings = Vec::new();

        for cycle in &report.cycles {
            let evidence = match cycle.as_slice() {
                [only] => format!("self-dependency: {only} depends on itself"),
                _ => {
                    let mut path = cycle.clone();
                    path.extend(cycle.first().cloned());
                    format!("dependency cycle: {}", path.join(" -> "))
                }
            };
            findings.push(Finding::block(evidence));
        }
        for d in &report.dangling {
            findings.push(Finding::block(format!(
                "{} depends on unknown work item {}",
                d.item, d.missing
            )));
        }
        for dup in &report.duplicates {
            findings.push(Finding::block(format!("duplicate work item id {dup}")));
        }

        CheckRecord::from_findings(DEPENDENCY_GRAPH, findings)
            .with_note(format!("{} work items", items.len()))
    }
}

/// Independent work items must not touch the same files
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConflictCheck;

impl GateCheck for FileConflictCheck {
    fn name(&self) -> &str {
        FILE_CONFLICTS
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckRecord {
        let graph = DependencyGraph::build(&ctx.subject.work_items);
        let findings = file_conflicts(&graph)
            .into_iter()
            .map(|c| {
                Finding::concern(format!(
                    "{} and {} are unordered but both touch {}",
                    c.a,
                    c.b,
                    c.paths.join(", ")
                ))
            })
            .collect();
        CheckRecord::from_findings(FILE_CONFLICTS, findings)
    }
}

/// A work item should not depend on an item planned for a later phase
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseOrderCheck;

impl GateCheck for PhaseOrderCheck {
    fn name(&self) -> &str {
        PHASE_ORDER
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckRecord {
        let findings = phase_inversions(&ctx.subject.work_items)
            .into_iter()
            .map(|inv| {
                Finding::concern(format!(
                    "{} (phase {}) depends on {} (phase {})",
                    inv.item, inv.phase, inv.dependency, inv.dependency_phase
                ))
            })
            .collect();
        CheckRecord::from_findings(PHASE_ORDER, findings)
    }
}

/// Proposed parallel groups, if the artifact declares any, must be safe
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelGroupsCheck;

impl GateCheck for ParallelGroupsCheck {
    fn name(&self) -> &str {
        PARALLEL_GROUPS
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckRecord {
        let Some(raw) = ctx.subject.content.metadata.get(PARALLEL_GROUPS_KEY) else {
            return CheckRecord::pass(PARALLEL_GROUPS).with_note("no parallel groups proposed");
        };
        let groups: Vec<Vec<String>> = match serde_json::from_value(raw.clone()) {
            Ok(groups) => groups,
            Err(e) => {
                return CheckRecord::from_findings(
                    PARALLEL_GROUPS,
                    vec![Finding::concern(format!(
                        "{PARALLEL_GROUPS_KEY} metadata is not a list of id lists: {e}"
                    ))],
                )
            }
        };

        let findings = validate_grouping(&ctx.subject.work_items, &groups)
            .into_iter()
            .map(|v| {
                Finding::concern(match v {
                    GroupingViolation::Ordered {
                        group,
                        dependent,
                        dependency,
                    } => format!("group {group}: {dependent} depends on {dependency}"),
                    GroupingViolation::SharedFiles { group, a, b, paths } => {
                        format!("group {group}: {a} and {b} both touch {}", paths.join(", "))
                    }
                    GroupingViolation::UnknownItem { group, id } => {
                        format!("group {group}: unknown work item {id}")
                    }
                })
            })
            .collect();
        CheckRecord::from_findings(PARALLEL_GROUPS, findings)
            .with_note(format!("{} groups proposed", groups.len()))
    }
}

/// The generalized "at least N" rule
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimumCountsCheck;

impl GateCheck for MinimumCountsCheck {
    fn name(&self) -> &str {
        MINIMUM_COUNTS
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckRecord {
        let min = &ctx.stage.minimums;
        let subject = ctx.subject;
        let mut findings = Vec::new();
        for (label, have, need) in [
            ("requirements", subject.requirements.len(), min.requirements),
            ("work items", subject.work_items.len(), min.work_items),
        ] {
            if have < need {
                findings.push(Finding {
                    severity: min.severity,
                    evidence: format!("{have} {label}, at least {need} required"),
                });
            }
        }
        CheckRecord::from_findings(MINIMUM_COUNTS, findings)
    }
}
