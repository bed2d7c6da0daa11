//! Stage registry
//!
//! The single source of truth for "what comes before what". Each stage
//! names the artifact kind it consumes and produces, the upstream stages
//! whose latest artifacts feed its gate, and the named checks its gate
//! runs. Both the evaluator and the orchestrator query this table; neither
//! embeds stage order itself.

use crate::checks::{self, CheckRegistry};
use crate::error::{ConfigError, GateError, RegistryError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tollgate_artifact::{ArtifactKind, PriorityClass, Verdict};

/// Forward-coverage classification for one stage
///
/// Coverage below `block_below` is BLOCK, below `concern_below` is CONCERN,
/// otherwise PASS. `concern_below` defaults to `block_below`, which makes
/// the threshold a single cut between BLOCK and PASS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardThreshold {
    #[serde(default = "full_coverage")]
    pub block_below: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concern_below: Option<f64>,
    /// Any forward orphan at or above this priority is BLOCK
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_priority: Option<PriorityClass>,
}

fn full_coverage() -> f64 {
    1.0
}

impl Default for ForwardThreshold {
    fn default() -> Self {
        Self::require(1.0)
    }
}

impl ForwardThreshold {
    /// Single cut: below `pct` is BLOCK
    #[inline]
    #[must_use]
    pub fn require(pct: f64) -> Self {
        Self {
            block_below: pct,
            concern_below: None,
            critical_priority: None,
        }
    }

    /// Two cuts: below `block` is BLOCK, below `concern` is CONCERN
    #[inline]
    #[must_use]
    pub fn tolerate(block: f64, concern: f64) -> Self {
        Self {
            block_below: block,
            concern_below: Some(concern),
            critical_priority: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_critical(mut self, priority: PriorityClass) -> Self {
        self.critical_priority = Some(priority);
        self
    }

    #[inline]
    #[must_use]
    pub fn concern_cut(&self) -> f64 {
        self.concern_below.unwrap_or(self.block_below)
    }

    #[must_use]
    pub fn classify(&self, pct: f64) -> Verdict {
        if pct < self.block_below {
            Verdict::Block
        } else if pct < self.concern_cut() {
            Verdict::Concern
        } else {
            Verdict::Pass
        }
    }
}

/// The generalized "at least N" rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MinimumCounts {
    #[serde(default)]
    pub requirements: usize,
    #[serde(default)]
    pub work_items: usize,
    /// Severity of a shortfall
    #[serde(default = "concern")]
    pub severity: Verdict,
}

fn concern() -> Verdict {
    Verdict::Concern
}

impl Default for MinimumCounts {
    fn default() -> Self {
        Self {
            requirements: 0,
            work_items: 0,
            severity: Verdict::Concern,
        }
    }
}

/// One named step in the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDefinition {
    pub name: String,
    /// Kind consumed; `None` only for the first stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ArtifactKind>,
    pub output: ArtifactKind,
    /// Stages whose latest artifacts are supplied to this gate, in order
    #[serde(default)]
    pub upstream: Vec<String>,
    pub checks: Vec<String>,
    #[serde(default)]
    pub forward: ForwardThreshold,
    #[serde(default)]
    pub minimums: MinimumCounts,
    /// Even a PASS needs an external approval before the pipeline advances
    #[serde(default)]
    pub requires_approval: bool,
}

impl StageDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, output: ArtifactKind) -> Self {
        Self {
            name: name.into(),
            input: None,
            output,
            upstream: Vec::new(),
            checks: vec![checks::STRUCTURE.to_string()],
            forward: ForwardThreshold::default(),
            minimums: MinimumCounts::default(),
            requires_approval: false,
        }
    }

    /// Consume the output of `stage`, which produces `kind`
    #[inline]
    #[must_use]
    pub fn after(mut self, stage: impl Into<String>, kind: ArtifactKind) -> Self {
        self.input = Some(kind);
        self.upstream.push(stage.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_checks<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checks = names.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_forward(mut self, forward: ForwardThreshold) -> Self {
        self.forward = forward;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_minimums(mut self, requirements: usize, work_items: usize) -> Self {
        self.minimums.requirements = requirements;
        self.minimums.work_items = work_items;
        self
    }

    #[inline]
    #[must_use]
    pub fn needing_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    #[must_use]
    pub fn runs(&self, check: &str) -> bool {
        self.checks.iter().any(|c| c == check)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StageTable {
    stages: Vec<StageDefinition>,
}

/// Ordered, validated stage table
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: IndexMap<String, StageDefinition>,
}

impl StageRegistry {
    /// Build from definitions in pipeline order, validating the table
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidDefinition`] for duplicate names,
    /// forward upstream references, thresholds outside `[0, 1]`, an input
    /// kind that does not match the upstream output, or graph checks on a
    /// stage that does not produce work items
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = StageDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut stages: IndexMap<String, StageDefinition> = IndexMap::new();
        for def in definitions {
            validate_definition(&def, &stages)?;
            stages.insert(def.name.clone(), def);
        }
        Ok(Self { stages })
    }

    /// Parse a YAML table of the form `stages: [...]`
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed YAML, or a registry
    /// error if the table does not validate
    pub fn from_yaml(yaml: &str) -> Result<Self, GateError> {
        let table: StageTable = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: "<stages>".into(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_definitions(table.stages)?)
    }

    /// Load a YAML stage table from disk
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load(path: &Path) -> Result<Self, GateError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table: StageTable = serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let registry = Self::from_definitions(table.stages)?;
        tracing::info!(path = %path.display(), stages = registry.len(), "stage table loaded");
        Ok(registry)
    }

    /// The built-in seven-stage pipeline
    #[must_use]
    pub fn builtin() -> Self {
        let stages = default_stages()
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        Self { stages }
    }

    /// # Errors
    /// Returns [`RegistryError::UnknownStage`] if no stage has that name
    pub fn resolve(&self, name: &str) -> Result<&StageDefinition, RegistryError> {
        self.stages
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStage(name.to_string()))
    }

    /// Stages in pipeline order
    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.values()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }

    /// Position of a stage in pipeline order
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.get_index_of(name)
    }

    /// The stage producing `kind`, if any
    #[must_use]
    pub fn producing(&self, kind: ArtifactKind) -> Option<&StageDefinition> {
        self.stages.values().find(|s| s.output == kind)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Confirm every check a stage names is registered
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidDefinition`] naming the first unknown check
    pub fn validate_checks(&self, checks: &CheckRegistry) -> Result<(), RegistryError> {
        for stage in self.stages.values() {
            if let Some(unknown) = stage.checks.iter().find(|c| !checks.contains(c)) {
                return Err(RegistryError::invalid(
                    &stage.name,
                    format!("unknown check {unknown:?}"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn validate_definition(
    def: &StageDefinition,
    earlier: &IndexMap<String, StageDefinition>,
) -> Result<(), RegistryError> {
    let name = def.name.as_str();
    if name.trim().is_empty() {
        return Err(RegistryError::invalid(name, "stage name is empty"));
    }
    if earlier.contains_key(name) {
        return Err(RegistryError::invalid(name, "duplicate stage name"));
    }

    let mut upstream_kinds = Vec::with_capacity(def.upstream.len());
    for up in &def.upstream {
        match earlier.get(up) {
            Some(stage) => upstream_kinds.push(stage.output),
            None => {
                return Err(RegistryError::invalid(
                    name,
                    format!("upstream stage {up:?} is not declared before it"),
                ))
            }
        }
    }
    match (def.input, upstream_kinds.first()) {
        (None, None) => {}
        (Some(input), Some(&first)) if input == first => {}
        (Some(input), _) => {
            return Err(RegistryError::invalid(
                name,
                format!("input kind {input} is not produced by its first upstream stage"),
            ))
        }
        (None, Some(_)) => {
            return Err(RegistryError::invalid(
                name,
                "upstream stages declared without an input kind",
            ))
        }
    }

    let forward = &def.forward;
    for (key, value) in [
        ("block_below", Some(forward.block_below)),
        ("concern_below", forward.concern_below),
    ] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err(RegistryError::invalid(name, format!("{key} {v} is outside [0, 1]")));
            }
        }
    }
    if forward.concern_cut() < forward.block_below {
        return Err(RegistryError::invalid(name, "concern_below is lower than block_below"));
    }
    if def.minimums.severity == Verdict::Pass {
        return Err(RegistryError::invalid(name, "minimum-count severity cannot be PASS"));
    }

    if !def.output.carries_work_items() {
        if let Some(check) = def
            .checks
            .iter()
            .find(|c| checks::GRAPH_CHECKS.contains(&c.as_str()))
        {
            return Err(RegistryError::invalid(
                name,
                format!("graph check {check:?} on a stage producing {}", def.output),
            ));
        }
    }
    Ok(())
}

fn default_stages() -> Vec<StageDefinition> {
    use checks::{
        BACKWARD_COVERAGE, DEPENDENCY_GRAPH, FILE_CONFLICTS, FORWARD_COVERAGE, MINIMUM_COUNTS,
        PARALLEL_GROUPS, PHASE_ORDER, STRUCTURE,
    };
    use ArtifactKind::{
        Epic, Implementation, Plan, Release, Requirements, Specification, Verification,
    };

    let traced = [STRUCTURE, FORWARD_COVERAGE, BACKWARD_COVERAGE, MINIMUM_COUNTS];
    vec![
        StageDefinition::new("requirements", Requirements)
            .with_checks([STRUCTURE, MINIMUM_COUNTS])
            .with_minimums(1, 0)
            .needing_approval(),
        StageDefinition::new("specify", Specification)
            .after("requirements", Requirements)
            .with_checks(traced)
            .with_forward(ForwardThreshold::tolerate(0.9, 1.0).with_critical(PriorityClass::P1))
            .with_minimums(1, 0),
        StageDefinition::new("plan", Plan)
            .after("specify", Specification)
            .with_checks(traced)
            .with_forward(ForwardThreshold::require(1.0))
            .with_minimums(1, 0)
            .needing_approval(),
        StageDefinition::new("decompose", Epic)
            .after("plan", Plan)
            .with_checks([
                STRUCTURE,
                FORWARD_COVERAGE,
                BACKWARD_COVERAGE,
                DEPENDENCY_GRAPH,
                FILE_CONFLICTS,
                PHASE_ORDER,
                PARALLEL_GROUPS,
                MINIMUM_COUNTS,
            ])
            .with_forward(ForwardThreshold::require(1.0))
            .with_minimums(0, 1),
        StageDefinition::new("implement", Implementation)
            .after("decompose", Epic)
            .with_checks(traced)
            .with_forward(ForwardThreshold::tolerate(0.9, 1.0).with_critical(PriorityClass::P1)),
        StageDefinition::new("verify", Verification)
            .after("implement", Implementation)
            .with_checks(traced)
            .with_forward(ForwardThreshold::require(1.0)),
        StageDefinition::new("release", Release)
            .after("verify", Verification)
            .with_checks([STRUCTURE, FORWARD_COVERAGE])
            .with_forward(ForwardThreshold::require(1.0))
            .needing_approval(),
    ]
}
