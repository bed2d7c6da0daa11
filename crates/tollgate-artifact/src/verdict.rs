//! Gate verdicts and the records appended to an artifact's ledger

use crate::model::ArtifactId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Three-valued gate outcome, ordered by severity
///
/// The derive order is the severity order: `Pass < Concern < Block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Concern,
    Block,
}

impl Verdict {
    /// Strict ordinal maximum; an empty set is `Pass`
    pub fn aggregate<I: IntoIterator<Item = Verdict>>(verdicts: I) -> Verdict {
        verdicts.into_iter().max().unwrap_or(Verdict::Pass)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Concern => "CONCERN",
            Verdict::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforcement mode governing how BLOCK verdicts are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Strict,
    Standard,
    Permissive,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Strict => "strict",
            Mode::Standard => "standard",
            Mode::Permissive => "permissive",
        }
    }

    /// Whether a BLOCK can be downgraded by a caller-supplied rationale
    #[inline]
    #[must_use]
    pub fn allows_override(&self) -> bool {
        matches!(self, Mode::Standard)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Mode::Strict),
            "standard" => Ok(Mode::Standard),
            "permissive" => Ok(Mode::Permissive),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown enforcement mode: {0} (expected strict, standard or permissive)")]
pub struct UnknownMode(pub String);

/// One non-passing observation made by a check
///
/// A finding is always CONCERN or BLOCK and always carries its evidence, so
/// a non-PASS check result can never be evidence-free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Verdict,
    pub evidence: String,
}

impl Finding {
    #[must_use]
    pub fn concern(evidence: impl Into<String>) -> Self {
        Self {
            severity: Verdict::Concern,
            evidence: evidence.into(),
        }
    }

    #[must_use]
    pub fn block(evidence: impl Into<String>) -> Self {
        Self {
            severity: Verdict::Block,
            evidence: evidence.into(),
        }
    }
}

/// Outcome of one named check within a gate invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub name: String,
    pub result: Verdict,
    pub findings: Vec<Finding>,
    /// Free-form metrics recorded even on PASS (coverage ratios, counts)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl CheckRecord {
    /// Build a record whose result is the maximum severity of its findings
    #[must_use]
    pub fn from_findings(name: impl Into<String>, findings: Vec<Finding>) -> Self {
        let result = Verdict::aggregate(findings.iter().map(|f| f.severity));
        Self {
            name: name.into(),
            result,
            findings,
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn pass(name: impl Into<String>) -> Self {
        Self::from_findings(name, Vec::new())
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Evidence strings of findings at exactly `severity`
    pub fn evidence_at(&self, severity: Verdict) -> impl Iterator<Item = &str> {
        self.findings
            .iter()
            .filter(move |f| f.severity == severity)
            .map(|f| f.evidence.as_str())
    }
}

/// Unique, time-sortable id of a gate result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GateResultId(pub Ulid);

impl GateResultId {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for GateResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GateResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable record of one gate invocation
///
/// `aggregate` is the verdict the checks produced; `verdict` is what the
/// enforcement mode made of it. They differ only when a BLOCK was
/// downgraded, either by override (standard) or mechanically (permissive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub id: GateResultId,
    pub gate_name: String,
    pub artifact_id: ArtifactId,
    pub artifact_version: u64,
    pub verdict: Verdict,
    pub aggregate: Verdict,
    pub timestamp_utc: DateTime<Utc>,
    pub mode: Mode,
    pub checks: Vec<CheckRecord>,
    pub concerns: Vec<String>,
    pub blocks: Vec<String>,
    pub override_rationale: Option<String>,
}

impl GateResult {
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.verdict == Verdict::Block
    }

    /// BLOCK downgraded by an explicit rationale under standard mode
    #[inline]
    #[must_use]
    pub fn was_overridden(&self) -> bool {
        self.override_rationale.is_some()
    }

    /// BLOCK downgraded mechanically by permissive mode
    #[inline]
    #[must_use]
    pub fn was_muted(&self) -> bool {
        self.mode == Mode::Permissive && self.aggregate == Verdict::Block
    }

    /// Checks whose result is not PASS
    pub fn failing_checks(&self) -> impl Iterator<Item = &CheckRecord> {
        self.checks.iter().filter(|c| c.result != Verdict::Pass)
    }

    /// Verdict plus check names and results, ignoring ids and timestamps
    #[must_use]
    pub fn outcome_signature(&self) -> (Verdict, Vec<(String, Verdict)>) {
        (
            self.verdict,
            self.checks
                .iter()
                .map(|c| (c.name.clone(), c.result))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_is_max() {
        assert_eq!(Verdict::aggregate(std::iter::empty()), Verdict::Pass);
        assert_eq!(
            Verdict::aggregate([Verdict::Concern, Verdict::Pass]),
            Verdict::Concern
        );
        assert_eq!(
            Verdict::aggregate([Verdict::Pass, Verdict::Block, Verdict::Concern]),
            Verdict::Block
        );
    }

    #[test]
    fn mode_parse() {
        assert_eq!("Standard".parse::<Mode>().unwrap(), Mode::Standard);
        assert_eq!(Mode::default(), Mode::Strict);
        assert!("lenient".parse::<Mode>().is_err());
        assert!(Mode::Standard.allows_override());
        assert!(!Mode::Strict.allows_override());
        assert!(!Mode::Permissive.allows_override());
    }

    #[test]
    fn check_record_result_follows_findings() {
        let record = CheckRecord::from_findings(
            "dependency-graph",
            vec![Finding::concern("x"), Finding::block("cycle a -> b -> a")],
        );
        assert_eq!(record.result, Verdict::Block);
        assert_eq!(record.evidence_at(Verdict::Block).count(), 1);
        assert_eq!(CheckRecord::pass("structure").result, Verdict::Pass);
    }

    #[test]
    fn verdict_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Verdict::Concern).unwrap(), "\"CONCERN\"");
        assert_eq!(serde_json::to_string(&Mode::Permissive).unwrap(), "\"permissive\"");
    }
}
