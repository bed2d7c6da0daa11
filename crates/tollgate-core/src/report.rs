//! Human-readable and JSON renderings of gate results and pipeline state
//!
//! Permissive results are flagged on their first line, override
//! rationales are quoted verbatim, and every block is listed.

use crate::orchestrator::{PipelineStatus, RunOutcome, RunReport, StageState};
use std::fmt::{self, Write as _};
use tollgate_artifact::{GateResult, Verdict};

/// Display wrapper over one [`GateResult`]
#[derive(Debug, Clone, Copy)]
pub struct GateReport<'a> {
    result: &'a GateResult,
}

impl<'a> GateReport<'a> {
    #[inline]
    #[must_use]
    pub fn new(result: &'a GateResult) -> Self {
        Self { result }
    }

    #[must_use]
    pub fn render_text(&self) -> String {
        self.to_string()
    }

    /// # Errors
    /// Returns error if the result cannot be serialized
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self.result)
    }

    fn banner(&self) -> Option<&'static str> {
        let r = self.result;
        if r.was_muted() {
            Some("PERMISSIVE MODE: BLOCK muted to CONCERN")
        } else if r.was_overridden() {
            Some("OVERRIDDEN: BLOCK downgraded by rationale")
        } else {
            None
        }
    }
}

impl fmt::Display for GateReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.result;
        write!(
            f,
            "gate {} on {} v{}: {}",
            r.gate_name, r.artifact_id, r.artifact_version, r.verdict
        )?;
        if let Some(banner) = self.banner() {
            write!(f, "  [{banner}]")?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "mode: {}  aggregate: {}  at: {}  id: {}",
            r.mode,
            r.aggregate,
            r.timestamp_utc.to_rfc3339(),
            r.id
        )?;
        if let Some(rationale) = &r.override_rationale {
            writeln!(f, "override rationale: {rationale:?}")?;
        }

        writeln!(f, "checks:")?;
        for check in &r.checks {
            writeln!(f, "  {:<9} {}", format!("[{}]", check.result), check.name)?;
            for note in &check.notes {
                writeln!(f, "            {note}")?;
            }
            for finding in &check.findings {
                writeln!(f, "            - {} {}", finding.severity, finding.evidence)?;
            }
        }

        for (label, items) in [("blocks", &r.blocks), ("concerns", &r.concerns)] {
            if items.is_empty() {
                continue;
            }
            writeln!(f, "{label} ({}):", items.len())?;
            for item in items {
                writeln!(f, "  - {item}")?;
            }
        }
        Ok(())
    }
}

fn state_detail(state: &StageState) -> String {
    match state {
        StageState::Blocked {
            failing_checks,
            override_available,
        } => {
            let path = if *override_available {
                "override with a rationale under standard mode"
            } else {
                "no override in this mode"
            };
            format!("failing: {}; {path}", failing_checks.join(", "))
        }
        StageState::AwaitingApproval { verdict, muted }
        | StageState::Complete { verdict, muted } => {
            if *muted {
                format!("{verdict} [PERMISSIVE MODE: BLOCK muted]")
            } else {
                verdict.to_string()
            }
        }
        StageState::NotStarted | StageState::Pending => String::new(),
    }
}

/// One line per stage
#[must_use]
pub fn render_status(status: &PipelineStatus) -> String {
    let mut out = format!("pipeline {} (mode {})\n", status.pipeline, status.mode);
    for stage in &status.stages {
        let artifact = match (&stage.artifact, stage.version) {
            (Some(id), Some(v)) => format!("{id} v{v}"),
            _ => "-".to_string(),
        };
        let marker = if status.current().is_some_and(|c| c.stage == stage.stage) {
            ">"
        } else {
            " "
        };
        let _ = writeln!(
            out,
            "{marker} {:<14} {:<18} {:<24} {}",
            stage.stage,
            stage.state.label(),
            artifact,
            state_detail(&stage.state)
        );
    }
    out
}

/// Summary of an orchestrator run followed by each result it appended
#[must_use]
pub fn render_run(report: &RunReport) -> String {
    let mut out = String::new();
    for result in &report.evaluated {
        let _ = writeln!(out, "{}", GateReport::new(result));
    }
    match &report.outcome {
        RunOutcome::Complete => {
            let _ = writeln!(out, "pipeline {} complete", report.pipeline);
        }
        RunOutcome::Halted(halt) => {
            let _ = write!(
                out,
                "pipeline {} halted at {}: {}",
                report.pipeline,
                halt.stage,
                halt.state.label()
            );
            let detail = state_detail(&halt.state);
            if detail.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, " ({detail})");
            }
        }
    }
    out
}

/// Exit status a CLI should use for a verdict
#[must_use]
pub fn verdict_exit_code(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Pass | Verdict::Concern => 0,
        Verdict::Block => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::orchestrator::StageStatus;
    use tollgate_artifact::{ArtifactId, CheckRecord, Finding, GateResultId, Mode};

    fn blocked(mode: Mode, verdict: Verdict, rationale: Option<&str>) -> GateResult {
        let checks = vec![
            CheckRecord::pass("structure").with_note("2 requirements, 0 work items"),
            CheckRecord::from_findings(
                "forward-coverage",
                vec![
                    Finding::block("forward orphan FR-4 (P2) has no downstream reference"),
                    Finding::block("forward orphan FR-5 (P2) has no downstream reference"),
                ],
            ),
        ];
        GateResult {
            id: GateResultId::new(),
            gate_name: "plan".into(),
            artifact_id: ArtifactId::new("plan-1").unwrap(),
            artifact_version: 3,
            verdict,
            aggregate: Verdict::Block,
            timestamp_utc: Utc::now(),
            mode,
            checks,
            concerns: vec![],
            blocks: vec![
                "forward-coverage: forward orphan FR-4 (P2) has no downstream reference".into(),
                "forward-coverage: forward orphan FR-5 (P2) has no downstream reference".into(),
            ],
            override_rationale: rationale.map(str::to_string),
        }
    }

    #[test]
    fn lists_every_block() {
        let result = blocked(Mode::Strict, Verdict::Block, None);
        let text = GateReport::new(&result).render_text();
        assert!(text.starts_with("gate plan on plan-1 v3: BLOCK\n"));
        assert!(text.contains("blocks (2):"));
        assert!(text.contains("FR-4"));
        assert!(text.contains("FR-5"));
    }

    #[test]
    fn permissive_is_flagged() {
        let result = blocked(Mode::Permissive, Verdict::Concern, None);
        let text = GateReport::new(&result).render_text();
        let first = text.lines().next().unwrap();
        assert!(first.contains("PERMISSIVE MODE"));
    }

    #[test]
    fn override_rationale_quoted() {
        let rationale = "approved by lead, tracked in issue #42";
        let result = blocked(Mode::Standard, Verdict::Concern, Some(rationale));
        let text = GateReport::new(&result).render_text();
        assert!(text.contains("OVERRIDDEN"));
        assert!(text.contains("override rationale: \"approved by lead, tracked in issue #42\""));
    }

    #[test]
    fn json_carries_verdict_and_rationale() {
        let result = blocked(Mode::Standard, Verdict::Concern, Some("ok"));
        let json: serde_json::Value =
            serde_json::from_str(&GateReport::new(&result).to_json().unwrap()).unwrap();
        assert_eq!(json["verdict"], "CONCERN");
        assert_eq!(json["aggregate"], "BLOCK");
        assert_eq!(json["override_rationale"], "ok");
        assert_eq!(json["checks"][1]["findings"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn status_flags_muted_stages() {
        let stage = |name: &str, muted: bool| StageStatus {
            stage: name.into(),
            artifact: Some(ArtifactId::new(format!("{name}-1")).unwrap()),
            version: Some(1),
            state: StageState::Complete {
                verdict: Verdict::Concern,
                muted,
            },
        };
        let status = PipelineStatus {
            pipeline: "checkout".into(),
            mode: Mode::Permissive,
            stages: vec![stage("plan", false), stage("decompose", true)],
        };

        let text = render_status(&status);
        let lines: Vec<&str> = text.lines().collect();
        assert!(!lines[1].contains("PERMISSIVE MODE"));
        assert!(lines[2].ends_with("CONCERN [PERMISSIVE MODE: BLOCK muted]"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["stages"][1]["state"], "complete");
        assert_eq!(json["stages"][1]["muted"], true);
    }

    #[test]
    fn block_exit_code() {
        assert_eq!(verdict_exit_code(Verdict::Block), 2);
        assert_eq!(verdict_exit_code(Verdict::Concern), 0);
    }
}
