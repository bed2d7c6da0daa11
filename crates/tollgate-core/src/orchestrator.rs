//! Pipeline orchestrator
//!
//! Stateless: every decision is recomputed from the artifact store, so a
//! run interrupted at any point can simply be started again. A stage is
//! complete when its output kind has an artifact whose latest version
//! carries a non-BLOCK verdict from that stage's gate, and the approval
//! source has signed off where sign-off is needed.

use crate::approval::ApprovalSource;
use crate::error::GateError;
use crate::evaluator::GateEvaluator;
use crate::policy::usable_rationale;
use crate::registry::StageDefinition;
use serde::Serialize;
use std::sync::Arc;
use tollgate_artifact::{Artifact, ArtifactId, GateResult, Mode, Verdict};

/// Attempts per gate when the subject is revised mid-evaluation
const MAX_CONFLICT_RETRIES: usize = 3;

/// Where one stage stands, derived from stored artifacts and verdicts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum StageState {
    /// No artifact of the stage's output kind exists yet
    NotStarted,
    /// The latest artifact version has no verdict from this gate
    Pending,
    /// The latest verdict is an un-overridden BLOCK
    Blocked {
        failing_checks: Vec<String>,
        override_available: bool,
    },
    /// PASS or CONCERN, waiting for the approval source
    ///
    /// `muted` marks a CONCERN that permissive mode downgraded from BLOCK.
    AwaitingApproval { verdict: Verdict, muted: bool },
    Complete { verdict: Verdict, muted: bool },
}

impl StageState {
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Pending => "pending",
            Self::Blocked { .. } => "blocked",
            Self::AwaitingApproval { .. } => "awaiting approval",
            Self::Complete { .. } => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(flatten)]
    pub state: StageState,
}

/// Per-stage state of one pipeline, in registry order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub pipeline: String,
    pub mode: Mode,
    pub stages: Vec<StageStatus>,
}

impl PipelineStatus {
    /// First stage that is not complete; the pipeline cannot pass it
    #[must_use]
    pub fn current(&self) -> Option<&StageStatus> {
        self.stages.iter().find(|s| !s.state.is_complete())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current().is_none()
    }
}

/// Why a run stopped short of the end of the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Halt {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactId>,
    #[serde(flatten)]
    pub state: StageState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum RunOutcome {
    Complete,
    Halted(Halt),
}

/// Everything one [`Orchestrator::run`] did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub mode: Mode,
    /// Gate results appended during this run, in stage order
    pub evaluated: Vec<GateResult>,
    pub outcome: RunOutcome,
}

impl RunReport {
    #[must_use]
    pub fn halt(&self) -> Option<&Halt> {
        match &self.outcome {
            RunOutcome::Halted(halt) => Some(halt),
            RunOutcome::Complete => None,
        }
    }
}

pub struct Orchestrator {
    evaluator: GateEvaluator,
    approvals: Arc<dyn ApprovalSource>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("evaluator", &self.evaluator)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(evaluator: GateEvaluator, approvals: Arc<dyn ApprovalSource>) -> Self {
        Self {
            evaluator,
            approvals,
        }
    }

    #[must_use]
    pub fn evaluator(&self) -> &GateEvaluator {
        &self.evaluator
    }

    /// Per-stage state of `pipeline`; writes nothing
    ///
    /// # Errors
    /// Returns error on store or approval-source faults
    pub async fn status(&self, pipeline: &str, mode: Mode) -> Result<PipelineStatus, GateError> {
        let mut stages = Vec::new();
        for stage in self.evaluator.registry().stages() {
            let artifact = self.latest_output(pipeline, stage).await?;
            stages.push(self.stage_status(pipeline, stage, artifact.as_ref(), mode).await?);
        }
        Ok(PipelineStatus {
            pipeline: pipeline.to_string(),
            mode,
            stages,
        })
    }

    /// Advance `pipeline` as far as it can go
    ///
    /// Walks the stages in order. A stage whose latest artifact has no
    /// verdict yet is evaluated; a blocked stage is re-evaluated only when
    /// the active mode could change the outcome (standard with a rationale,
    /// or permissive). The run stops at the first stage that is not
    /// complete. A rationale overrides at most one BLOCK per run.
    ///
    /// Re-running with the same arguments evaluates nothing new.
    ///
    /// # Errors
    /// Returns error on store, registry or approval-source faults
    #[tracing::instrument(skip(self, rationale))]
    pub async fn run(
        &self,
        pipeline: &str,
        mode: Mode,
        rationale: Option<&str>,
    ) -> Result<RunReport, GateError> {
        let mut rationale = usable_rationale(rationale);
        let mut evaluated = Vec::new();

        for stage in self.evaluator.registry().stages() {
            let artifact = self.latest_output(pipeline, stage).await?;
            let mut status = self.stage_status(pipeline, stage, artifact.as_ref(), mode).await?;

            let reevaluate = match &status.state {
                StageState::Pending => true,
                StageState::Blocked { .. } => {
                    mode == Mode::Permissive || (mode.allows_override() && rationale.is_some())
                }
                _ => false,
            };

            if let (true, Some(artifact)) = (reevaluate, artifact.as_ref()) {
                let result = self.evaluate_with_retry(stage, &artifact.id, mode, rationale).await?;
                if result.was_overridden() {
                    rationale = None;
                }
                evaluated.push(result);
                let refreshed = self.evaluator.store().get(&artifact.id).await?;
                status = self.stage_status(pipeline, stage, Some(&refreshed), mode).await?;
            }

            if !status.state.is_complete() {
                tracing::info!(
                    stage = %stage.name,
                    state = status.state.label(),
                    "pipeline halted"
                );
                return Ok(RunReport {
                    pipeline: pipeline.to_string(),
                    mode,
                    evaluated,
                    outcome: RunOutcome::Halted(Halt {
                        stage: status.stage,
                        artifact: status.artifact,
                        state: status.state,
                    }),
                });
            }
        }

        tracing::info!(evaluated = evaluated.len(), "pipeline complete");
        Ok(RunReport {
            pipeline: pipeline.to_string(),
            mode,
            evaluated,
            outcome: RunOutcome::Complete,
        })
    }

    async fn evaluate_with_retry(
        &self,
        stage: &StageDefinition,
        id: &ArtifactId,
        mode: Mode,
        rationale: Option<&str>,
    ) -> Result<GateResult, GateError> {
        let mut attempt = 1;
        loop {
            match self.evaluator.evaluate(&stage.name, id, mode, rationale).await {
                Err(e) if e.is_retryable() && attempt < MAX_CONFLICT_RETRIES => {
                    tracing::warn!(
                        stage = %stage.name,
                        attempt,
                        error = %e,
                        "artifact revised during evaluation, retrying"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn latest_output(
        &self,
        pipeline: &str,
        stage: &StageDefinition,
    ) -> Result<Option<Artifact>, GateError> {
        Ok(self
            .evaluator
            .store()
            .latest_of_kind(pipeline, stage.output)
            .await?)
    }

    async fn stage_status(
        &self,
        pipeline: &str,
        stage: &StageDefinition,
        artifact: Option<&Artifact>,
        mode: Mode,
    ) -> Result<StageStatus, GateError> {
        let Some(artifact) = artifact else {
            return Ok(StageStatus {
                stage: stage.name.clone(),
                artifact: None,
                version: None,
                state: StageState::NotStarted,
            });
        };

        let latest = artifact
            .verdict_history
            .iter()
            .rev()
            .find(|r| r.gate_name == stage.name && r.artifact_version == artifact.version);

        let state = match latest {
            None => StageState::Pending,
            Some(result) if result.is_blocking() => StageState::Blocked {
                failing_checks: result.failing_checks().map(|c| c.name.clone()).collect(),
                override_available: mode.allows_override(),
            },
            Some(result) => {
                let needs_approval = stage.requires_approval
                    || (result.verdict == Verdict::Concern && !result.was_overridden());
                if needs_approval && !self.approvals.is_approved(pipeline, &stage.name).await? {
                    StageState::AwaitingApproval {
                        verdict: result.verdict,
                        muted: result.was_muted(),
                    }
                } else {
                    StageState::Complete {
                        verdict: result.verdict,
                        muted: result.was_muted(),
                    }
                }
            }
        };

        Ok(StageStatus {
            stage: stage.name.clone(),
            artifact: Some(artifact.id.clone()),
            version: Some(artifact.version),
            state,
        })
    }
}
