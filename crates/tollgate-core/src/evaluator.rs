//! Gate evaluator
//!
//! One [`GateEvaluator::evaluate`] call runs one gate end to end:
//!
//! 1. Resolve the stage definition
//! 2. Fetch the subject and the latest artifact of each upstream stage
//! 3. Run every check the stage names
//! 4. Aggregate (strict ordinal max)
//! 5. Apply the enforcement mode
//! 6. Append the result to the subject's ledger against the version judged

use crate::checks::{CheckContext, CheckRegistry};
use crate::error::{GateError, RegistryError};
use crate::policy::apply_mode;
use crate::registry::{StageDefinition, StageRegistry};
use chrono::Utc;
use std::sync::Arc;
use tollgate_artifact::{
    Artifact, ArtifactId, ArtifactStore, CheckRecord, Finding, GateResult, GateResultId, Mode,
    Verdict,
};

#[derive(Clone)]
pub struct GateEvaluator {
    store: Arc<dyn ArtifactStore>,
    registry: Arc<StageRegistry>,
    checks: Arc<CheckRegistry>,
}

impl std::fmt::Debug for GateEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateEvaluator")
            .field("stages", &self.registry.names())
            .field("checks", &self.checks)
            .finish_non_exhaustive()
    }
}

impl GateEvaluator {
    /// # Errors
    /// Returns [`RegistryError::InvalidDefinition`] if a stage names a check
    /// the check registry does not know
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        registry: Arc<StageRegistry>,
        checks: Arc<CheckRegistry>,
    ) -> Result<Self, RegistryError> {
        registry.validate_checks(&checks)?;
        Ok(Self {
            store,
            registry,
            checks,
        })
    }

    /// Evaluator over the built-in checks
    ///
    /// # Errors
    /// Same as [`GateEvaluator::new`]
    pub fn with_builtin_checks(
        store: Arc<dyn ArtifactStore>,
        registry: Arc<StageRegistry>,
    ) -> Result<Self, RegistryError> {
        Self::new(store, registry, Arc::new(CheckRegistry::builtin()))
    }

    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Run the gate `gate` against the latest version of `artifact_id`
    ///
    /// A failing check is part of the returned result, never an error.
    ///
    /// # Errors
    /// - [`GateError::Registry`] for an unknown gate
    /// - [`GateError::Store`] with `NotFound` for a missing subject or
    ///   upstream reference, `Conflict` if the subject was revised while the
    ///   gate ran (retry after re-fetching)
    /// - [`GateError::MissingUpstream`] if an upstream stage has no artifact
    #[tracing::instrument(skip(self, override_rationale))]
    pub async fn evaluate(
        &self,
        gate: &str,
        artifact_id: &ArtifactId,
        mode: Mode,
        override_rationale: Option<&str>,
    ) -> Result<GateResult, GateError> {
        let stage = self.registry.resolve(gate)?;
        let subject = self.store.get(artifact_id).await?;
        let upstream = self.fetch_upstream(stage, &subject).await?;

        let ctx = CheckContext {
            stage,
            subject: &subject,
            upstream: &upstream,
        };
        let checks = self.run_checks(&ctx);
        let result = judge(stage, &subject, checks, mode, override_rationale);

        self.store
            .append_verdict(&subject.id, subject.version, result.clone())
            .await?;

        tracing::info!(
            artifact = %subject.id,
            version = subject.version,
            verdict = %result.verdict,
            aggregate = %result.aggregate,
            blocks = result.blocks.len(),
            concerns = result.concerns.len(),
            "gate evaluated"
        );
        Ok(result)
    }

    /// Latest artifact of each upstream stage, in declared order
    ///
    /// An explicit `upstream_refs` entry of the right kind wins over the
    /// pipeline's most recent artifact of that kind. Every reference must
    /// exist.
    async fn fetch_upstream(
        &self,
        stage: &StageDefinition,
        subject: &Artifact,
    ) -> Result<Vec<Artifact>, GateError> {
        let mut referenced = Vec::with_capacity(subject.upstream_refs.len());
        for id in &subject.upstream_refs {
            referenced.push(self.store.get(id).await?);
        }

        let mut upstream = Vec::with_capacity(stage.upstream.len());
        for name in &stage.upstream {
            let up = self.registry.resolve(name)?;
            let found = match referenced.iter().find(|a| a.kind == up.output) {
                Some(artifact) => Some(artifact.clone()),
                None => {
                    self.store
                        .latest_of_kind(&subject.pipeline, up.output)
                        .await?
                }
            };
            let artifact = found.ok_or_else(|| GateError::MissingUpstream {
                gate: stage.name.clone(),
                stage: name.clone(),
                kind: up.output,
                pipeline: subject.pipeline.clone(),
            })?;
            tracing::debug!(
                stage = %name,
                upstream = %artifact.id,
                version = artifact.version,
                "upstream resolved"
            );
            upstream.push(artifact);
        }
        Ok(upstream)
    }

    fn run_checks(&self, ctx: &CheckContext<'_>) -> Vec<CheckRecord> {
        ctx.stage
            .checks
            .iter()
            .map(|name| {
                let record = match self.checks.get(name) {
                    Some(check) => {
                        let mut record = check.run(ctx);
                        record.name.clone_from(name);
                        record
                    }
                    // names are validated in `new`
                    None => CheckRecord::from_findings(
                        name.clone(),
                        vec![Finding::block(format!("check {name} is not registered"))],
                    ),
                };
                tracing::debug!(
                    check = %name,
                    result = %record.result,
                    findings = record.findings.len(),
                    "check run"
                );
                record
            })
            .collect()
    }
}

fn judge(
    stage: &StageDefinition,
    subject: &Artifact,
    checks: Vec<CheckRecord>,
    mode: Mode,
    override_rationale: Option<&str>,
) -> GateResult {
    let aggregate = Verdict::aggregate(checks.iter().map(|c| c.result));
    let outcome = apply_mode(aggregate, mode, override_rationale);

    let collect = |severity: Verdict| -> Vec<String> {
        checks
            .iter()
            .flat_map(|c| {
                c.evidence_at(severity)
                    .map(move |evidence| format!("{}: {evidence}", c.name))
            })
            .collect()
    };
    let blocks = collect(Verdict::Block);
    let concerns = collect(Verdict::Concern);

    GateResult {
        id: GateResultId::new(),
        gate_name: stage.name.clone(),
        artifact_id: subject.id.clone(),
        artifact_version: subject.version,
        verdict: outcome.verdict,
        aggregate,
        timestamp_utc: Utc::now(),
        mode,
        checks,
        concerns,
        blocks,
        override_rationale: outcome.override_rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{MINIMUM_COUNTS, STRUCTURE};
    use pretty_assertions::assert_eq;
    use tollgate_artifact::{ArtifactContent, ArtifactDraft, ArtifactKind, MemoryStore, StoreError};

    fn registry() -> Arc<StageRegistry> {
        Arc::new(StageRegistry::builtin())
    }

    #[tokio::test]
    async fn unknown_gate_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let evaluator = GateEvaluator::with_builtin_checks(store, registry()).unwrap();
        let err = evaluator
            .evaluate("deploy", &ArtifactId::new("x").unwrap(), Mode::Strict, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Registry(RegistryError::UnknownStage(_))));
    }

    #[tokio::test]
    async fn missing_subject_is_forward_orphan() {
        let store = Arc::new(MemoryStore::new());
        let evaluator = GateEvaluator::with_builtin_checks(store, registry()).unwrap();
        let err = evaluator
            .evaluate("plan", &ArtifactId::new("plan-1").unwrap(), Mode::Strict, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Store(StoreError::NotFound(_))));
        assert!(err.is_forward_orphan());
    }

    #[tokio::test]
    async fn missing_upstream_stage_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let id = ArtifactId::new("plan-1").unwrap();
        store
            .put(
                ArtifactDraft::new(id.clone(), ArtifactKind::Plan, "checkout")
                    .with_content(ArtifactContent::text("plan")),
            )
            .await
            .unwrap();
        let evaluator = GateEvaluator::with_builtin_checks(store, registry()).unwrap();
        let err = evaluator.evaluate("plan", &id, Mode::Strict, None).await.unwrap_err();
        assert!(matches!(
            &err,
            GateError::MissingUpstream {
                stage,
                kind: ArtifactKind::Specification,
                ..
            } if stage == "specify"
        ));
    }

    #[tokio::test]
    async fn first_stage_result_is_appended() {
        let store = Arc::new(MemoryStore::new());
        let id = ArtifactId::new("reqs-1").unwrap();
        store
            .put(
                ArtifactDraft::new(id.clone(), ArtifactKind::Requirements, "checkout")
                    .with_content(ArtifactContent::text("nothing extracted yet")),
            )
            .await
            .unwrap();
        let evaluator = GateEvaluator::with_builtin_checks(store.clone(), registry()).unwrap();
        let result = evaluator
            .evaluate("requirements", &id, Mode::Strict, None)
            .await
            .unwrap();

        assert_eq!(result.artifact_version, 1);
        assert_eq!(result.verdict, Verdict::Concern);
        assert_eq!(
            result.checks.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec![STRUCTURE, MINIMUM_COUNTS]
        );
        assert_eq!(
            result.concerns,
            vec!["minimum-counts: 0 requirements, at least 1 required"]
        );
        assert_eq!(store.verdicts(&id).await.unwrap(), vec![result]);
    }

    #[tokio::test]
    async fn unregistered_check_rejected_up_front() {
        let store = Arc::new(MemoryStore::new());
        let table = StageRegistry::from_definitions([StageDefinition::new(
            "requirements",
            ArtifactKind::Requirements,
        )
        .with_checks(["structure", "spelling"])])
        .unwrap();
        let err = GateEvaluator::with_builtin_checks(store, Arc::new(table)).unwrap_err();
        assert!(err.to_string().contains("spelling"));
    }
}
