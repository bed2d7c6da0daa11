//! One pipeline driven against the on-disk store and approvals file

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tollgate_artifact::{ArtifactKind, ArtifactStore, FileStore, Mode, Verdict};
use tollgate_core::{
    render_run, EngineConfig, FileApprovals, GateEvaluator, Orchestrator, RunOutcome, StageState,
};
use tollgate_test_utils::{traceable_ids, PipelineFixture, PIPELINE};

#[tokio::test]
async fn pipeline_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default()
        .with_overrides(None, dir.path().to_str())
        .unwrap();

    // seed in memory, then copy every artifact into the file store
    let fixture = PipelineFixture::new();
    let seeded = fixture.seed_through(ArtifactKind::Release).await;
    let store = FileStore::open(&config.store_root).await.unwrap();
    for artifact in &seeded {
        let mut draft = fixture
            .draft(artifact.id.as_str(), artifact.kind)
            .with_requirements(artifact.requirements.clone())
            .with_work_items(artifact.work_items.clone());
        for up in &artifact.upstream_refs {
            draft = draft.derived_from(up.clone());
        }
        store.put(draft).await.unwrap();
    }

    let approvals = FileApprovals::new(config.approvals_path());
    for stage in ["requirements", "plan", "release"] {
        approvals.approve(PIPELINE, stage).await.unwrap();
    }

    let orchestrator = |store: FileStore| {
        let evaluator = GateEvaluator::with_builtin_checks(
            Arc::new(store),
            Arc::new(config.stage_registry().unwrap()),
        )
        .unwrap();
        Orchestrator::new(evaluator, Arc::new(FileApprovals::new(config.approvals_path())))
    };

    let report = orchestrator(store).run(PIPELINE, Mode::Strict, None).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Complete, "{}", render_run(&report));
    assert_eq!(report.evaluated.len(), 7);

    let reopened = FileStore::open(&config.store_root).await.unwrap();
    let spec = reopened
        .latest_of_kind(PIPELINE, ArtifactKind::Specification)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(traceable_ids(&spec), traceable_ids(&seeded[1]));
    assert_eq!(spec.verdict_history.len(), 1);
    assert_eq!(spec.verdict_history[0].verdict, Verdict::Pass);

    let restarted = orchestrator(reopened);
    let status = restarted.status(PIPELINE, Mode::Strict).await.unwrap();
    assert!(status
        .stages
        .iter()
        .all(|s| matches!(s.state, StageState::Complete { .. })));
    assert!(restarted
        .run(PIPELINE, Mode::Strict, None)
        .await
        .unwrap()
        .evaluated
        .is_empty());
}
