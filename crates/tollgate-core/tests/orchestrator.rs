use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tollgate_artifact::{
    Artifact, ArtifactDraft, ArtifactId, ArtifactKind, ArtifactStore, GateResult, MemoryStore,
    Mode, PriorityClass, Requirement, StoreError, Verdict, WorkItem,
};
use tollgate_core::{
    GateEvaluator, Orchestrator, PipelineStatus, RunOutcome, StageRegistry, StageState,
};
use tollgate_test_utils::{artifact_id, cycle, PipelineFixture, ScriptedApprovals, PIPELINE};

const APPROVAL_STAGES: [&str; 3] = ["requirements", "plan", "release"];

fn approve_all(fixture: &PipelineFixture) {
    for stage in APPROVAL_STAGES {
        fixture.approvals.approve(stage);
    }
}

fn states(status: &PipelineStatus) -> Vec<&'static str> {
    status.stages.iter().map(|s| s.state.label()).collect()
}

/// Seeded through plan, then an epic whose items trace the plan but form a cycle
async fn blocked_epic(fixture: &PipelineFixture) -> Artifact {
    let seeded = fixture.seed_through(ArtifactKind::Plan).await;
    let plan = seeded.last().unwrap();
    let items = cycle(&["A", "B", "C"])
        .into_iter()
        .zip(["plan-0", "plan-1", "plan-2"])
        .map(|(item, up)| item.traces([up]))
        .collect();
    fixture
        .put(
            fixture
                .draft("epic-1", ArtifactKind::Epic)
                .derived_from(plan.id.clone())
                .with_work_items(items),
        )
        .await
}

#[tokio::test]
async fn empty_pipeline_is_not_started() {
    let fixture = PipelineFixture::new();
    let orchestrator = fixture.orchestrator();

    let status = orchestrator.status(PIPELINE, Mode::Strict).await.unwrap();
    assert_eq!(status.stages.len(), 7);
    assert!(status
        .stages
        .iter()
        .all(|s| s.state == StageState::NotStarted));
    assert_eq!(status.current().unwrap().stage, "requirements");

    let report = orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap();
    assert!(report.evaluated.is_empty());
    let halt = report.halt().unwrap();
    assert_eq!(halt.stage, "requirements");
    assert_eq!(halt.state, StageState::NotStarted);
}

#[tokio::test]
async fn full_pipeline_completes_and_rerun_is_a_no_op() {
    let fixture = PipelineFixture::new();
    fixture.seed_through(ArtifactKind::Release).await;
    approve_all(&fixture);
    let orchestrator = fixture.orchestrator();

    let report = orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Complete);
    assert_eq!(report.evaluated.len(), 7);
    assert!(report.evaluated.iter().all(|r| r.verdict == Verdict::Pass));

    let status = orchestrator.status(PIPELINE, Mode::Strict).await.unwrap();
    assert!(status.is_complete());
    assert!(status.current().is_none());

    let again = orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap();
    assert_eq!(again.outcome, RunOutcome::Complete);
    assert!(again.evaluated.is_empty());
}

#[tokio::test]
async fn approval_gates_advancement() {
    let fixture = PipelineFixture::new();
    fixture.seed_through(ArtifactKind::Release).await;
    let orchestrator = fixture.orchestrator();

    let first = orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap();
    assert_eq!(first.evaluated.len(), 1);
    let halt = first.halt().unwrap();
    assert_eq!(halt.stage, "requirements");
    assert_eq!(
        halt.state,
        StageState::AwaitingApproval {
            verdict: Verdict::Pass,
            muted: false,
        }
    );

    fixture.approvals.approve("requirements");
    let second = orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap();
    let gates: Vec<&str> = second.evaluated.iter().map(|r| r.gate_name.as_str()).collect();
    assert_eq!(gates, vec!["specify", "plan"]);
    assert_eq!(second.halt().unwrap().stage, "plan");

    let status = orchestrator.status(PIPELINE, Mode::Strict).await.unwrap();
    assert_eq!(
        states(&status),
        vec![
            "complete",
            "complete",
            "awaiting approval",
            "pending",
            "pending",
            "pending",
            "pending"
        ]
    );
}

#[tokio::test]
async fn strict_block_halts_without_override() {
    let fixture = PipelineFixture::new();
    approve_all(&fixture);
    blocked_epic(&fixture).await;
    let orchestrator = fixture.orchestrator();

    let report = orchestrator
        .run(PIPELINE, Mode::Strict, Some("ship it"))
        .await
        .unwrap();
    let halt = report.halt().unwrap();
    assert_eq!(halt.stage, "decompose");
    assert_eq!(
        halt.state,
        StageState::Blocked {
            failing_checks: vec!["dependency-graph".into()],
            override_available: false,
        }
    );
    assert_eq!(report.evaluated.last().unwrap().override_rationale, None);
}

#[tokio::test]
async fn standard_override_advances_past_block() {
    let fixture = PipelineFixture::new();
    approve_all(&fixture);
    let epic = blocked_epic(&fixture).await;
    let orchestrator = fixture.orchestrator();

    orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap();

    let without = orchestrator.run(PIPELINE, Mode::Standard, None).await.unwrap();
    assert!(without.evaluated.is_empty());
    assert!(matches!(
        without.halt().unwrap().state,
        StageState::Blocked {
            override_available: true,
            ..
        }
    ));

    let rationale = "approved by lead, tracked in issue #42";
    let with = orchestrator
        .run(PIPELINE, Mode::Standard, Some(rationale))
        .await
        .unwrap();
    assert_eq!(with.evaluated.len(), 1);
    let result = &with.evaluated[0];
    assert_eq!(result.artifact_id, epic.id);
    assert_eq!(result.verdict, Verdict::Concern);
    assert_eq!(result.override_rationale.as_deref(), Some(rationale));

    let halt = with.halt().unwrap();
    assert_eq!(halt.stage, "implement");
    assert_eq!(halt.state, StageState::NotStarted);
}

#[tokio::test]
async fn permissive_mutes_block_but_still_needs_approval() {
    let fixture = PipelineFixture::new();
    approve_all(&fixture);
    blocked_epic(&fixture).await;
    let orchestrator = fixture.orchestrator();

    let report = orchestrator.run(PIPELINE, Mode::Permissive, None).await.unwrap();
    let muted = report.evaluated.last().unwrap();
    assert_eq!(muted.gate_name, "decompose");
    assert!(muted.was_muted());
    assert_eq!(muted.verdict, Verdict::Concern);

    let halt = report.halt().unwrap();
    assert_eq!(halt.stage, "decompose");
    assert_eq!(
        halt.state,
        StageState::AwaitingApproval {
            verdict: Verdict::Concern,
            muted: true,
        }
    );
}

#[tokio::test]
async fn new_version_is_re_evaluated() {
    let fixture = PipelineFixture::new();
    let seeded = fixture.seed_through(ArtifactKind::Release).await;
    approve_all(&fixture);
    let orchestrator = fixture.orchestrator();
    orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap();

    let revised = fixture
        .put_traced("specification-1", ArtifactKind::Specification, &seeded[0])
        .await;
    assert_eq!(revised.version, 2);

    let status = orchestrator.status(PIPELINE, Mode::Strict).await.unwrap();
    assert_eq!(status.stages[1].state, StageState::Pending);
    assert_eq!(status.stages[1].version, Some(2));

    let report = orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap();
    assert_eq!(report.evaluated.len(), 1);
    assert_eq!(report.evaluated[0].artifact_version, 2);
    assert_eq!(report.outcome, RunOutcome::Complete);
}

#[tokio::test]
async fn status_writes_nothing() {
    let fixture = PipelineFixture::new();
    let seeded = fixture.seed_through(ArtifactKind::Release).await;
    let orchestrator = fixture.orchestrator();

    let status = orchestrator.status(PIPELINE, Mode::Strict).await.unwrap();
    assert!(status.stages.iter().all(|s| s.state == StageState::Pending));
    for artifact in &seeded {
        assert!(fixture.store.verdicts(&artifact.id).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn approvals_are_not_consulted_for_unjudged_stages() {
    let fixture = PipelineFixture::new();
    fixture.seed_through(ArtifactKind::Release).await;
    let approvals = Arc::new(ScriptedApprovals::new());
    let orchestrator = Orchestrator::new(fixture.evaluator(), approvals.clone());

    orchestrator.status(PIPELINE, Mode::Strict).await.unwrap();
    assert!(approvals.queries().is_empty());
}

/// Puts one queued revision of the subject before each verdict append
struct RevisingStore {
    inner: MemoryStore,
    revisions: Mutex<Vec<ArtifactDraft>>,
}

#[async_trait]
impl ArtifactStore for RevisingStore {
    async fn get(&self, id: &ArtifactId) -> Result<Artifact, StoreError> {
        self.inner.get(id).await
    }

    async fn get_version(&self, id: &ArtifactId, version: u64) -> Result<Artifact, StoreError> {
        self.inner.get_version(id, version).await
    }

    async fn put(&self, draft: ArtifactDraft) -> Result<Artifact, StoreError> {
        self.inner.put(draft).await
    }

    async fn append_verdict(
        &self,
        id: &ArtifactId,
        observed_version: u64,
        result: GateResult,
    ) -> Result<(), StoreError> {
        let revision = self.revisions.lock().pop();
        if let Some(draft) = revision {
            self.inner.put(draft).await?;
        }
        self.inner.append_verdict(id, observed_version, result).await
    }

    async fn verdicts(&self, id: &ArtifactId) -> Result<Vec<GateResult>, StoreError> {
        self.inner.verdicts(id).await
    }

    async fn versions(&self, id: &ArtifactId) -> Result<Vec<u64>, StoreError> {
        self.inner.versions(id).await
    }

    async fn latest_of_kind(
        &self,
        pipeline: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, StoreError> {
        self.inner.latest_of_kind(pipeline, kind).await
    }
}

async fn revising_orchestrator(revisions: usize) -> (Arc<RevisingStore>, Orchestrator) {
    let fixture = PipelineFixture::new();
    let draft = fixture
        .draft("reqs", ArtifactKind::Requirements)
        .with_requirements(vec![Requirement::new(
            "FR-1",
            artifact_id("reqs"),
            PriorityClass::P2,
        )]);
    let store = Arc::new(RevisingStore {
        inner: MemoryStore::new(),
        revisions: Mutex::new(vec![draft.clone(); revisions]),
    });
    store.put(draft).await.unwrap();

    let evaluator =
        GateEvaluator::with_builtin_checks(store.clone(), Arc::new(StageRegistry::builtin()))
            .unwrap();
    let orchestrator = Orchestrator::new(evaluator, fixture.approvals.clone());
    (store, orchestrator)
}

#[tokio::test]
async fn conflict_is_retried_against_the_new_version() {
    let (store, orchestrator) = revising_orchestrator(1).await;

    let report = orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap();
    assert_eq!(report.evaluated.len(), 1);
    assert_eq!(report.evaluated[0].artifact_version, 2);

    let id = artifact_id("reqs");
    assert_eq!(store.versions(&id).await.unwrap(), vec![1, 2]);
    assert_eq!(store.verdicts(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn persistent_conflict_gives_up() {
    let (_store, orchestrator) = revising_orchestrator(10).await;

    let err = orchestrator.run(PIPELINE, Mode::Strict, None).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn work_items_need_a_work_item_stage() {
    let fixture = PipelineFixture::new();
    fixture.put_requirements("reqs", &["FR-1"]).await;
    let spec = fixture
        .put(
            fixture
                .draft("specification-1", ArtifactKind::Specification)
                .with_work_items(vec![WorkItem::new("T1").traces(["FR-1"])]),
        )
        .await;

    let result = fixture
        .evaluator()
        .evaluate("specify", &spec.id, Mode::Strict, None)
        .await
        .unwrap();
    assert_eq!(result.verdict, Verdict::Block);
    assert!(result.blocks.iter().any(|b| b.starts_with("structure:")));
}
