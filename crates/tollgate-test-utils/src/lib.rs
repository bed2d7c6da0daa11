//! Testing utilities for the tollgate workspace
//!
//! Shared fixtures: id and work-item builders, a scripted approval source
//! and a seeded in-memory pipeline.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tollgate_artifact::{
    Artifact, ArtifactContent, ArtifactDraft, ArtifactId, ArtifactKind, ArtifactStore,
    MemoryStore, PriorityClass, Requirement, WorkItem,
};
use tollgate_core::{ApprovalSource, ConfigError, GateEvaluator, Orchestrator, StageRegistry};

pub const PIPELINE: &str = "checkout";

pub fn artifact_id(id: &str) -> ArtifactId {
    ArtifactId::new(id).unwrap()
}

/// Work items forming `ids[0] -> ids[1] -> ... -> ids[0]`
pub fn cycle(ids: &[&str]) -> Vec<WorkItem> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| WorkItem::new(*id).depends([ids[(i + 1) % ids.len()]]))
        .collect()
}

/// Work items where each depends on the one before it
pub fn chain(ids: &[&str]) -> Vec<WorkItem> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let item = WorkItem::new(*id);
            if i == 0 {
                item
            } else {
                item.depends([ids[i - 1]])
            }
        })
        .collect()
}

/// Every id a downstream artifact may trace to
pub fn traceable_ids(artifact: &Artifact) -> Vec<String> {
    artifact
        .requirements
        .iter()
        .map(|r| r.id.clone())
        .chain(artifact.work_items.iter().map(|w| w.id.clone()))
        .collect()
}

/// Approval source answering from a script and recording every query
#[derive(Debug, Default)]
pub struct ScriptedApprovals {
    approved: Mutex<HashSet<String>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approving(stages: &[&str]) -> Self {
        let source = Self::new();
        for stage in stages {
            source.approve(stage);
        }
        source
    }

    pub fn approve(&self, stage: &str) {
        self.approved.lock().insert(stage.to_string());
    }

    /// Stage names asked about, in order
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl ApprovalSource for ScriptedApprovals {
    async fn is_approved(&self, _pipeline: &str, stage: &str) -> Result<bool, ConfigError> {
        self.queries.lock().push(stage.to_string());
        Ok(self.approved.lock().contains(stage))
    }
}

/// In-memory store, built-in stage table and scripted approvals for one pipeline
pub struct PipelineFixture {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<StageRegistry>,
    pub approvals: Arc<ScriptedApprovals>,
    pub pipeline: String,
}

impl Default for PipelineFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineFixture {
    pub fn new() -> Self {
        Self::with_registry(StageRegistry::builtin())
    }

    pub fn with_registry(registry: StageRegistry) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            registry: Arc::new(registry),
            approvals: Arc::new(ScriptedApprovals::new()),
            pipeline: PIPELINE.to_string(),
        }
    }

    pub fn evaluator(&self) -> GateEvaluator {
        GateEvaluator::with_builtin_checks(self.store.clone(), self.registry.clone()).unwrap()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.evaluator(), self.approvals.clone())
    }

    pub fn draft(&self, id: &str, kind: ArtifactKind) -> ArtifactDraft {
        ArtifactDraft::new(artifact_id(id), kind, self.pipeline.clone())
            .with_content(ArtifactContent::text(format!("# {id}")))
    }

    pub async fn put(&self, draft: ArtifactDraft) -> Artifact {
        self.store.put(draft).await.unwrap()
    }

    /// A requirements artifact with the given ids at P2
    pub async fn put_requirements(&self, id: &str, ids: &[&str]) -> Artifact {
        let source = artifact_id(id);
        let requirements = ids
            .iter()
            .map(|r| Requirement::new(*r, source.clone(), PriorityClass::P2))
            .collect();
        self.put(self.draft(id, ArtifactKind::Requirements).with_requirements(requirements))
            .await
    }

    /// An artifact of `kind` with one item per traceable id of `upstream`,
    /// each tracing to exactly that id
    pub async fn put_traced(&self, id: &str, kind: ArtifactKind, upstream: &Artifact) -> Artifact {
        let prefix = kind.as_str();
        let source = artifact_id(id);
        let mut draft = self.draft(id, kind).derived_from(upstream.id.clone());
        if kind.carries_work_items() {
            let items = traceable_ids(upstream)
                .into_iter()
                .enumerate()
                .map(|(i, up)| WorkItem::new(format!("{prefix}-{i}")).traces([up]))
                .collect();
            draft = draft.with_work_items(items);
        } else {
            let requirements = traceable_ids(upstream)
                .into_iter()
                .enumerate()
                .map(|(i, up)| {
                    Requirement::new(format!("{prefix}-{i}"), source.clone(), PriorityClass::P2)
                        .tracing_to([up])
                })
                .collect();
            draft = draft.with_requirements(requirements);
        }
        self.put(draft).await
    }

    /// Fully traced artifacts for every built-in stage after `requirements`,
    /// up to and including the stage producing `last`
    pub async fn seed_through(&self, last: ArtifactKind) -> Vec<Artifact> {
        let mut artifacts = vec![self.put_requirements("reqs", &["FR-1", "FR-2", "FR-3"]).await];
        for kind in ArtifactKind::ALL.into_iter().skip(1) {
            if kind > last {
                break;
            }
            let upstream = artifacts.last().unwrap().clone();
            let id = format!("{}-1", kind.as_str());
            artifacts.push(self.put_traced(&id, kind, &upstream).await);
        }
        artifacts
    }
}
