use super::{check_result_target, ArtifactStore, StoreError};
use crate::model::{Artifact, ArtifactDraft, ArtifactId, ArtifactKind};
use crate::verdict::GateResult;
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexSet;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Process-local store, used by tests and embedded callers
///
/// "Durable" here means visible to every later call on the same instance.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    versions: HashMap<ArtifactId, Vec<Artifact>>,
    ledger: HashMap<ArtifactId, Vec<GateResult>>,
    /// Ids ordered by their most recent write, oldest first
    sequence: IndexSet<ArtifactId>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn with_history(&self, mut artifact: Artifact) -> Artifact {
        artifact.verdict_history = self.ledger.get(&artifact.id).cloned().unwrap_or_default();
        artifact
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get(&self, id: &ArtifactId) -> Result<Artifact, StoreError> {
        let inner = self.inner.read();
        let latest = inner
            .versions
            .get(id)
            .and_then(|v| v.last())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(inner.with_history(latest))
    }

    async fn get_version(&self, id: &ArtifactId, version: u64) -> Result<Artifact, StoreError> {
        let inner = self.inner.read();
        let versions = inner
            .versions
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let artifact = versions
            .iter()
            .find(|a| a.version == version)
            .cloned()
            .ok_or_else(|| StoreError::VersionNotFound {
                id: id.clone(),
                version,
            })?;
        Ok(inner.with_history(artifact))
    }

    #[tracing::instrument(skip(self, draft), fields(id = %draft.id, kind = %draft.kind))]
    async fn put(&self, draft: ArtifactDraft) -> Result<Artifact, StoreError> {
        let mut inner = self.inner.write();
        let previous = inner
            .versions
            .get(&draft.id)
            .and_then(|v| v.last())
            .map(|a| (a.kind, a.version));
        if let Some((existing, _)) = previous {
            if existing != draft.kind {
                return Err(StoreError::KindChanged {
                    id: draft.id,
                    existing,
                    requested: draft.kind,
                });
            }
        }
        let next = previous.map_or(1, |(_, v)| v + 1);
        let artifact = draft.finalize(next, Utc::now())?;
        inner
            .versions
            .entry(artifact.id.clone())
            .or_default()
            .push(artifact.clone());
        inner.sequence.shift_remove(&artifact.id);
        inner.sequence.insert(artifact.id.clone());
        tracing::debug!(version = next, hash = %artifact.content_hash.short(), "artifact stored");
        Ok(artifact)
    }

    #[tracing::instrument(skip(self, result), fields(gate = %result.gate_name, verdict = %result.verdict))]
    async fn append_verdict(
        &self,
        id: &ArtifactId,
        observed_version: u64,
        result: GateResult,
    ) -> Result<(), StoreError> {
        check_result_target(id, observed_version, &result)?;
        let mut inner = self.inner.write();
        let current = inner
            .versions
            .get(id)
            .and_then(|v| v.last())
            .map(|a| a.version)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if current != observed_version {
            return Err(StoreError::Conflict {
                id: id.clone(),
                observed: observed_version,
                current,
            });
        }
        inner.ledger.entry(id.clone()).or_default().push(result);
        Ok(())
    }

    async fn verdicts(&self, id: &ArtifactId) -> Result<Vec<GateResult>, StoreError> {
        let inner = self.inner.read();
        if !inner.versions.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(inner.ledger.get(id).cloned().unwrap_or_default())
    }

    async fn versions(&self, id: &ArtifactId) -> Result<Vec<u64>, StoreError> {
        let inner = self.inner.read();
        inner
            .versions
            .get(id)
            .map(|v| v.iter().map(|a| a.version).collect())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn latest_of_kind(
        &self,
        pipeline: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, StoreError> {
        let inner = self.inner.read();
        let found = inner.sequence.iter().rev().find_map(|id| {
            inner
                .versions
                .get(id)
                .and_then(|v| v.last())
                .filter(|a| a.kind == kind && a.pipeline == pipeline)
                .cloned()
        });
        Ok(found.map(|a| inner.with_history(a)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactContent;
    use crate::verdict::{GateResultId, Mode, Verdict};

    fn id(s: &str) -> ArtifactId {
        ArtifactId::new(s).unwrap()
    }

    fn draft(name: &str, kind: ArtifactKind) -> ArtifactDraft {
        ArtifactDraft::new(id(name), kind, "checkout").with_content(ArtifactContent::text("body"))
    }

    fn result_for(artifact: &Artifact, verdict: Verdict) -> GateResult {
        GateResult {
            id: GateResultId::new(),
            gate_name: "plan".into(),
            artifact_id: artifact.id.clone(),
            artifact_version: artifact.version,
            verdict,
            aggregate: verdict,
            timestamp_utc: Utc::now(),
            mode: Mode::Strict,
            checks: Vec::new(),
            concerns: Vec::new(),
            blocks: Vec::new(),
            override_rationale: None,
        }
    }

    #[tokio::test]
    async fn put_assigns_monotonic_versions() {
        let store = MemoryStore::new();
        let v1 = store.put(draft("plan-1", ArtifactKind::Plan)).await.unwrap();
        let v2 = store.put(draft("plan-1", ArtifactKind::Plan)).await.unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));
        assert_eq!(store.versions(&id("plan-1")).await.unwrap(), vec![1, 2]);
        assert_eq!(store.get(&id("plan-1")).await.unwrap().version, 2);
        assert_eq!(store.get_version(&id("plan-1"), 1).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(&id("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn kind_cannot_change() {
        let store = MemoryStore::new();
        store.put(draft("a", ArtifactKind::Plan)).await.unwrap();
        let err = store.put(draft("a", ArtifactKind::Epic)).await.unwrap_err();
        assert!(matches!(err, StoreError::KindChanged { .. }));
    }

    #[tokio::test]
    async fn append_on_stale_version_conflicts() {
        let store = MemoryStore::new();
        let v1 = store.put(draft("plan-1", ArtifactKind::Plan)).await.unwrap();
        store.put(draft("plan-1", ArtifactKind::Plan)).await.unwrap();

        let err = store
            .append_verdict(&v1.id, 1, result_for(&v1, Verdict::Pass))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.verdicts(&v1.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ledger_is_append_only_and_attached_on_read() {
        let store = MemoryStore::new();
        let v1 = store.put(draft("plan-1", ArtifactKind::Plan)).await.unwrap();
        store
            .append_verdict(&v1.id, 1, result_for(&v1, Verdict::Block))
            .await
            .unwrap();
        store
            .append_verdict(&v1.id, 1, result_for(&v1, Verdict::Pass))
            .await
            .unwrap();

        let read = store.get(&v1.id).await.unwrap();
        let verdicts: Vec<_> = read.verdict_history.iter().map(|r| r.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Block, Verdict::Pass]);
        assert_eq!(read.latest_verdict_for_version().unwrap().verdict, Verdict::Pass);
    }

    #[tokio::test]
    async fn result_must_target_observed_version() {
        let store = MemoryStore::new();
        let v1 = store.put(draft("plan-1", ArtifactKind::Plan)).await.unwrap();
        let mut result = result_for(&v1, Verdict::Pass);
        result.artifact_version = 7;
        let err = store.append_verdict(&v1.id, 1, result).await.unwrap_err();
        assert!(matches!(err, StoreError::MismatchedResult { .. }));
    }

    #[tokio::test]
    async fn latest_of_kind_scopes_by_pipeline() {
        let store = MemoryStore::new();
        store.put(draft("plan-a", ArtifactKind::Plan)).await.unwrap();
        store.put(draft("plan-b", ArtifactKind::Plan)).await.unwrap();
        store
            .put(ArtifactDraft::new(id("plan-c"), ArtifactKind::Plan, "billing"))
            .await
            .unwrap();

        let latest = store
            .latest_of_kind("checkout", ArtifactKind::Plan)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, id("plan-b"));
        assert!(store
            .latest_of_kind("checkout", ArtifactKind::Epic)
            .await
            .unwrap()
            .is_none());
    }
    #[tokio::test]
    async fn rewritten_artifact_becomes_latest_once() {
        let store = MemoryStore::new();
        for name in ["plan-a", "plan-b", "plan-a"] {
            store.put(draft(name, ArtifactKind::Plan)).await.unwrap();
        }

        let latest = store
            .latest_of_kind("checkout", ArtifactKind::Plan)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((latest.id, latest.version), (id("plan-a"), 2));
        assert_eq!(store.inner.read().sequence.len(), 2);
    }
}
