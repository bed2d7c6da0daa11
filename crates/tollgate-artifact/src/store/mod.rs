//! Append-only artifact store
//!
//! There is no delete: traceability audits must survive artifact re-runs,
//! so a re-run produces a new version and the verdict ledger only grows.
//!
//! Concurrency is optimistic. [`ArtifactStore::append_verdict`] takes the
//! version the caller judged and fails with [`StoreError::Conflict`] if the
//! artifact has since been revised; callers re-fetch and retry.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::model::{Artifact, ArtifactDraft, ArtifactError, ArtifactId, ArtifactKind};
use crate::verdict::GateResult;
use async_trait::async_trait;

/// Versioned artifact storage plus a per-artifact verdict ledger
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Latest version of an artifact, with its full verdict history
    async fn get(&self, id: &ArtifactId) -> Result<Artifact, StoreError>;

    /// A specific version, with the full verdict history of its id
    async fn get_version(&self, id: &ArtifactId, version: u64) -> Result<Artifact, StoreError>;

    /// Persist a new version; durable before returning
    async fn put(&self, draft: ArtifactDraft) -> Result<Artifact, StoreError>;

    /// Append a gate result judged against `observed_version`
    ///
    /// Durable before returning. Fails with [`StoreError::Conflict`] when
    /// the artifact's latest version is no longer `observed_version`.
    async fn append_verdict(
        &self,
        id: &ArtifactId,
        observed_version: u64,
        result: GateResult,
    ) -> Result<(), StoreError>;

    /// Ordered verdict ledger of an artifact id
    async fn verdicts(&self, id: &ArtifactId) -> Result<Vec<GateResult>, StoreError>;

    /// All stored versions of an artifact id, oldest first
    async fn versions(&self, id: &ArtifactId) -> Result<Vec<u64>, StoreError>;

    /// Most recently written artifact of `kind` within `pipeline`
    async fn latest_of_kind(
        &self,
        pipeline: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, StoreError>;
}

/// Store-level faults
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    NotFound(ArtifactId),

    #[error("artifact {id} version {version} not found")]
    VersionNotFound { id: ArtifactId, version: u64 },

    #[error("artifact {id} was revised to v{current} after v{observed} was read")]
    Conflict {
        id: ArtifactId,
        observed: u64,
        current: u64,
    },

    #[error("artifact {id} already exists as {existing}, cannot store it as {requested}")]
    KindChanged {
        id: ArtifactId,
        existing: ArtifactKind,
        requested: ArtifactKind,
    },

    #[error("gate result targets {result_id} v{result_version}, not {id} v{observed}")]
    MismatchedResult {
        id: ArtifactId,
        observed: u64,
        result_id: ArtifactId,
        result_version: u64,
    },

    #[error("invalid artifact: {0}")]
    InvalidArtifact(#[from] ArtifactError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Only optimistic-concurrency conflicts are worth retrying
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::VersionNotFound { .. })
    }
}

pub(crate) fn check_result_target(
    id: &ArtifactId,
    observed_version: u64,
    result: &GateResult,
) -> Result<(), StoreError> {
    if &result.artifact_id == id && result.artifact_version == observed_version {
        Ok(())
    } else {
        Err(StoreError::MismatchedResult {
            id: id.clone(),
            observed: observed_version,
            result_id: result.artifact_id.clone(),
            result_version: result.artifact_version,
        })
    }
}
