//! Error types for the gate engine
//!
//! A failing check is never an error: it is data inside a
//! [`GateResult`](tollgate_artifact::GateResult). Only store, registry and
//! configuration faults surface here.

use std::path::PathBuf;
use tollgate_artifact::{ArtifactKind, StoreError};

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Store-level fault, including a missing subject artifact
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Stage table lookup or validation failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A declared upstream stage has produced nothing in this pipeline
    #[error("gate {gate}: upstream stage {stage} has no {kind} artifact in pipeline {pipeline}")]
    MissingUpstream {
        gate: String,
        stage: String,
        kind: ArtifactKind,
        pipeline: String,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl GateError {
    /// Only optimistic-concurrency conflicts are retryable, after a re-fetch
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    /// A missing subject or upstream artifact, which the caller should
    /// surface as a forward orphan at the pipeline level
    #[inline]
    #[must_use]
    pub fn is_forward_orphan(&self) -> bool {
        match self {
            Self::MissingUpstream { .. } => true,
            Self::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Stage table errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("invalid stage definition {stage}: {reason}")]
    InvalidDefinition { stage: String, reason: String },
}

impl RegistryError {
    pub(crate) fn invalid(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration and stage-table loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_artifact::ArtifactId;

    #[test]
    fn only_conflicts_are_retryable() {
        let id = ArtifactId::new("epic-1").unwrap();
        let conflict = GateError::Store(StoreError::Conflict {
            id: id.clone(),
            observed: 1,
            current: 2,
        });
        assert!(conflict.is_retryable());
        assert!(!conflict.is_forward_orphan());

        let missing = GateError::Store(StoreError::NotFound(id));
        assert!(!missing.is_retryable());
        assert!(missing.is_forward_orphan());

        let unknown = GateError::Registry(RegistryError::UnknownStage("ship".into()));
        assert!(!unknown.is_retryable());
        assert!(!unknown.is_forward_orphan());
    }

    #[test]
    fn missing_upstream_is_forward_orphan() {
        let err = GateError::MissingUpstream {
            gate: "plan".into(),
            stage: "specify".into(),
            kind: ArtifactKind::Specification,
            pipeline: "checkout".into(),
        };
        assert!(err.is_forward_orphan());
        assert!(err.to_string().contains("specify"));
    }
}
