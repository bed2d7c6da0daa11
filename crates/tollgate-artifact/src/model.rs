//! Pipeline data model
//!
//! Artifacts are what stages produce. Requirements and work items are the
//! structured records an external extractor pulls out of an artifact's
//! content; the engine never looks inside the content blob itself.

use crate::hash::{ContentHash, HashError};
use crate::verdict::GateResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

const MAX_ID_LEN: usize = 128;

/// Stable artifact identifier
///
/// Restricted to `[A-Za-z0-9._-]` (not starting with `.`) because the file
/// store uses it as a path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Validate and wrap an identifier
    ///
    /// # Errors
    /// Returns [`ArtifactError::InvalidId`] for empty, overlong or
    /// path-unsafe identifiers
    pub fn new(id: impl Into<String>) -> Result<Self, ArtifactError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_ID_LEN
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(Self(id))
        } else {
            Err(ArtifactError::InvalidId(id))
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactId {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactId> for String {
    fn from(value: ArtifactId) -> Self {
        value.0
    }
}

/// Stage artifact kinds, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Requirements,
    Specification,
    Plan,
    Epic,
    Implementation,
    Verification,
    Release,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::Requirements,
        ArtifactKind::Specification,
        ArtifactKind::Plan,
        ArtifactKind::Epic,
        ArtifactKind::Implementation,
        ArtifactKind::Verification,
        ArtifactKind::Release,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Requirements => "requirements",
            ArtifactKind::Specification => "specification",
            ArtifactKind::Plan => "plan",
            ArtifactKind::Epic => "epic",
            ArtifactKind::Implementation => "implementation",
            ArtifactKind::Verification => "verification",
            ArtifactKind::Release => "release",
        }
    }

    /// Whether artifacts of this kind carry a work-item set
    #[inline]
    #[must_use]
    pub fn carries_work_items(&self) -> bool {
        matches!(self, ArtifactKind::Epic)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ArtifactError::UnknownKind(s.to_string()))
    }
}

/// Ordinal priority class; `P1` outranks `P2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PriorityClass(u8);

impl PriorityClass {
    pub const P1: PriorityClass = PriorityClass(1);
    pub const P2: PriorityClass = PriorityClass(2);
    pub const P3: PriorityClass = PriorityClass(3);

    #[inline]
    #[must_use]
    pub const fn new(rank: u8) -> Self {
        Self(rank)
    }

    #[inline]
    #[must_use]
    pub const fn rank(&self) -> u8 {
        self.0
    }

    /// True when `self` is the same class as `other` or more urgent
    #[inline]
    #[must_use]
    pub fn at_least(&self, other: PriorityClass) -> bool {
        self.0 <= other.0
    }
}

impl Default for PriorityClass {
    fn default() -> Self {
        Self::P2
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for PriorityClass {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(['P', 'p'])
            .and_then(|n| n.parse::<u8>().ok())
            .map(PriorityClass)
            .ok_or_else(|| ArtifactError::InvalidPriority(s.to_string()))
    }
}

impl TryFrom<String> for PriorityClass {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PriorityClass> for String {
    fn from(value: PriorityClass) -> Self {
        value.to_string()
    }
}

/// A unit of intent extracted from an artifact
///
/// `traces_to` holds the ids of higher-stage requirements this one refines;
/// it is empty for items of the first stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub source_artifact_id: ArtifactId,
    #[serde(default)]
    pub priority: PriorityClass,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub traces_to: BTreeSet<String>,
}

impl Requirement {
    #[must_use]
    pub fn new(id: impl Into<String>, source: ArtifactId, priority: PriorityClass) -> Self {
        Self {
            id: id.into(),
            source_artifact_id: source,
            priority,
            traces_to: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn tracing_to<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.traces_to.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// A task inside a decomposed-epic artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(default)]
    pub traces_to: BTreeSet<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub files_affected: BTreeSet<String>,
    #[serde(default)]
    pub phase: u32,
}

impl WorkItem {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            traces_to: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            files_affected: BTreeSet::new(),
            phase: 0,
        }
    }

    #[must_use]
    pub fn traces<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.traces_to.extend(ids.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn depends<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn touches<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_affected.extend(paths.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn in_phase(mut self, phase: u32) -> Self {
        self.phase = phase;
        self
    }
}

/// Opaque artifact body plus its structured metadata record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactContent {
    #[serde(default)]
    pub blob: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ArtifactContent {
    #[must_use]
    pub fn text(blob: impl Into<String>) -> Self {
        Self {
            blob: blob.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blob.trim().is_empty() && self.metadata.is_empty()
    }
}

/// Stage output handed to [`crate::ArtifactStore::put`]
///
/// The store assigns the version, hash and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDraft {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub pipeline: String,
    #[serde(default)]
    pub content: ArtifactContent,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub work_items: Vec<WorkItem>,
    #[serde(default)]
    pub upstream_refs: BTreeSet<ArtifactId>,
}

impl ArtifactDraft {
    #[must_use]
    pub fn new(id: ArtifactId, kind: ArtifactKind, pipeline: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            pipeline: pipeline.into(),
            content: ArtifactContent::default(),
            requirements: Vec::new(),
            work_items: Vec::new(),
            upstream_refs: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: ArtifactContent) -> Self {
        self.content = content;
        self
    }

    #[must_use]
    pub fn with_requirements(mut self, requirements: Vec<Requirement>) -> Self {
        self.requirements = requirements;
        self
    }

    #[must_use]
    pub fn with_work_items(mut self, items: Vec<WorkItem>) -> Self {
        self.work_items = items;
        self
    }

    #[must_use]
    pub fn derived_from(mut self, upstream: ArtifactId) -> Self {
        self.upstream_refs.insert(upstream);
        self
    }

    /// Finalize into an immutable version
    ///
    /// # Errors
    /// Returns error if the pipeline name is blank or hashing fails
    pub fn finalize(
        self,
        version: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Artifact, ArtifactError> {
        if self.pipeline.trim().is_empty() {
            return Err(ArtifactError::InvalidPipeline(self.pipeline));
        }
        let content_hash = hash_fields(&self)?;
        Ok(Artifact {
            id: self.id,
            kind: self.kind,
            version,
            pipeline: self.pipeline,
            content: self.content,
            requirements: self.requirements,
            work_items: self.work_items,
            upstream_refs: self.upstream_refs,
            content_hash,
            created_at,
            verdict_history: Vec::new(),
        })
    }
}

/// An immutable, finalized artifact version
///
/// `verdict_history` is filled in by the store on read; it is never part of
/// the persisted version record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub version: u64,
    pub pipeline: String,
    pub content: ArtifactContent,
    pub requirements: Vec<Requirement>,
    pub work_items: Vec<WorkItem>,
    pub upstream_refs: BTreeSet<ArtifactId>,
    pub content_hash: ContentHash,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verdict_history: Vec<GateResult>,
}

impl Artifact {
    /// Ids of every requirement this artifact declares
    pub fn requirement_ids(&self) -> impl Iterator<Item = &str> {
        self.requirements.iter().map(|r| r.id.as_str())
    }

    /// Latest verdict recorded against this exact version, if any
    #[must_use]
    pub fn latest_verdict_for_version(&self) -> Option<&GateResult> {
        self.verdict_history
            .iter()
            .rev()
            .find(|r| r.artifact_version == self.version)
    }

    /// Recompute the content hash and compare with the stored one
    ///
    /// # Errors
    /// Returns [`ArtifactError::HashMismatch`] if the record was altered
    pub fn verify(&self) -> Result<(), ArtifactError> {
        let draft = ArtifactDraft {
            id: self.id.clone(),
            kind: self.kind,
            pipeline: self.pipeline.clone(),
            content: self.content.clone(),
            requirements: self.requirements.clone(),
            work_items: self.work_items.clone(),
            upstream_refs: self.upstream_refs.clone(),
        };
        let actual = hash_fields(&draft)?;
        if actual == self.content_hash {
            Ok(())
        } else {
            Err(ArtifactError::HashMismatch {
                id: self.id.clone(),
                version: self.version,
                expected: self.content_hash,
                actual,
            })
        }
    }
}

fn hash_fields(draft: &ArtifactDraft) -> Result<ContentHash, ArtifactError> {
    Ok(ContentHash::of_json(draft)?)
}

/// Errors constructing or verifying artifacts
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("invalid artifact id: {0:?}")]
    InvalidId(String),

    #[error("unknown artifact kind: {0}")]
    UnknownKind(String),

    #[error("invalid priority class: {0}")]
    InvalidPriority(String),

    #[error("invalid pipeline name: {0:?}")]
    InvalidPipeline(String),

    #[error("content hash mismatch for {id} v{version}: expected {expected}, got {actual}")]
    HashMismatch {
        id: ArtifactId,
        version: u64,
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error(transparent)]
    Hash(#[from] HashError),
}
