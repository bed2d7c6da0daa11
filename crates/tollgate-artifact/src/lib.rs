//! Tollgate Artifact Layer
//!
//! Versioned stage artifacts and the append-only ledger of gate verdicts.
//!
//! # Core Concepts
//!
//! - [`Artifact`]: immutable, content-hashed output of one pipeline stage
//! - [`Requirement`] / [`WorkItem`]: structured records extracted from an
//!   artifact by an external collaborator
//! - [`GateResult`]: the only entity the engine itself creates; appended,
//!   never edited
//! - [`ArtifactStore`]: versioned reads/writes with optimistic concurrency
//!   on verdict appends
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate_artifact::{ArtifactDraft, ArtifactId, ArtifactKind, ArtifactStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let id = ArtifactId::new("plan-1")?;
//! let plan = store.put(ArtifactDraft::new(id, ArtifactKind::Plan, "checkout")).await?;
//! assert_eq!(plan.version, 1);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod hash;
mod model;
mod store;
mod verdict;

pub use hash::{ContentHash, HashError};
pub use model::{
    Artifact, ArtifactContent, ArtifactDraft, ArtifactError, ArtifactId, ArtifactKind,
    PriorityClass, Requirement, WorkItem,
};
pub use store::{ArtifactStore, FileStore, MemoryStore, StoreError};
pub use verdict::{
    CheckRecord, Finding, GateResult, GateResultId, Mode, UnknownMode, Verdict,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
