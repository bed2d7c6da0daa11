//! Tollgate Core
//!
//! Decides whether a stage artifact may pass to the next stage, and records
//! why.
//!
//! # Components
//!
//! - [`StageRegistry`]: ordered stage table, the only source of stage order
//! - [`CheckRegistry`]: named [`GateCheck`]s a stage may list
//! - [`GateEvaluator`]: runs one gate, aggregates, applies the
//!   enforcement [`Mode`](tollgate_artifact::Mode), appends the result
//! - [`Orchestrator`]: stateless, resumable walk over the stage table
//! - [`ApprovalSource`]: external sign-off before a stage advances
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tollgate_artifact::{MemoryStore, Mode};
//! use tollgate_core::{GateEvaluator, StageRegistry};
//!
//! let store = Arc::new(MemoryStore::new());
//! let evaluator = GateEvaluator::with_builtin_checks(store, Arc::new(StageRegistry::builtin()))?;
//! let result = evaluator.evaluate("decompose", &epic_id, Mode::Strict, None).await?;
//! println!("{}", tollgate_core::GateReport::new(&result));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod approval;
pub mod checks;
mod config;
mod error;
mod evaluator;
mod orchestrator;
mod policy;
mod registry;
mod report;

pub use approval::{ApprovalSource, FileApprovals, StaticApprovals};
pub use checks::{CheckContext, CheckRegistry, GateCheck};
pub use config::{EngineConfig, CONFIG_FILE, MODE_ENV, STORE_ENV};
pub use error::{ConfigError, GateError, RegistryError};
pub use evaluator::GateEvaluator;
pub use orchestrator::{
    Halt, Orchestrator, PipelineStatus, RunOutcome, RunReport, StageState, StageStatus,
};
pub use policy::{apply_mode, usable_rationale, PolicyOutcome};
pub use registry::{ForwardThreshold, MinimumCounts, StageDefinition, StageRegistry};
pub use report::{render_run, render_status, verdict_exit_code, GateReport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
