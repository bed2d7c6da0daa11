//! Tollgate Traceability
//!
//! Forward and backward coverage between upstream requirement ids and the
//! links a downstream artifact declares toward them.
//!
//! - A **forward orphan** is an upstream id nothing downstream references.
//! - A **backward orphan** is a downstream item that references nothing,
//!   or only ids the upstream set does not declare.
//!
//! The checker only measures. Turning a percentage into a verdict is the
//! stage definition's job, so no threshold lives here.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod coverage;
mod requirements;

pub use coverage::{check_coverage, CoverageReport, UnknownReference};
pub use requirements::{
    check_requirements, requirement_links, work_item_links, PriorityCoverage, RequirementCoverage,
};
