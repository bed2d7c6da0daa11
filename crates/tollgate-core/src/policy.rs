//! Enforcement-mode policy
//!
//! | mode       | aggregate BLOCK                     | rationale          |
//! |------------|-------------------------------------|--------------------|
//! | strict     | stays BLOCK                         | ignored            |
//! | standard   | CONCERN if a rationale is supplied  | stored verbatim    |
//! | permissive | always CONCERN                      | ignored            |
//!
//! PASS and CONCERN aggregates are never changed.

use tollgate_artifact::{Mode, Verdict};

/// What the enforcement mode made of an aggregate verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub verdict: Verdict,
    /// Set only when a BLOCK was downgraded by rationale under standard mode
    pub override_rationale: Option<String>,
}

/// A rationale that is empty or whitespace-only counts as absent
#[must_use]
pub fn usable_rationale(rationale: Option<&str>) -> Option<&str> {
    rationale.filter(|r| !r.trim().is_empty())
}

/// Apply `mode` to the aggregate verdict of a gate's checks
#[must_use]
pub fn apply_mode(aggregate: Verdict, mode: Mode, rationale: Option<&str>) -> PolicyOutcome {
    let rationale = usable_rationale(rationale);
    let unchanged = PolicyOutcome {
        verdict: aggregate,
        override_rationale: None,
    };

    if aggregate != Verdict::Block {
        if rationale.is_some() {
            tracing::debug!(%aggregate, "no BLOCK to override, rationale not recorded");
        }
        return unchanged;
    }

    match (mode, rationale) {
        (Mode::Strict, Some(_)) => {
            tracing::warn!("strict mode: override rationale ignored, BLOCK stands");
            unchanged
        }
        (Mode::Strict | Mode::Standard, None) => unchanged,
        (Mode::Standard, Some(rationale)) => {
            tracing::warn!(rationale, "BLOCK overridden under standard mode");
            PolicyOutcome {
                verdict: Verdict::Concern,
                override_rationale: Some(rationale.to_string()),
            }
        }
        (Mode::Permissive, _) => {
            tracing::warn!("permissive mode: BLOCK muted to CONCERN");
            PolicyOutcome {
                verdict: Verdict::Concern,
                override_rationale: None,
            }
        }
    }
}
