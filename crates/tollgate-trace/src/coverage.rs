//! Forward and backward coverage between two identifier sets

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

/// A downstream item pointing at an id the upstream set does not declare
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnknownReference {
    pub item: String,
    pub reference: String,
}

/// Result of one coverage computation
///
/// Orphan lists keep the order in which ids were first seen, so evidence
/// reads in the same order as the artifact that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    /// Covered upstream ids over total upstream ids, in `[0, 1]`
    pub forward_pct: f64,
    /// Downstream items with a valid reference over total downstream items
    pub backward_pct: f64,
    pub forward_orphans: Vec<String>,
    pub backward_orphans: Vec<String>,
    /// Every reference to an id outside the upstream set
    pub unknown_refs: Vec<UnknownReference>,
    pub upstream_total: usize,
    pub downstream_total: usize,
}

impl CoverageReport {
    #[inline]
    #[must_use]
    pub fn fully_forward(&self) -> bool {
        self.forward_orphans.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn fully_backward(&self) -> bool {
        self.backward_orphans.is_empty()
    }

    /// Number of upstream ids with at least one downstream reference
    #[must_use]
    pub fn covered(&self) -> usize {
        self.upstream_total - self.forward_orphans.len()
    }
}

/// Ratio of two counts; an empty denominator counts as full coverage
#[allow(clippy::cast_precision_loss)]
pub(crate) fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Compute coverage between upstream ids and downstream links
///
/// `downstream` maps each downstream item id to the upstream ids it
/// references. Repeated upstream ids count once; repeated downstream ids
/// merge their links.
///
/// A downstream item is a backward orphan when it references nothing, or
/// when none of its references name a known upstream id. An item with at
/// least one valid reference is covered, but its unknown references are
/// still listed in [`CoverageReport::unknown_refs`].
pub fn check_coverage<'a, U, D, L>(upstream: U, downstream: D) -> CoverageReport
where
    U: IntoIterator<Item = &'a str>,
    D: IntoIterator<Item = (&'a str, L)>,
    L: IntoIterator<Item = &'a str>,
{
    let upstream: IndexSet<&str> = upstream.into_iter().collect();

    let mut links: IndexMap<&str, IndexSet<&str>> = IndexMap::new();
    for (item, refs) in downstream {
        links.entry(item).or_default().extend(refs);
    }

    let mut referenced: IndexSet<&str> = IndexSet::new();
    let mut backward_orphans = Vec::new();
    let mut unknown_refs = Vec::new();
    let mut valid_items = 0usize;

    for (&item, refs) in &links {
        let mut valid = false;
        for &reference in refs {
            if upstream.contains(reference) {
                referenced.insert(reference);
                valid = true;
            } else {
                unknown_refs.push(UnknownReference {
                    item: item.to_string(),
                    reference: reference.to_string(),
                });
            }
        }
        if valid {
            valid_items += 1;
        } else {
            backward_orphans.push(item.to_string());
        }
    }

    let forward_orphans: Vec<String> = upstream
        .iter()
        .filter(|id| !referenced.contains(*id))
        .map(|id| (*id).to_string())
        .collect();

    let report = CoverageReport {
        forward_pct: ratio(upstream.len() - forward_orphans.len(), upstream.len()),
        backward_pct: ratio(valid_items, links.len()),
        forward_orphans,
        backward_orphans,
        unknown_refs,
        upstream_total: upstream.len(),
        downstream_total: links.len(),
    };
    tracing::debug!(
        forward = report.forward_pct,
        backward = report.backward_pct,
        forward_orphans = report.forward_orphans.len(),
        backward_orphans = report.backward_orphans.len(),
        "coverage computed"
    );
    report
}
