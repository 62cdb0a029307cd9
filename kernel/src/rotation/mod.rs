// Rotation
//
// Decides which entries survive an append. Pure and deterministic:
// the caller supplies the current names and the candidate, and gets
// back the full kept/evicted split before anything touches disk.

use std::collections::BTreeSet;

/// Outcome of merging a candidate into an existing entry set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPlan {
    /// Surviving names, sorted ascending (oldest first).
    pub kept: Vec<String>,

    /// Dropped names, sorted ascending.
    pub evicted: Vec<String>,
}

impl RotationPlan {
    pub fn is_evicting(&self) -> bool {
        !self.evicted.is_empty()
    }
}

/// Merge `candidate` into `existing` and keep the newest `max_entries`.
///
/// Names order chronologically, so the lexicographically smallest names
/// are the ones evicted. A `max_entries` of zero is treated as one: the
/// candidate always survives.
pub fn plan_rotation<'a, I>(existing: I, candidate: &str, max_entries: usize) -> RotationPlan
where
    I: IntoIterator<Item = &'a str>,
{
    let mut names: BTreeSet<&str> = existing.into_iter().collect();
    names.insert(candidate);

    let cap = max_entries.max(1);
    let overflow = names.len().saturating_sub(cap);

    let mut sorted = names.into_iter().map(str::to_string);
    let evicted: Vec<String> = sorted.by_ref().take(overflow).collect();
    let kept: Vec<String> = sorted.collect();

    RotationPlan { kept, evicted }
}
