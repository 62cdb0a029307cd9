// Rotation Invariants
//
// Checks run against a rotation plan after it is computed and before
// the container is rewritten. A failing check aborts the append with
// the container untouched.

use std::collections::BTreeSet;

use crate::rotation::RotationPlan;

/// Everything a check may inspect about one append.
#[derive(Debug, Clone, Copy)]
pub struct RotationContext<'a> {
    pub existing: &'a BTreeSet<String>,
    pub candidate: &'a str,
    pub plan: &'a RotationPlan,
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// A named, side-effect free check over a rotation plan.
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, ctx: &RotationContext<'_>) -> InvariantResult;
}

/// Ordered list of checks; the first failure wins.
#[derive(Default)]
pub struct InvariantEngine {
    checks: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The checks every archive runs unless told otherwise.
    pub fn standard() -> Self {
        let mut engine = Self::new();
        engine.register(LatestRetained);
        engine
    }

    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.checks.push(Box::new(invariant));
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn evaluate(&self, ctx: &RotationContext<'_>) -> Result<(), InvariantViolation> {
        self.checks
            .iter()
            .find_map(|check| match check.validate(ctx) {
                InvariantResult::Pass => None,
                InvariantResult::Fail(reason) => Some(InvariantViolation {
                    invariant: check.name(),
                    reason,
                }),
            })
            .map_or(Ok(()), Err)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invariant `{invariant}` violated: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub reason: String,
}

/// The snapshot being appended survives its own rotation.
///
/// Naming always places the candidate after this document's newest
/// entry, so this only trips when the container holds names from
/// elsewhere that sort after it and fill the capacity.
pub struct LatestRetained;

impl Invariant for LatestRetained {
    fn name(&self) -> &'static str {
        "latest-retained"
    }

    fn validate(&self, ctx: &RotationContext<'_>) -> InvariantResult {
        if ctx.plan.kept.iter().any(|n| n == ctx.candidate) {
            InvariantResult::Pass
        } else {
            InvariantResult::Fail(format!("candidate `{}` would be evicted", ctx.candidate))
        }
    }
}
