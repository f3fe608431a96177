//! Score policy: per-category caps and recommendation quotas.

pub mod clamp;
pub mod quota;

pub use clamp::{cap, would_clamp};
pub use quota::{
    check_quota, tier_counts, GradeBand, PolicyContext, PolicyLimits, ProportionalLimits,
    QuotaCheck, QuotaViolation,
};
