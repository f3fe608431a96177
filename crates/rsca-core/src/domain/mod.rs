//! Domain model for the trajectory engine.
//!
//! - `RecommendationCategory`: closed set of recommendation tiers and their score policy
//! - `Cycle` / `MemberScore`: evaluation periods and the scores inside them
//! - `TargetConfig`: the band a cumulative average is steered into
//! - `EngineError`: input-validity and precondition failures

pub mod category;
pub mod cycle;
pub mod error;

pub use category::{
    CategoryPolicy, RecommendationCategory, LOW_TIER_CEILING, NOT_OBSERVED, OBSERVED_FLOOR,
    SCORE_CEILING, SCORE_MIN,
};
pub use cycle::{validate_ranks, Cycle, CycleStatus, MemberScore, TargetConfig};
pub use error::{ensure_finite, ensure_in_range, EngineError, Result};

/// Round to two decimal places, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
