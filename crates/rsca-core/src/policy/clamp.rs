//! Per-category score ceilings and floors.

use crate::domain::{ensure_finite, RecommendationCategory, Result, NOT_OBSERVED};

/// Clamp a proposed score into the bounds its category allows.
///
/// The two lowest categories are held at or below
/// [`LOW_TIER_CEILING`](crate::domain::LOW_TIER_CEILING) whatever the group
/// target is. Not-observed members always map to the sentinel.
pub fn cap(raw: f64, category: RecommendationCategory) -> Result<f64> {
    let raw = ensure_finite("score", raw)?;
    if !category.is_observed() {
        return Ok(NOT_OBSERVED);
    }
    let policy = category.policy();
    Ok(raw.clamp(policy.floor, policy.ceiling))
}

/// Whether [`cap`] would move `raw`.
pub fn would_clamp(raw: f64, category: RecommendationCategory) -> bool {
    match cap(raw, category) {
        Ok(capped) => (capped - raw).abs() > 1e-9,
        Err(_) => false,
    }
}
