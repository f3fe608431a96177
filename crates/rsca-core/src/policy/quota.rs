//! Forced-distribution quota checks.
//!
//! The limits themselves come from a [`PolicyLimits`] supplier so callers can
//! plug in the official tables. [`ProportionalLimits`] covers the percentage
//! rules that apply to large groups.

use serde::{Deserialize, Serialize};

use crate::domain::MemberScore;

/// Paygrade bracket that selects which quota column applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeBand {
    /// Grades that may not receive either top recommendation.
    Restricted,
    /// No second-tier limit.
    Low,
    Mid,
    High,
    /// Senior grades with a tighter combined limit.
    Top,
}

impl GradeBand {
    /// Map a paygrade code such as `"E5"` or `"O4"` to its bracket.
    ///
    /// Returns `None` for codes the quota tables do not cover.
    pub fn from_paygrade(paygrade: &str, is_ldo: bool) -> Option<Self> {
        match paygrade.trim().to_ascii_uppercase().as_str() {
            "E1" | "E2" | "E3" | "E4" | "W1" | "W2" => Some(Self::Low),
            "O1" | "O2" if is_ldo => Some(Self::Low),
            "O1" | "O2" => Some(Self::Restricted),
            "E5" | "E6" | "O3" => Some(Self::Mid),
            "E7" | "E8" | "E9" | "O4" | "W3" | "W4" | "W5" => Some(Self::High),
            "O5" | "O6" => Some(Self::Top),
            _ => None,
        }
    }
}

/// Policy context a quota is evaluated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyContext {
    pub grade_band: GradeBand,
}

impl PolicyContext {
    pub fn new(grade_band: GradeBand) -> Self {
        Self { grade_band }
    }
}

/// Supplier of the maximum top-tier and combined top+second-tier counts.
pub trait PolicyLimits: Send + Sync {
    fn top_tier_limit(&self, group_size: usize, context: &PolicyContext) -> usize;
    fn combined_limit(&self, group_size: usize, context: &PolicyContext) -> usize;
}

/// Percentage-based limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProportionalLimits {
    pub top_tier_share: f64,
    pub combined_share: f64,
    pub senior_combined_share: f64,
}

impl Default for ProportionalLimits {
    fn default() -> Self {
        Self {
            top_tier_share: 0.20,
            combined_share: 0.60,
            senior_combined_share: 0.50,
        }
    }
}

fn ceil_share(group_size: usize, share: f64) -> usize {
    // Guard against products such as 0.6 * 10 landing a hair above the integer.
    (group_size as f64 * share - 1e-9).ceil().max(0.0) as usize
}

impl PolicyLimits for ProportionalLimits {
    fn top_tier_limit(&self, group_size: usize, context: &PolicyContext) -> usize {
        if group_size == 0 || context.grade_band == GradeBand::Restricted {
            return 0;
        }
        if group_size == 2 {
            return 1;
        }
        ceil_share(group_size, self.top_tier_share)
    }

    fn combined_limit(&self, group_size: usize, context: &PolicyContext) -> usize {
        if group_size == 0 {
            return 0;
        }
        match context.grade_band {
            GradeBand::Restricted => 0,
            GradeBand::Low => group_size,
            GradeBand::Top => ceil_share(group_size, self.senior_combined_share),
            GradeBand::Mid | GradeBand::High => ceil_share(group_size, self.combined_share),
        }
    }
}

/// Which limit a proposal broke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuotaViolation {
    TopTier { proposed: usize, limit: usize },
    Combined { proposed: usize, limit: usize },
}

impl QuotaViolation {
    pub fn excess(&self) -> usize {
        match self {
            Self::TopTier { proposed, limit } | Self::Combined { proposed, limit } => {
                proposed.saturating_sub(*limit)
            }
        }
    }
}

impl std::fmt::Display for QuotaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TopTier { proposed, limit } => write!(
                f,
                "top-tier count {} exceeds limit {} by {}",
                proposed,
                limit,
                self.excess()
            ),
            Self::Combined { proposed, limit } => write!(
                f,
                "combined top and second tier count {} exceeds limit {} by {}",
                proposed,
                limit,
                self.excess()
            ),
        }
    }
}

/// Advisory outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCheck {
    pub is_valid: bool,
    pub top_tier_limit: usize,
    pub combined_limit: usize,
    pub violations: Vec<QuotaViolation>,
    /// Human-readable summary, present only when a limit is exceeded.
    pub message: Option<String>,
}

/// Check proposed top-tier and second-tier counts against the supplied limits.
pub fn check_quota(
    limits: &dyn PolicyLimits,
    group_size: usize,
    proposed_top_tier: usize,
    proposed_second_tier: usize,
    context: &PolicyContext,
) -> QuotaCheck {
    let top_tier_limit = limits.top_tier_limit(group_size, context);
    let combined_limit = limits.combined_limit(group_size, context);

    let mut violations = Vec::new();
    if proposed_top_tier > top_tier_limit {
        violations.push(QuotaViolation::TopTier {
            proposed: proposed_top_tier,
            limit: top_tier_limit,
        });
    }
    let combined = proposed_top_tier + proposed_second_tier;
    if combined > combined_limit {
        violations.push(QuotaViolation::Combined {
            proposed: combined,
            limit: combined_limit,
        });
    }

    let message = if violations.is_empty() {
        None
    } else {
        Some(
            violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    };

    QuotaCheck {
        is_valid: violations.is_empty(),
        top_tier_limit,
        combined_limit,
        violations,
        message,
    }
}

/// Count observed group size and the top and second tier recommendations.
pub fn tier_counts(members: &[MemberScore]) -> (usize, usize, usize) {
    members
        .iter()
        .filter(|m| m.category.is_observed())
        .fold((0, 0, 0), |(size, top, second), m| {
            (
                size + 1,
                top + usize::from(m.category.is_top_tier()),
                second + usize::from(m.category.is_second_tier()),
            )
        })
}
