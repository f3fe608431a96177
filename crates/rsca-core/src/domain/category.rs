//! Recommendation categories and their score policy.
//!
//! [`RecommendationCategory::policy`] is the single table mapping each
//! category to its seed boost and score ceiling.

use serde::{Deserialize, Serialize};

/// Lowest score an observed member can be assigned.
pub const OBSERVED_FLOOR: f64 = 2.00;

/// Highest score the domain allows.
pub const SCORE_CEILING: f64 = 5.00;

/// Lowest score the domain recognises on a raw report.
pub const SCORE_MIN: f64 = 1.00;

/// Ceiling for the two lowest observed categories, independent of any group target.
pub const LOW_TIER_CEILING: f64 = 2.00;

/// Score value carried by members that were not observed.
pub const NOT_OBSERVED: f64 = 0.0;

/// Promotion recommendation attached to a member's score, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    /// Top tier, subject to the tightest quota.
    #[serde(alias = "EP")]
    EarlyPromote,
    /// Second tier.
    #[serde(alias = "MP")]
    MustPromote,
    #[serde(alias = "P")]
    Promotable,
    #[serde(alias = "Prog")]
    Progressing,
    #[serde(alias = "SP")]
    SignificantProblems,
    /// Carries no score and is excluded from every average.
    #[serde(alias = "NOB")]
    NotObserved,
}

/// Seed boost and score bounds for one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryPolicy {
    /// Added to the target when seeding an unlocked member.
    pub boost: f64,
    /// Lowest value the category may be assigned.
    pub floor: f64,
    /// Highest value the category may be assigned.
    pub ceiling: f64,
}

impl RecommendationCategory {
    pub const ALL: [RecommendationCategory; 6] = [
        Self::EarlyPromote,
        Self::MustPromote,
        Self::Promotable,
        Self::Progressing,
        Self::SignificantProblems,
        Self::NotObserved,
    ];

    /// Boost and bounds for this category.
    pub fn policy(self) -> CategoryPolicy {
        match self {
            Self::EarlyPromote => CategoryPolicy {
                boost: 0.40,
                floor: OBSERVED_FLOOR,
                ceiling: SCORE_CEILING,
            },
            Self::MustPromote => CategoryPolicy {
                boost: 0.10,
                floor: OBSERVED_FLOOR,
                ceiling: SCORE_CEILING,
            },
            Self::Promotable => CategoryPolicy {
                boost: 0.0,
                floor: OBSERVED_FLOOR,
                ceiling: SCORE_CEILING,
            },
            Self::Progressing | Self::SignificantProblems => CategoryPolicy {
                boost: 0.0,
                floor: OBSERVED_FLOOR,
                ceiling: LOW_TIER_CEILING,
            },
            Self::NotObserved => CategoryPolicy {
                boost: 0.0,
                floor: NOT_OBSERVED,
                ceiling: NOT_OBSERVED,
            },
        }
    }

    /// Whether members in this category contribute to averages.
    pub fn is_observed(self) -> bool {
        !matches!(self, Self::NotObserved)
    }

    /// Whether the category is capped below the nominal ceiling.
    pub fn is_low_tier(self) -> bool {
        matches!(self, Self::Progressing | Self::SignificantProblems)
    }

    pub fn is_top_tier(self) -> bool {
        matches!(self, Self::EarlyPromote)
    }

    pub fn is_second_tier(self) -> bool {
        matches!(self, Self::MustPromote)
    }

    /// Short report code.
    pub fn code(self) -> &'static str {
        match self {
            Self::EarlyPromote => "EP",
            Self::MustPromote => "MP",
            Self::Promotable => "P",
            Self::Progressing => "Prog",
            Self::SignificantProblems => "SP",
            Self::NotObserved => "NOB",
        }
    }
}

impl std::fmt::Display for RecommendationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}
