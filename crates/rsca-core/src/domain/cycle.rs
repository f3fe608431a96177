//! Evaluation cycles, member scores and target configuration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::category::{RecommendationCategory, OBSERVED_FLOOR, SCORE_CEILING};
use super::error::{ensure_finite, EngineError, Result};

/// Lifecycle of a cycle as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Scores are authoritative history and never modified.
    #[serde(alias = "submitted")]
    Final,
    /// Scores are proposals the engine may rewrite.
    #[serde(alias = "draft", alias = "planned", alias = "review")]
    Pending,
}

impl CycleStatus {
    pub fn is_final(self) -> bool {
        matches!(self, Self::Final)
    }
}

/// One member's evaluation within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberScore {
    pub member_id: String,
    /// Trait average, or [`NOT_OBSERVED`](super::category::NOT_OBSERVED).
    pub score: f64,
    pub category: RecommendationCategory,
    /// Locked scores are never altered by the engine.
    #[serde(default)]
    pub locked: bool,
    /// 1 is the best rank in the cycle.
    pub rank: u32,
}

impl MemberScore {
    pub fn new(
        member_id: impl Into<String>,
        rank: u32,
        category: RecommendationCategory,
        score: f64,
    ) -> Self {
        Self {
            member_id: member_id.into(),
            score,
            category,
            locked: false,
            rank,
        }
    }

    /// Builder-style lock.
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    /// Whether this score counts toward averages.
    pub fn is_observed(&self) -> bool {
        self.category.is_observed() && self.score > 0.0
    }
}

/// One evaluation period for one competitive group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: String,
    /// Chronological ordering key.
    pub end_date: NaiveDate,
    pub status: CycleStatus,
    pub group_key: String,
    pub members: Vec<MemberScore>,
    #[serde(default)]
    pub target: Option<TargetConfig>,
}

impl Cycle {
    pub fn new(
        id: impl Into<String>,
        group_key: impl Into<String>,
        end_date: NaiveDate,
        status: CycleStatus,
        members: Vec<MemberScore>,
    ) -> Self {
        Self {
            id: id.into(),
            end_date,
            status,
            group_key: group_key.into(),
            members,
            target: None,
        }
    }

    /// Sum and count of observed scores.
    pub fn observed_totals(&self) -> (f64, usize) {
        self.members
            .iter()
            .filter(|m| m.is_observed())
            .fold((0.0, 0), |(sum, n), m| (sum + m.score, n + 1))
    }

    /// Members that will carry a score once the cycle is realized.
    pub fn scorable_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.category.is_observed())
            .count()
    }
}

/// Target band for a group's cumulative average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// The aggregate the plan steers toward.
    pub ideal: f64,
    pub safe_min: f64,
    pub safe_max: f64,
    /// Critical floor.
    pub min_limit: f64,
    /// Hard ceiling.
    pub max_limit: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            ideal: 4.0,
            safe_min: 3.8,
            safe_max: 4.2,
            min_limit: 3.6,
            max_limit: 4.4,
        }
    }
}

impl TargetConfig {
    /// Derive a band from a single target value.
    pub fn around(target: f64) -> Self {
        Self {
            ideal: target,
            safe_min: (target - 0.2).max(OBSERVED_FLOOR),
            safe_max: (target + 0.2).min(SCORE_CEILING),
            min_limit: (target - 0.4).max(OBSERVED_FLOOR),
            max_limit: (target + 0.4).min(SCORE_CEILING),
        }
    }

    pub fn in_safe_band(&self, aggregate: f64) -> bool {
        aggregate >= self.safe_min && aggregate <= self.safe_max
    }

    pub fn within_limits(&self, aggregate: f64) -> bool {
        aggregate >= self.min_limit && aggregate <= self.max_limit
    }

    /// Check values are finite and nested `min_limit <= safe_min <= ideal <= safe_max <= max_limit`.
    pub fn validate(&self) -> Result<()> {
        ensure_finite("target.ideal", self.ideal)?;
        ensure_finite("target.safe_min", self.safe_min)?;
        ensure_finite("target.safe_max", self.safe_max)?;
        ensure_finite("target.min_limit", self.min_limit)?;
        ensure_finite("target.max_limit", self.max_limit)?;
        let ordered = self.min_limit <= self.safe_min
            && self.safe_min <= self.ideal
            && self.ideal <= self.safe_max
            && self.safe_max <= self.max_limit;
        if !ordered {
            return Err(EngineError::InvalidConfig(format!(
                "target band must satisfy min_limit <= safe_min <= ideal <= safe_max <= max_limit, got {:.2} / {:.2} / {:.2} / {:.2} / {:.2}",
                self.min_limit, self.safe_min, self.ideal, self.safe_max, self.max_limit
            )));
        }
        Ok(())
    }
}

/// Verify rank positions form the permutation `1..=N`.
pub fn validate_ranks(members: &[MemberScore]) -> Result<()> {
    let n = members.len();
    let mut seen = vec![false; n];
    for m in members {
        let rank = m.rank as usize;
        if rank == 0 || rank > n {
            return Err(EngineError::InvalidRanks(format!(
                "member {} has rank {} outside 1..={}",
                m.member_id, m.rank, n
            )));
        }
        if seen[rank - 1] {
            return Err(EngineError::InvalidRanks(format!(
                "rank {} assigned more than once",
                m.rank
            )));
        }
        seen[rank - 1] = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::category::RecommendationCategory as Rec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn test_observed_totals_skip_not_observed() {
        let cycle = Cycle::new(
            "c1",
            "O3",
            date(1),
            CycleStatus::Final,
            vec![
                MemberScore::new("a", 1, Rec::EarlyPromote, 4.5),
                MemberScore::new("b", 2, Rec::NotObserved, 0.0),
                MemberScore::new("c", 3, Rec::Promotable, 3.5),
            ],
        );
        let (sum, n) = cycle.observed_totals();
        assert_eq!(n, 2);
        assert!((sum - 8.0).abs() < 1e-9);
        assert_eq!(cycle.scorable_count(), 2);
    }

    #[test]
    fn test_status_aliases() {
        let s: CycleStatus = serde_json::from_str("\"draft\"").unwrap();
        assert_eq!(s, CycleStatus::Pending);
        let s: CycleStatus = serde_json::from_str("\"submitted\"").unwrap();
        assert_eq!(s, CycleStatus::Final);
    }

    #[test]
    fn test_target_around_clamps_to_domain() {
        let t = TargetConfig::around(4.9);
        assert_eq!(t.safe_max, 5.0);
        assert_eq!(t.max_limit, 5.0);
        assert!((t.safe_min - 4.7).abs() < 1e-9);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_target_validate_rejects_inverted_band() {
        let t = TargetConfig {
            safe_min: 4.3,
            ..TargetConfig::default()
        };
        assert!(matches!(t.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_ranks() {
        let ok = vec![
            MemberScore::new("a", 2, Rec::Promotable, 3.0),
            MemberScore::new("b", 1, Rec::Promotable, 3.0),
        ];
        assert!(validate_ranks(&ok).is_ok());

        let dup = vec![
            MemberScore::new("a", 1, Rec::Promotable, 3.0),
            MemberScore::new("b", 1, Rec::Promotable, 3.0),
        ];
        assert!(matches!(validate_ranks(&dup), Err(EngineError::InvalidRanks(_))));

        let gap = vec![
            MemberScore::new("a", 1, Rec::Promotable, 3.0),
            MemberScore::new("b", 3, Rec::Promotable, 3.0),
        ];
        assert!(validate_ranks(&gap).is_err());
    }
}
