//! Rank-ordered score distribution.
//!
//! [`distribute`] implements the stepped slope: unlocked members are seeded
//! from the target plus a category boost minus a per-position decay, the
//! seeds are shifted so their mean absorbs whatever budget the locked members
//! left, then each value is capped by category and rounded.
//!
//! [`redistribute`] wraps it for the request boundary: anchors are merged
//! into the roster first, and the result reports what moved and whether the
//! requested average was actually reached.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{
    ensure_finite, ensure_in_range, round2, validate_ranks, MemberScore, Result, NOT_OBSERVED,
    SCORE_CEILING, SCORE_MIN,
};
use crate::policy::{cap, check_quota, tier_counts, PolicyContext, PolicyLimits, QuotaCheck};

/// Score drop applied per rank position.
pub const RANK_DECAY: f64 = 0.02;

/// Default allowed gap between requested and achieved average.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Output of [`distribute`], parallel to the input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub scores: Vec<f64>,
    /// Whether the category cap moved the value at each position.
    pub clamped: Vec<bool>,
    pub locked_count: usize,
    pub unlocked_count: usize,
    /// Mean of observed output scores, unrounded.
    pub achieved_average: f64,
}

impl Distribution {
    pub fn all_locked(&self) -> bool {
        self.unlocked_count == 0
    }
}

/// Compute a score for every member so the group mean tracks `target_average`.
///
/// Members must already be in rank order. Locked members are returned
/// unchanged and their mass is removed from the budget before the unlocked
/// members are placed. Clamping can leave the achieved average short of the
/// request; callers compare [`Distribution::achieved_average`] themselves.
pub fn distribute(members: &[MemberScore], target_average: f64) -> Result<Distribution> {
    let target_average = ensure_finite("target_average", target_average)?;

    let mut locked_sum = 0.0;
    let mut locked_count = 0usize;
    let mut unlocked = Vec::new();
    for (i, m) in members.iter().enumerate() {
        if !m.category.is_observed() {
            continue;
        }
        if m.locked {
            locked_sum += ensure_finite("locked score", m.score)?;
            locked_count += 1;
        } else {
            unlocked.push(i);
        }
    }

    let mut scores: Vec<f64> = members
        .iter()
        .map(|m| {
            if !m.category.is_observed() {
                NOT_OBSERVED
            } else {
                m.score
            }
        })
        .collect();
    let mut clamped = vec![false; members.len()];

    if !unlocked.is_empty() {
        let total = (locked_count + unlocked.len()) as f64;
        let target_for_unlocked = (target_average * total - locked_sum) / unlocked.len() as f64;

        let seeds: Vec<f64> = unlocked
            .iter()
            .map(|&i| target_average + members[i].category.policy().boost - RANK_DECAY * i as f64)
            .collect();
        let seeded_mean = seeds.iter().sum::<f64>() / seeds.len() as f64;
        let shift = target_for_unlocked - seeded_mean;

        for (&i, seed) in unlocked.iter().zip(seeds) {
            let raw = seed + shift;
            let capped = cap(raw, members[i].category)?;
            clamped[i] = (capped - raw).abs() > 1e-9;
            scores[i] = round2(capped);
        }
    }

    let (sum, n) = members
        .iter()
        .zip(&scores)
        .filter(|(m, s)| m.category.is_observed() && **s > 0.0)
        .fold((0.0, 0usize), |(sum, n), (_, s)| (sum + s, n + 1));
    let achieved_average = if n > 0 { sum / n as f64 } else { 0.0 };

    debug!(
        members = members.len(),
        locked = locked_count,
        unlocked = unlocked.len(),
        target = target_average,
        achieved = achieved_average,
        "distributed scores by rank"
    );

    Ok(Distribution {
        scores,
        clamped,
        locked_count,
        unlocked_count: unlocked.len(),
        achieved_average,
    })
}

// ---------------------------------------------------------------------------
// Redistribution request/result
// ---------------------------------------------------------------------------

/// Member id to forced score.
pub type AnchorMap = BTreeMap<String, f64>;

/// Parameters for one redistribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedistributionParams {
    pub target_average: f64,
    /// Falls back to the dispatcher default, then [`DEFAULT_TOLERANCE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    /// When present, the result carries a quota check for the roster.
    #[serde(default)]
    pub policy: Option<PolicyContext>,
}

impl RedistributionParams {
    pub fn new(target_average: f64) -> Self {
        Self {
            target_average,
            tolerance: None,
            policy: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_policy(mut self, policy: PolicyContext) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Why a member's score differs from its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Forced by the anchor map.
    AnchorApplied,
    /// Placed by the stepped slope.
    Redistributed,
    /// Held down or up by the category bounds.
    CapApplied,
    /// The requested average was not reached within tolerance.
    TargetUnreachable,
    /// Recommendation counts exceed the quota.
    QuotaExceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedMember {
    pub member_id: String,
    pub old_score: f64,
    pub new_score: f64,
    pub delta: f64,
    pub reasons: Vec<ReasonCode>,
}

/// Lowest and highest group average reachable given locks and category bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeasibleRange {
    pub min: f64,
    pub max: f64,
}

impl FeasibleRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min - 1e-9 && value <= self.max + 1e-9
    }
}

/// Nudge to one anchor that widens the reachable range toward the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAnchorEdit {
    pub member_id: String,
    pub current_score: f64,
    pub suggested_score: f64,
    pub note: String,
}

/// Step applied to an anchor by [`suggest_anchor_edits`].
pub const ANCHOR_NUDGE: f64 = 0.05;

/// Most edits [`suggest_anchor_edits`] returns.
pub const MAX_ANCHOR_SUGGESTIONS: usize = 5;

/// Outcome of [`redistribute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedistributionResult {
    /// Roster in rank order with anchors merged and new scores applied.
    pub members: Vec<MemberScore>,
    /// Scores parallel to `members`.
    pub scores: Vec<f64>,
    pub target_average: f64,
    pub final_average: f64,
    /// `final_average - target_average`.
    pub delta: f64,
    pub is_feasible: bool,
    pub all_locked: bool,
    pub feasible_range: FeasibleRange,
    pub changed: Vec<ChangedMember>,
    pub reason_codes: Vec<ReasonCode>,
    pub quota: Option<QuotaCheck>,
    /// Empty unless the target is unreachable and anchors are in play.
    #[serde(default)]
    pub suggested_anchor_edits: Vec<SuggestedAnchorEdit>,
    pub explanation: String,
}

/// Force every anchored member's score and lock flag.
pub fn apply_anchors(members: &[MemberScore], anchors: &AnchorMap) -> Vec<MemberScore> {
    for id in anchors.keys() {
        if !members.iter().any(|m| &m.member_id == id) {
            warn!(member_id = %id, "anchor references unknown member; ignored");
        }
    }
    members
        .iter()
        .map(|m| match anchors.get(&m.member_id) {
            Some(&value) => MemberScore {
                score: value,
                locked: true,
                ..m.clone()
            },
            None => m.clone(),
        })
        .collect()
}

/// Reject observed locked scores outside the score domain.
///
/// Locked values bypass clamping, so an out-of-domain value would flow
/// straight into the locked mass.
pub fn validate_locked(members: &[MemberScore]) -> Result<()> {
    members
        .iter()
        .filter(|m| m.locked && m.category.is_observed())
        .try_for_each(|m| ensure_in_range("locked score", m.score, SCORE_MIN, SCORE_CEILING).map(|_| ()))
}

/// Propose anchor nudges when `target` lies outside `range`.
///
/// Raising anchors lifts the reachable maximum; lowering them drops the
/// minimum. Anchors already at the score bound are skipped.
pub fn suggest_anchor_edits(
    members: &[MemberScore],
    anchors: &AnchorMap,
    target: f64,
    range: FeasibleRange,
) -> Vec<SuggestedAnchorEdit> {
    let (step, note) = if target > range.max {
        (ANCHOR_NUDGE, "Raise this anchor slightly to increase the highest reachable average.")
    } else if target < range.min {
        (-ANCHOR_NUDGE, "Lower this anchor slightly to decrease the lowest reachable average.")
    } else {
        return Vec::new();
    };

    anchors
        .iter()
        .filter(|(id, _)| members.iter().any(|m| &m.member_id == *id && m.category.is_observed()))
        .filter_map(|(id, &current)| {
            let suggested = round2((current + step).clamp(SCORE_MIN, SCORE_CEILING));
            ((suggested - current).abs() > 1e-9).then(|| SuggestedAnchorEdit {
                member_id: id.clone(),
                current_score: current,
                suggested_score: suggested,
                note: note.to_string(),
            })
        })
        .take(MAX_ANCHOR_SUGGESTIONS)
        .collect()
}

/// Range of averages the unlocked members can still produce.
pub fn feasible_range(members: &[MemberScore]) -> FeasibleRange {
    let mut low = 0.0;
    let mut high = 0.0;
    let mut n = 0usize;
    for m in members.iter().filter(|m| m.category.is_observed()) {
        n += 1;
        if m.locked {
            low += m.score;
            high += m.score;
        } else {
            let policy = m.category.policy();
            low += policy.floor;
            high += policy.ceiling;
        }
    }
    if n == 0 {
        return FeasibleRange { min: 0.0, max: 0.0 };
    }
    FeasibleRange {
        min: round2(low / n as f64),
        max: round2(high / n as f64),
    }
}

/// Merge anchors, distribute toward the requested average and explain the result.
pub fn redistribute(
    members: &[MemberScore],
    anchors: &AnchorMap,
    params: &RedistributionParams,
    limits: &dyn PolicyLimits,
) -> Result<RedistributionResult> {
    let target = ensure_in_range("target_average", params.target_average, SCORE_MIN, SCORE_CEILING)?;
    let tolerance = ensure_finite("tolerance", params.tolerance.unwrap_or(DEFAULT_TOLERANCE))?.abs();
    for value in anchors.values() {
        ensure_in_range("anchor", *value, SCORE_MIN, SCORE_CEILING)?;
    }

    let mut effective = apply_anchors(members, anchors);
    validate_ranks(&effective)?;
    validate_locked(&effective)?;
    effective.sort_by_key(|m| m.rank);

    let distribution = distribute(&effective, target)?;
    let range = feasible_range(&effective);
    let final_average = round2(distribution.achieved_average);
    // A roster with nothing to score has no average to miss.
    let has_observed = effective.iter().any(|m| m.category.is_observed());
    let is_feasible = !has_observed || (final_average - target).abs() <= tolerance + 1e-9;

    let originals: BTreeMap<&str, f64> = members
        .iter()
        .map(|m| (m.member_id.as_str(), m.score))
        .collect();

    let mut changed = Vec::new();
    for (i, m) in effective.iter_mut().enumerate() {
        let new_score = distribution.scores[i];
        let old_score = originals
            .get(m.member_id.as_str())
            .copied()
            .unwrap_or(m.score);
        m.score = new_score;

        if (new_score - old_score).abs() <= 1e-9 {
            continue;
        }
        let mut reasons = Vec::new();
        if anchors.contains_key(&m.member_id) {
            reasons.push(ReasonCode::AnchorApplied);
        } else {
            reasons.push(ReasonCode::Redistributed);
            if distribution.clamped[i] {
                reasons.push(ReasonCode::CapApplied);
            }
        }
        changed.push(ChangedMember {
            member_id: m.member_id.clone(),
            old_score,
            new_score,
            delta: round2(new_score - old_score),
            reasons,
        });
    }

    let quota = params.policy.map(|context| {
        let (size, top, second) = tier_counts(&effective);
        check_quota(limits, size, top, second, &context)
    });

    let mut reason_codes = Vec::new();
    if !anchors.is_empty() {
        reason_codes.push(ReasonCode::AnchorApplied);
    }
    if distribution.unlocked_count > 0 {
        reason_codes.push(ReasonCode::Redistributed);
    }
    if distribution.clamped.iter().any(|c| *c) {
        reason_codes.push(ReasonCode::CapApplied);
    }
    if !is_feasible {
        reason_codes.push(ReasonCode::TargetUnreachable);
    }
    if quota.as_ref().is_some_and(|q| !q.is_valid) {
        reason_codes.push(ReasonCode::QuotaExceeded);
    }

    let suggested_anchor_edits = if is_feasible {
        Vec::new()
    } else {
        suggest_anchor_edits(&effective, anchors, target, range)
    };

    let explanation = if !has_observed {
        "No scored members; nothing to redistribute.".to_string()
    } else if distribution.all_locked() {
        format!(
            "All {} scored member(s) are locked; group average is {:.2}.",
            distribution.locked_count, final_average
        )
    } else if is_feasible {
        format!(
            "Updated {} member(s) to reach a group average of {:.2}; {} locked member(s) were held fixed.",
            changed.len(),
            final_average,
            distribution.locked_count
        )
    } else {
        format!(
            "Requested average {:.2} is not reachable: achieved {:.2}, reachable range [{:.2}, {:.2}]. Adjust anchors or recommendations.",
            target, final_average, range.min, range.max
        )
    };

    Ok(RedistributionResult {
        scores: distribution.scores.clone(),
        members: effective,
        target_average: target,
        final_average,
        delta: if has_observed {
            round2(final_average - target)
        } else {
            0.0
        },
        is_feasible,
        all_locked: has_observed && distribution.all_locked(),
        feasible_range: range,
        changed,
        reason_codes,
        quota,
        suggested_anchor_edits,
        explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EngineError, RecommendationCategory as Rec};
    use crate::policy::{GradeBand, ProportionalLimits};

    fn roster(categories: &[Rec]) -> Vec<MemberScore> {
        categories
            .iter()
            .enumerate()
            .map(|(i, c)| MemberScore::new(format!("m{}", i + 1), i as u32 + 1, *c, 3.0))
            .collect()
    }

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    #[test]
    fn test_single_category_hits_target() {
        let members = roster(&[Rec::Promotable; 5]);
        let d = distribute(&members, 4.0).unwrap();
        assert!((mean(&d.scores) - 4.0).abs() < 0.011);
        assert_eq!(d.unlocked_count, 5);
    }

    #[test]
    fn test_strictly_decreasing_within_category() {
        let members = roster(&[Rec::MustPromote; 4]);
        let d = distribute(&members, 4.0).unwrap();
        for pair in d.scores.windows(2) {
            assert!(pair[0] > pair[1], "{:?}", d.scores);
        }
    }

    #[test]
    fn test_top_tier_boosted_above_standard() {
        let members = roster(&[Rec::EarlyPromote, Rec::MustPromote, Rec::Promotable]);
        let d = distribute(&members, 4.0).unwrap();
        assert!(d.scores[0] > d.scores[1]);
        assert!(d.scores[1] > d.scores[2]);
        assert!((d.scores[0] - d.scores[2] - 0.44).abs() < 0.011);
    }

    #[test]
    fn test_locked_member_keeps_value() {
        let mut members = roster(&[Rec::Promotable; 3]);
        members[0].score = 5.0;
        members[0].locked = true;
        let d = distribute(&members, 4.0).unwrap();
        assert_eq!(d.scores[0], 5.0);
        let rest = (d.scores[1] + d.scores[2]) / 2.0;
        assert!((rest - 3.5).abs() < 0.011);
    }

    #[test]
    fn test_all_locked_returns_inputs() {
        let members: Vec<MemberScore> = [4.13, 3.87]
            .iter()
            .enumerate()
            .map(|(i, s)| MemberScore::new(format!("m{i}"), i as u32 + 1, Rec::Promotable, *s).locked())
            .collect();
        let d = distribute(&members, 4.8).unwrap();
        assert!(d.all_locked());
        assert_eq!(d.scores, vec![4.13, 3.87]);
    }

    #[test]
    fn test_low_tier_capped_regardless_of_target() {
        let members = roster(&[Rec::Promotable, Rec::Progressing, Rec::SignificantProblems]);
        let d = distribute(&members, 4.5).unwrap();
        assert!(d.scores[1] <= 2.0);
        assert!(d.scores[2] <= 2.0);
        assert!(d.clamped[1] && d.clamped[2]);
    }

    #[test]
    fn test_not_observed_excluded() {
        let members = roster(&[Rec::Promotable, Rec::NotObserved, Rec::Promotable]);
        let d = distribute(&members, 4.0).unwrap();
        assert_eq!(d.scores[1], 0.0);
        assert!((d.achieved_average - 4.0).abs() < 0.011);
    }

    #[test]
    fn test_non_finite_target_rejected() {
        let members = roster(&[Rec::Promotable]);
        assert!(distribute(&members, f64::NAN).is_err());
    }

    #[test]
    fn test_empty_roster() {
        let d = distribute(&[], 4.0).unwrap();
        assert!(d.scores.is_empty());
        assert_eq!(d.achieved_average, 0.0);
    }

    #[test]
    fn test_apply_anchors_forces_value_and_lock() {
        let members = roster(&[Rec::Promotable, Rec::Promotable]);
        let anchors = AnchorMap::from([("m2".to_string(), 4.6)]);
        let merged = apply_anchors(&members, &anchors);
        assert!(!merged[0].locked);
        assert!(merged[1].locked);
        assert_eq!(merged[1].score, 4.6);
    }

    #[test]
    fn test_redistribute_reports_changes() {
        let members = roster(&[Rec::EarlyPromote, Rec::Promotable, Rec::Promotable]);
        let anchors = AnchorMap::from([("m3".to_string(), 3.9)]);
        let params = RedistributionParams::new(4.0);
        let result = redistribute(&members, &anchors, &params, &ProportionalLimits::default()).unwrap();

        assert!(result.is_feasible);
        assert_eq!(result.scores[2], 3.9);
        let anchored = result.changed.iter().find(|c| c.member_id == "m3").unwrap();
        assert_eq!(anchored.reasons, vec![ReasonCode::AnchorApplied]);
        assert!(result.reason_codes.contains(&ReasonCode::Redistributed));
        assert!(result.quota.is_none());
        assert!(result.suggested_anchor_edits.is_empty());
    }

    #[test]
    fn test_redistribute_flags_unreachable_target() {
        let mut members = roster(&[Rec::Promotable, Rec::Progressing, Rec::Progressing]);
        members[0].score = 2.0;
        members[0].locked = true;
        let params = RedistributionParams::new(4.5);
        let result = redistribute(&members, &AnchorMap::new(), &params, &ProportionalLimits::default()).unwrap();

        assert!(!result.is_feasible);
        assert_eq!(result.feasible_range.max, 2.0);
        assert!(result.reason_codes.contains(&ReasonCode::TargetUnreachable));
        assert!(result.delta < 0.0);
        assert!(result.explanation.contains("not reachable"));
    }

    #[test]
    fn test_redistribute_rejects_out_of_domain_lock() {
        let mut members = roster(&[Rec::Promotable, Rec::Promotable]);
        members[0].score = 9.0;
        members[0].locked = true;
        let params = RedistributionParams::new(4.0);
        let err = redistribute(&members, &AnchorMap::new(), &params, &ProportionalLimits::default())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::OutOfRange {
                field: "locked score",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_locked_ignores_unlocked_and_not_observed() {
        let mut members = roster(&[Rec::Promotable, Rec::NotObserved]);
        members[0].score = 0.0;
        members[1].score = 7.0;
        members[1].locked = true;
        assert!(validate_locked(&members).is_ok());
    }

    #[test]
    fn test_redistribute_empty_roster_is_feasible() {
        let params = RedistributionParams::new(4.0);
        let result = redistribute(&[], &AnchorMap::new(), &params, &ProportionalLimits::default()).unwrap();
        assert!(result.is_feasible);
        assert!(!result.all_locked);
        assert_eq!(result.delta, 0.0);
        assert!(result.scores.is_empty());
        assert!(!result.reason_codes.contains(&ReasonCode::TargetUnreachable));
        assert!(result.explanation.contains("nothing to redistribute"));
    }

    #[test]
    fn test_unreachable_target_suggests_anchor_nudges() {
        let members = roster(&[Rec::Promotable, Rec::Progressing, Rec::Progressing]);
        let anchors = AnchorMap::from([("m1".to_string(), 2.0)]);
        let params = RedistributionParams::new(4.5);
        let result = redistribute(&members, &anchors, &params, &ProportionalLimits::default()).unwrap();

        assert!(!result.is_feasible);
        assert_eq!(result.suggested_anchor_edits.len(), 1);
        let edit = &result.suggested_anchor_edits[0];
        assert_eq!(edit.member_id, "m1");
        assert_eq!(edit.current_score, 2.0);
        assert_eq!(edit.suggested_score, 2.05);
        assert!(edit.note.starts_with("Raise"));
    }

    #[test]
    fn test_anchor_suggestions_are_bounded() {
        let members = roster(&[Rec::Promotable; 8]);
        let mut anchors: AnchorMap = (1..=7).map(|i| (format!("m{i}"), 3.0)).collect();
        anchors.insert("m8".to_string(), 5.0);
        let range = FeasibleRange { min: 2.0, max: 3.0 };

        let raise = suggest_anchor_edits(&members, &anchors, 4.9, range);
        assert_eq!(raise.len(), MAX_ANCHOR_SUGGESTIONS);
        assert!(raise.iter().all(|e| e.member_id != "m8"));
        assert!(raise.iter().all(|e| e.suggested_score == 3.05));

        let lower = suggest_anchor_edits(&members, &anchors, 1.5, range);
        assert_eq!(lower[0].suggested_score, 2.95);
        assert!(suggest_anchor_edits(&members, &anchors, 2.5, range).is_empty());
    }

    #[test]
    fn test_redistribute_runs_quota_when_policy_given() {
        let members = roster(&[Rec::EarlyPromote, Rec::EarlyPromote, Rec::Promotable, Rec::Promotable, Rec::Promotable]);
        let params = RedistributionParams::new(4.0).with_policy(PolicyContext::new(GradeBand::Mid));
        let result = redistribute(&members, &AnchorMap::new(), &params, &ProportionalLimits::default()).unwrap();
        let quota = result.quota.unwrap();
        assert!(!quota.is_valid);
        assert_eq!(quota.top_tier_limit, 1);
        assert!(result.reason_codes.contains(&ReasonCode::QuotaExceeded));
    }

    #[test]
    fn test_redistribute_sorts_by_rank() {
        let members = vec![
            MemberScore::new("low", 2, Rec::Promotable, 3.0),
            MemberScore::new("high", 1, Rec::Promotable, 3.0),
        ];
        let result = redistribute(&members, &AnchorMap::new(), &RedistributionParams::new(4.0), &ProportionalLimits::default()).unwrap();
        assert_eq!(result.members[0].member_id, "high");
        assert!(result.scores[0] > result.scores[1]);
    }

    #[test]
    fn test_redistribute_rejects_bad_anchor() {
        let members = roster(&[Rec::Promotable]);
        let anchors = AnchorMap::from([("m1".to_string(), 7.0)]);
        let err = redistribute(&members, &anchors, &RedistributionParams::new(4.0), &ProportionalLimits::default());
        assert!(err.is_err());
    }
}
