//! Trajectory risk analysis.
//!
//! Turns a projected trajectory into a severity tier, a recovery plan bounded
//! by what scores can actually achieve, and recommendation text keyed off the
//! severity.

use serde::{Deserialize, Serialize};

use crate::domain::{round2, EngineError, Result, TargetConfig, OBSERVED_FLOOR, SCORE_CEILING};
use crate::trajectory::TrajectoryPoint;

/// Velocity below which a trajectory counts as flat.
const STABLE_VELOCITY: f64 = 0.05;
/// Margin volatility below which a trajectory counts as steady.
const STABLE_VOLATILITY: f64 = 0.15;
/// Volatility that earns a consistency note.
const NOTED_VOLATILITY: f64 = 0.20;
const EMERGENCY_MARGIN: f64 = -0.30;
const CRITICAL_MARGIN: f64 = -0.10;
/// Fixed band outside which the aggregate is critical whatever the target config.
const CRITICAL_FLOOR: f64 = 3.5;
const CRITICAL_CEILING: f64 = 4.5;
/// Fixed band an aggregate must sit in to rate excellent.
const EXCELLENT_FLOOR: f64 = 3.9;
const EXCELLENT_CEILING: f64 = 4.1;
const CAUTION_DEVIATION: f64 = 0.15;
/// Pending cycles at or below which an out-of-band aggregate escalates.
const SHORT_RUNWAY: usize = 2;
const RANGE_BUFFER: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

/// Direction and steadiness of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryHealth {
    pub direction: TrendDirection,
    /// Change in cumulative average per point.
    pub velocity: f64,
    /// Population standard deviation of the margins.
    pub volatility: f64,
    pub is_stable: bool,
}

/// Severity tier, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Excellent,
    Good,
    Caution,
    Warning,
    Critical,
    Emergency,
}

impl RiskSeverity {
    /// Whether the tier calls for immediate correction.
    pub fn is_urgent(self) -> bool {
        matches!(self, Self::Critical | Self::Emergency)
    }
}

impl std::fmt::Display for RiskSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Caution => "caution",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDifficulty {
    Easy,
    Moderate,
    Difficult,
    Impossible,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

/// What the remaining cycles must average to land on the ideal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub is_recoverable: bool,
    /// Pending cycles the correction should be spread over.
    pub reports_needed: usize,
    /// Unclamped per-score average required; may lie outside the score range.
    pub required_average: f64,
    pub required_range: ScoreRange,
    pub difficulty: RecoveryDifficulty,
    /// End aggregate reached when the required average is clamped to what scores allow.
    pub estimated_end_average: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRecommendations {
    pub primary: String,
    pub secondary: Vec<String>,
    pub warnings: Vec<String>,
}

/// Full analysis of one trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    /// Cumulative average at the last finalized point.
    pub current_average: f64,
    pub projected_end_average: f64,
    pub min_margin: f64,
    pub max_margin: f64,
    pub pending_cycles: usize,
    pub severity: RiskSeverity,
    pub health: TrajectoryHealth,
    pub recovery: RecoveryPlan,
    pub recommendations: RiskRecommendations,
    /// The input trajectory in date order.
    pub trajectory: Vec<TrajectoryPoint>,
}

/// Classify direction, velocity and volatility of a date-ordered trajectory.
pub fn trajectory_health(points: &[TrajectoryPoint], config: &TargetConfig) -> TrajectoryHealth {
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) => (f.cumulative_average, l.cumulative_average),
        _ => {
            return TrajectoryHealth {
                direction: TrendDirection::Stable,
                velocity: 0.0,
                volatility: 0.0,
                is_stable: false,
            }
        }
    };

    let velocity = (last - first) / points.len() as f64;
    let direction = if velocity.abs() < STABLE_VELOCITY {
        TrendDirection::Stable
    } else if (last - config.ideal).abs() < (first - config.ideal).abs() {
        TrendDirection::Improving
    } else {
        TrendDirection::Degrading
    };

    let n = points.len() as f64;
    let mean_margin = points.iter().map(|p| p.margin).sum::<f64>() / n;
    let variance = points
        .iter()
        .map(|p| (p.margin - mean_margin).powi(2))
        .sum::<f64>()
        / n;
    let volatility = variance.sqrt();

    TrajectoryHealth {
        direction,
        velocity,
        volatility,
        is_stable: volatility < STABLE_VOLATILITY && config.in_safe_band(last),
    }
}

/// Severity tier; the most severe matching rule wins.
pub fn risk_severity(
    current: f64,
    min_margin: f64,
    health: &TrajectoryHealth,
    pending_cycles: usize,
    config: &TargetConfig,
) -> RiskSeverity {
    let degrading = health.direction == TrendDirection::Degrading;
    let in_band = config.in_safe_band(current);
    let deviation = (current - config.ideal).abs();

    if min_margin < EMERGENCY_MARGIN || (min_margin < CRITICAL_MARGIN && degrading) {
        return RiskSeverity::Emergency;
    }
    if min_margin < CRITICAL_MARGIN
        || !(CRITICAL_FLOOR..=CRITICAL_CEILING).contains(&current)
        || (!in_band && pending_cycles <= SHORT_RUNWAY)
    {
        return RiskSeverity::Critical;
    }
    if !in_band {
        return RiskSeverity::Warning;
    }
    if !health.is_stable || deviation > CAUTION_DEVIATION {
        return RiskSeverity::Caution;
    }
    if (EXCELLENT_FLOOR..=EXCELLENT_CEILING).contains(&current) {
        return RiskSeverity::Excellent;
    }
    RiskSeverity::Good
}

/// Solve for the average the remaining scores need to bring the aggregate to `ideal`.
///
/// `total_score` and `total_count` are the finalized history; `pending_scores`
/// is how many scores the `pending_cycles` will add.
pub fn recovery_plan(
    current: f64,
    total_score: f64,
    total_count: usize,
    pending_cycles: usize,
    pending_scores: usize,
    ideal: f64,
) -> RecoveryPlan {
    if pending_cycles == 0 || pending_scores == 0 {
        return RecoveryPlan {
            is_recoverable: false,
            reports_needed: 0,
            required_average: 0.0,
            required_range: ScoreRange { min: 0.0, max: 0.0 },
            difficulty: RecoveryDifficulty::Impossible,
            estimated_end_average: round2(current),
        };
    }

    let end_count = (total_count + pending_scores) as f64;
    let required = (ideal * end_count - total_score) / pending_scores as f64;
    let is_recoverable = (OBSERVED_FLOOR..=SCORE_CEILING).contains(&required);

    let feasible = required.clamp(OBSERVED_FLOOR, SCORE_CEILING);
    let estimated_end = (total_score + feasible * pending_scores as f64) / end_count;

    let deviation = (required - current).abs();
    let difficulty = if !is_recoverable {
        RecoveryDifficulty::Impossible
    } else if deviation < 0.3 && pending_cycles >= 3 {
        RecoveryDifficulty::Easy
    } else if deviation < 0.5 && pending_cycles >= 2 {
        RecoveryDifficulty::Moderate
    } else {
        RecoveryDifficulty::Difficult
    };

    let reports_needed = match difficulty {
        RecoveryDifficulty::Easy => pending_cycles.div_ceil(2),
        RecoveryDifficulty::Moderate => (pending_cycles as f64 * 0.75).ceil() as usize,
        _ => pending_cycles,
    };

    RecoveryPlan {
        is_recoverable,
        reports_needed,
        required_average: round2(required),
        required_range: ScoreRange {
            min: round2((required - RANGE_BUFFER).clamp(OBSERVED_FLOOR, SCORE_CEILING)),
            max: round2((required + RANGE_BUFFER).clamp(OBSERVED_FLOOR, SCORE_CEILING)),
        },
        difficulty,
        estimated_end_average: round2(estimated_end),
    }
}

/// Templated guidance for a severity tier plus secondary notes and hard warnings.
pub fn recommendations(
    severity: RiskSeverity,
    current: f64,
    recovery: &RecoveryPlan,
    health: &TrajectoryHealth,
    pending_cycles: usize,
    config: &TargetConfig,
) -> RiskRecommendations {
    let range = format!(
        "{:.2}-{:.2}",
        recovery.required_range.min, recovery.required_range.max
    );
    let below = current < config.safe_min;
    let mut out = RiskRecommendations::default();

    out.primary = match severity {
        RiskSeverity::Emergency | RiskSeverity::Critical if below => format!(
            "URGENT: Increase averages to {range} immediately to reach the safe band."
        ),
        RiskSeverity::Emergency | RiskSeverity::Critical => {
            format!("URGENT: Reduce averages to {range} to correct the high cumulative average.")
        }
        RiskSeverity::Warning if below => {
            format!("Gradually increase averages to {range} to enter the safe band.")
        }
        RiskSeverity::Warning => {
            format!("Gradually decrease averages to {range} to enter the safe band.")
        }
        RiskSeverity::Caution => {
            format!("Maintain steady averages around {range} to stay in the safe band.")
        }
        RiskSeverity::Good | RiskSeverity::Excellent => format!(
            "Continue the current strategy. Keep averages around {:.2} to sustain the trajectory.",
            config.ideal
        ),
    };

    if severity.is_urgent() && !recovery.is_recoverable {
        out.warnings
            .push("Target average may not be achievable with the remaining cycles.".to_string());
        out.warnings.push(format!(
            "Best case: the cumulative average reaches {:.2}.",
            recovery.estimated_end_average
        ));
    }

    if health.volatility > NOTED_VOLATILITY {
        out.secondary.push(
            "Reduce volatility by keeping averages consistent across cycles.".to_string(),
        );
    }
    if health.direction == TrendDirection::Degrading && severity != RiskSeverity::Excellent {
        out.secondary.push(
            "Trajectory is trending away from the target. Adjust the plan soon.".to_string(),
        );
    }
    if pending_cycles <= SHORT_RUNWAY && recovery.difficulty != RecoveryDifficulty::Easy {
        out.secondary
            .push("Limited runway remaining. Precise targeting is critical.".to_string());
    }
    if recovery.difficulty == RecoveryDifficulty::Difficult {
        out.secondary.push(
            "Recovery requires aggressive action. Consider locking top performers to preserve their scores."
                .to_string(),
        );
    }

    if pending_cycles == 0 {
        out.warnings
            .push("No pending cycles remain. The current average is final.".to_string());
    }
    if current > config.max_limit {
        out.warnings.push(format!(
            "Cumulative average above the hard ceiling ({:.2}). Immediate correction required.",
            config.max_limit
        ));
    }
    if current < config.min_limit {
        out.warnings.push(format!(
            "Cumulative average below the critical floor ({:.2}). Immediate boost required.",
            config.min_limit
        ));
    }

    out
}

/// Analyze a trajectory against a target band.
///
/// Fails when the trajectory is empty or contains no finalized point, since
/// the recovery math has nothing to stand on.
pub fn analyze(trajectory: &[TrajectoryPoint], config: &TargetConfig) -> Result<RiskAnalysis> {
    if trajectory.is_empty() {
        return Err(EngineError::EmptyTrajectory);
    }

    let mut sorted = trajectory.to_vec();
    sorted.sort_by_key(|p| p.date);

    let last_historical = sorted
        .iter()
        .rev()
        .find(|p| !p.is_projected)
        .ok_or(EngineError::NoHistoricalData)?;
    let current = last_historical.cumulative_average;
    let projected_end = sorted.last().map_or(current, |p| p.cumulative_average);

    let (total_score, total_count) = sorted
        .iter()
        .filter(|p| !p.is_projected)
        .fold((0.0, 0usize), |(s, n), p| {
            (s + p.cycle_average * p.member_count as f64, n + p.member_count)
        });
    let (pending_cycles, pending_scores) = sorted
        .iter()
        .filter(|p| p.is_projected)
        .fold((0usize, 0usize), |(c, n), p| (c + 1, n + p.member_count));

    let min_margin = sorted.iter().map(|p| p.margin).fold(f64::INFINITY, f64::min);
    let max_margin = sorted
        .iter()
        .map(|p| p.margin)
        .fold(f64::NEG_INFINITY, f64::max);

    let health = trajectory_health(&sorted, config);
    let severity = risk_severity(current, min_margin, &health, pending_cycles, config);
    let recovery = recovery_plan(
        current,
        total_score,
        total_count,
        pending_cycles,
        pending_scores,
        config.ideal,
    );
    let recommendations =
        recommendations(severity, current, &recovery, &health, pending_cycles, config);

    Ok(RiskAnalysis {
        current_average: current,
        projected_end_average: projected_end,
        min_margin,
        max_margin,
        pending_cycles,
        severity,
        health,
        recovery,
        recommendations,
        trajectory: sorted,
    })
}

/// Quick margin summary for one group's trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupRiskSummary {
    pub min_margin: f64,
    pub last_average: f64,
    pub target: f64,
    /// Some point dips above its target.
    pub is_critical: bool,
}

pub fn summarize_group_risk(trajectory: &[TrajectoryPoint]) -> GroupRiskSummary {
    let Some(last) = trajectory.iter().max_by_key(|p| p.date) else {
        return GroupRiskSummary {
            min_margin: 0.0,
            last_average: 0.0,
            target: 0.0,
            is_critical: false,
        };
    };
    let min_margin = trajectory
        .iter()
        .map(|p| p.margin)
        .fold(f64::INFINITY, f64::min);
    GroupRiskSummary {
        min_margin,
        last_average: last.cumulative_average,
        target: last.target,
        is_critical: min_margin < 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn pt(month: u32, avg: f64, target: f64, projected: bool, count: usize) -> TrajectoryPoint {
        TrajectoryPoint {
            date: NaiveDate::from_ymd_opt(2024, month, 1).unwrap(),
            cycle_id: format!("c{month}"),
            group_key: "O3".to_string(),
            cumulative_average: avg,
            target,
            margin: round2(target - avg),
            is_projected: projected,
            cycle_average: avg,
            member_count: count,
            is_end_of_horizon: false,
        }
    }

    #[test]
    fn test_health_stable_in_band() {
        let points = vec![pt(1, 4.0, 4.2, false, 5), pt(2, 4.02, 4.2, false, 5)];
        let health = trajectory_health(&points, &TargetConfig::default());
        assert_eq!(health.direction, TrendDirection::Stable);
        assert!(health.is_stable);
        assert!(health.volatility < 0.02);
    }

    #[test]
    fn test_health_degrading_when_moving_away() {
        let points = vec![pt(1, 4.0, 4.2, false, 5), pt(2, 4.4, 4.2, true, 5)];
        let health = trajectory_health(&points, &TargetConfig::default());
        assert_eq!(health.direction, TrendDirection::Degrading);
        assert!((health.velocity - 0.2).abs() < 1e-9);
        assert!(!health.is_stable);
    }

    #[test]
    fn test_health_improving_when_closing_on_ideal() {
        let points = vec![pt(1, 3.5, 4.2, false, 5), pt(2, 3.9, 4.2, true, 5)];
        let health = trajectory_health(&points, &TargetConfig::default());
        assert_eq!(health.direction, TrendDirection::Improving);
    }

    #[test]
    fn test_severity_ladder() {
        let config = TargetConfig::default();
        let steady = TrajectoryHealth {
            direction: TrendDirection::Stable,
            velocity: 0.0,
            volatility: 0.0,
            is_stable: true,
        };
        let degrading = TrajectoryHealth {
            direction: TrendDirection::Degrading,
            ..steady
        };

        assert_eq!(risk_severity(4.0, -0.4, &steady, 5, &config), RiskSeverity::Emergency);
        assert_eq!(risk_severity(4.0, -0.2, &degrading, 5, &config), RiskSeverity::Emergency);
        assert_eq!(risk_severity(4.0, -0.2, &steady, 5, &config), RiskSeverity::Critical);
        assert_eq!(risk_severity(3.4, 0.1, &steady, 5, &config), RiskSeverity::Critical);
        assert_eq!(risk_severity(3.7, 0.1, &steady, 2, &config), RiskSeverity::Critical);
        assert_eq!(risk_severity(3.7, 0.1, &steady, 3, &config), RiskSeverity::Warning);
        assert_eq!(risk_severity(4.18, 0.02, &steady, 5, &config), RiskSeverity::Caution);
        assert_eq!(risk_severity(4.05, 0.15, &steady, 5, &config), RiskSeverity::Excellent);
        assert_eq!(risk_severity(4.12, 0.08, &steady, 5, &config), RiskSeverity::Good);
    }

    #[test]
    fn test_fixed_bands_apply_under_shifted_target() {
        let config = TargetConfig::around(4.4);
        let steady = TrajectoryHealth {
            direction: TrendDirection::Stable,
            velocity: 0.0,
            volatility: 0.0,
            is_stable: true,
        };
        // inside the shifted safe band yet above the hard 4.5 line
        assert!(config.in_safe_band(4.6));
        assert_eq!(risk_severity(4.6, 0.2, &steady, 3, &config), RiskSeverity::Critical);

        let config = TargetConfig::around(4.1);
        // on the shifted ideal but outside [3.9, 4.1]
        assert_eq!(risk_severity(4.12, 0.1, &steady, 3, &config), RiskSeverity::Good);
        assert_eq!(risk_severity(4.05, 0.1, &steady, 3, &config), RiskSeverity::Excellent);
    }

    #[test]
    fn test_recovery_plan_easy() {
        // 10 scores at 3.9, 3 cycles adding 15 scores, ideal 4.0
        let plan = recovery_plan(3.9, 39.0, 10, 3, 15, 4.0);
        assert!(plan.is_recoverable);
        assert!((plan.required_average - 4.07).abs() < 1e-9);
        assert_eq!(plan.difficulty, RecoveryDifficulty::Easy);
        assert_eq!(plan.reports_needed, 2);
        assert_eq!(plan.required_range.min, 3.87);
        assert_eq!(plan.required_range.max, 4.27);
        assert_eq!(plan.estimated_end_average, 4.0);
    }

    #[test]
    fn test_recovery_plan_impossible_when_out_of_range() {
        let plan = recovery_plan(4.8, 48.0, 10, 1, 1, 4.0);
        assert!(!plan.is_recoverable);
        assert_eq!(plan.difficulty, RecoveryDifficulty::Impossible);
        assert_eq!(plan.required_range.min, 2.0);
        assert_eq!(plan.required_range.max, 2.0);
        // best case: (48 + 2) / 11
        assert_eq!(plan.estimated_end_average, 4.55);
    }

    #[test]
    fn test_recovery_plan_no_runway() {
        let plan = recovery_plan(4.1, 41.0, 10, 0, 0, 4.0);
        assert!(!plan.is_recoverable);
        assert_eq!(plan.difficulty, RecoveryDifficulty::Impossible);
        assert_eq!(plan.estimated_end_average, 4.1);
    }

    #[test]
    fn test_analyze_preconditions() {
        let config = TargetConfig::default();
        assert!(matches!(analyze(&[], &config), Err(EngineError::EmptyTrajectory)));
        let projected_only = vec![pt(1, 4.0, 4.2, true, 3)];
        assert!(matches!(
            analyze(&projected_only, &config),
            Err(EngineError::NoHistoricalData)
        ));
    }

    #[test]
    fn test_analyze_urgent_high_recommendation() {
        let config = TargetConfig::default();
        let points = vec![
            pt(1, 4.6, 4.2, false, 10),
            pt(2, 4.5, 4.2, true, 5),
        ];
        let analysis = analyze(&points, &config).unwrap();
        assert_eq!(analysis.severity, RiskSeverity::Emergency);
        assert!(analysis.recommendations.primary.starts_with("URGENT: Reduce"));
        assert!(analysis
            .recommendations
            .warnings
            .iter()
            .any(|w| w.contains("hard ceiling")));
    }

    #[test]
    fn test_zero_runway_warning() {
        let config = TargetConfig::default();
        let points = vec![pt(1, 4.0, 4.2, false, 10)];
        let analysis = analyze(&points, &config).unwrap();
        assert_eq!(analysis.pending_cycles, 0);
        assert!(analysis
            .recommendations
            .warnings
            .iter()
            .any(|w| w.contains("No pending cycles")));
    }

    #[test]
    fn test_summarize_group_risk() {
        let points = vec![pt(1, 4.0, 4.2, false, 3), pt(2, 4.3, 4.2, true, 3)];
        let summary = summarize_group_risk(&points);
        assert!(summary.is_critical);
        assert_eq!(summary.last_average, 4.3);
        assert!((summary.min_margin + 0.1).abs() < 1e-9);

        let empty = summarize_group_risk(&[]);
        assert!(!empty.is_critical);
    }
}
