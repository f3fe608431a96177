//! Cumulative-average trajectory projection.
//!
//! Walks a group's cycles in end-date order, folding finalized scores into
//! running totals and solving each pending cycle for the highest average that
//! keeps the cumulative value at the target:
//!
//! ```text
//! (S + X·N) / (C + N) = T   =>   X = (T·(C + N) − S) / N
//! ```
//!
//! `X` is capped at the score ceiling but never floored: a negative or
//! sub-floor value means history already overshoots the target, and the
//! caller needs to see that.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{ensure_finite, round2, Cycle, Result, TargetConfig, SCORE_CEILING};

/// One waypoint of a trajectory, historical or projected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub date: NaiveDate,
    pub cycle_id: String,
    pub group_key: String,
    /// Cumulative average after this cycle, rounded to two decimals.
    pub cumulative_average: f64,
    /// Target the cycle was solved against.
    pub target: f64,
    /// `target - cumulative_average`; negative means over target.
    pub margin: f64,
    pub is_projected: bool,
    /// Actual average for final cycles, proposed average for pending ones.
    pub cycle_average: f64,
    /// Scores this cycle contributed to the running totals.
    pub member_count: usize,
    /// Set on the last point of the horizon.
    #[serde(default)]
    pub is_end_of_horizon: bool,
}

/// Running sum and count threaded through a projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningTotals {
    pub score: f64,
    pub count: usize,
}

impl RunningTotals {
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.score / self.count as f64
        }
    }

    fn add(self, score: f64, count: usize) -> Self {
        Self {
            score: self.score + score,
            count: self.count + count,
        }
    }
}

/// Highest per-member average for `n` new scores that keeps the running
/// average at `target`, capped at the score ceiling only.
pub fn max_cycle_average(totals: RunningTotals, n: usize, target: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let x = (target * (totals.count + n) as f64 - totals.score) / n as f64;
    x.min(SCORE_CEILING)
}

/// Project the trajectory of one group's cycles against a fixed ceiling.
pub fn project(cycles: &[Cycle], ceiling: f64) -> Result<Vec<TrajectoryPoint>> {
    let ceiling = ensure_finite("ceiling", ceiling)?;
    Ok(walk(cycles, |_, _, _| ceiling, |_, _| ceiling))
}

/// Project with a target that adapts to the current position, trend and
/// remaining runway instead of a fixed ceiling.
pub fn project_adaptive(cycles: &[Cycle], config: &TargetConfig) -> Result<Vec<TrajectoryPoint>> {
    config.validate()?;
    Ok(walk(
        cycles,
        |totals, points, remaining| {
            adaptive_target(totals.average(), trend(points), remaining, config)
        },
        |cumulative, points| dynamic_target(cumulative, trend(points), config),
    ))
}

/// Partition cycles by group key and project each partition independently.
pub fn project_by_group(cycles: &[Cycle], ceiling: f64) -> Result<BTreeMap<String, Vec<TrajectoryPoint>>> {
    partition_by_group(cycles)
        .into_iter()
        .map(|(key, group)| project(&group, ceiling).map(|points| (key, points)))
        .collect()
}

/// Group cycles by their group key, preserving input order within each group.
pub fn partition_by_group(cycles: &[Cycle]) -> BTreeMap<String, Vec<Cycle>> {
    let mut groups: BTreeMap<String, Vec<Cycle>> = BTreeMap::new();
    for cycle in cycles {
        groups
            .entry(cycle.group_key.clone())
            .or_default()
            .push(cycle.clone());
    }
    groups
}

/// Shared fold for fixed and adaptive projection.
///
/// `pending_target` receives the totals before the cycle, the points emitted so
/// far and the number of pending cycles left after this one.
/// `final_target` receives the rounded cumulative average after the cycle.
fn walk<P, F>(cycles: &[Cycle], mut pending_target: P, mut final_target: F) -> Vec<TrajectoryPoint>
where
    P: FnMut(RunningTotals, &[TrajectoryPoint], usize) -> f64,
    F: FnMut(f64, &[TrajectoryPoint]) -> f64,
{
    let mut ordered: Vec<&Cycle> = cycles.iter().collect();
    ordered.sort_by_key(|c| c.end_date);

    let pending_total = ordered
        .iter()
        .filter(|c| !c.status.is_final() && c.scorable_count() > 0)
        .count();

    let (_, _, mut points) = ordered.into_iter().fold(
        (RunningTotals::default(), 0usize, Vec::new()),
        |(totals, pending_seen, mut points), cycle| {
            if cycle.members.is_empty() {
                return (totals, pending_seen, points);
            }

            if cycle.status.is_final() {
                let (sum, n) = cycle.observed_totals();
                let totals = totals.add(sum, n);
                let cycle_average = if n > 0 { round2(sum / n as f64) } else { 0.0 };
                let cumulative = round2(totals.average());
                let target = final_target(cumulative, &points);
                points.push(point(cycle, cumulative, target, cycle_average, n, false));
                return (totals, pending_seen, points);
            }

            let n = cycle.scorable_count();
            if n == 0 {
                return (totals, pending_seen, points);
            }
            let remaining = pending_total.saturating_sub(pending_seen + 1);
            let target = pending_target(totals, &points, remaining);
            let x = max_cycle_average(totals, n, target);
            let totals = totals.add(x * n as f64, n);
            let cumulative = round2(totals.average());
            points.push(point(cycle, cumulative, target, round2(x), n, true));
            (totals, pending_seen + 1, points)
        },
    );

    if let Some(last) = points.last_mut() {
        last.is_end_of_horizon = true;
    }
    points
}

fn point(
    cycle: &Cycle,
    cumulative: f64,
    target: f64,
    cycle_average: f64,
    member_count: usize,
    is_projected: bool,
) -> TrajectoryPoint {
    TrajectoryPoint {
        date: cycle.end_date,
        cycle_id: cycle.id.clone(),
        group_key: cycle.group_key.clone(),
        cumulative_average: cumulative,
        target,
        margin: round2(target - cumulative),
        is_projected,
        cycle_average,
        member_count,
        is_end_of_horizon: false,
    }
}

// ---------------------------------------------------------------------------
// Adaptive targeting
// ---------------------------------------------------------------------------

/// Change in cumulative average across the last (up to) three points.
pub fn trend(points: &[TrajectoryPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let recent = &points[points.len().saturating_sub(3)..];
    recent[recent.len() - 1].cumulative_average - recent[0].cumulative_average
}

/// Target for the next cycle given where the aggregate sits now.
///
/// Inside the safe band the ideal is held. Below it the plan climbs toward the
/// band, gently when far away. Above it the plan pulls back, harder past the
/// hard ceiling, and not at all while an overshoot is already falling.
pub fn dynamic_target(current: f64, trend: f64, config: &TargetConfig) -> f64 {
    let TargetConfig {
        ideal,
        safe_min,
        safe_max,
        min_limit,
        max_limit,
    } = *config;

    if config.in_safe_band(current) {
        return ideal;
    }
    if current < min_limit {
        return if min_limit - current > 0.4 {
            safe_min
        } else {
            (safe_min + ideal) / 2.0
        };
    }
    if current < safe_min {
        return (safe_min + ideal) / 2.0;
    }
    if current <= max_limit {
        return if trend < 0.0 {
            ideal
        } else {
            (safe_max + ideal) / 2.0
        };
    }
    safe_min
}

/// [`dynamic_target`] sharpened when few pending cycles remain.
pub fn adaptive_target(current: f64, trend: f64, remaining: usize, config: &TargetConfig) -> f64 {
    let base = dynamic_target(current, trend, config);
    if remaining >= 4 || config.in_safe_band(current) {
        return base;
    }

    let deviation = current - config.ideal;
    if deviation.abs() < 0.2 {
        return base;
    }

    let urgency = ((4 - remaining) as f64 / 3.0).min(1.0);
    let adjustment = deviation.abs() * urgency * 0.3;
    if deviation < 0.0 {
        (base + adjustment).min(config.max_limit)
    } else {
        (base - adjustment).max(config.min_limit)
    }
}
