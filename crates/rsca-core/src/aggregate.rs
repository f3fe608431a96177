//! Cumulative-average helpers shared by planning callers.

use crate::domain::{round2, Cycle};

/// Mean of the positive trait grades, rounded. Zero when none are graded.
pub fn trait_average<I>(grades: I) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, n) = grades
        .into_iter()
        .flatten()
        .filter(|g| g.is_finite() && *g > 0.0)
        .fold((0.0, 0usize), |(sum, n), g| (sum + g, n + 1));
    if n == 0 {
        0.0
    } else {
        round2(sum / n as f64)
    }
}

/// Cumulative average after adding `new_scores` to `signed` existing reports.
pub fn project_cumulative(current: f64, signed: usize, new_scores: &[f64]) -> f64 {
    let total = signed + new_scores.len();
    if total == 0 {
        return 0.0;
    }
    let sum: f64 = new_scores.iter().sum();
    round2((current * signed as f64 + sum) / total as f64)
}

/// How much one more report can move the average. Lower is steadier.
pub fn sensitivity(signed: usize) -> f64 {
    1.0 / (signed as f64 + 1.0)
}

/// Percentage of the twenty-report history considered fully established.
pub fn flexibility(signed: usize) -> f64 {
    (signed as f64 / 20.0 * 100.0).min(100.0)
}

/// Observed average across every cycle passed in, rounded. Zero when empty.
pub fn cumulative_average(cycles: &[Cycle]) -> f64 {
    let (sum, n) = cycles
        .iter()
        .map(Cycle::observed_totals)
        .fold((0.0, 0usize), |(s, c), (cs, cn)| (s + cs, c + cn));
    if n == 0 {
        0.0
    } else {
        round2(sum / n as f64)
    }
}
