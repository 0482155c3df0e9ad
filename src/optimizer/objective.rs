//! Schedule quality objective.
//!
//! Scores a (partial) assignment in [0, 1] from four components, each in
//! [0, 1] and weighted by [`ObjectiveWeights`]:
//!
//! | Component | Weight | Definition |
//! |-----------|--------|-----------|
//! | Student preference | `student_preference` | Mean preference score of placed sessions |
//! | Therapist | `therapist_preference` | Workload balance (1 − CV of session counts), averaged with back-to-back avoidance when enabled |
//! | Utilization | `efficiency` | Mean busy/span over therapist-days |
//! | Student gaps | `cost` | Mean busy/span over student-days with 2+ sessions |
//!
//! The weighted sum is scaled by the fraction of sessions placed, so an
//! assignment that leaves sessions out never outscores one that places them.
//!
//! [`ObjectiveWeights`]: crate::models::ObjectiveWeights

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{OptimizationConstraints, TimeWindow};

/// Per-component scores and the weighted total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveBreakdown {
    pub student_preference: f64,
    pub therapist: f64,
    pub utilization: f64,
    pub student_gaps: f64,
    /// Placed / total sessions.
    pub placed_fraction: f64,
    /// Weighted total in [0, 1].
    pub score: f64,
}

/// One placed session as seen by the objective.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlacedItem<'a> {
    pub student_id: &'a str,
    pub therapist_id: &'a str,
    pub date: NaiveDate,
    pub window: TimeWindow,
}

/// Evaluates placed sessions.
///
/// * `therapists` - every therapist that could receive sessions (balance base)
/// * `total` - number of sessions that should have been placed
pub(crate) fn evaluate(
    placed: &[PlacedItem<'_>],
    total: usize,
    therapists: &[&str],
    constraints: &OptimizationConstraints,
) -> ObjectiveBreakdown {
    if total == 0 {
        return ObjectiveBreakdown {
            student_preference: 1.0,
            therapist: 1.0,
            utilization: 1.0,
            student_gaps: 1.0,
            placed_fraction: 1.0,
            score: 1.0,
        };
    }

    let student_preference = if placed.is_empty() {
        0.0
    } else {
        placed
            .iter()
            .map(|p| constraints.preference_score(p.student_id, &p.window))
            .sum::<f64>()
            / placed.len() as f64
    };

    let therapist_days = group_windows(placed, |p| p.therapist_id);
    let balance = workload_balance(placed, therapists);
    let therapist = if constraints.therapist.avoid_back_to_back {
        let min_break = constraints.therapist.break_duration_min.max(1);
        (balance + spacing_score(&therapist_days, min_break)) / 2.0
    } else {
        balance
    };

    let utilization = mean_density(therapist_days.values(), 1);
    let student_days = group_windows(placed, |p| p.student_id);
    let student_gaps = mean_density(student_days.values(), 2);

    let w = &constraints.weights;
    let weighted = w.student_preference * student_preference
        + w.therapist_preference * therapist
        + w.efficiency * utilization
        + w.cost * student_gaps;
    let placed_fraction = placed.len() as f64 / total as f64;

    ObjectiveBreakdown {
        student_preference,
        therapist,
        utilization,
        student_gaps,
        placed_fraction,
        score: (weighted * placed_fraction).clamp(0.0, 1.0),
    }
}

/// Sorted windows per (key, date).
fn group_windows<'a, F>(placed: &[PlacedItem<'a>], key: F) -> BTreeMap<(&'a str, NaiveDate), Vec<TimeWindow>>
where
    F: Fn(&PlacedItem<'a>) -> &'a str,
{
    let mut groups: BTreeMap<(&str, NaiveDate), Vec<TimeWindow>> = BTreeMap::new();
    for p in placed {
        groups.entry((key(p), p.date)).or_default().push(p.window);
    }
    for windows in groups.values_mut() {
        windows.sort();
    }
    groups
}

/// 1 − coefficient of variation of per-therapist session counts.
fn workload_balance(placed: &[PlacedItem<'_>], therapists: &[&str]) -> f64 {
    if therapists.len() <= 1 || placed.is_empty() {
        return 1.0;
    }
    let mut counts: BTreeMap<&str, f64> = therapists.iter().map(|t| (*t, 0.0)).collect();
    for p in placed {
        *counts.entry(p.therapist_id).or_insert(0.0) += 1.0;
    }
    let n = counts.len() as f64;
    let mean = counts.values().sum::<f64>() / n;
    if mean <= 0.0 {
        return 1.0;
    }
    let variance = counts.values().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
}

/// Fraction of consecutive session pairs separated by at least `min_break`.
fn spacing_score(days: &BTreeMap<(&str, NaiveDate), Vec<TimeWindow>>, min_break: i32) -> f64 {
    let mut pairs = 0usize;
    let mut spaced = 0usize;
    for windows in days.values() {
        for pair in windows.windows(2) {
            pairs += 1;
            if pair[0].gap_to(&pair[1]) >= min_break {
                spaced += 1;
            }
        }
    }
    if pairs == 0 {
        1.0
    } else {
        spaced as f64 / pairs as f64
    }
}

/// Mean busy/span over groups with at least `min_len` windows (1 if none).
fn mean_density<'w, I>(groups: I, min_len: usize) -> f64
where
    I: Iterator<Item = &'w Vec<TimeWindow>>,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    for windows in groups.filter(|w| w.len() >= min_len) {
        let (Some(first), Some(last)) = (windows.first(), windows.iter().map(|w| w.end_min).max())
        else {
            continue;
        };
        let span = (last - first.start_min) as f64;
        let busy: i32 = windows.iter().map(TimeWindow::duration_min).sum();
        if span > 0.0 {
            sum += (busy as f64 / span).min(1.0);
            count += 1;
        }
    }
    if count == 0 {
        1.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item<'a>(student: &'a str, therapist: &'a str, window: TimeWindow) -> PlacedItem<'a> {
        PlacedItem {
            student_id: student,
            therapist_id: therapist,
            date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            window,
        }
    }

    #[test]
    fn test_empty_problem_scores_one() {
        let b = evaluate(&[], 0, &[], &OptimizationConstraints::default());
        assert!((b.score - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_compact_beats_gappy() {
        let c = OptimizationConstraints::default();
        let compact = [
            item("ST1", "T1", TimeWindow::hm((9, 0), (10, 0))),
            item("ST1", "T1", TimeWindow::hm((10, 0), (11, 0))),
        ];
        let gappy = [
            item("ST1", "T1", TimeWindow::hm((9, 0), (10, 0))),
            item("ST1", "T1", TimeWindow::hm((14, 0), (15, 0))),
        ];
        let a = evaluate(&compact, 2, &["T1"], &c);
        let b = evaluate(&gappy, 2, &["T1"], &c);
        assert!((a.score - 1.0).abs() < 1e-10);
        assert!(a.score > b.score);
        assert!(b.score >= 0.0 && b.score <= 1.0);
    }

    #[test]
    fn test_unplaced_sessions_lower_score() {
        let c = OptimizationConstraints::default();
        let one = [item("ST1", "T1", TimeWindow::hm((9, 0), (10, 0)))];
        let full = evaluate(&one, 1, &["T1"], &c);
        let half = evaluate(&one, 2, &["T1"], &c);
        assert!((half.placed_fraction - 0.5).abs() < 1e-10);
        assert!(full.score > half.score);
    }

    #[test]
    fn test_workload_balance() {
        let c = OptimizationConstraints::default();
        let skewed = [
            item("ST1", "T1", TimeWindow::hm((9, 0), (10, 0))),
            item("ST2", "T1", TimeWindow::hm((10, 0), (11, 0))),
        ];
        let spread = [
            item("ST1", "T1", TimeWindow::hm((9, 0), (10, 0))),
            item("ST2", "T2", TimeWindow::hm((9, 0), (10, 0))),
        ];
        let a = evaluate(&skewed, 2, &["T1", "T2"], &c);
        let b = evaluate(&spread, 2, &["T1", "T2"], &c);
        assert!(b.therapist > a.therapist);
        assert!((b.therapist - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_back_to_back_spacing() {
        let c = OptimizationConstraints::default().with_back_to_back_avoidance(15);
        let tight = [
            item("ST1", "T1", TimeWindow::hm((9, 0), (10, 0))),
            item("ST2", "T1", TimeWindow::hm((10, 0), (11, 0))),
        ];
        let b = evaluate(&tight, 2, &["T1"], &c);
        assert!((b.therapist - 0.5).abs() < 1e-10);
    }
}
