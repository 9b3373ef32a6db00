//! Data-quality metrics for a symbol's price series.
//!
//! Metrics are recomputed from the full stored series whenever new rows land;
//! nothing is carried over between computations.

use crate::calendar::weekdays_between;
use crate::domain::PricePoint;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Closes at or below this are counted as zero prints.
const ZERO_CLOSE_EPSILON: f64 = 1e-5;

/// One quality record per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub data_duration_days: i64,
    pub num_data_points: usize,
    pub completeness_ratio: f64,
    pub largest_gap_days: i64,
    pub num_gaps_gt_3_days: usize,
    pub num_gaps_gt_5_days: usize,
    /// Sample standard deviation of close; `None` below two points.
    pub std_close: Option<f64>,
    pub num_zero_close: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    /// Distinct dates over weekdays in range; `None` if the range has no weekday.
    pub weekday_coverage: Option<f64>,
    pub has_recent_data: bool,
    pub num_duplicate_dates: usize,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

/// Compute quality metrics over `points` (any order).
///
/// Rows with a non-finite close are ignored. Returns `None` when nothing is
/// left.
pub fn compute_quality(points: &[PricePoint], safe_lag_date: NaiveDate) -> Option<QualityMetrics> {
    let mut rows: Vec<&PricePoint> = points.iter().filter(|p| p.has_valid_close()).collect();
    if rows.is_empty() {
        return None;
    }
    rows.sort_by_key(|p| p.date);

    let first_date = rows[0].date;
    let last_date = rows[rows.len() - 1].date;
    let duration = (last_date - first_date).num_days() + 1;
    let num_points = rows.len();

    let gaps: Vec<i64> = rows
        .windows(2)
        .map(|w| (w[1].date - w[0].date).num_days() - 1)
        .collect();
    let largest_gap = gaps.iter().copied().max().unwrap_or(0);

    let closes: Vec<f64> = rows.iter().map(|p| p.close).collect();
    let distinct: HashSet<NaiveDate> = rows.iter().map(|p| p.date).collect();
    let weekdays = weekdays_between(first_date, last_date);

    Some(QualityMetrics {
        data_duration_days: duration,
        num_data_points: num_points,
        completeness_ratio: round_to(num_points as f64 / duration as f64, 3),
        largest_gap_days: largest_gap,
        num_gaps_gt_3_days: gaps.iter().filter(|g| **g > 3).count(),
        num_gaps_gt_5_days: gaps.iter().filter(|g| **g > 5).count(),
        std_close: sample_std(&closes).map(|s| round_to(s, 5)),
        num_zero_close: closes.iter().filter(|c| **c <= ZERO_CLOSE_EPSILON).count(),
        first_date,
        last_date,
        weekday_coverage: (weekdays > 0).then(|| round_to(distinct.len() as f64 / weekdays as f64, 3)),
        has_recent_data: last_date >= safe_lag_date,
        num_duplicate_dates: num_points - distinct.len(),
    })
}
