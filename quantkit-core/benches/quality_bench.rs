//! Criterion benchmarks for the per-symbol update hot paths.
//!
//! Benchmarks:
//! 1. Quality metrics over series of increasing length
//! 2. Frame normalization of a source-shaped DataFrame

use chrono::{Days, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polars::prelude::*;
use quantkit_core::data::normalize_frame;
use quantkit_core::domain::PricePoint;
use quantkit_core::quality::compute_quality;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_series(n: usize) -> Vec<PricePoint> {
    let base = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
    (0..n)
        .map(|i| {
            // Skip every seventh day to leave gaps for the gap counters
            let offset = (i + i / 6) as u64;
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            PricePoint::close_only(base.checked_add_days(Days::new(offset)).unwrap(), close)
        })
        .collect()
}

fn make_frame(n: usize) -> DataFrame {
    let series = make_series(n);
    let dates: Vec<String> = series.iter().map(|p| p.date.to_string()).collect();
    let closes: Vec<f64> = series.iter().map(|p| p.close).collect();
    df! {
        "Date" => dates,
        "Close" => closes,
    }
    .unwrap()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_quality(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_quality");
    for n in [252usize, 2_520, 12_600] {
        let series = make_series(n);
        let safe_lag = series.last().unwrap().date;
        group.bench_with_input(BenchmarkId::from_parameter(n), &series, |b, s| {
            b.iter(|| compute_quality(black_box(s), safe_lag))
        });
    }
    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_frame");
    for n in [252usize, 5_000] {
        let frame = make_frame(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &frame, |b, df| {
            b.iter(|| normalize_frame(black_box(df)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_quality, bench_normalize);
criterion_main!(benches);
