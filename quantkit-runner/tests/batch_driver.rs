//! Integration tests for the batch driver: dispatch order, rate-limit abort,
//! and agreement between the sequential and parallel paths.

mod common;

use common::{d, daily_bars, syms, Harness, Script, ScriptedSource};
use proptest::prelude::*;
use quantkit_core::registry::TickerRegistry;
use quantkit_runner::{run_batch, run_update, BatchOptions, UpdateError};
use std::time::Duration;

fn options(workers: usize) -> BatchOptions {
    BatchOptions {
        max_workers: workers,
        parallel: workers > 1,
    }
}

fn bars() -> Script {
    Script::Bars(daily_bars(d(2024, 1, 1), &[1.0, 2.0, 3.0, 4.0, 5.0]))
}

/// Symbols S00..S{n-1}, all with data except `throttled`.
fn scripted(n: usize, throttled: usize) -> (Vec<String>, ScriptedSource) {
    let symbols: Vec<String> = (0..n).map(|i| format!("S{i:02}")).collect();
    let mut source = ScriptedSource::new().with_delay(Duration::from_millis(2));
    for (i, s) in symbols.iter().enumerate() {
        source = source.script(s, if i == throttled { Script::Throttled } else { bars() });
    }
    (symbols, source)
}

#[test]
fn sequential_abort_stops_dispatch() {
    let (symbols, source) = scripted(5, 2);
    let h = Harness::new(source);
    h.registry.bootstrap(&symbols).unwrap();

    let err = run_batch(&h.engine(), &symbols, d(2024, 1, 5), options(1)).unwrap_err();
    let UpdateError::RateLimited { summary } = err else {
        panic!("expected rate limit abort");
    };
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.rate_limited, 1);
    assert_eq!(summary.skipped, 2);

    assert_eq!(h.source.fetched_symbols(), vec!["S00", "S01", "S02"]);
    assert_eq!(h.record("S00").unwrap().last_date, Some(d(2024, 1, 5)));
    assert_eq!(h.record("S01").unwrap().last_date, Some(d(2024, 1, 5)));
    assert!(!h.record("S02").unwrap().is_bad);
    assert_eq!(h.record("S03").unwrap().last_date, None);

    // The next run resumes with what was left
    let remaining = h.registry.list_symbols_needing_update(d(2024, 1, 5)).unwrap();
    assert_eq!(remaining, vec!["S02", "S03", "S04"]);
}

#[test]
fn registry_order_dispatches_stalest_first() {
    let source = ScriptedSource::new()
        .script("NEW", bars())
        .script("OLD", bars())
        .script("NULL", bars());
    let h = Harness::new(source);
    h.registry.bootstrap(&syms(&["NEW", "OLD", "NULL"])).unwrap();
    h.registry.inner.record_success("NEW", d(2024, 1, 3)).unwrap();
    h.registry.inner.record_success("OLD", d(2024, 1, 1)).unwrap();

    let summary = run_update(&h.engine(), None, d(2024, 1, 5), options(1)).unwrap();
    assert_eq!(summary.requested, 3);
    assert_eq!(h.source.fetched_symbols(), vec!["NULL", "OLD", "NEW"]);
}

#[test]
fn explicit_symbols_are_deduplicated() {
    let h = Harness::new(ScriptedSource::new().script("SPY", bars()).script("QQQ", bars()));
    let summary = run_update(
        &h.engine(),
        Some(syms(&["SPY", "QQQ", "SPY"])),
        d(2024, 1, 5),
        options(4),
    )
    .unwrap();
    assert_eq!(summary.requested, 2);
    assert_eq!(summary.updated, 2);
    assert_eq!(h.source.fetch_count("SPY"), 1);
}

#[test]
fn empty_batch_completes() {
    let h = Harness::new(ScriptedSource::new());
    let summary = run_batch(&h.engine(), &[], d(2024, 1, 5), options(4)).unwrap();
    assert_eq!(summary.requested, 0);
    assert_eq!(h.source.fetches(), 0);
}

#[test]
fn parallel_matches_sequential() {
    let make = || {
        ScriptedSource::new()
            .script("A", bars())
            .script("B", Script::Empty)
            .script("C", bars())
            .script("D", Script::NoCloseColumn)
            .script("E", bars())
            .script("F", Script::BadRange)
    };
    let symbols = syms(&["A", "B", "C", "D", "E", "F", "G"]);

    let seq = Harness::new(make());
    let par = Harness::new(make().with_delay(Duration::from_millis(2)));
    for h in [&seq, &par] {
        h.registry.bootstrap(&symbols).unwrap();
    }

    let s1 = run_batch(&seq.engine(), &symbols, d(2024, 1, 5), options(1)).unwrap();
    let s2 = run_batch(&par.engine(), &symbols, d(2024, 1, 5), options(4)).unwrap();

    assert_eq!(
        (s1.updated, s1.failed, s1.up_to_date),
        (s2.updated, s2.failed, s2.up_to_date)
    );
    assert_eq!((s1.updated, s1.failed), (3, 4));
    for symbol in &symbols {
        assert_eq!(seq.record(symbol), par.record(symbol), "{symbol}");
    }
}

#[test]
fn second_run_is_up_to_date() {
    let h = Harness::new(ScriptedSource::new().script("SPY", bars()));
    h.registry.bootstrap(&syms(&["SPY"])).unwrap();
    run_update(&h.engine(), None, d(2024, 1, 5), options(1)).unwrap();

    // Nothing stale in the registry, and an explicit request fetches nothing
    assert!(h.registry.list_symbols_needing_update(d(2024, 1, 5)).unwrap().is_empty());
    let summary = run_update(&h.engine(), Some(syms(&["SPY"])), d(2024, 1, 5), options(1)).unwrap();
    assert_eq!(summary.up_to_date, 1);
    assert_eq!(h.source.fetches(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever the worker count and the position of the throttled symbol,
    /// each completed outcome is reconciled exactly once, the throttled
    /// symbol is never marked bad, and every symbol is either attempted once
    /// or never started.
    #[test]
    fn abort_reconciles_each_outcome_once(
        (n, k) in (1usize..10).prop_flat_map(|n| (Just(n), 0..n)),
        workers in 1usize..4,
    ) {
        let (symbols, source) = scripted(n, k);
        let h = Harness::new(source);
        h.registry.bootstrap(&symbols).unwrap();

        let err = run_batch(&h.engine(), &symbols, d(2024, 1, 5), options(workers)).unwrap_err();
        let UpdateError::RateLimited { summary } = err else {
            panic!("expected rate limit abort");
        };

        prop_assert_eq!(summary.attempted() + summary.skipped, n);
        prop_assert_eq!(h.registry.bad_marks(&symbols[k]), 0);
        prop_assert!(!h.record(&symbols[k]).unwrap().is_bad);

        let mut updated = 0;
        for s in &symbols {
            let fetched = h.source.fetch_count(s);
            prop_assert!(fetched <= 1);
            prop_assert!(h.registry.successes(s) <= 1);
            if s != &symbols[k] {
                let reflected = h.record(s).unwrap().last_date.is_some();
                prop_assert_eq!(reflected, fetched == 1);
                prop_assert_eq!(h.registry.successes(s), fetched);
                updated += fetched;
            }
        }
        prop_assert_eq!(summary.updated, updated);
        // In a sequential run nothing after the throttled symbol starts
        if workers == 1 {
            prop_assert_eq!(summary.skipped, n - k - 1);
        }
    }
}
