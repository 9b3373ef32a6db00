//! Shared fixtures for runner integration tests: a scripted market data
//! source, a registry that counts mutations, and a failing price store.

#![allow(dead_code)]

use chrono::NaiveDate;
use polars::prelude::*;
use quantkit_core::data::{MarketDataSource, ParquetPriceStore, PriceStore, SourceError, StoreError};
use quantkit_core::domain::{PricePoint, SymbolRecord};
use quantkit_core::registry::{RegistryError, SqliteRegistry, TickerRegistry};
use quantkit_runner::UpdateEngine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn syms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// How the scripted source answers for one symbol.
#[derive(Debug, Clone)]
pub enum Script {
    /// Daily closes; fetches return the rows inside the requested window.
    Bars(Vec<(NaiveDate, f64)>),
    Empty,
    NotFound,
    /// Validation passes, the fetch is throttled.
    Throttled,
    ThrottledOnValidate,
    BadRange,
    /// Rows come back without any close column.
    NoCloseColumn,
}

/// In-memory source that answers from per-symbol scripts and counts calls.
/// Unscripted symbols are reported as not found.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: HashMap<String, Script>,
    delay: Duration,
    pub validate_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub requests: Mutex<Vec<(String, Option<NaiveDate>, NaiveDate)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, symbol: &str, script: Script) -> Self {
        self.scripts.insert(symbol.to_string(), script);
        self
    }

    /// Sleep inside each fetch so parallel workers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn fetched_symbols(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.0.clone()).collect()
    }

    pub fn fetch_count(&self, symbol: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.0 == symbol).count()
    }
}

fn frame(rows: &[(NaiveDate, f64)]) -> DataFrame {
    let dates: Vec<String> = rows.iter().map(|(d, _)| d.to_string()).collect();
    let closes: Vec<f64> = rows.iter().map(|(_, c)| *c).collect();
    df! {
        "Date" => dates,
        "Open" => closes.clone(),
        "Close" => closes,
    }
    .unwrap()
}

impl MarketDataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn validate_symbol(&self, symbol: &str) -> Result<(), SourceError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.get(symbol) {
            None | Some(Script::NotFound) => Err(SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            }),
            Some(Script::ThrottledOnValidate) => Err(SourceError::RateLimited),
            Some(_) => Ok(()),
        }
    }

    fn fetch_range(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end_exclusive: NaiveDate,
    ) -> Result<DataFrame, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((symbol.to_string(), start, end_exclusive));
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        match self.scripts.get(symbol) {
            Some(Script::Bars(rows)) => {
                let window: Vec<(NaiveDate, f64)> = rows
                    .iter()
                    .copied()
                    .filter(|(d, _)| start.map_or(true, |s| *d >= s) && *d < end_exclusive)
                    .collect();
                Ok(frame(&window))
            }
            Some(Script::Empty) => Ok(frame(&[])),
            Some(Script::Throttled) => Err(SourceError::RateLimited),
            Some(Script::BadRange) => Err(SourceError::InvalidRange {
                symbol: symbol.to_string(),
                detail: "start after end".into(),
            }),
            Some(Script::NoCloseColumn) => Ok(df! {
                "Date" => ["2024-01-02"],
                "Open" => [1.0],
            }
            .unwrap()),
            None | Some(Script::NotFound) | Some(Script::ThrottledOnValidate) => {
                Err(SourceError::Other(format!("unexpected fetch for {symbol}")))
            }
        }
    }
}

/// Registry wrapper that counts update-state mutations per symbol.
pub struct CountingRegistry {
    pub inner: SqliteRegistry,
    successes: Mutex<HashMap<String, usize>>,
    bad_marks: Mutex<HashMap<String, usize>>,
}

impl CountingRegistry {
    pub fn new() -> Self {
        Self {
            inner: SqliteRegistry::open_in_memory().unwrap(),
            successes: Mutex::new(HashMap::new()),
            bad_marks: Mutex::new(HashMap::new()),
        }
    }

    pub fn successes(&self, symbol: &str) -> usize {
        self.successes.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }

    pub fn bad_marks(&self, symbol: &str) -> usize {
        self.bad_marks.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }
}

impl TickerRegistry for CountingRegistry {
    fn list_symbols_needing_update(&self, safe_lag_date: NaiveDate) -> Result<Vec<String>, RegistryError> {
        self.inner.list_symbols_needing_update(safe_lag_date)
    }

    fn record_success(&self, symbol: &str, new_date: NaiveDate) -> Result<(), RegistryError> {
        *self.successes.lock().unwrap().entry(symbol.to_string()).or_default() += 1;
        self.inner.record_success(symbol, new_date)
    }

    fn mark_bad(&self, symbol: &str) -> Result<(), RegistryError> {
        *self.bad_marks.lock().unwrap().entry(symbol.to_string()).or_default() += 1;
        self.inner.mark_bad(symbol)
    }

    fn bootstrap(&self, symbols: &[String]) -> Result<usize, RegistryError> {
        self.inner.bootstrap(symbols)
    }

    fn get(&self, symbol: &str) -> Result<Option<SymbolRecord>, RegistryError> {
        self.inner.get(symbol)
    }
}

/// Price store whose writes always fail.
pub struct FailingStore;

impl PriceStore for FailingStore {
    fn max_date(&self, _symbol: &str) -> Result<Option<NaiveDate>, StoreError> {
        Ok(None)
    }

    fn append(&self, _symbol: &str, _rows: &[PricePoint]) -> Result<(), StoreError> {
        Err(StoreError::Io("disk full".into()))
    }

    fn read_all(&self, _symbol: &str) -> Result<Vec<PricePoint>, StoreError> {
        Ok(Vec::new())
    }
}

/// Registry, store and source wired together over a scratch directory.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub registry: CountingRegistry,
    pub store: ParquetPriceStore,
    pub source: ScriptedSource,
}

impl Harness {
    pub fn new(source: ScriptedSource) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetPriceStore::new(dir.path().join("prices"));
        Self {
            dir,
            registry: CountingRegistry::new(),
            store,
            source,
        }
    }

    pub fn engine(&self) -> UpdateEngine<'_> {
        UpdateEngine::new(&self.registry, &self.store, &self.registry.inner, &self.source)
    }

    pub fn record(&self, symbol: &str) -> Option<SymbolRecord> {
        self.registry.get(symbol).unwrap()
    }
}

/// Consecutive calendar days of closes starting at `start`.
pub fn daily_bars(start: NaiveDate, closes: &[f64]) -> Vec<(NaiveDate, f64)> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| (start + chrono::Days::new(i as u64), *c))
        .collect()
}
