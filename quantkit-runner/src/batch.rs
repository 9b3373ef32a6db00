//! Batch driver: run the update engine over many symbols.
//!
//! Workers pull the next symbol from a shared cursor, so symbols are
//! dispatched in list order (stalest first when the list comes from the
//! registry). The first `RateLimited` outcome raises a cancellation flag;
//! nothing new is dispatched after that, in-flight symbols finish, and the
//! batch returns [`UpdateError::RateLimited`].
//!
//! Each worker reconciles its own outcome with the registry as soon as it has
//! one, so no result is lost when the batch aborts.

use crate::config::UpdateConfig;
use crate::engine::{UpdateEngine, UpdateOutcome};
use crate::summary::BatchSummary;
use chrono::NaiveDate;
use quantkit_core::data::{download_listing, ListingError, ListingSettings, ParquetPriceStore, SourceError, YahooSource};
use quantkit_core::registry::{RegistryError, SqliteRegistry, TickerRegistry};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("rate limited after {} of {} symbols; retry later", .summary.attempted(), .summary.requested)]
    RateLimited { summary: Box<BatchSummary> },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error("failed to build market data source: {0}")]
    Source(#[from] SourceError),

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

/// Worker settings for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub max_workers: usize,
    pub parallel: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 8,
            parallel: true,
        }
    }
}

impl From<&UpdateConfig> for BatchOptions {
    fn from(config: &UpdateConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            parallel: config.parallel,
        }
    }
}

/// Apply one outcome to the registry.
///
/// `UpToDate(d)` carries the authoritative last date. A registry that lags
/// behind it (an earlier write was lost, or the registry was rebuilt over an
/// existing data directory) is moved forward to `d`, never backwards.
pub fn reconcile(registry: &dyn TickerRegistry, symbol: &str, outcome: &UpdateOutcome) -> Result<(), RegistryError> {
    match outcome {
        UpdateOutcome::Updated(date) => registry.record_success(symbol, *date),
        UpdateOutcome::Failed(_) => registry.mark_bad(symbol),
        UpdateOutcome::UpToDate(date) => {
            let recorded = registry.get(symbol)?.and_then(|rec| rec.last_date);
            if recorded.map_or(true, |last| last < *date) {
                tracing::debug!(symbol, ?recorded, stored = %date, "registry behind price store, syncing");
                registry.record_success(symbol, *date)?;
            }
            Ok(())
        }
        UpdateOutcome::RateLimited => Ok(()),
    }
}

fn log_outcome(symbol: &str, outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::Updated(date) => tracing::info!(symbol, last_date = %date, "updated"),
        UpdateOutcome::UpToDate(date) => tracing::info!(symbol, last_date = %date, "up to date"),
        UpdateOutcome::Failed(reason) => tracing::warn!(symbol, %reason, "update failed, marked bad"),
        UpdateOutcome::RateLimited => tracing::warn!(symbol, "rate limited, stopping dispatch"),
    }
}

/// Drop repeats, keeping first occurrences in order.
pub fn dedupe_symbols(symbols: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols.into_iter().filter(|s| seen.insert(s.clone())).collect()
}

/// Run the engine over `symbols` in order.
///
/// Returns the summary on normal completion and
/// `Err(UpdateError::RateLimited)` when the source throttled the run.
pub fn run_batch(
    engine: &UpdateEngine<'_>,
    symbols: &[String],
    safe_lag_date: NaiveDate,
    options: BatchOptions,
) -> Result<BatchSummary, UpdateError> {
    let started = Instant::now();
    let cursor = AtomicUsize::new(0);
    let cancel = AtomicBool::new(false);
    let summary = Mutex::new(BatchSummary::new(symbols.len()));

    let worker = || loop {
        if cancel.load(Ordering::Acquire) {
            break;
        }
        let index = cursor.fetch_add(1, Ordering::AcqRel);
        let Some(symbol) = symbols.get(index) else {
            break;
        };

        let settled = match engine.update_symbol(symbol, safe_lag_date) {
            Ok(outcome) => {
                if outcome == UpdateOutcome::RateLimited {
                    cancel.store(true, Ordering::Release);
                }
                log_outcome(symbol, &outcome);
                match reconcile(engine.registry, symbol, &outcome) {
                    Ok(()) => Some(outcome),
                    Err(e) => {
                        tracing::error!(symbol, error = %e, "failed to record outcome");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(symbol, error = %e, "storage error, registry left unchanged");
                None
            }
        };

        let mut tally = summary.lock().unwrap_or_else(|p| p.into_inner());
        match settled {
            Some(outcome) => tally.record(symbol, &outcome),
            None => tally.record_error(symbol),
        }
    };

    let workers = if options.parallel {
        options.max_workers.clamp(1, symbols.len().max(1))
    } else {
        1
    };

    if workers > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| UpdateError::Pool(e.to_string()))?;
        let worker = &worker;
        pool.scope(|s| {
            for _ in 0..workers {
                s.spawn(move |_| worker());
            }
        });
    } else {
        worker();
    }

    let mut summary = summary.into_inner().unwrap_or_else(|p| p.into_inner());
    summary.skipped = summary.requested - summary.attempted();
    summary.elapsed = started.elapsed();
    summary.log_summary();

    if cancel.load(Ordering::Acquire) {
        tracing::warn!(
            skipped = summary.skipped,
            "batch aborted by rate limiting; remaining symbols left for the next run"
        );
        return Err(UpdateError::RateLimited {
            summary: Box::new(summary),
        });
    }
    Ok(summary)
}

/// Resolve the symbol list (explicit or from the registry) and run a batch.
pub fn run_update(
    engine: &UpdateEngine<'_>,
    symbols: Option<Vec<String>>,
    safe_lag_date: NaiveDate,
    options: BatchOptions,
) -> Result<BatchSummary, UpdateError> {
    let symbols = match symbols {
        Some(list) => dedupe_symbols(list),
        None => engine.registry.list_symbols_needing_update(safe_lag_date)?,
    };
    tracing::info!(
        count = symbols.len(),
        %safe_lag_date,
        workers = options.max_workers,
        parallel = options.parallel,
        "starting update batch"
    );
    run_batch(engine, &symbols, safe_lag_date, options)
}

/// Seed an empty registry from the exchange listing. Returns how many
/// symbols were inserted.
pub fn ensure_bootstrapped(registry: &SqliteRegistry, listing: &ListingSettings) -> Result<usize, UpdateError> {
    if !registry.is_empty()? {
        return Ok(0);
    }
    tracing::info!("registry is empty, importing exchange listing");
    let symbols = download_listing(listing)?;
    Ok(registry.bootstrap(&symbols)?)
}

/// Update prices for `symbols`, or for every stale registry symbol when
/// `None`. Returns the price data directory.
pub fn update_all(symbols: Option<Vec<String>>, config: &UpdateConfig) -> Result<PathBuf, UpdateError> {
    let registry = SqliteRegistry::open(&config.registry_path)?;
    if symbols.is_none() && config.auto_bootstrap {
        ensure_bootstrapped(&registry, &config.listing)?;
    }

    let store = ParquetPriceStore::new(&config.data_dir);
    let source = YahooSource::new(config.source.clone(), Arc::new(config.source.breaker()))?;
    let engine = UpdateEngine::new(&registry, &store, &registry, &source).with_date_authority(config.date_authority);

    run_update(&engine, symbols, config.safe_lag_date(), BatchOptions::from(config))?;
    Ok(config.data_dir.clone())
}
