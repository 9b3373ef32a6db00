//! Per-symbol update routine.
//!
//! Each symbol passes a strict sequence of gates:
//!
//! 1. **Validate**: the source must recognise the symbol.
//! 2. **Window**: compare the last stored date with the safe-lag date; stop
//!    early when nothing can be missing.
//! 3. **Fetch**: request `[last + 1, safe_lag]` (or full history).
//! 4. **Normalize**: locate the date and close columns.
//! 5. **Persist**: append, recompute quality metrics.
//!
//! The routine never touches the registry's update state. It reports an
//! [`UpdateOutcome`] and the batch driver reconciles it.

use crate::config::DateAuthority;
use chrono::{Days, NaiveDate};
use quantkit_core::data::{normalize_frame, MarketDataSource, PriceStore, SourceError, StoreError};
use quantkit_core::domain::max_date;
use quantkit_core::quality::compute_quality;
use quantkit_core::registry::{QualityStore, RegistryError, TickerRegistry};
use std::fmt;
use thiserror::Error;

/// Why an attempt ended in `Failed`. Every reason marks the symbol bad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    InvalidSymbol,
    NoData,
    MalformedResponse(String),
    InvalidRange(String),
    SourceError(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidSymbol => write!(f, "invalid symbol"),
            FailureReason::NoData => write!(f, "no data returned"),
            FailureReason::MalformedResponse(detail) => write!(f, "malformed response: {detail}"),
            FailureReason::InvalidRange(detail) => write!(f, "invalid range: {detail}"),
            FailureReason::SourceError(detail) => write!(f, "source error: {detail}"),
        }
    }
}

/// Result of one attempt on one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New rows stored through this date.
    Updated(NaiveDate),
    /// Already current through this date; nothing fetched.
    UpToDate(NaiveDate),
    Failed(FailureReason),
    /// The source throttled us. Retry on a later run.
    RateLimited,
}

/// Storage failures during one symbol's attempt. The symbol is left as it
/// was in the registry.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("price store error for {symbol}: {source}")]
    Store { symbol: String, source: StoreError },

    #[error("registry error for {symbol}: {source}")]
    Registry { symbol: String, source: RegistryError },
}

/// The four collaborators of an update, borrowed for the length of a batch.
pub struct UpdateEngine<'a> {
    pub registry: &'a dyn TickerRegistry,
    pub store: &'a dyn PriceStore,
    pub quality: &'a dyn QualityStore,
    pub source: &'a dyn MarketDataSource,
    pub date_authority: DateAuthority,
}

impl<'a> UpdateEngine<'a> {
    pub fn new(
        registry: &'a dyn TickerRegistry,
        store: &'a dyn PriceStore,
        quality: &'a dyn QualityStore,
        source: &'a dyn MarketDataSource,
    ) -> Self {
        Self {
            registry,
            store,
            quality,
            source,
            date_authority: DateAuthority::default(),
        }
    }

    pub fn with_date_authority(mut self, authority: DateAuthority) -> Self {
        self.date_authority = authority;
        self
    }

    /// Bring one symbol up to `safe_lag_date`.
    pub fn update_symbol(&self, symbol: &str, safe_lag_date: NaiveDate) -> Result<UpdateOutcome, EngineError> {
        // Gate 1: validate
        match self.source.validate_symbol(symbol) {
            Ok(()) => {}
            Err(SourceError::RateLimited) => return Ok(UpdateOutcome::RateLimited),
            Err(SourceError::SymbolNotFound { .. }) => {
                return Ok(UpdateOutcome::Failed(FailureReason::InvalidSymbol))
            }
            Err(e) => return Ok(UpdateOutcome::Failed(FailureReason::SourceError(e.to_string()))),
        }

        // Gate 2: window
        let last = self.last_stored_date(symbol)?;
        if let Some(last) = last {
            if last >= safe_lag_date {
                return Ok(UpdateOutcome::UpToDate(last));
            }
        }
        let start = last.and_then(|d| d.checked_add_days(Days::new(1)));
        let end_exclusive = safe_lag_date
            .checked_add_days(Days::new(1))
            .unwrap_or(safe_lag_date);

        // Gate 3: fetch
        let frame = match self.source.fetch_range(symbol, start, end_exclusive) {
            Ok(frame) => frame,
            Err(SourceError::RateLimited) => return Ok(UpdateOutcome::RateLimited),
            Err(SourceError::InvalidRange { detail, .. }) => {
                return Ok(UpdateOutcome::Failed(FailureReason::InvalidRange(detail)))
            }
            Err(e) => return Ok(UpdateOutcome::Failed(FailureReason::SourceError(e.to_string()))),
        };
        if frame.height() == 0 {
            return Ok(UpdateOutcome::Failed(FailureReason::NoData));
        }

        // Gate 4: normalize
        let rows = match normalize_frame(&frame) {
            Ok(rows) => rows,
            Err(e) => return Ok(UpdateOutcome::Failed(FailureReason::MalformedResponse(e.to_string()))),
        };
        let Some(new_last) = max_date(&rows) else {
            return Ok(UpdateOutcome::Failed(FailureReason::NoData));
        };

        // Gate 5: persist
        self.store.append(symbol, &rows).map_err(|source| EngineError::Store {
            symbol: symbol.to_string(),
            source,
        })?;
        self.refresh_quality(symbol, safe_lag_date)?;

        tracing::debug!(symbol, rows = rows.len(), %new_last, "stored new rows");
        Ok(UpdateOutcome::Updated(new_last))
    }

    fn last_stored_date(&self, symbol: &str) -> Result<Option<NaiveDate>, EngineError> {
        match self.date_authority {
            DateAuthority::PriceStore => self.store.max_date(symbol).map_err(|source| EngineError::Store {
                symbol: symbol.to_string(),
                source,
            }),
            DateAuthority::Registry => self
                .registry
                .get(symbol)
                .map(|rec| rec.and_then(|r| r.last_date))
                .map_err(|source| EngineError::Registry {
                    symbol: symbol.to_string(),
                    source,
                }),
        }
    }

    /// Recompute quality over the full stored series.
    fn refresh_quality(&self, symbol: &str, safe_lag_date: NaiveDate) -> Result<(), EngineError> {
        let series = self.store.read_all(symbol).map_err(|source| EngineError::Store {
            symbol: symbol.to_string(),
            source,
        })?;
        if let Some(metrics) = compute_quality(&series, safe_lag_date) {
            self.quality
                .save_quality(symbol, &metrics)
                .map_err(|source| EngineError::Registry {
                    symbol: symbol.to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}
