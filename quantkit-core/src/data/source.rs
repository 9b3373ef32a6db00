//! Market data source trait and structured error types.
//!
//! The MarketDataSource trait abstracts over price feeds (Yahoo Finance today)
//! so the update engine can be driven by a scripted double in tests.

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use thiserror::Error;

/// Errors surfaced by a market data source.
///
/// `RateLimited` is kept apart from every other failure: it is a source-wide
/// condition, not a property of the symbol being fetched.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rate limited by source")]
    RateLimited,

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("invalid date range for {symbol}: {detail}")]
    InvalidRange { symbol: String, detail: String },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("source error: {0}")]
    Other(String),
}

impl SourceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited)
    }
}

/// Trait for market data sources.
///
/// Implementations own retries and throttling. The update engine only sees
/// the final result of each call.
pub trait MarketDataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Cheap liveness check before committing to a full download.
    ///
    /// Returns `SymbolNotFound` for delisted or unknown symbols.
    fn validate_symbol(&self, symbol: &str) -> Result<(), SourceError>;

    /// Fetch daily bars in `[start, end_exclusive)`.
    ///
    /// `start = None` requests the full available history. The frame holds
    /// one row per bar with a date-like column and price columns named the
    /// way the source names them; an empty frame means no rows in the window.
    fn fetch_range(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end_exclusive: NaiveDate,
    ) -> Result<DataFrame, SourceError>;
}
