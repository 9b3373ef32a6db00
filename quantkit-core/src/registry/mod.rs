//! Ticker registry: the durable list of known symbols and their update state.
//!
//! The registry answers one question for the update engine, "which symbols
//! are stale?", and records the result of every attempt. Quality records
//! live alongside it so a single file carries all per-symbol bookkeeping.

pub mod sqlite;

pub use sqlite::{RegistryStats, SqliteRegistry};

use crate::domain::SymbolRecord;
use crate::quality::QualityMetrics;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to open registry at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Per-symbol update state.
///
/// Implementations must be safe to share across update workers. Each call is
/// a single-key operation, but calls are not independent: `SqliteRegistry`
/// runs them one at a time on a single connection, so workers writing
/// different symbols wait on each other for the length of one statement.
pub trait TickerRegistry: Send + Sync {
    /// Symbols not marked bad whose `last_date` is unknown or older than
    /// `safe_lag_date`. Unknown dates first, then oldest first, ties by
    /// symbol.
    fn list_symbols_needing_update(&self, safe_lag_date: NaiveDate) -> Result<Vec<String>, RegistryError>;

    /// Record that data through `new_date` is stored. Creates the record if
    /// the symbol was not yet known.
    fn record_success(&self, symbol: &str, new_date: NaiveDate) -> Result<(), RegistryError>;

    /// Exclude a symbol from automatic updates.
    fn mark_bad(&self, symbol: &str) -> Result<(), RegistryError>;

    /// Insert symbols that are not yet known. Existing records are left
    /// untouched. Returns how many were inserted.
    fn bootstrap(&self, symbols: &[String]) -> Result<usize, RegistryError>;

    fn get(&self, symbol: &str) -> Result<Option<SymbolRecord>, RegistryError>;
}

/// Storage for per-symbol quality records. Saving replaces any previous
/// record for the symbol.
pub trait QualityStore: Send + Sync {
    fn save_quality(&self, symbol: &str, metrics: &QualityMetrics) -> Result<(), RegistryError>;

    fn load_quality(&self, symbol: &str) -> Result<Option<QualityMetrics>, RegistryError>;
}
