//! Batch tallies.

use crate::engine::UpdateOutcome;
use std::time::Duration;

/// Counts for one batch run. Every requested symbol lands in exactly one
/// bucket; `skipped` holds the ones never dispatched after an abort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub requested: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub rate_limited: usize,
    /// Attempts that hit a storage error; left untouched in the registry.
    pub errors: usize,
    pub skipped: usize,
    pub failed_symbols: Vec<String>,
    pub error_symbols: Vec<String>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn new(requested: usize) -> Self {
        Self {
            requested,
            ..Self::default()
        }
    }

    pub fn record(&mut self, symbol: &str, outcome: &UpdateOutcome) {
        match outcome {
            UpdateOutcome::Updated(_) => self.updated += 1,
            UpdateOutcome::UpToDate(_) => self.up_to_date += 1,
            UpdateOutcome::Failed(_) => {
                self.failed += 1;
                self.failed_symbols.push(symbol.to_string());
            }
            UpdateOutcome::RateLimited => self.rate_limited += 1,
        }
    }

    pub fn record_error(&mut self, symbol: &str) {
        self.errors += 1;
        self.error_symbols.push(symbol.to_string());
    }

    pub fn attempted(&self) -> usize {
        self.updated + self.up_to_date + self.failed + self.rate_limited + self.errors
    }

    /// Share of attempted symbols that ended updated or up to date (%).
    pub fn success_rate(&self) -> f64 {
        let attempted = self.attempted();
        if attempted == 0 {
            0.0
        } else {
            (self.updated + self.up_to_date) as f64 / attempted as f64 * 100.0
        }
    }

    pub fn aborted(&self) -> bool {
        self.rate_limited > 0
    }

    pub fn log_summary(&self) {
        tracing::info!(
            requested = self.requested,
            updated = self.updated,
            up_to_date = self.up_to_date,
            failed = self.failed,
            rate_limited = self.rate_limited,
            errors = self.errors,
            skipped = self.skipped,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "update batch finished"
        );
    }
}
