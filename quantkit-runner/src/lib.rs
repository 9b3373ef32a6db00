//! quantkit runner: the price-update engine and its batch driver.
//!
//! This crate builds on `quantkit-core` to provide:
//! - Per-symbol update routine (validate, window, fetch, normalize, persist)
//! - Outcome reconciliation against the ticker registry
//! - Bounded worker pool with rate-limit abort
//! - TOML run configuration and batch summaries

pub mod batch;
pub mod config;
pub mod engine;
pub mod summary;

pub use batch::{
    dedupe_symbols, ensure_bootstrapped, reconcile, run_batch, run_update, update_all, BatchOptions,
    UpdateError,
};
pub use config::{ConfigError, DateAuthority, UpdateConfig};
pub use engine::{EngineError, FailureReason, UpdateEngine, UpdateOutcome};
pub use summary::BatchSummary;
