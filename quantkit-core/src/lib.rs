//! quantkit core: storage, sources and bookkeeping for daily price updates.
//!
//! - Domain types (price points, symbol records)
//! - Business-day calendar for the safe-lag date
//! - Ticker registry (SQLite) with per-symbol quality records
//! - Parquet price store with atomic writes
//! - Market data sources (Yahoo chart API) behind a rate-limit breaker
//! - Exchange listings and ticker groups for seeding the registry

pub mod calendar;
pub mod data;
pub mod domain;
pub mod quality;
pub mod registry;
