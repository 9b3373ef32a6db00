//! Update run configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid:
//!
//! ```toml
//! data_dir = "data/prices"
//! registry_path = "data/tickers.sqlite"
//! max_workers = 8
//! date_authority = "price_store"
//!
//! [source]
//! max_retries = 3
//! breaker_cooldown_secs = 1800
//! ```

use chrono::NaiveDate;
use quantkit_core::data::{ListingSettings, YahooSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound for `source.max_retries`.
const MAX_SOURCE_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid config TOML: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which store decides a symbol's last stored date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateAuthority {
    /// Max date in the price store.
    #[default]
    PriceStore,
    /// `last_date` in the registry.
    Registry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub data_dir: PathBuf,
    pub registry_path: PathBuf,
    pub max_workers: usize,
    pub parallel: bool,
    pub date_authority: DateAuthority,
    /// Import the exchange listing when the registry is empty.
    pub auto_bootstrap: bool,
    /// Pretend today is this date when computing the safe-lag date.
    pub as_of: Option<NaiveDate>,
    pub source: YahooSettings,
    pub listing: ListingSettings,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/prices"),
            registry_path: PathBuf::from("data/tickers.sqlite"),
            max_workers: 8,
            parallel: true,
            date_authority: DateAuthority::default(),
            auto_bootstrap: false,
            as_of: None,
            source: YahooSettings::default(),
            listing: ListingSettings::default(),
        }
    }
}

impl UpdateConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".into()));
        }
        if self.source.max_retries > MAX_SOURCE_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "source.max_retries must be at most {MAX_SOURCE_RETRIES}"
            )));
        }
        Ok(())
    }

    /// Number of workers actually used.
    pub fn effective_workers(&self) -> usize {
        if self.parallel {
            self.max_workers.max(1)
        } else {
            1
        }
    }

    /// Safe-lag date for this run.
    pub fn safe_lag_date(&self) -> NaiveDate {
        match self.as_of {
            Some(today) => quantkit_core::calendar::safe_lag_date(today),
            None => quantkit_core::calendar::safe_lag_date_today(),
        }
    }
}
