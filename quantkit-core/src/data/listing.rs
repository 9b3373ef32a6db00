//! Exchange symbol listings used to seed the ticker registry.
//!
//! Nasdaq Trader publishes two pipe-delimited symbol directories:
//! `nasdaqlisted.txt` (symbol column `Symbol`) and `otherlisted.txt`
//! (NYSE and other venues, symbol column `ACT Symbol`). Both end with a
//! `File Creation Time: ...` footer row and flag test issues in a
//! `Test Issue` column.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const NASDAQ_SYMBOL_COLUMN: &str = "Symbol";
const OTHER_SYMBOL_COLUMN: &str = "ACT Symbol";
const TEST_ISSUE_COLUMN: &str = "Test Issue";
const FOOTER_PREFIX: &str = "File Creation Time";

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("listing download failed ({url}): {reason}")]
    Download { url: String, reason: String },

    #[error("failed to read listing file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("malformed listing: {0}")]
    Malformed(String),
}

/// Where the two exchange feeds live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSettings {
    pub nasdaq_url: String,
    pub other_url: String,
    pub timeout_secs: u64,
}

impl Default for ListingSettings {
    fn default() -> Self {
        Self {
            nasdaq_url: "https://www.nasdaqtrader.com/dynamic/SymDir/nasdaqlisted.txt".into(),
            other_url: "https://www.nasdaqtrader.com/dynamic/SymDir/otherlisted.txt".into(),
            timeout_secs: 60,
        }
    }
}

/// Symbols that look like exchange test instruments.
fn is_test_symbol(symbol: &str) -> bool {
    symbol.to_lowercase().contains("test")
}

/// Extract the symbol column from one pipe-delimited feed.
///
/// Drops empty cells, the footer row, test symbols, and rows flagged
/// `Test Issue = Y`.
pub fn parse_listing<R: Read>(reader: R, symbol_column: &str) -> Result<Vec<String>, ListingError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| ListingError::Malformed(format!("header: {e}")))?
        .clone();
    let symbol_idx = headers
        .iter()
        .position(|h| h.trim() == symbol_column)
        .ok_or_else(|| ListingError::Malformed(format!("missing column '{symbol_column}'")))?;
    let test_idx = headers.iter().position(|h| h.trim() == TEST_ISSUE_COLUMN);

    let mut symbols = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| ListingError::Malformed(format!("row: {e}")))?;
        let Some(symbol) = record.get(symbol_idx).map(str::trim) else {
            continue;
        };
        if symbol.is_empty() || symbol.starts_with(FOOTER_PREFIX) || is_test_symbol(symbol) {
            continue;
        }
        if test_idx.and_then(|i| record.get(i)).map(str::trim) == Some("Y") {
            continue;
        }
        symbols.push(symbol.to_string());
    }

    Ok(symbols)
}

/// Union of both feeds, sorted and de-duplicated.
pub fn merge_listings(nasdaq: Vec<String>, other: Vec<String>) -> Vec<String> {
    nasdaq
        .into_iter()
        .chain(other)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Parse both feeds from local files.
pub fn load_listing_files(nasdaq: &Path, other: &Path) -> Result<Vec<String>, ListingError> {
    let open = |path: &Path| {
        std::fs::File::open(path).map_err(|e| ListingError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    };
    let nasdaq_syms = parse_listing(open(nasdaq)?, NASDAQ_SYMBOL_COLUMN)?;
    let other_syms = parse_listing(open(other)?, OTHER_SYMBOL_COLUMN)?;
    Ok(merge_listings(nasdaq_syms, other_syms))
}

/// Download and parse both feeds.
pub fn download_listing(settings: &ListingSettings) -> Result<Vec<String>, ListingError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
        .map_err(|e| ListingError::Download {
            url: settings.nasdaq_url.clone(),
            reason: format!("client build: {e}"),
        })?;

    let fetch = |url: &str| -> Result<String, ListingError> {
        let to_err = |e: reqwest::Error| ListingError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        };
        client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(to_err)
    };

    tracing::info!("downloading NASDAQ/NYSE symbol directories");
    let nasdaq_syms = parse_listing(fetch(&settings.nasdaq_url)?.as_bytes(), NASDAQ_SYMBOL_COLUMN)?;
    let other_syms = parse_listing(fetch(&settings.other_url)?.as_bytes(), OTHER_SYMBOL_COLUMN)?;
    let merged = merge_listings(nasdaq_syms, other_syms);
    tracing::info!(count = merged.len(), "parsed exchange listing");
    Ok(merged)
}
