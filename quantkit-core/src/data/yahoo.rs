//! Yahoo Finance market data source.
//!
//! Uses the v8 chart API for both the liveness check (`meta.regularMarketPrice`)
//! and daily bars. Handles bounded retries with exponential backoff and jitter,
//! response parsing, and the shared rate-limit breaker.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::circuit_breaker::RateLimitBreaker;
use super::source::{MarketDataSource, SourceError};
use chrono::NaiveDate;
use polars::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const CHART_BASE: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Backoff stops doubling after this many retries.
const MAX_BACKOFF_DOUBLINGS: u32 = 10;

/// Tunables for the Yahoo client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YahooSettings {
    /// Retries after the first attempt for throttled / transient failures.
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry.
    pub base_delay_ms: u64,
    /// Upper bound of random jitter added to each backoff.
    pub jitter_ms: u64,
    pub timeout_secs: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_threshold: u32,
}

impl Default for YahooSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            jitter_ms: 250,
            timeout_secs: 30,
            breaker_cooldown_secs: 30 * 60,
            breaker_threshold: 3,
        }
    }
}

impl YahooSettings {
    pub fn breaker(&self) -> RateLimitBreaker {
        RateLimitBreaker::new(
            Duration::from_secs(self.breaker_cooldown_secs),
            self.breaker_threshold,
        )
    }
}

// ── Chart API response ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    /// Exchange offset from UTC in seconds.
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

/// Yahoo Finance market data source.
pub struct YahooSource {
    client: reqwest::blocking::Client,
    breaker: Arc<RateLimitBreaker>,
    settings: YahooSettings,
}

impl YahooSource {
    pub fn new(settings: YahooSettings, breaker: Arc<RateLimitBreaker>) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| SourceError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            breaker,
            settings,
        })
    }

    /// Source with default settings and its own breaker.
    pub fn with_defaults() -> Result<Self, SourceError> {
        let settings = YahooSettings::default();
        let breaker = Arc::new(settings.breaker());
        Self::new(settings, breaker)
    }

    pub fn breaker(&self) -> &Arc<RateLimitBreaker> {
        &self.breaker
    }

    fn validate_url(symbol: &str) -> String {
        format!("{CHART_BASE}/{symbol}?range=5d&interval=1d")
    }

    /// Chart URL for `[start, end_exclusive)`, or the full history.
    fn range_url(symbol: &str, start: Option<NaiveDate>, end_exclusive: NaiveDate) -> String {
        let end_ts = midnight_utc(end_exclusive);
        match start {
            Some(start) => format!(
                "{CHART_BASE}/{symbol}?period1={}&period2={end_ts}&interval=1d&events=history",
                midnight_utc(start)
            ),
            None => format!(
                "{CHART_BASE}/{symbol}?period1=0&period2={end_ts}&interval=1d&events=history"
            ),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        let base = Duration::from_millis(self.settings.base_delay_ms).saturating_mul(1 << doublings);
        let jitter = if self.settings.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.settings.jitter_ms)
        } else {
            0
        };
        base.saturating_add(Duration::from_millis(jitter))
    }

    /// Execute a GET with retry and breaker logic, returning the parsed body.
    fn get_chart(&self, symbol: &str, url: &str) -> Result<ChartResponse, SourceError> {
        if !self.breaker.is_allowed() {
            return Err(SourceError::RateLimited);
        }

        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.backoff(attempt));
            }

            if !self.breaker.is_allowed() {
                return Err(SourceError::RateLimited);
            }

            let resp = match self.client.get(url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(SourceError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(SourceError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            if status == reqwest::StatusCode::FORBIDDEN {
                self.breaker.trip();
                return Err(SourceError::RateLimited);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.breaker.record_throttle();
                last_error = Some(SourceError::RateLimited);
                continue;
            }

            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(SourceError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }

            if status.is_server_error() {
                last_error = Some(SourceError::Other(format!("HTTP {status} for {symbol}")));
                continue;
            }

            let chart: ChartResponse = resp.json().map_err(|e| {
                SourceError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
            })?;
            self.breaker.record_success();

            if !status.is_success() {
                return Err(chart_error(symbol, chart.chart.error)
                    .unwrap_or_else(|| SourceError::Other(format!("HTTP {status} for {symbol}"))));
            }
            return Ok(chart);
        }

        Err(last_error.unwrap_or_else(|| SourceError::Other("max retries exceeded".into())))
    }
}

impl MarketDataSource for YahooSource {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn validate_symbol(&self, symbol: &str) -> Result<(), SourceError> {
        let chart = self.get_chart(symbol, &Self::validate_url(symbol))?;
        let data = first_result(symbol, chart)?;
        match data.meta.and_then(|m| m.regular_market_price) {
            Some(_) => Ok(()),
            None => Err(SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            }),
        }
    }

    fn fetch_range(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end_exclusive: NaiveDate,
    ) -> Result<DataFrame, SourceError> {
        if let Some(start) = start {
            if start >= end_exclusive {
                return Err(SourceError::InvalidRange {
                    symbol: symbol.to_string(),
                    detail: format!("start {start} is not before end {end_exclusive}"),
                });
            }
        }
        let chart = self.get_chart(symbol, &Self::range_url(symbol, start, end_exclusive))?;
        let data = first_result(symbol, chart)?;
        chart_to_frame(data)
    }
}

fn midnight_utc(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

fn chart_error(symbol: &str, err: Option<ChartError>) -> Option<SourceError> {
    let err = err?;
    Some(match err.code.as_str() {
        "Not Found" => SourceError::SymbolNotFound {
            symbol: symbol.to_string(),
        },
        "Bad Request" => SourceError::InvalidRange {
            symbol: symbol.to_string(),
            detail: err.description,
        },
        _ => SourceError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
    })
}

fn first_result(symbol: &str, chart: ChartResponse) -> Result<ChartData, SourceError> {
    let ChartResult { result, error } = chart.chart;
    match result.and_then(|r| r.into_iter().next()) {
        Some(data) => Ok(data),
        None => Err(chart_error(symbol, error).unwrap_or_else(|| {
            SourceError::ResponseFormatChanged("empty result with no error".into())
        })),
    }
}

/// Convert chart data into a `Date, Open, High, Low, Close, Volume` frame.
///
/// A window with no bars yields a frame with zero rows.
fn chart_to_frame(data: ChartData) -> Result<DataFrame, SourceError> {
    let timestamps = data.timestamp.unwrap_or_default();
    // Bars are stamped at the session open in UTC; shift to exchange time
    // so sessions that open before midnight UTC keep their local date.
    let gmtoffset = data.meta.as_ref().and_then(|m| m.gmtoffset).unwrap_or(0);
    let quote = data
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .unwrap_or_default();

    let mut dates: Vec<i32> = Vec::with_capacity(timestamps.len());
    let mut opens = Vec::with_capacity(timestamps.len());
    let mut highs = Vec::with_capacity(timestamps.len());
    let mut lows = Vec::with_capacity(timestamps.len());
    let mut closes = Vec::with_capacity(timestamps.len());
    let mut volumes = Vec::with_capacity(timestamps.len());

    for (i, &ts) in timestamps.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(ts.saturating_add(gmtoffset), 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| SourceError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?;

        let open = quote.open.get(i).copied().flatten();
        let high = quote.high.get(i).copied().flatten();
        let low = quote.low.get(i).copied().flatten();
        let close = quote.close.get(i).copied().flatten();
        let volume = quote.volume.get(i).copied().flatten();

        // Holiday placeholders carry no values at all
        if open.is_none() && high.is_none() && low.is_none() && close.is_none() && volume.is_none() {
            continue;
        }

        dates.push(crate::data::price_store::days_since_epoch(date));
        opens.push(open);
        highs.push(high);
        lows.push(low);
        closes.push(close);
        volumes.push(volume);
    }

    let to_err = |e: PolarsError| SourceError::ResponseFormatChanged(format!("frame build: {e}"));
    DataFrame::new(vec![
        Column::new("Date".into(), dates)
            .cast(&DataType::Date)
            .map_err(to_err)?,
        Column::new("Open".into(), opens),
        Column::new("High".into(), highs),
        Column::new("Low".into(), lows),
        Column::new("Close".into(), closes),
        Column::new("Volume".into(), volumes),
    ])
    .map_err(to_err)
}
