//! Normalization of source frames into price rows.
//!
//! Sources name their columns however they like (`Close`, `close_SPY`,
//! `Date`, `index`...). The store only needs a calendar date and a close, plus
//! whatever open/high/low/volume columns happen to be present.

use crate::domain::PricePoint;
use chrono::NaiveDate;
use polars::prelude::*;
use thiserror::Error;

/// Column names accepted as the row date, compared case-insensitively.
const DATE_COLUMNS: [&str; 4] = ["date", "datetime", "timestamp", "index"];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("no close column in {columns:?}")]
    MissingClose { columns: Vec<String> },

    #[error("no date column in {columns:?}")]
    MissingDate { columns: Vec<String> },

    #[error("column '{column}' has unsupported date type {dtype}")]
    UnsupportedDateType { column: String, dtype: String },

    #[error("unparseable date '{value}'")]
    UnparseableDate { value: String },

    #[error("frame error: {0}")]
    Polars(String),
}

impl From<PolarsError> for NormalizeError {
    fn from(e: PolarsError) -> Self {
        NormalizeError::Polars(e.to_string())
    }
}

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names_str().into_iter().map(String::from).collect()
}

/// First column whose lowercase name starts with `prefix`.
fn find_prefixed<'a>(df: &'a DataFrame, prefix: &str) -> Option<&'a Column> {
    df.get_columns()
        .iter()
        .find(|c| c.name().to_lowercase().starts_with(prefix))
}

fn find_date_column(df: &DataFrame) -> Option<&Column> {
    df.get_columns()
        .iter()
        .find(|c| DATE_COLUMNS.contains(&c.name().to_lowercase().as_str()))
}

fn optional_f64(df: &DataFrame, prefix: &str) -> Result<Option<Float64Chunked>, NormalizeError> {
    match find_prefixed(df, prefix) {
        Some(c) => Ok(Some(c.cast(&DataType::Float64)?.f64()?.clone())),
        None => Ok(None),
    }
}

/// Coerce a date-like column to calendar dates.
fn coerce_dates(column: &Column) -> Result<Vec<Option<NaiveDate>>, NormalizeError> {
    match column.dtype() {
        DataType::Date | DataType::Datetime(_, _) => {
            let as_date = column.cast(&DataType::Date)?;
            let ca = as_date.date()?;
            Ok((0..ca.len())
                .map(|i| ca.get(i).map(super::price_store::date_from_days))
                .collect())
        }
        DataType::String => {
            let ca = column.str()?;
            ca.into_iter()
                .map(|v| v.map(parse_date_str).transpose())
                .collect()
        }
        other => Err(NormalizeError::UnsupportedDateType {
            column: column.name().to_string(),
            dtype: other.to_string(),
        }),
    }
}

/// Accepts `YYYY-MM-DD` with an optional time suffix.
fn parse_date_str(value: &str) -> Result<NaiveDate, NormalizeError> {
    let head = value.trim().get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|_| NormalizeError::UnparseableDate {
        value: value.to_string(),
    })
}

/// Convert a source frame into price rows.
///
/// Rows without a date or without a finite close are dropped. The result keeps
/// the frame's row order; the store sorts on write.
pub fn normalize_frame(df: &DataFrame) -> Result<Vec<PricePoint>, NormalizeError> {
    let close_col = find_prefixed(df, "close").ok_or_else(|| NormalizeError::MissingClose {
        columns: column_names(df),
    })?;
    let date_col = find_date_column(df).ok_or_else(|| NormalizeError::MissingDate {
        columns: column_names(df),
    })?;

    let dates = coerce_dates(date_col)?;
    let closes = close_col.cast(&DataType::Float64)?.f64()?.clone();
    let opens = optional_f64(df, "open")?;
    let highs = optional_f64(df, "high")?;
    let lows = optional_f64(df, "low")?;
    let volumes = match find_prefixed(df, "volume") {
        Some(c) => Some(c.cast(&DataType::UInt64)?.u64()?.clone()),
        None => None,
    };

    let mut points = Vec::with_capacity(df.height());
    for (i, date) in dates.into_iter().enumerate() {
        let (Some(date), Some(close)) = (date, closes.get(i)) else {
            continue;
        };
        if !close.is_finite() {
            continue;
        }
        points.push(PricePoint {
            date,
            open: opens.as_ref().and_then(|c| c.get(i)),
            high: highs.as_ref().and_then(|c| c.get(i)),
            low: lows.as_ref().and_then(|c| c.get(i)),
            close,
            volume: volumes.as_ref().and_then(|c| c.get(i)),
        });
    }

    Ok(points)
}
