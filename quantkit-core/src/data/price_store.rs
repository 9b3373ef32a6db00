//! Per-symbol Parquet price store.
//!
//! Layout: `{data_dir}/symbol={SYMBOL}/prices.parquet`
//!
//! Features:
//! - One ascending series per symbol, at most one row per date
//! - Last-write-wins merge on append
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (schema check)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per symbol (hash, date range, row count)

use crate::domain::PricePoint;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PRICES_FILE: &str = "prices.parquet";
const META_FILE: &str = "meta.json";

/// Storage failures. Fatal for the symbol being written, never for a batch.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("price store I/O error: {0}")]
    Io(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("corrupt price file {path} (quarantined): {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("metadata error: {0}")]
    Meta(String),
}

/// Durable per-symbol price series.
pub trait PriceStore: Send + Sync {
    /// Latest stored date, or `None` when the symbol has no data.
    fn max_date(&self, symbol: &str) -> Result<Option<NaiveDate>, StoreError>;

    /// Merge `rows` into the series. Existing dates are replaced by the new
    /// row; an empty slice leaves the store untouched.
    fn append(&self, symbol: &str, rows: &[PricePoint]) -> Result<(), StoreError>;

    /// The full series, ascending by date. Empty when nothing is stored.
    fn read_all(&self, symbol: &str) -> Result<Vec<PricePoint>, StoreError>;
}

/// Metadata sidecar for a stored symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub symbol: String,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub row_count: usize,
    pub data_hash: String,
    pub written_at: chrono::NaiveDateTime,
}

/// Parquet-backed price store rooted at a data directory.
pub struct ParquetPriceStore {
    data_dir: PathBuf,
}

impl ParquetPriceStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root directory of the store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory for a specific symbol: `{data_dir}/symbol={SYMBOL}/`
    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.data_dir.join(format!("symbol={}", path_safe(symbol)))
    }

    fn prices_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join(PRICES_FILE)
    }

    fn meta_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join(META_FILE)
    }

    /// Metadata sidecar for a symbol, if one was written.
    pub fn meta(&self, symbol: &str) -> Option<StoreMeta> {
        let content = fs::read_to_string(self.meta_path(symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Symbols that currently have a price file, sorted.
    pub fn stored_symbols(&self) -> Result<Vec<String>, StoreError> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.data_dir).map_err(|e| StoreError::Io(format!("read dir: {e}")))?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(format!("dir entry: {e}")))?;
            let name = entry.file_name();
            let Some(symbol) = name.to_str().and_then(|n| n.strip_prefix("symbol=")) else {
                continue;
            };
            if entry.path().join(PRICES_FILE).exists() {
                symbols.push(path_unescape(symbol));
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    fn write_series(&self, symbol: &str, series: &[PricePoint]) -> Result<(), StoreError> {
        let sym_dir = self.symbol_dir(symbol);
        fs::create_dir_all(&sym_dir).map_err(|e| StoreError::Io(format!("create dir: {e}")))?;

        let mut df = points_to_dataframe(series)?;
        let path = self.prices_path(symbol);
        let tmp_path = path.with_extension("parquet.tmp");

        write_parquet(&mut df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(format!("atomic rename failed: {e}"))
        })?;

        if let (Some(first), Some(last)) = (series.first(), series.last()) {
            let meta = StoreMeta {
                symbol: symbol.to_string(),
                first_date: first.date,
                last_date: last.date,
                row_count: series.len(),
                data_hash: blake3::hash(
                    &serde_json::to_vec(series).map_err(|e| StoreError::Meta(e.to_string()))?,
                )
                .to_hex()
                .to_string(),
                written_at: chrono::Local::now().naive_local(),
            };
            let json =
                serde_json::to_string_pretty(&meta).map_err(|e| StoreError::Meta(e.to_string()))?;
            fs::write(self.meta_path(symbol), json)
                .map_err(|e| StoreError::Meta(format!("meta write: {e}")))?;
        }

        Ok(())
    }

    /// Load and validate the price file; quarantine it if unreadable.
    fn load(&self, symbol: &str, columns: Option<Vec<String>>) -> Result<Option<DataFrame>, StoreError> {
        let path = self.prices_path(symbol);
        if !path.exists() {
            return Ok(None);
        }

        match read_parquet(&path, columns).and_then(|df| validate_frame(&df).map(|()| df)) {
            Ok(df) => Ok(Some(df)),
            Err(reason) => {
                let quarantine = path.with_extension("parquet.quarantined");
                tracing::warn!(
                    symbol,
                    path = %path.display(),
                    %reason,
                    "quarantining corrupt price file"
                );
                let _ = fs::rename(&path, &quarantine);
                let _ = fs::remove_file(self.meta_path(symbol));
                Err(StoreError::Corrupt { path, reason })
            }
        }
    }
}

impl PriceStore for ParquetPriceStore {
    fn max_date(&self, symbol: &str) -> Result<Option<NaiveDate>, StoreError> {
        let Some(df) = self.load(symbol, Some(vec!["date".to_string()]))? else {
            return Ok(None);
        };
        let dates = df
            .column("date")
            .and_then(|c| c.date().cloned())
            .map_err(|e| StoreError::Parquet(format!("date column: {e}")))?;

        let max_days = (0..dates.len()).filter_map(|i| dates.get(i)).max();
        Ok(max_days.map(date_from_days))
    }

    fn append(&self, symbol: &str, rows: &[PricePoint]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut merged: BTreeMap<NaiveDate, PricePoint> = self
            .read_all(symbol)?
            .into_iter()
            .map(|p| (p.date, p))
            .collect();
        for row in rows {
            merged.insert(row.date, row.clone());
        }

        let series: Vec<PricePoint> = merged.into_values().collect();
        self.write_series(symbol, &series)
    }

    fn read_all(&self, symbol: &str) -> Result<Vec<PricePoint>, StoreError> {
        match self.load(symbol, None)? {
            Some(df) => {
                let mut points = dataframe_to_points(&df)?;
                points.sort_by_key(|p| p.date);
                Ok(points)
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Escape path separators (and `%` itself) so every symbol gets its own
/// directory. `BF/A` becomes `BF%2FA`; `BF_A` is left alone.
fn path_safe(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    for c in symbol.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`path_safe`]. Unknown escapes are kept verbatim.
fn path_unescape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = match tail.get(..3) {
            Some("%25") => Some('%'),
            Some("%2F") => Some('/'),
            Some("%5C") => Some('\\'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[3..];
            }
            None => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Days since 1970-01-01, the physical representation of a Polars `Date`.
pub fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

/// Inverse of [`days_since_epoch`].
pub fn date_from_days(days: i32) -> NaiveDate {
    epoch() + chrono::Duration::days(days as i64)
}

fn points_to_dataframe(points: &[PricePoint]) -> Result<DataFrame, StoreError> {
    let dates: Vec<i32> = points.iter().map(|p| days_since_epoch(p.date)).collect();
    let opens: Vec<Option<f64>> = points.iter().map(|p| p.open).collect();
    let highs: Vec<Option<f64>> = points.iter().map(|p| p.high).collect();
    let lows: Vec<Option<f64>> = points.iter().map(|p| p.low).collect();
    let closes: Vec<f64> = points.iter().map(|p| p.close).collect();
    let volumes: Vec<Option<u64>> = points.iter().map(|p| p.volume).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| StoreError::Parquet(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path).map_err(|e| StoreError::Io(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path, columns: Option<Vec<String>>) -> Result<DataFrame, String> {
    let file = fs::File::open(path).map_err(|e| format!("open: {e}"))?;
    ParquetReader::new(file)
        .with_columns(columns)
        .finish()
        .map_err(|e| format!("read: {e}"))
}

fn validate_frame(df: &DataFrame) -> Result<(), String> {
    match df.column("date") {
        Ok(c) if c.dtype() == &DataType::Date => Ok(()),
        Ok(c) => Err(format!("date column has type {}", c.dtype())),
        Err(_) => Err("missing column 'date'".into()),
    }
}

fn optional_f64(df: &DataFrame, name: &str) -> Result<Option<Float64Chunked>, StoreError> {
    match df.column(name) {
        Ok(c) => c
            .f64()
            .cloned()
            .map(Some)
            .map_err(|e| StoreError::Parquet(format!("{name} column type: {e}"))),
        Err(_) => Ok(None),
    }
}

fn dataframe_to_points(df: &DataFrame) -> Result<Vec<PricePoint>, StoreError> {
    let map_err = |e: PolarsError| StoreError::Parquet(format!("column read: {e}"));

    let date_ca = df.column("date").map_err(map_err)?.date().map_err(map_err)?.clone();
    let close_ca = df.column("close").map_err(map_err)?.f64().map_err(map_err)?.clone();
    let open_ca = optional_f64(df, "open")?;
    let high_ca = optional_f64(df, "high")?;
    let low_ca = optional_f64(df, "low")?;
    let vol_ca = match df.column("volume") {
        Ok(c) => Some(c.u64().map_err(map_err)?.clone()),
        Err(_) => None,
    };

    let n = df.height();
    let mut points = Vec::with_capacity(n);

    for i in 0..n {
        let days = date_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null date at row {i}")))?;

        points.push(PricePoint {
            date: date_from_days(days),
            open: open_ca.as_ref().and_then(|c| c.get(i)),
            high: high_ca.as_ref().and_then(|c| c.get(i)),
            low: low_ca.as_ref().and_then(|c| c.get(i)),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.as_ref().and_then(|c| c.get(i)),
        });
    }

    Ok(points)
}
