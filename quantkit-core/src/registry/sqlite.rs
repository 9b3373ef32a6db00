//! SQLite-backed registry.
//!
//! One database file holds two tables:
//! - `tickers`: symbol, last stored date, bad flag
//! - `ticker_quality`: the latest quality record per symbol
//!
//! The connection is opened once and held for the lifetime of the registry;
//! statements are serialised through a mutex.

use super::{QualityStore, RegistryError, TickerRegistry};
use crate::domain::SymbolRecord;
use crate::quality::QualityMetrics;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tickers (
    symbol TEXT PRIMARY KEY,
    last_date TEXT,
    is_bad INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS ticker_quality (
    symbol TEXT PRIMARY KEY,
    data_duration_days INTEGER NOT NULL,
    num_data_points INTEGER NOT NULL,
    completeness_ratio REAL NOT NULL,
    largest_gap_days INTEGER NOT NULL,
    num_gaps_gt_3_days INTEGER NOT NULL,
    num_gaps_gt_5_days INTEGER NOT NULL,
    std_close REAL,
    num_zero_close INTEGER NOT NULL,
    first_date TEXT NOT NULL,
    last_date TEXT NOT NULL,
    weekday_coverage REAL,
    has_recent_data INTEGER NOT NULL,
    num_duplicate_dates INTEGER NOT NULL,
    computed_at TEXT NOT NULL
);
";

/// Summary counts over the `tickers` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub bad: usize,
    pub with_data: usize,
    pub earliest_last_date: Option<NaiveDate>,
    pub latest_last_date: Option<NaiveDate>,
}

pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Open (or create) the registry file and initialise its schema.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RegistryError::Open {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(path).map_err(|e| RegistryError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::with_connection(conn)
    }

    /// A throwaway registry, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM tickers", [], |row| row.get(0))?;
        Ok(count == 0)
    }

    pub fn stats(&self) -> Result<RegistryStats, RegistryError> {
        let conn = self.conn();
        let stats = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_bad), 0), COUNT(last_date), MIN(last_date), MAX(last_date)
             FROM tickers",
            [],
            |row| {
                Ok(RegistryStats {
                    total: row.get::<_, i64>(0)? as usize,
                    bad: row.get::<_, i64>(1)? as usize,
                    with_data: row.get::<_, i64>(2)? as usize,
                    earliest_last_date: row.get(3)?,
                    latest_last_date: row.get(4)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Make a bad symbol eligible for updates again. Returns false when the
    /// symbol is unknown.
    pub fn clear_bad(&self, symbol: &str) -> Result<bool, RegistryError> {
        let changed = self
            .conn()
            .execute("UPDATE tickers SET is_bad = 0 WHERE symbol = ?1", params![symbol])?;
        if changed > 0 {
            tracing::info!(symbol, "cleared bad flag");
        }
        Ok(changed > 0)
    }

    /// All symbols currently marked bad, sorted.
    pub fn bad_symbols(&self) -> Result<Vec<String>, RegistryError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT symbol FROM tickers WHERE is_bad = 1 ORDER BY symbol")?;
        let symbols = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(symbols)
    }
}

impl TickerRegistry for SqliteRegistry {
    fn list_symbols_needing_update(&self, safe_lag_date: NaiveDate) -> Result<Vec<String>, RegistryError> {
        let conn = self.conn();
        // ISO dates compare correctly as text; `IS NOT NULL` sorts unknown dates first.
        let mut stmt = conn.prepare(
            "SELECT symbol FROM tickers
             WHERE is_bad = 0 AND (last_date IS NULL OR last_date < ?1)
             ORDER BY last_date IS NOT NULL, last_date, symbol",
        )?;
        let symbols = stmt
            .query_map(params![safe_lag_date], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(symbols)
    }

    fn record_success(&self, symbol: &str, new_date: NaiveDate) -> Result<(), RegistryError> {
        self.conn().execute(
            "INSERT INTO tickers (symbol, last_date) VALUES (?1, ?2)
             ON CONFLICT(symbol) DO UPDATE SET last_date = excluded.last_date",
            params![symbol, new_date],
        )?;
        Ok(())
    }

    fn mark_bad(&self, symbol: &str) -> Result<(), RegistryError> {
        self.conn().execute(
            "INSERT INTO tickers (symbol, is_bad) VALUES (?1, 1)
             ON CONFLICT(symbol) DO UPDATE SET is_bad = 1",
            params![symbol],
        )?;
        Ok(())
    }

    fn bootstrap(&self, symbols: &[String]) -> Result<usize, RegistryError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO tickers (symbol) VALUES (?1)")?;
            for symbol in symbols {
                inserted += stmt.execute(params![symbol])?;
            }
        }
        tx.commit()?;
        tracing::info!(offered = symbols.len(), inserted, "registry bootstrap");
        Ok(inserted)
    }

    fn get(&self, symbol: &str) -> Result<Option<SymbolRecord>, RegistryError> {
        let record = self
            .conn()
            .query_row(
                "SELECT symbol, last_date, is_bad FROM tickers WHERE symbol = ?1",
                params![symbol],
                |row| {
                    Ok(SymbolRecord {
                        symbol: row.get(0)?,
                        last_date: row.get(1)?,
                        is_bad: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

impl QualityStore for SqliteRegistry {
    fn save_quality(&self, symbol: &str, m: &QualityMetrics) -> Result<(), RegistryError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO ticker_quality (
                symbol, data_duration_days, num_data_points, completeness_ratio,
                largest_gap_days, num_gaps_gt_3_days, num_gaps_gt_5_days, std_close,
                num_zero_close, first_date, last_date, weekday_coverage,
                has_recent_data, num_duplicate_dates, computed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                symbol,
                m.data_duration_days,
                m.num_data_points as i64,
                m.completeness_ratio,
                m.largest_gap_days,
                m.num_gaps_gt_3_days as i64,
                m.num_gaps_gt_5_days as i64,
                m.std_close,
                m.num_zero_close as i64,
                m.first_date,
                m.last_date,
                m.weekday_coverage,
                m.has_recent_data,
                m.num_duplicate_dates as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_quality(&self, symbol: &str) -> Result<Option<QualityMetrics>, RegistryError> {
        let metrics = self
            .conn()
            .query_row(
                "SELECT data_duration_days, num_data_points, completeness_ratio,
                        largest_gap_days, num_gaps_gt_3_days, num_gaps_gt_5_days, std_close,
                        num_zero_close, first_date, last_date, weekday_coverage,
                        has_recent_data, num_duplicate_dates
                 FROM ticker_quality WHERE symbol = ?1",
                params![symbol],
                |row| {
                    Ok(QualityMetrics {
                        data_duration_days: row.get(0)?,
                        num_data_points: row.get::<_, i64>(1)? as usize,
                        completeness_ratio: row.get(2)?,
                        largest_gap_days: row.get(3)?,
                        num_gaps_gt_3_days: row.get::<_, i64>(4)? as usize,
                        num_gaps_gt_5_days: row.get::<_, i64>(5)? as usize,
                        std_close: row.get(6)?,
                        num_zero_close: row.get::<_, i64>(7)? as usize,
                        first_date: row.get(8)?,
                        last_date: row.get(9)?,
                        weekday_coverage: row.get(10)?,
                        has_recent_data: row.get(11)?,
                        num_duplicate_dates: row.get::<_, i64>(12)? as usize,
                    })
                },
            )
            .optional()?;
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PricePoint;
    use crate::quality::compute_quality;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bootstrap_never_overwrites() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        assert!(reg.is_empty().unwrap());
        assert_eq!(reg.bootstrap(&syms(&["AAA", "BBB"])).unwrap(), 2);
        reg.record_success("AAA", d(1, 5)).unwrap();
        assert_eq!(reg.bootstrap(&syms(&["AAA", "CCC"])).unwrap(), 1);
        assert_eq!(reg.get("AAA").unwrap().unwrap().last_date, Some(d(1, 5)));
        assert!(!reg.is_empty().unwrap());
    }

    #[test]
    fn needing_update_order_and_filters() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        reg.bootstrap(&syms(&["OLD", "NEW", "FRESH", "NULL2", "NULL1", "BAD"]))
            .unwrap();
        reg.record_success("OLD", d(1, 2)).unwrap();
        reg.record_success("NEW", d(1, 8)).unwrap();
        reg.record_success("FRESH", d(1, 10)).unwrap();
        reg.mark_bad("BAD").unwrap();

        let list = reg.list_symbols_needing_update(d(1, 10)).unwrap();
        assert_eq!(list, vec!["NULL1", "NULL2", "OLD", "NEW"]);
        for symbol in &list {
            assert!(reg.get(symbol).unwrap().unwrap().needs_update(d(1, 10)));
        }
        assert!(!reg.get("FRESH").unwrap().unwrap().needs_update(d(1, 10)));
    }

    #[test]
    fn record_success_is_idempotent() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        reg.record_success("AAA", d(2, 1)).unwrap();
        reg.record_success("AAA", d(2, 1)).unwrap();
        let rec = reg.get("AAA").unwrap().unwrap();
        assert_eq!(rec.last_date, Some(d(2, 1)));
        assert!(!rec.is_bad);
        assert_eq!(reg.stats().unwrap().total, 1);
    }

    #[test]
    fn mark_bad_then_clear() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        reg.bootstrap(&syms(&["XYZ"])).unwrap();
        reg.mark_bad("XYZ").unwrap();
        assert!(reg.get("XYZ").unwrap().unwrap().is_bad);
        assert_eq!(reg.bad_symbols().unwrap(), vec!["XYZ"]);
        assert!(reg.list_symbols_needing_update(d(1, 10)).unwrap().is_empty());

        assert!(reg.clear_bad("XYZ").unwrap());
        assert!(!reg.clear_bad("NOPE").unwrap());
        assert_eq!(reg.list_symbols_needing_update(d(1, 10)).unwrap(), vec!["XYZ"]);
    }

    #[test]
    fn stats_summarise_table() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        assert_eq!(reg.stats().unwrap(), RegistryStats::default());
        reg.bootstrap(&syms(&["A", "B", "C"])).unwrap();
        reg.record_success("A", d(1, 3)).unwrap();
        reg.record_success("B", d(1, 9)).unwrap();
        reg.mark_bad("C").unwrap();
        let s = reg.stats().unwrap();
        assert_eq!(s.total, 3);
        assert_eq!(s.bad, 1);
        assert_eq!(s.with_data, 2);
        assert_eq!(s.earliest_last_date, Some(d(1, 3)));
        assert_eq!(s.latest_last_date, Some(d(1, 9)));
    }

    #[test]
    fn quality_upsert_replaces() {
        let reg = SqliteRegistry::open_in_memory().unwrap();
        assert_eq!(reg.load_quality("SPY").unwrap(), None);

        let first = compute_quality(&[PricePoint::close_only(d(1, 2), 1.0)], d(1, 2)).unwrap();
        reg.save_quality("SPY", &first).unwrap();
        assert_eq!(reg.load_quality("SPY").unwrap(), Some(first));

        let points = vec![
            PricePoint::close_only(d(1, 2), 1.0),
            PricePoint::close_only(d(1, 3), 2.0),
        ];
        let second = compute_quality(&points, d(1, 3)).unwrap();
        reg.save_quality("SPY", &second).unwrap();
        assert_eq!(reg.load_quality("SPY").unwrap(), Some(second));
    }

    #[test]
    fn file_registry_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tickers.sqlite");
        {
            let reg = SqliteRegistry::open(&path).unwrap();
            reg.bootstrap(&syms(&["SPY"])).unwrap();
            reg.record_success("SPY", d(3, 1)).unwrap();
        }
        let reg = SqliteRegistry::open(&path).unwrap();
        assert_eq!(reg.get("SPY").unwrap().unwrap().last_date, Some(d(3, 1)));
    }
}
