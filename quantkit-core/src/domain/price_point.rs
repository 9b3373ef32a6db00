//! PricePoint: one stored daily observation for a symbol.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily price row for a single symbol.
///
/// `close` is the only required price field. Sources that only publish a
/// closing price leave the other columns empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<u64>,
}

impl PricePoint {
    /// A close-only row.
    pub fn close_only(date: NaiveDate, close: f64) -> Self {
        Self {
            date,
            open: None,
            high: None,
            low: None,
            close,
            volume: None,
        }
    }

    /// True when the close is usable for analytics (finite).
    pub fn has_valid_close(&self) -> bool {
        self.close.is_finite()
    }
}

/// Latest date across a set of rows, if any.
pub fn max_date(points: &[PricePoint]) -> Option<NaiveDate> {
    points.iter().map(|p| p.date).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn close_only_leaves_ohlv_empty() {
        let p = PricePoint::close_only(d(2), 10.0);
        assert_eq!(p.open, None);
        assert_eq!(p.volume, None);
        assert!(p.has_valid_close());
    }

    #[test]
    fn nan_close_is_invalid() {
        assert!(!PricePoint::close_only(d(2), f64::NAN).has_valid_close());
    }

    #[test]
    fn max_date_ignores_order() {
        let rows = vec![
            PricePoint::close_only(d(3), 1.0),
            PricePoint::close_only(d(5), 1.0),
            PricePoint::close_only(d(4), 1.0),
        ];
        assert_eq!(max_date(&rows), Some(d(5)));
        assert_eq!(max_date(&[]), None);
    }
}
