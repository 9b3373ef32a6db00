//! Business-day helpers.
//!
//! The safe-lag date is the latest day for which complete daily bars are
//! assumed to be published: the previous business day. Exchange holidays are
//! not modelled; a holiday simply produces a fetch window with no new rows.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// True for Monday through Friday.
pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Previous business day relative to `today`.
///
/// Monday, Saturday and Sunday all map to the preceding Friday.
pub fn safe_lag_date(today: NaiveDate) -> NaiveDate {
    let mut day = today - Duration::days(1);
    while !is_weekday(day) {
        day -= Duration::days(1);
    }
    day
}

/// Safe-lag date against the local clock. Call once per run.
pub fn safe_lag_date_today() -> NaiveDate {
    safe_lag_date(chrono::Local::now().date_naive())
}

/// Number of weekdays in the inclusive range `[start, end]`.
pub fn weekdays_between(start: NaiveDate, end: NaiveDate) -> usize {
    if end < start {
        return 0;
    }
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| is_weekday(*d))
        .count()
}
