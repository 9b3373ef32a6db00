//! SymbolRecord: the registry's view of one ticker.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Registry row for a ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub symbol: String,
    /// Latest price date recorded for the symbol.
    pub last_date: Option<NaiveDate>,
    /// Excluded from automatic updates until cleared by an operator.
    pub is_bad: bool,
}

impl SymbolRecord {
    /// A freshly discovered symbol: no data, not bad.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            last_date: None,
            is_bad: false,
        }
    }

    /// Whether an automatic run should attempt this symbol.
    pub fn needs_update(&self, safe_lag_date: NaiveDate) -> bool {
        !self.is_bad && self.last_date.map_or(true, |d| d < safe_lag_date)
    }
}
