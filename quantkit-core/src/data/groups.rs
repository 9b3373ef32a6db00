//! Ticker groups: named, hand-curated symbol lists.
//!
//! Groups are stored as a TOML file and are an alternative to the exchange
//! listing for seeding the registry with a focused universe:
//!
//! ```toml
//! [groups]
//! REIT_DATA_CENTERS = ["DLR", "EQIX"]
//! CHIP_MANUFACTURERS = ["TSM", "INTC", "NVDA"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GroupsError {
    #[error("read groups file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("parse groups TOML: {0}")]
    Parse(String),

    #[error("serialize groups: {0}")]
    Serialize(String),

    #[error("no groups defined")]
    Empty,
}

/// Group name → member symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerGroups {
    pub groups: BTreeMap<String, Vec<String>>,
}

impl TickerGroups {
    /// Load groups from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, GroupsError> {
        let content = std::fs::read_to_string(path).map_err(|e| GroupsError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse groups from a TOML string. At least one group is required.
    pub fn from_toml(content: &str) -> Result<Self, GroupsError> {
        let groups: Self = toml::from_str(content).map_err(|e| GroupsError::Parse(e.to_string()))?;
        if groups.groups.is_empty() {
            return Err(GroupsError::Empty);
        }
        Ok(groups)
    }

    /// Every symbol across all groups, trimmed, upper-cased, sorted, unique.
    pub fn all_symbols(&self) -> Vec<String> {
        self.groups
            .values()
            .flatten()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Members of one group.
    pub fn group(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(|v| v.as_slice())
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(|s| s.as_str()).collect()
    }

    /// A small starter set, handy as a template for a new groups file.
    pub fn starter() -> Self {
        let mut groups = BTreeMap::new();
        let mut add = |name: &str, syms: &[&str]| {
            groups.insert(name.to_string(), syms.iter().map(|s| s.to_string()).collect());
        };
        add("REIT_DATA_CENTERS", &["DLR", "EQIX"]);
        add("REIT_ENERGY", &["NEE", "DUK"]);
        add("ENERGY_COMPANIES", &["XOM", "CVX"]);
        add("CHIP_MANUFACTURERS", &["TSM", "INTC", "NVDA"]);
        Self { groups }
    }

    pub fn to_toml(&self) -> Result<String, GroupsError> {
        toml::to_string_pretty(self).map_err(|e| GroupsError::Serialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_groups_parse_back() {
        let g = TickerGroups::starter();
        let parsed = TickerGroups::from_toml(&g.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, g);
        assert!(parsed.group_names().contains(&"CHIP_MANUFACTURERS"));
    }

    #[test]
    fn all_symbols_dedupes_and_normalizes() {
        let g = TickerGroups::from_toml(
            r#"
            [groups]
            A = ["nvda", "INTC "]
            B = ["NVDA", ""]
            "#,
        )
        .unwrap();
        assert_eq!(g.all_symbols(), vec!["INTC", "NVDA"]);
        assert_eq!(g.group("A").unwrap().len(), 2);
    }

    #[test]
    fn empty_groups_rejected() {
        assert!(matches!(
            TickerGroups::from_toml("[groups]\n"),
            Err(GroupsError::Empty)
        ));
    }
}
