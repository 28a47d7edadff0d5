//! Ledger-level configuration, persisted as `settings.json` in the storage
//! root.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::core::{LedgerError, Result};

pub const SETTINGS_FILE: &str = "settings.json";

const DEFAULT_REPORTING_CURRENCY: &str = "USD";
const DEFAULT_BALANCE_TOLERANCE: f64 = 0.005;
const DEFAULT_PRECISION: f64 = 0.01;

fn default_reporting_currency() -> String {
    DEFAULT_REPORTING_CURRENCY.to_string()
}

fn default_balance_tolerance() -> f64 {
    DEFAULT_BALANCE_TOLERANCE
}

fn default_precision() -> f64 {
    DEFAULT_PRECISION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_reporting_currency")]
    pub reporting_currency: String,
    /// Maximum tolerated absolute sum of a transaction's legs in the
    /// reporting currency.
    #[serde(default = "default_balance_tolerance")]
    pub balance_tolerance: f64,
    /// Smallest representable increment of the reporting currency.
    #[serde(default = "default_precision")]
    pub precision: f64,
    /// Per-ticker precision overrides, e.g. `{"BTC": 1e-8}`.
    #[serde(default)]
    pub precision_overrides: HashMap<String, f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reporting_currency: default_reporting_currency(),
            balance_tolerance: default_balance_tolerance(),
            precision: default_precision(),
            precision_overrides: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load from `<root>/settings.json`. A missing file falls back to the
    /// defaults with a warning; a malformed file is an error.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            warn!(path = %path.display(), "settings file missing, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| {
            LedgerError::Settings(format!("{}: {}", path.display(), e))
        })
    }

    /// Write atomically to `<root>/settings.json`.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| LedgerError::Settings(e.to_string()))?;
        let dir = path.parent().unwrap_or(root);
        fs::create_dir_all(dir)?;
        let tmp = NamedTempFile::new_in(dir)?;
        fs::write(tmp.path(), text)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn path(root: &Path) -> PathBuf {
        root.join(SETTINGS_FILE)
    }

    pub fn precision_of(&self, ticker: &str) -> f64 {
        self.precision_overrides
            .get(ticker)
            .copied()
            .unwrap_or(self.precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let root = TempDir::new().unwrap();
        let settings = Settings::load(root.path()).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let root = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.reporting_currency = "CHF".to_string();
        settings.precision_overrides.insert("BTC".to_string(), 1e-8);
        settings.save(root.path()).unwrap();

        let loaded = Settings::load(root.path()).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.precision_of("BTC"), 1e-8);
        assert_eq!(loaded.precision_of("ETH"), 0.01);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let root = TempDir::new().unwrap();
        std::fs::write(
            root.path().join(SETTINGS_FILE),
            r#"{"reporting_currency": "EUR"}"#,
        )
        .unwrap();
        let settings = Settings::load(root.path()).unwrap();
        assert_eq!(settings.reporting_currency, "EUR");
        assert_eq!(settings.balance_tolerance, 0.005);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join(SETTINGS_FILE), "{not json").unwrap();
        assert!(matches!(
            Settings::load(root.path()),
            Err(LedgerError::Settings(_))
        ));
    }
}
