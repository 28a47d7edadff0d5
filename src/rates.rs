//! Exchange-rate lookup used by the journal balance check.
//!
//! Rate computation is a collaborator concern: the storage layer only needs
//! `(date, currency) -> rate` into the reporting currency.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::core::{LedgerError, Result};

pub trait RateLookup: Send + Sync {
    /// Units of the reporting currency per one unit of `currency`, as of
    /// `date`.
    fn rate(&self, date: NaiveDate, currency: &str) -> Result<f64>;
}

/// Static rate table, sufficient for single-currency ledgers and tests.
/// The reporting currency itself always converts at 1.0.
pub struct FixedRates {
    reporting_currency: String,
    rates: HashMap<String, f64>,
}

impl FixedRates {
    pub fn new(reporting_currency: impl Into<String>) -> Self {
        Self {
            reporting_currency: reporting_currency.into(),
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, currency: impl Into<String>, rate: f64) -> Self {
        self.rates.insert(currency.into(), rate);
        self
    }
}

impl RateLookup for FixedRates {
    fn rate(&self, _date: NaiveDate, currency: &str) -> Result<f64> {
        if currency == self.reporting_currency {
            return Ok(1.0);
        }
        self.rates.get(currency).copied().ok_or_else(|| {
            LedgerError::NotFound(format!("no exchange rate for '{}'", currency))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporting_currency_is_identity() {
        let rates = FixedRates::new("CHF");
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(rates.rate(date, "CHF").unwrap(), 1.0);
    }

    #[test]
    fn test_unknown_currency_is_an_error() {
        let rates = FixedRates::new("CHF").with_rate("EUR", 0.93);
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(rates.rate(date, "EUR").unwrap(), 0.93);
        assert!(rates.rate(date, "JPY").is_err());
    }
}
