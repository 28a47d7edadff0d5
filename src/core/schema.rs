use lazy_static::lazy_static;
use regex::Regex;
use chrono::NaiveDate;

use super::{Result, LedgerError, Value};

lazy_static! {
    /// Currency and commodity tickers: uppercase, leading letter, max 10 chars.
    static ref CURRENCY_CODE: Regex = Regex::new(r"^[A-Z][A-Z0-9]{0,9}$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Number,
    Text,
    Currency,
    Date,
    Bool,
}

impl ColumnType {
    /// Parse a trimmed cell into a typed value. The empty string is Null;
    /// whether Null is acceptable is the column's `required` concern.
    pub fn parse(&self, cell: &str) -> std::result::Result<Value, String> {
        if cell.is_empty() {
            return Ok(Value::Null);
        }
        match self {
            Self::Integer => cell
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("'{}' is not an integer", cell)),
            Self::Number => cell
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Value::Number)
                .ok_or_else(|| format!("'{}' is not a number", cell)),
            Self::Text => Ok(Value::Text(cell.to_string())),
            Self::Currency => {
                if CURRENCY_CODE.is_match(cell) {
                    Ok(Value::Text(cell.to_string()))
                } else {
                    Err(format!("'{}' is not a valid currency code", cell))
                }
            }
            Self::Date => NaiveDate::parse_from_str(cell, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| format!("'{}' is not a date (expected YYYY-MM-DD)", cell)),
            Self::Bool => match cell {
                "true" | "True" | "TRUE" => Ok(Value::Bool(true)),
                "false" | "False" | "FALSE" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", cell)),
            },
        }
    }

    /// Check an in-memory value against this column type.
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Number, Value::Number(_)) => true,
            (Self::Number, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Currency, Value::Text(s)) => CURRENCY_CODE.is_match(s),
            (Self::Date, Value::Date(_)) => true,
            (Self::Bool, Value::Bool(_)) => true,
            _ => false,
        }
    }

    /// Promote integers written into number columns so typed accessors and
    /// equality behave uniformly.
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (Self::Number, Value::Integer(i)) => Value::Number(i as f64),
            (_, v) => v.normalized(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub required: bool,
    pub key: bool,
    pub stored: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            required: false,
            key: false,
            stored: true,
        }
    }

    /// Exclude from the on-disk representation. The journal's transaction id
    /// is derived from row position and never written to file.
    pub fn not_stored(mut self) -> Self {
        self.stored = false;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as part of the primary key. Key columns may still be nullable:
    /// an asset without a date keys on (ticker, Null).
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        if value.is_null() {
            if self.required {
                return Err(format!("column '{}' cannot be empty", self.name));
            }
            return Ok(());
        }
        if !self.column_type.is_compatible(value) {
            return Err(format!(
                "column '{}' expects {:?}, got {}",
                self.name,
                self.column_type,
                value.type_name()
            ));
        }
        Ok(())
    }
}

/// Ordered column definitions for one entity.
///
/// `trailing_unpadded` exempts that many trailing columns from fixed-width
/// padding; free-text columns at the end of a row read better unpadded.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    columns: Vec<Column>,
    trailing_unpadded: usize,
}

impl Schema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            trailing_unpadded: 0,
        }
    }

    pub fn with_trailing_unpadded(mut self, n: usize) -> Self {
        self.trailing_unpadded = n;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn trailing_unpadded(&self) -> usize {
        self.trailing_unpadded
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    /// Names of the primary-key columns, in schema order.
    pub fn key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|col| col.key)
            .map(|col| col.name.as_str())
            .collect()
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.find_column_index(name).ok_or_else(|| {
            LedgerError::Settings(format!(
                "schema '{}' has no column '{}'",
                self.name, name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_code_validation() {
        assert!(ColumnType::Currency.parse("USD").is_ok());
        assert!(ColumnType::Currency.parse("BTC2").is_ok());
        assert!(ColumnType::Currency.parse("usd").is_err());
        assert!(ColumnType::Currency.parse("1EUR").is_err());
    }

    #[test]
    fn test_empty_cell_is_null() {
        assert_eq!(ColumnType::Number.parse("").unwrap(), Value::Null);
    }

    #[test]
    fn test_required_column_rejects_null() {
        let col = Column::new("amount", ColumnType::Number).required();
        assert!(col.validate(&Value::Null).is_err());
        assert!(col.validate(&Value::Number(1.5)).is_ok());
    }

    #[test]
    fn test_key_columns_in_order() {
        let schema = Schema::new(
            "assets",
            vec![
                Column::new("ticker", ColumnType::Currency).key(),
                Column::new("date", ColumnType::Date).key(),
                Column::new("increment", ColumnType::Number).required(),
            ],
        );
        assert_eq!(schema.key_columns(), vec!["ticker", "date"]);
    }
}
