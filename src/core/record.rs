use std::fmt;
use std::sync::Arc;

use super::{Result, Schema, Value};

/// Primary key of a record: the values of the schema's key columns, in
/// schema order. The journal uses a single Text value holding the
/// partition-qualified transaction id instead.
pub type Key = Vec<Value>;

pub fn format_key(key: &Key) -> String {
    key.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// One logical row of an entity: a schema plus one value per column.
///
/// Values are stored positionally; named access goes through the schema.
/// Equality compares values only, so two records of the same entity compare
/// field-by-field regardless of how they were constructed.
#[derive(Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Record {
    /// A record with every column Null.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = vec![Value::Null; schema.column_count()];
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, column: &str) -> &Value {
        match self.schema.find_column_index(column) {
            Some(idx) => &self.values[idx],
            None => &Value::Null,
        }
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        let idx = self.schema.require_column(column)?;
        let coerced = self.schema.columns()[idx].column_type.coerce(value.into());
        self.values[idx] = coerced;
        Ok(())
    }

    /// Builder-style `set` for constructing records inline. Unknown column
    /// names panic; they are programming errors, not data errors.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value)
            .unwrap_or_else(|e| panic!("{}", e));
        self
    }

    /// Values of the schema's key columns, in schema order.
    pub fn key(&self) -> Key {
        self.schema
            .key_columns()
            .iter()
            .map(|name| self.get(name).clone())
            .collect()
    }

    /// Validate every cell against its column definition.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (column, value) in self.schema.columns().iter().zip(&self.values) {
            column.validate(value)?;
        }
        Ok(())
    }

    /// Normalize cells in place: coerce integers in number columns, fold
    /// negative zero. Applied by stores before comparing or writing.
    pub fn standardize(&mut self) {
        for (idx, column) in self.schema.columns().iter().enumerate() {
            let value = std::mem::replace(&mut self.values[idx], Value::Null);
            self.values[idx] = column.column_type.coerce(value);
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Record {}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (column, value) in self.schema.columns().iter().zip(&self.values) {
            map.entry(&column.name, &value.to_string());
        }
        map.finish()
    }
}
