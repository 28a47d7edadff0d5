pub mod error;
pub mod record;
pub mod schema;
pub mod value;

pub use error::{LedgerError, Result};
pub use record::{Key, Record, format_key};
pub use schema::{Column, ColumnType, Schema};
pub use value::Value;
