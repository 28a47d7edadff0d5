//! Built-in entity schemas.
//!
//! Column order here is the on-disk column order. The journal's `id` is a
//! surrogate derived from row position and therefore never stored; its two
//! trailing free-text columns are exempt from width padding.

use std::sync::Arc;

use crate::core::{Column, ColumnType, Schema};

pub fn accounts() -> Arc<Schema> {
    Arc::new(Schema::new(
        "accounts",
        vec![
            Column::new("account", ColumnType::Integer).key().required(),
            Column::new("currency", ColumnType::Currency).required(),
            Column::new("description", ColumnType::Text).required(),
            Column::new("tax_code", ColumnType::Text),
            Column::new("group", ColumnType::Text),
        ],
    ))
}

pub fn tax_codes() -> Arc<Schema> {
    Arc::new(Schema::new(
        "tax_codes",
        vec![
            Column::new("id", ColumnType::Text).key().required(),
            Column::new("account", ColumnType::Integer),
            Column::new("rate", ColumnType::Number).required(),
            Column::new("is_inclusive", ColumnType::Bool).required(),
            Column::new("description", ColumnType::Text),
        ],
    ))
}

/// An asset row without a date is the ticker's base definition; dated rows
/// override it from that date on. The date is a key column but nullable.
pub fn assets() -> Arc<Schema> {
    Arc::new(Schema::new(
        "assets",
        vec![
            Column::new("ticker", ColumnType::Currency).key().required(),
            Column::new("date", ColumnType::Date).key(),
            Column::new("increment", ColumnType::Number).required(),
        ],
    ))
}

pub fn price() -> Arc<Schema> {
    Arc::new(Schema::new(
        "price",
        vec![
            Column::new("ticker", ColumnType::Currency).key().required(),
            Column::new("date", ColumnType::Date).key().required(),
            Column::new("currency", ColumnType::Currency).key().required(),
            Column::new("price", ColumnType::Number).required(),
        ],
    ))
}

pub fn revaluations() -> Arc<Schema> {
    Arc::new(Schema::new(
        "revaluations",
        vec![
            Column::new("date", ColumnType::Date).key().required(),
            Column::new("adjust", ColumnType::Text).key().required(),
            Column::new("credit", ColumnType::Integer),
            Column::new("debit", ColumnType::Integer),
            Column::new("description", ColumnType::Text),
        ],
    ))
}

pub fn journal() -> Arc<Schema> {
    Arc::new(
        Schema::new(
            "journal",
            vec![
                Column::new("id", ColumnType::Text).not_stored(),
                Column::new("date", ColumnType::Date),
                Column::new("account", ColumnType::Integer),
                Column::new("contra", ColumnType::Integer),
                Column::new("currency", ColumnType::Currency).required(),
                Column::new("amount", ColumnType::Number).required(),
                Column::new("report_amount", ColumnType::Number),
                Column::new("tax_code", ColumnType::Text),
                Column::new("description", ColumnType::Text).required(),
                Column::new("document", ColumnType::Text),
            ],
        )
        .with_trailing_unpadded(2),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_id_is_not_stored() {
        let schema = journal();
        let id = schema.get_column("id").unwrap();
        assert!(!id.stored);
        assert_eq!(schema.trailing_unpadded(), 2);
    }

    #[test]
    fn test_key_columns() {
        assert_eq!(accounts().key_columns(), vec!["account"]);
        assert_eq!(assets().key_columns(), vec!["ticker", "date"]);
        assert_eq!(price().key_columns(), vec!["ticker", "date", "currency"]);
        assert_eq!(revaluations().key_columns(), vec!["date", "adjust"]);
    }
}
