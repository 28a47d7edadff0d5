//! Fixed-width CSV codec for tabular partitions.
//!
//! Partitions are UTF-8 text with one header row and comma-separated fields.
//! On write, every field of a column is right-padded to the column's maximum
//! rendered width, producing aligned text that diffs cleanly under version
//! control. Re-encoding a partition whose column widths did not change
//! reproduces unchanged lines byte for byte.

use std::sync::Arc;

use crate::core::{LedgerError, Record, Result, Schema, Value};

/// Decode the full text of one partition into records.
///
/// `partition` is the partition's relative path, used in error messages.
/// An empty or whitespace-only text decodes to no records.
pub fn decode(text: &str, schema: &Arc<Schema>, partition: &str) -> Result<Vec<Record>> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let header: Vec<String> = split_line(header)
        .into_iter()
        .map(|cell| cell.trim().to_string())
        .collect();

    // Map file columns onto schema columns once, up front.
    let mut column_indices = Vec::with_capacity(header.len());
    for name in &header {
        let idx = schema.find_column_index(name).ok_or_else(|| {
            LedgerError::schema(partition, 1, format!("unknown column '{}'", name))
        })?;
        if column_indices.contains(&idx) {
            return Err(LedgerError::schema(
                partition,
                1,
                format!("duplicate column '{}'", name),
            ));
        }
        column_indices.push(idx);
    }
    for (idx, column) in schema.columns().iter().enumerate() {
        if column.stored && column.required && !column_indices.contains(&idx) {
            return Err(LedgerError::schema(
                partition,
                1,
                format!("required column '{}' is missing", column.name),
            ));
        }
    }

    let mut records = Vec::new();
    for (line_idx, line) in lines {
        let cells = split_line(line);
        if cells.len() != header.len() {
            return Err(LedgerError::schema(
                partition,
                line_idx + 1,
                format!("expected {} columns, got {}", header.len(), cells.len()),
            ));
        }
        let mut record = Record::new(Arc::clone(schema));
        for (cell, &idx) in cells.iter().zip(&column_indices) {
            let column = &schema.columns()[idx];
            let value = column
                .column_type
                .parse(cell.trim())
                .map_err(|msg| LedgerError::schema(partition, line_idx + 1, msg))?;
            record.set(&column.name, value).map_err(|e| {
                LedgerError::schema(partition, line_idx + 1, e.to_string())
            })?;
        }
        record
            .validate()
            .map_err(|msg| LedgerError::schema(partition, line_idx + 1, msg))?;
        records.push(record);
    }
    Ok(records)
}

/// Encode records as aligned fixed-width CSV text.
///
/// Optional columns that are Null in every record are omitted; unstored
/// columns are always omitted. The last `trailing_unpadded` schema columns
/// are written without padding.
pub fn encode(records: &[Record], schema: &Schema) -> String {
    let padded_below = schema.column_count().saturating_sub(schema.trailing_unpadded());

    // Columns present in the file: stored, and required or non-empty.
    let mut included: Vec<usize> = Vec::new();
    for (idx, column) in schema.columns().iter().enumerate() {
        if !column.stored {
            continue;
        }
        let any_value = records.iter().any(|r| !r.values()[idx].is_null());
        if column.required || any_value {
            included.push(idx);
        }
    }

    let mut rendered: Vec<Vec<String>> = Vec::with_capacity(records.len());
    for record in records {
        rendered.push(
            included
                .iter()
                .map(|&idx| render_cell(&record.values()[idx]))
                .collect(),
        );
    }

    let mut widths: Vec<usize> = included
        .iter()
        .map(|&idx| schema.columns()[idx].name.chars().count())
        .collect();
    for row in &rendered {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = included
        .iter()
        .map(|&idx| schema.columns()[idx].name.clone())
        .collect();
    push_row(&mut out, &header, &widths, &included, padded_below);
    for row in &rendered {
        push_row(&mut out, row, &widths, &included, padded_below);
    }
    out
}

fn push_row(
    out: &mut String,
    cells: &[String],
    widths: &[usize],
    included: &[usize],
    padded_below: usize,
) {
    for (pos, ((cell, &width), &schema_idx)) in
        cells.iter().zip(widths).zip(included).enumerate()
    {
        if pos > 0 {
            out.push_str(", ");
        }
        if schema_idx < padded_below {
            let pad = width.saturating_sub(cell.chars().count());
            for _ in 0..pad {
                out.push(' ');
            }
        }
        out.push_str(cell);
    }
    out.push('\n');
}

fn render_cell(value: &Value) -> String {
    let text = value.to_string();
    if text.contains(',') || text.contains('"') || text.contains('\n') {
        let mut quoted = String::with_capacity(text.len() + 2);
        quoted.push('"');
        for c in text.chars() {
            if c == '"' {
                quoted.push('"');
            }
            quoted.push(c);
        }
        quoted.push('"');
        quoted
    } else {
        text
    }
}

/// Split one CSV line on commas, honoring double-quoted fields. Returned
/// cells keep surrounding whitespace; callers trim.
fn split_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cell.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if cell.trim().is_empty() && !in_quotes => {
                // Opening quote: discard the padding collected so far.
                cell.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => {
                cells.push(std::mem::take(&mut cell));
            }
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, ColumnType};

    fn account_schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            "accounts",
            vec![
                Column::new("account", ColumnType::Integer).key(),
                Column::new("currency", ColumnType::Currency).required(),
                Column::new("description", ColumnType::Text).required(),
                Column::new("tax_code", ColumnType::Text),
            ],
        ))
    }

    fn records(schema: &Arc<Schema>) -> Vec<Record> {
        vec![
            Record::new(Arc::clone(schema))
                .with("account", 1000)
                .with("currency", "USD")
                .with("description", "Cash"),
            Record::new(Arc::clone(schema))
                .with("account", 3000)
                .with("currency", "CHF")
                .with("description", "Equity"),
        ]
    }

    #[test]
    fn test_encode_aligns_columns() {
        let schema = account_schema();
        let text = encode(&records(&schema), &schema);
        assert_eq!(
            text,
            "account, currency, description\n\
             \u{20}  1000,      USD,        Cash\n\
             \u{20}  3000,      CHF,      Equity\n"
        );
    }

    #[test]
    fn test_all_null_optional_column_dropped() {
        let schema = account_schema();
        let text = encode(&records(&schema), &schema);
        assert!(!text.contains("tax_code"));
    }

    #[test]
    fn test_round_trip_is_stable() {
        let schema = account_schema();
        let text = encode(&records(&schema), &schema);
        let decoded = decode(&text, &schema, "accounts.csv").unwrap();
        assert_eq!(decoded, records(&schema));
        assert_eq!(encode(&decoded, &schema), text);
    }

    #[test]
    fn test_column_count_mismatch_names_line() {
        let schema = account_schema();
        let text = "account, currency, description\n1000, USD\n";
        let err = decode(text, &schema, "accounts.csv").unwrap_err();
        match err {
            LedgerError::SchemaValidation { partition, line, .. } => {
                assert_eq!(partition, "accounts.csv");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_currency_rejected() {
        let schema = account_schema();
        let text = "account, currency, description\n1000, us$, Cash\n";
        assert!(decode(text, &schema, "accounts.csv").is_err());
    }

    #[test]
    fn test_duplicate_header_column_rejected() {
        let schema = account_schema();
        let text = "account, currency, currency, description\n1000, USD, CHF, Cash\n";
        let err = decode(text, &schema, "accounts.csv").unwrap_err();
        match err {
            LedgerError::SchemaValidation { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.contains("duplicate column 'currency'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_required_column_rejected() {
        let schema = account_schema();
        let text = "account, description\n1000, Cash\n";
        assert!(decode(text, &schema, "accounts.csv").is_err());
    }

    #[test]
    fn test_quoted_comma_survives_round_trip() {
        let schema = account_schema();
        let rows = vec![
            Record::new(Arc::clone(&schema))
                .with("account", 1000)
                .with("currency", "USD")
                .with("description", "Cash, petty"),
        ];
        let text = encode(&rows, &schema);
        let decoded = decode(&text, &schema, "accounts.csv").unwrap();
        assert_eq!(decoded[0].get("description"), &Value::Text("Cash, petty".into()));
    }

    #[test]
    fn test_empty_text_decodes_empty() {
        let schema = account_schema();
        assert!(decode("", &schema, "accounts.csv").unwrap().is_empty());
    }
}
