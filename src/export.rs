//! Tabular export
//!
//! Rows are the JSON form of entity models, so a column key is the camelCase
//! field name the API already uses.

use serde_json::Value;

use crate::error::{AppError, AppResult};

/// One exported column: JSON key and header label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub key: &'static str,
    pub label: &'static str,
}

impl Column {
    pub const fn new(key: &'static str, label: &'static str) -> Self {
        Self { key, label }
    }
}

/// Text of one cell
pub fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(nested) => nested.to_string(),
    }
}

/// Render rows as CSV with a header row of labels
pub fn export_csv(columns: &[Column], rows: &[Value]) -> AppResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(columns.iter().map(|c| c.label))
        .map_err(csv_error)?;
    for row in rows {
        writer
            .write_record(columns.iter().map(|c| cell(row.get(c.key))))
            .map_err(csv_error)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(e.to_string()))
}

fn csv_error(err: csv::Error) -> AppError {
    AppError::Internal(format!("CSV error: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COLUMNS: [Column; 4] = [
        Column::new("name", "Nome"),
        Column::new("amount", "Valor"),
        Column::new("active", "Ativo"),
        Column::new("meta", "Dados"),
    ];

    #[test]
    fn test_header_and_rows() {
        let rows = vec![
            json!({"name": "Aço", "amount": 12.5, "active": true, "meta": {"a": 1}}),
            json!({"name": "Cobre", "amount": 3, "active": false, "meta": null}),
        ];
        let out = export_csv(&COLUMNS, &rows).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Nome,Valor,Ativo,Dados");
        assert_eq!(lines[1], r#"Aço,12.5,true,"{""a"":1}""#);
        assert_eq!(lines[2], "Cobre,3,false,");
    }

    #[test]
    fn test_missing_keys_are_empty() {
        let out = export_csv(&COLUMNS, &[json!({"name": "x"})]).unwrap();
        assert_eq!(out.lines().nth(1), Some("x,,,"));
    }

    #[test]
    fn test_quotes_separators() {
        let out = export_csv(&COLUMNS[..1], &[json!({"name": "a, \"b\""})]).unwrap();
        assert_eq!(out.lines().nth(1), Some(r#""a, ""b""""#));
    }

    #[test]
    fn test_empty_rows_still_have_header() {
        let out = export_csv(&COLUMNS[..2], &[]).unwrap();
        assert_eq!(out, "Nome,Valor\n");
    }
}
