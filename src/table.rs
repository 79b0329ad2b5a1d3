//! Normalizes the PIT JSON payload into a table and filters it down to large buy/sell
//! transactions.

use crate::error::{PipelineError, Result};
use anyhow::anyhow;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The payload field holding the sequence of transactions.
pub const DATA: &str = "data";

/// The transaction type column, e.g. "Buy", "Sell", "Pledge".
pub const TRANSACTION_TYPE: &str = "tdpTransactionType";

/// The number of securities acquired or disposed.
pub const SECURITIES_ACQUIRED: &str = "secAcq";

/// 25 lakh.
pub const DEFAULT_THRESHOLD: u64 = 2_500_000;

/// A rectangular table of JSON cells. Every row has exactly one cell per column; a cell that was
/// absent from its source object is `Value::Null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Builds a table from flat rows, taking the union of their keys in first-seen order.
    pub fn from_records(records: Vec<Vec<(String, Value)>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for record in &records {
            for (key, _) in record {
                if !index.contains_key(key) {
                    index.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|record| {
                let mut row = vec![Value::Null; columns.len()];
                for (key, value) in record {
                    row[index[&key]] = value;
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// The header followed by every row, each cell rendered as text.
    pub fn to_strings(&self) -> Vec<Vec<String>> {
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        out.push(self.columns.clone());
        out.extend(
            self.rows
                .iter()
                .map(|row| row.iter().map(render).collect::<Vec<_>>()),
        );
        out
    }
}

/// Renders a cell the way it is written to the CSV file and the sheet.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decides which rows survive the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    type_column: String,
    quantity_column: String,
    accepted_types: Vec<String>,
    threshold: Decimal,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            type_column: TRANSACTION_TYPE.to_string(),
            quantity_column: SECURITIES_ACQUIRED.to_string(),
            accepted_types: vec!["buy".to_string(), "sell".to_string()],
            threshold: Decimal::from(DEFAULT_THRESHOLD),
        }
    }
}

impl Criteria {
    /// Same as the default criteria but with a different quantity threshold.
    pub fn with_threshold(threshold: Decimal) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn threshold(&self) -> Decimal {
        self.threshold
    }

    fn accepts_type(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => self.accepted_types.contains(&normalize_type(s)),
            _ => false,
        }
    }
}

fn normalize_type(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Normalizes `payload` and filters it with `criteria`.
pub fn filter(payload: &Value, criteria: &Criteria) -> Result<Table> {
    let table = normalize(payload)?;
    filter_table(&table, criteria)
}

/// Flattens the `data` sequence of `payload` into a table. Nested objects become dotted column
/// names; arrays and scalars are kept as leaf cells.
pub fn normalize(payload: &Value) -> Result<Table> {
    let data = payload
        .get(DATA)
        .ok_or_else(|| PipelineError::schema(anyhow!("The payload has no '{DATA}' field")))?
        .as_array()
        .ok_or_else(|| PipelineError::schema(anyhow!("The '{DATA}' field is not a sequence")))?;

    let mut records = Vec::with_capacity(data.len());
    for (i, element) in data.iter().enumerate() {
        let object = element.as_object().ok_or_else(|| {
            PipelineError::schema(anyhow!("Element {i} of '{DATA}' is not an object"))
        })?;
        let mut record = Vec::new();
        flatten_into("", object, &mut record);
        records.push(record);
    }
    Ok(Table::from_records(records))
}

fn flatten_into(prefix: &str, object: &Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(&name, nested, out),
            leaf => out.push((name, leaf.clone())),
        }
    }
}

/// Keeps the rows whose type is accepted and whose coerced quantity exceeds the threshold. Kept
/// rows carry the coerced quantity. An empty table is returned unchanged; otherwise both columns
/// must exist.
pub fn filter_table(table: &Table, criteria: &Criteria) -> Result<Table> {
    if table.columns.is_empty() && table.rows.is_empty() {
        return Ok(Table::default());
    }
    let type_idx = table.column_index(&criteria.type_column).ok_or_else(|| {
        PipelineError::schema(anyhow!(
            "The '{}' column was not found in the data",
            criteria.type_column
        ))
    })?;
    let qty_idx = table.column_index(&criteria.quantity_column).ok_or_else(|| {
        PipelineError::schema(anyhow!(
            "The '{}' column was not found in the data",
            criteria.quantity_column
        ))
    })?;

    let rows = table
        .rows
        .iter()
        .filter(|row| criteria.accepts_type(&row[type_idx]))
        .filter_map(|row| {
            let quantity = coerce(&row[qty_idx])?;
            if !quantity.exceeds(criteria.threshold) {
                return None;
            }
            let mut row = row.clone();
            row[qty_idx] = Value::String(quantity.to_string());
            Some(row)
        })
        .collect();

    Ok(Table {
        columns: table.columns.clone(),
        rows,
    })
}

/// A numeric cell. Numbers outside the range of `Decimal` are held as floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantity {
    Exact(Decimal),
    Approx(f64),
}

impl Quantity {
    /// Whether this quantity is strictly greater than `threshold`.
    pub fn exceeds(&self, threshold: Decimal) -> bool {
        match self {
            Quantity::Exact(d) => *d > threshold,
            Quantity::Approx(f) => threshold.to_f64().is_some_and(|t| *f > t),
        }
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Quantity::Exact(d) => write!(f, "{}", d.normalize()),
            Quantity::Approx(n) => write!(f, "{n}"),
        }
    }
}

/// Interprets a cell as a number. Anything that is not a JSON number or a numeric string is
/// missing, as are NaN and infinities.
pub fn coerce(value: &Value) -> Option<Quantity> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    if let Ok(d) = Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)) {
        return Some(Quantity::Exact(d));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Quantity::Approx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{pit_payload, pit_row};
    use serde_json::json;

    #[test]
    fn test_scenario_a_keeps_only_large_buy() {
        let payload = pit_payload(vec![
            pit_row("Buy ", json!("3000000")),
            pit_row("sell", json!("100")),
            pit_row("pledge", json!("9999999")),
        ]);
        let table = filter(&payload, &Criteria::default()).unwrap();
        assert_eq!(1, table.row_count());
        let type_idx = table.column_index(TRANSACTION_TYPE).unwrap();
        let qty_idx = table.column_index(SECURITIES_ACQUIRED).unwrap();
        assert_eq!(json!("Buy "), table.rows()[0][type_idx]);
        assert_eq!(json!("3000000"), table.rows()[0][qty_idx]);
    }

    #[test]
    fn test_retention_rule() {
        let cases = [
            ("buy", json!(2_500_001), true),
            ("BUY", json!("2500001"), true),
            ("  Sell\t", json!(3.5e6), true),
            ("sell", json!("2.6e6"), true),
            ("buy", json!(2_500_000), false),
            ("buy", json!("2500000.00"), false),
            ("buy", json!("lots"), false),
            ("buy", json!("3,000,000"), false),
            ("buy", json!(""), false),
            ("buy", json!(null), false),
            ("buy", json!(true), false),
            ("pledge", json!(9_999_999), false),
            ("Revoke", json!("9999999"), false),
        ];
        for (kind, qty, kept) in cases {
            let payload = pit_payload(vec![pit_row(kind, qty.clone())]);
            let table = filter(&payload, &Criteria::default()).unwrap();
            assert_eq!(kept, !table.is_empty(), "type={kind:?} qty={qty}");
        }
    }

    #[test]
    fn test_missing_quantity_field_excludes_row() {
        let payload = json!({"data": [
            {"tdpTransactionType": "Buy", "secAcq": "3000000", "symbol": "A"},
            {"tdpTransactionType": "Buy", "symbol": "B"},
        ]});
        let table = filter(&payload, &Criteria::default()).unwrap();
        assert_eq!(1, table.row_count());
        let idx = table.column_index("symbol").unwrap();
        assert_eq!(json!("A"), table.rows()[0][idx]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let payload = pit_payload(vec![
            pit_row("Buy", json!("3000000.00")),
            pit_row("Sell", json!(4_000_000)),
            pit_row("Sell", json!("12")),
            pit_row("Pledge", json!("5000000")),
        ]);
        let once = filter(&payload, &Criteria::default()).unwrap();
        let twice = filter_table(&once, &Criteria::default()).unwrap();
        assert_eq!(2, once.row_count());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_columns_are_union_in_first_seen_order() {
        let payload = json!({"data": [
            {"tdpTransactionType": "Buy", "secAcq": "3000000", "symbol": "A"},
            {"company": "B Ltd", "tdpTransactionType": "Sell", "secAcq": 2600000},
        ]});
        let table = filter(&payload, &Criteria::default()).unwrap();
        assert_eq!(
            vec!["tdpTransactionType", "secAcq", "symbol", "company"],
            table.columns()
        );
        assert_eq!(Value::Null, table.rows()[0][3]);
        assert_eq!(Value::Null, table.rows()[1][2]);
        assert_eq!(json!("B Ltd"), table.rows()[1][3]);
    }

    #[test]
    fn test_nested_fields_are_flattened() {
        let payload = json!({"data": [{
            "tdpTransactionType": "Buy",
            "secAcq": "3000000",
            "acqMode": {"name": "Market", "detail": {"code": 7}},
            "tags": ["a", "b"],
        }]});
        let table = normalize(&payload).unwrap();
        assert!(table.column_index("acqMode.name").is_some());
        assert!(table.column_index("acqMode.detail.code").is_some());
        assert!(table.column_index("acqMode").is_none());
        let strings = table.to_strings();
        let tags = table.column_index("tags").unwrap();
        assert_eq!(r#"["a","b"]"#, strings[1][tags]);
    }

    #[test]
    fn test_missing_data_is_schema_error() {
        let err = filter(&json!({"rows": []}), &Criteria::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)), "{err}");
        let err = filter(&json!({"data": {"a": 1}}), &Criteria::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)), "{err}");
        let err = filter(&json!({"data": [1, 2]}), &Criteria::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)), "{err}");
    }

    #[test]
    fn test_missing_quantity_column_is_schema_error() {
        let payload = json!({"data": [{"tdpTransactionType": "Buy", "symbol": "A"}]});
        let err = filter(&payload, &Criteria::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
        assert!(err.to_string().contains(SECURITIES_ACQUIRED));
    }

    #[test]
    fn test_missing_type_column_is_schema_error() {
        let payload = json!({"data": [{"secAcq": "3000000"}]});
        let err = filter(&payload, &Criteria::default()).unwrap_err();
        assert!(err.to_string().contains(TRANSACTION_TYPE));
    }

    #[test]
    fn test_empty_data_is_empty_table() {
        let table = filter(&json!({"data": []}), &Criteria::default()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_custom_threshold() {
        let payload = pit_payload(vec![pit_row("Buy", json!("150"))]);
        let table = filter(&payload, &Criteria::with_threshold(Decimal::from(100))).unwrap();
        assert_eq!(1, table.row_count());
    }

    #[test]
    fn test_quantities_beyond_decimal_range() {
        let payload = pit_payload(vec![
            pit_row("Buy", json!("1e30")),
            pit_row("Sell", json!(1e30)),
            pit_row("Buy", json!("-1e30")),
            pit_row("Sell", json!("inf")),
            pit_row("Buy", json!("NaN")),
        ]);
        let once = filter(&payload, &Criteria::default()).unwrap();
        assert_eq!(2, once.row_count());
        let qty = once.column_index(SECURITIES_ACQUIRED).unwrap();
        assert_eq!(Some(Quantity::Approx(1e30)), coerce(&once.rows()[0][qty]));
        let twice = filter_table(&once, &Criteria::default()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(Some(Quantity::Exact(Decimal::from(12))), coerce(&json!(" 12 ")));
        assert_eq!(Some(Quantity::Exact(Decimal::from(3000))), coerce(&json!("3e3")));
        assert_eq!(None, coerce(&json!("")));
        assert_eq!(None, coerce(&json!("12 shares")));
        assert_eq!(None, coerce(&json!(true)));
        assert!(!Quantity::Approx(-1e30).exceeds(Decimal::from(DEFAULT_THRESHOLD)));
    }

    #[test]
    fn test_render() {
        assert_eq!("", render(&Value::Null));
        assert_eq!("x y", render(&json!("x y")));
        assert_eq!("12", render(&json!(12)));
        assert_eq!("1.5", render(&json!(1.5)));
        assert_eq!("false", render(&json!(false)));
    }
}
