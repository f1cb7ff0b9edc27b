use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single cell value.
///
/// Values are totally ordered and hashable so they can be used as members of
/// key sets; floats compare with `total_cmp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Text(String),
    /// Canonical hyphenated text form. Deserialization never yields this variant.
    Uuid(String),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn uuid(value: impl Into<String>) -> Self {
        Value::Uuid(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value.as_str()),
            Value::Uuid(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Canonical string form used for hashing, masking and CSV output.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(value) => value.to_string(),
            Value::Int(value) => value.to_string(),
            Value::Float(value) => value.to_string(),
            Value::Text(value) => value.clone(),
            Value::Uuid(value) => value.clone(),
            Value::Date(value) => value.format("%Y-%m-%d").to_string(),
            Value::Time(value) => value.format("%H:%M:%S").to_string(),
            Value::Timestamp(value) => value.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Parse a raw text cell according to a column's declared data type.
    ///
    /// Empty strings become `Null`; unparsable values are kept as text.
    pub fn parse_typed(raw: &str, data_type: &str) -> Value {
        if raw.is_empty() {
            return Value::Null;
        }
        let data_type = data_type
            .split('(')
            .next()
            .unwrap_or(data_type)
            .trim()
            .to_lowercase();
        let parsed = match data_type.as_str() {
            "smallint" | "integer" | "int" | "int4" | "int8" | "bigint" | "serial"
            | "bigserial" => raw.trim().parse::<i64>().ok().map(Value::Int),
            "real" | "double precision" | "float" | "float8" | "numeric" | "decimal" => {
                raw.trim().parse::<f64>().ok().map(Value::Float)
            }
            "boolean" | "bool" => match raw.trim().to_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "f" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            "uuid" => Some(Value::uuid(raw.trim())),
            "date" => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .ok()
                .map(Value::Date),
            "time" | "time without time zone" => NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S")
                .ok()
                .map(Value::Time),
            "timestamp" | "timestamp without time zone" | "timestamp with time zone" => {
                NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S"))
                    .ok()
                    .map(Value::Timestamp)
            }
            _ => None,
        };
        parsed.unwrap_or_else(|| Value::Text(raw.to_string()))
    }

    /// Re-read this value as `data_type` so keys of different kinds compare by content.
    pub fn coerce_to(&self, data_type: &str) -> Value {
        match self {
            Value::Null => Value::Null,
            Value::Text(raw) => Value::parse_typed(raw, data_type),
            other => Value::parse_typed(&other.render(), data_type),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Date(_) => 4,
            Value::Time(_) => 5,
            Value::Timestamp(_) => 6,
            Value::Uuid(_) => 7,
            Value::Text(_) => 8,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(value) => value.hash(state),
            Value::Int(value) => value.hash(state),
            Value::Float(value) => value.to_bits().hash(state),
            Value::Date(value) => value.hash(state),
            Value::Time(value) => value.hash(state),
            Value::Timestamp(value) => value.hash(state),
            Value::Uuid(value) => value.hash(state),
            Value::Text(value) => value.hash(state),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// One row, in the column order of its batch.
pub type Row = Vec<Value>;

/// Batches keyed by table key.
pub type Batches = BTreeMap<String, RowBatch>;

/// Columnar in-memory table instance produced by extraction or generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    pub table_name: String,
    pub column_names: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowBatch {
    pub fn new(table_name: impl Into<String>, column_names: Vec<String>) -> Self {
        Self {
            table_name: table_name.into(),
            column_names,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.column_names.iter().position(|name| name == column)
    }

    /// All values of a column, in row order.
    pub fn column_values(&self, column: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().filter_map(|row| row.get(idx)).collect())
    }

    /// Push a row after checking its width against the header.
    pub fn push(&mut self, row: Row) -> Result<()> {
        if row.len() != self.column_names.len() {
            return Err(Error::InvalidBatch(format!(
                "row for '{}' has {} values, expected {}",
                self.table_name,
                row.len(),
                self.column_names.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Key of a row over the given column indices (the whole row when empty).
    pub fn key_of(row: &[Value], key_columns: &[usize]) -> Vec<Value> {
        if key_columns.is_empty() {
            return row.to_vec();
        }
        key_columns
            .iter()
            .map(|idx| row.get(*idx).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn values_order_across_kinds_and_floats() {
        let mut set = BTreeSet::new();
        set.insert(Value::Float(f64::NAN));
        set.insert(Value::Float(f64::NAN));
        set.insert(Value::Int(3));
        set.insert(Value::Null);
        assert_eq!(set.len(), 3);
        assert_eq!(set.iter().next(), Some(&Value::Null));
    }

    #[test]
    fn parse_typed_respects_data_type() {
        assert_eq!(Value::parse_typed("42", "integer"), Value::Int(42));
        assert_eq!(Value::parse_typed("", "integer"), Value::Null);
        assert_eq!(Value::parse_typed("t", "boolean"), Value::Bool(true));
        assert_eq!(
            Value::parse_typed("abc", "integer"),
            Value::Text("abc".to_string())
        );
        assert_eq!(
            Value::parse_typed("2024-02-01", "date").render(),
            "2024-02-01"
        );
    }

    #[test]
    fn coerce_reads_values_in_the_target_kind() {
        assert_eq!(Value::Float(7.0).coerce_to("integer"), Value::Int(7));
        assert_eq!(Value::Int(7).coerce_to("numeric"), Value::Float(7.0));
        assert_eq!(Value::text("a1").coerce_to("uuid"), Value::uuid("a1"));
        assert_eq!(Value::uuid("a1").coerce_to("text"), Value::text("a1"));
        assert_eq!(Value::Null.coerce_to("integer"), Value::Null);
    }

    #[test]
    fn push_rejects_wrong_width() {
        let mut batch = RowBatch::new("users", vec!["id".to_string(), "email".to_string()]);
        assert!(batch.push(vec![Value::Int(1)]).is_err());
        assert!(batch.push(vec![Value::Int(1), Value::Null]).is_ok());
        assert_eq!(batch.len(), 1);
    }
}
