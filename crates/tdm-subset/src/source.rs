use std::collections::{BTreeMap, HashSet};

use tdm_core::{Row, Table, Value};
use thiserror::Error;
use tracing::debug;

/// Failure reported by a row source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("table '{table}' unavailable: {message}")]
    Unavailable { table: String, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// What to fetch from one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRequest {
    /// Equality predicates, all of which must hold.
    pub filters: BTreeMap<String, Value>,
    /// Restrict to rows whose column value is one of the given keys.
    pub key_in: Option<(String, Vec<Value>)>,
    pub limit: Option<usize>,
}

impl RowRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_filters(mut self, filters: BTreeMap<String, Value>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_keys(mut self, column: impl Into<String>, keys: Vec<Value>) -> Self {
        self.key_in = Some((column.into(), keys));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate the request against rows already in memory, in table column order.
    pub fn select<'a>(
        &self,
        table: &Table,
        rows: impl IntoIterator<Item = &'a Row>,
    ) -> Result<Vec<Row>, SourceError> {
        let mut predicates = Vec::with_capacity(self.filters.len());
        for (column, value) in &self.filters {
            predicates.push((column_index(table, column)?, value));
        }
        let key_in = match &self.key_in {
            Some((column, keys)) => Some((
                column_index(table, column)?,
                keys.iter().collect::<HashSet<&Value>>(),
            )),
            None => None,
        };

        let limit = self.limit.unwrap_or(usize::MAX);
        let mut selected = Vec::new();
        for row in rows {
            if selected.len() >= limit {
                break;
            }
            let matches_filters = predicates
                .iter()
                .all(|(idx, value)| row.get(*idx) == Some(*value));
            let matches_keys = key_in
                .as_ref()
                .is_none_or(|(idx, keys)| row.get(*idx).is_some_and(|value| keys.contains(value)));
            if matches_filters && matches_keys {
                selected.push(row.clone());
            }
        }
        Ok(selected)
    }
}

fn column_index(table: &Table, column: &str) -> Result<usize, SourceError> {
    table.column_index(column).ok_or_else(|| {
        SourceError::InvalidRequest(format!(
            "table '{}' has no column '{}'",
            table.qualified_name(),
            column
        ))
    })
}

/// Where extraction reads rows from. The engine never builds queries itself.
pub trait RowSource {
    /// Rows of `table` matching `request`, in the table's column order.
    fn fetch(&mut self, table: &Table, request: &RowRequest) -> Result<Vec<Row>, SourceError>;
}

/// Rows held in memory, keyed by table name or `namespace.name`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRowSource {
    tables: BTreeMap<String, Vec<Row>>,
    fetches: usize,
}

impl InMemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, rows: Vec<Row>) {
        self.tables.insert(table.into(), rows);
    }

    pub fn with_table(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.insert(table, rows);
        self
    }

    pub fn contains(&self, table: &Table) -> bool {
        self.rows_of(table).is_some()
    }

    /// Number of fetch calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    fn rows_of(&self, table: &Table) -> Option<&Vec<Row>> {
        self.tables
            .get(&table.qualified_name())
            .or_else(|| self.tables.get(&table.name))
    }
}

impl RowSource for InMemoryRowSource {
    fn fetch(&mut self, table: &Table, request: &RowRequest) -> Result<Vec<Row>, SourceError> {
        self.fetches += 1;
        let rows = self.rows_of(table).ok_or_else(|| SourceError::Unavailable {
            table: table.qualified_name(),
            message: "no rows loaded for table".to_string(),
        })?;
        let selected = request.select(table, rows)?;
        debug!(table = %table.name, rows = selected.len(), "in-memory fetch");
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdm_core::Column;

    fn users() -> Table {
        Table::new(
            "",
            "users",
            vec![
                Column::new("id", "integer", false),
                Column::new("country", "text", true),
            ],
            vec!["id".into()],
        )
    }

    fn source() -> InMemoryRowSource {
        InMemoryRowSource::new().with_table(
            "users",
            vec![
                vec![Value::Int(1), Value::text("BR")],
                vec![Value::Int(2), Value::text("US")],
                vec![Value::Int(3), Value::text("BR")],
            ],
        )
    }

    #[test]
    fn filters_keys_and_limit_combine() {
        let mut source = source();
        let mut filters = BTreeMap::new();
        filters.insert("country".to_string(), Value::text("BR"));

        let rows = source
            .fetch(&users(), &RowRequest::all().with_filters(filters.clone()))
            .expect("fetch");
        assert_eq!(rows.len(), 2);

        let rows = source
            .fetch(
                &users(),
                &RowRequest::all()
                    .with_filters(filters)
                    .with_keys("id", vec![Value::Int(2), Value::Int(3)]),
            )
            .expect("fetch");
        assert_eq!(rows, vec![vec![Value::Int(3), Value::text("BR")]]);

        let rows = source
            .fetch(&users(), &RowRequest::all().with_limit(1))
            .expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(source.fetch_count(), 3);
    }

    #[test]
    fn unknown_filter_column_is_rejected() {
        let mut filters = BTreeMap::new();
        filters.insert("missing".to_string(), Value::Int(1));
        let err = source()
            .fetch(&users(), &RowRequest::all().with_filters(filters))
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidRequest(_)));
    }

    #[test]
    fn missing_table_is_unavailable() {
        let orders = Table::new("", "orders", vec![Column::new("id", "integer", false)], vec![]);
        let err = source().fetch(&orders, &RowRequest::all()).unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }
}
