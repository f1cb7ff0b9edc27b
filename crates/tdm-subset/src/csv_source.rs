use std::path::{Path, PathBuf};

use tdm_core::{Row, Table, Value};
use tracing::info;

use crate::source::{InMemoryRowSource, RowRequest, RowSource, SourceError};

/// Reads `<table>.csv` files (header row first) from a directory.
///
/// A file is parsed once, on first use, with each cell typed by its column's
/// `data_type`. An empty cell is `Null` in a nullable column and an empty
/// string in a non-nullable one, matching how batches are written back out.
#[derive(Debug, Clone)]
pub struct CsvRowSource {
    dir: PathBuf,
    loaded: InMemoryRowSource,
}

impl CsvRowSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: InMemoryRowSource::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, table: &Table) -> PathBuf {
        let qualified = self.dir.join(format!("{}.csv", table.qualified_name()));
        if qualified.exists() {
            qualified
        } else {
            self.dir.join(format!("{}.csv", table.name))
        }
    }

    fn load(&mut self, table: &Table) -> Result<(), SourceError> {
        let path = self.path_for(table);
        if !path.exists() {
            return Err(SourceError::Unavailable {
                table: table.qualified_name(),
                message: format!("missing file {}", path.display()),
            });
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let headers = reader.headers()?.clone();
        let mut positions = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let position = headers
                .iter()
                .position(|header| header.trim() == column.name)
                .ok_or_else(|| SourceError::Unavailable {
                    table: table.qualified_name(),
                    message: format!("{} lacks column '{}'", path.display(), column.name),
                })?;
            positions.push(position);
        }

        let mut rows: Vec<Row> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = table
                .columns
                .iter()
                .zip(&positions)
                .map(|(column, position)| {
                    let raw = record.get(*position).unwrap_or("");
                    if raw.is_empty() && !column.nullable {
                        Value::Text(String::new())
                    } else {
                        Value::parse_typed(raw, &column.data_type)
                    }
                })
                .collect();
            rows.push(row);
        }

        info!(table = %table.qualified_name(), rows = rows.len(), path = %path.display(), "loaded csv table");
        self.loaded.insert(table.qualified_name(), rows);
        Ok(())
    }
}

impl RowSource for CsvRowSource {
    fn fetch(&mut self, table: &Table, request: &RowRequest) -> Result<Vec<Row>, SourceError> {
        if !self.loaded.contains(table) {
            self.load(table)?;
        }
        self.loaded.fetch(table, request)
    }
}
