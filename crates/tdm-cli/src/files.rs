use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tdm_core::{Batches, RowBatch, SchemaGraph, SchemaSnapshot};
use tdm_subset::{CsvRowSource, RowRequest, RowSource};
use tracing::debug;

use crate::CliError;

pub fn read_to_string(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    Ok(serde_json::from_str(&read_to_string(path)?)?)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CliError> {
    let io_error = |source| CliError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
    }
    let file = File::create(path).map_err(io_error)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

/// Parse `schema.json`, classify its columns and build the graph.
pub fn load_graph(path: &Path) -> Result<SchemaGraph, CliError> {
    let snapshot: SchemaSnapshot = read_json(path)?;
    Ok(snapshot.into_graph()?)
}

/// Read every table of `graph` that has a CSV file in `dir`.
pub fn read_batches(graph: &SchemaGraph, dir: &Path) -> Result<Batches, CliError> {
    let mut source = CsvRowSource::new(dir);
    let mut batches = Batches::new();
    for key in graph.table_keys() {
        let Some(table) = graph.table(key) else {
            continue;
        };
        let has_file = dir.join(format!("{key}.csv")).exists()
            || dir.join(format!("{}.csv", table.name)).exists();
        if !has_file {
            debug!(table = %key, dir = %dir.display(), "no csv file, table skipped");
            continue;
        }
        let rows = source.fetch(table, &RowRequest::all())?;
        let mut batch = RowBatch::new(key.clone(), table.column_names());
        for row in rows {
            batch.push(row)?;
        }
        batches.insert(key.clone(), batch);
    }
    Ok(batches)
}
