use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tdm_core::{Batches, RowBatch};
use tracing::debug;

use crate::errors::Result;

/// One CSV file produced by [`write_batches_csv`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenBatch {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
}

/// Write one batch as CSV: a header line, then rows in batch order.
///
/// Nulls become empty cells. Returns the size of the file written.
pub fn write_batch_csv(path: &Path, batch: &RowBatch) -> std::result::Result<u64, csv::Error> {
    let file = BufWriter::new(File::create(path).map_err(csv::Error::from)?);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    writer.write_record(&batch.column_names)?;
    for row in &batch.rows {
        writer.write_record(row.iter().map(|value| value.render()))?;
    }

    let file = writer.into_inner().map_err(|err| err.into_error())?;
    let file = file.into_inner().map_err(|err| err.into_error())?;
    Ok(file.metadata()?.len())
}

/// Write every batch to `<dir>/<table key>.csv`, creating `dir` if needed.
pub fn write_batches_csv(dir: &Path, batches: &Batches) -> Result<BTreeMap<String, WrittenBatch>> {
    std::fs::create_dir_all(dir)?;
    let mut written = BTreeMap::new();
    for (key, batch) in batches {
        let path = dir.join(format!("{key}.csv"));
        let bytes = write_batch_csv(&path, batch)?;
        debug!(table = %key, rows = batch.len(), bytes, path = %path.display(), "batch written");
        written.insert(
            key.clone(),
            WrittenBatch {
                path,
                rows: batch.len(),
                bytes,
            },
        );
    }
    Ok(written)
}

/// Total size of a set of written files.
pub fn written_bytes(written: &BTreeMap<String, WrittenBatch>) -> u64 {
    written.values().map(|file| file.bytes).sum()
}

#[cfg(test)]
mod tests {
    use tdm_core::Value;

    use super::*;

    #[test]
    fn writes_header_and_reports_file_size() {
        let dir = std::env::temp_dir().join(format!("tdm_generate_csv_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join("customer.csv");

        let mut batch = RowBatch::new("customer", vec!["id".into(), "email".into()]);
        batch
            .push(vec![Value::Int(1), Value::text("a@example.com")])
            .expect("push");
        batch.push(vec![Value::Int(2), Value::Null]).expect("push");

        let bytes = write_batch_csv(&path, &batch).expect("write");
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "id,email\n1,a@example.com\n2,\n");
        assert_eq!(bytes, contents.len() as u64);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
