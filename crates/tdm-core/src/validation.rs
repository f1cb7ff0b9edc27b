use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::schema::Table;

/// Validate internal consistency of a table snapshot.
///
/// This checks:
/// - duplicate `(namespace, name)` tables
/// - duplicate column names within a table
/// - primary key columns exist
pub fn validate_tables(tables: &[Table]) -> Result<()> {
    let mut catalog: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();

    for table in tables {
        let identity = (table.namespace.as_str(), table.name.as_str());
        if catalog.contains_key(&identity) {
            return Err(Error::InvalidSchema(format!(
                "duplicate table name: {}",
                table.qualified_name()
            )));
        }

        let mut columns = BTreeSet::new();
        for column in &table.columns {
            if !columns.insert(column.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate column name: {}.{}",
                    table.qualified_name(),
                    column.name
                )));
            }
        }

        for column in &table.primary_key {
            if !columns.contains(column.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "primary key column not found: {}.{}",
                    table.qualified_name(),
                    column
                )));
            }
        }

        catalog.insert(identity, columns);
    }

    Ok(())
}
