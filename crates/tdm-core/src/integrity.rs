use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::graph::SchemaGraph;
use crate::schema::Relationship;
use crate::value::{Batches, RowBatch, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipViolations {
    pub relationship: Relationship,
    pub checked_rows: usize,
    pub violations: usize,
}

/// FK violations per relationship over a set of batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub relationships: Vec<RelationshipViolations>,
}

impl IntegrityReport {
    pub fn total_violations(&self) -> usize {
        self.relationships.iter().map(|entry| entry.violations).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.total_violations() == 0
    }
}

/// Count rows whose non-null FK value has no parent row.
///
/// A missing child batch is skipped; a missing parent batch makes every
/// non-null FK value a violation.
pub fn check_integrity(graph: &SchemaGraph, batches: &Batches) -> Result<IntegrityReport> {
    let mut report = IntegrityReport::default();

    for relationship in graph.relationships() {
        let Some(child) = batches.get(&relationship.child_table) else {
            continue;
        };
        let key_type = parent_key_type(graph, relationship);
        let parent_values = parent_key_set(batches, relationship, key_type)?;
        let fk_idx = column_idx(child, &relationship.child_column)?;

        let mut checked_rows = 0;
        let mut violations = 0;
        for row in &child.rows {
            let Some(value) = row.get(fk_idx) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            checked_rows += 1;
            if !parent_values.contains(&as_key(value, key_type)) {
                violations += 1;
            }
        }

        report.relationships.push(RelationshipViolations {
            relationship: relationship.clone(),
            checked_rows,
            violations,
        });
    }

    Ok(report)
}

/// Drop rows with dangling FK values until none remain; returns dropped rows per table.
pub fn prune_dangling(graph: &SchemaGraph, batches: &mut Batches) -> Result<BTreeMap<String, usize>> {
    let mut dropped: BTreeMap<String, usize> = BTreeMap::new();

    loop {
        let mut changed = false;
        for relationship in graph.relationships() {
            if !batches.contains_key(&relationship.child_table) {
                continue;
            }
            let key_type = parent_key_type(graph, relationship);
            let parent_values = parent_key_set(batches, relationship, key_type)?;
            let Some(child) = batches.get_mut(&relationship.child_table) else {
                continue;
            };
            let fk_idx = column_idx(child, &relationship.child_column)?;

            let before = child.rows.len();
            child
                .rows
                .retain(|row| {
                    row.get(fk_idx)
                        .is_none_or(|value| {
                            value.is_null() || parent_values.contains(&as_key(value, key_type))
                        })
                });
            let removed = before - child.rows.len();
            if removed > 0 {
                warn!(
                    table = %relationship.child_table,
                    relationship = %relationship,
                    rows = removed,
                    "dropped rows with dangling foreign keys"
                );
                *dropped.entry(relationship.child_table.clone()).or_insert(0) += removed;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    Ok(dropped)
}

/// Declared type of the parent column; FK values on both sides are compared in it.
fn parent_key_type<'g>(graph: &'g SchemaGraph, relationship: &Relationship) -> Option<&'g str> {
    graph
        .table(&relationship.parent_table)
        .and_then(|table| table.column(&relationship.parent_column))
        .map(|column| column.data_type.as_str())
}

fn as_key(value: &Value, key_type: Option<&str>) -> Value {
    match key_type {
        Some(data_type) => value.coerce_to(data_type),
        None => value.clone(),
    }
}

fn parent_key_set(
    batches: &Batches,
    relationship: &Relationship,
    key_type: Option<&str>,
) -> Result<HashSet<Value>> {
    let Some(parent) = batches.get(&relationship.parent_table) else {
        return Ok(HashSet::new());
    };
    let idx = column_idx(parent, &relationship.parent_column)?;
    Ok(parent
        .rows
        .iter()
        .filter_map(|row| row.get(idx))
        .filter(|value| !value.is_null())
        .map(|value| as_key(value, key_type))
        .collect())
}

fn column_idx(batch: &RowBatch, column: &str) -> Result<usize> {
    batch.column_index(column).ok_or_else(|| {
        Error::InvalidBatch(format!(
            "batch '{}' has no column '{}'",
            batch.table_name, column
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Table};

    fn graph() -> SchemaGraph {
        SchemaGraph::build(
            vec![
                Table::new("", "customers", vec![Column::new("id", "integer", false)], vec!["id".into()]),
                Table::new(
                    "",
                    "orders",
                    vec![Column::new("id", "integer", false), Column::new("customer_id", "integer", true)],
                    vec!["id".into()],
                ),
                Table::new(
                    "",
                    "items",
                    vec![Column::new("id", "integer", false), Column::new("order_id", "integer", false)],
                    vec!["id".into()],
                ),
            ],
            vec![
                Relationship::new("customers", "id", "orders", "customer_id"),
                Relationship::new("orders", "id", "items", "order_id"),
            ],
        )
        .expect("graph")
    }

    fn batch(name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> RowBatch {
        RowBatch {
            table_name: name.to_string(),
            column_names: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn sample() -> Batches {
        let mut batches = Batches::new();
        batches.insert("customers".into(), batch("customers", &["id"], vec![vec![Value::Int(1)]]));
        batches.insert(
            "orders".into(),
            batch(
                "orders",
                &["id", "customer_id"],
                vec![
                    vec![Value::Int(10), Value::Int(1)],
                    vec![Value::Int(11), Value::Int(2)],
                    vec![Value::Int(12), Value::Null],
                ],
            ),
        );
        batches.insert(
            "items".into(),
            batch(
                "items",
                &["id", "order_id"],
                vec![vec![Value::Int(100), Value::Int(10)], vec![Value::Int(101), Value::Int(11)]],
            ),
        );
        batches
    }

    #[test]
    fn counts_dangling_values_and_ignores_nulls() {
        let report = check_integrity(&graph(), &sample()).expect("check");
        assert_eq!(report.total_violations(), 1);
        assert_eq!(report.relationships[0].checked_rows, 2);
    }

    #[test]
    fn prune_cascades_to_dependents() {
        let graph = graph();
        let mut batches = sample();
        let dropped = prune_dangling(&graph, &mut batches).expect("prune");
        assert_eq!(dropped.get("orders"), Some(&1));
        assert_eq!(dropped.get("items"), Some(&1));
        assert!(check_integrity(&graph, &batches).expect("check").is_clean());
    }

    #[test]
    fn keys_of_different_kinds_match_by_content() {
        let uuid = "0b7e2c6a-1f3d-4a5b-9c8d-7e6f5a4b3c2d";
        let graph = SchemaGraph::build(
            vec![
                Table::new("", "accounts", vec![Column::new("id", "uuid", false)], vec!["id".into()]),
                Table::new(
                    "",
                    "payments",
                    vec![Column::new("id", "numeric", false), Column::new("account_id", "text", false)],
                    vec!["id".into()],
                ),
                Table::new(
                    "",
                    "refunds",
                    vec![Column::new("id", "integer", false), Column::new("payment_id", "integer", false)],
                    vec!["id".into()],
                ),
            ],
            vec![
                Relationship::new("accounts", "id", "payments", "account_id"),
                Relationship::new("payments", "id", "refunds", "payment_id"),
            ],
        )
        .expect("graph");

        let mut batches = Batches::new();
        batches.insert("accounts".into(), batch("accounts", &["id"], vec![vec![Value::uuid(uuid)]]));
        batches.insert(
            "payments".into(),
            batch(
                "payments",
                &["id", "account_id"],
                vec![vec![Value::Float(1.0), Value::text(uuid)]],
            ),
        );
        batches.insert(
            "refunds".into(),
            batch("refunds", &["id", "payment_id"], vec![vec![Value::Int(5), Value::Int(1)]]),
        );

        assert!(check_integrity(&graph, &batches).expect("check").is_clean());
        let dropped = prune_dangling(&graph, &mut batches).expect("prune");
        assert!(dropped.is_empty());
        assert_eq!(batches["refunds"].len(), 1);
    }

    #[test]
    fn missing_parent_batch_counts_every_value() {
        let mut batches = sample();
        batches.remove("customers");
        let report = check_integrity(&graph(), &batches).expect("check");
        assert_eq!(report.relationships[0].violations, 2);
    }
}
