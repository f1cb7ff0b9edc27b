use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tdm_core::{Batches, SchemaGraph};
use tracing::{info, warn};

use crate::error::Result;
use crate::registry::{MaskingTransformRegistry, RowContext};
use crate::rules::MaskingRuleSet;

/// A non-FK-safe rule was applied to a column that takes part in a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingIntegrityWarning {
    pub table: String,
    pub column: String,
    pub rule: String,
    pub relationship: String,
}

impl fmt::Display for MaskingIntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rule '{}' on {}.{} may break relationship {}",
            self.rule, self.table, self.column, self.relationship
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRule {
    pub table: String,
    pub column: String,
    pub rule: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMaskStats {
    pub table: String,
    pub column: String,
    pub rule: String,
    pub masked_cells: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingReport {
    pub columns: Vec<ColumnMaskStats>,
    pub warnings: Vec<MaskingIntegrityWarning>,
    pub skipped: Vec<SkippedRule>,
}

impl MaskingReport {
    pub fn masked_cells(&self) -> usize {
        self.columns.iter().map(|stats| stats.masked_cells).sum()
    }
}

struct PlannedColumn {
    stats_idx: usize,
    column_idx: usize,
}

/// Apply a rule set to batches in place.
///
/// Every rule name is resolved before any cell changes, and batches are only
/// replaced once every rule succeeded, so an error leaves them untouched.
/// Row counts never change.
pub fn mask_batches(
    registry: &MaskingTransformRegistry,
    rules: &MaskingRuleSet,
    graph: &SchemaGraph,
    batches: &mut Batches,
) -> Result<MaskingReport> {
    for rule in &rules.rules {
        registry.resolve(&rule.rule)?;
    }

    let mut report = MaskingReport::default();
    let mut plan: BTreeMap<String, Vec<PlannedColumn>> = BTreeMap::new();

    for rule in &rules.rules {
        let key = graph
            .table_key(&rule.table)
            .unwrap_or(rule.table.as_str())
            .to_string();
        let skip = |reason: &str| SkippedRule {
            table: rule.table.clone(),
            column: rule.column.clone(),
            rule: rule.rule.clone(),
            reason: reason.to_string(),
        };

        let Some(batch) = batches.get(&key) else {
            report.skipped.push(skip("table not present in batches"));
            continue;
        };
        let Some(column_idx) = batch.column_index(&rule.column) else {
            report.skipped.push(skip("column not present in batch"));
            continue;
        };

        if !registry.is_fk_safe(&rule.rule)? {
            if let Some(relationship) = graph.relationships().iter().find(|rel| {
                (rel.parent_table == key && rel.parent_column == rule.column)
                    || (rel.child_table == key && rel.child_column == rule.column)
            }) {
                let warning = MaskingIntegrityWarning {
                    table: key.clone(),
                    column: rule.column.clone(),
                    rule: rule.rule.clone(),
                    relationship: relationship.to_string(),
                };
                warn!(
                    table = %warning.table,
                    column = %warning.column,
                    rule = %warning.rule,
                    relationship = %warning.relationship,
                    "masking rule is not FK-safe"
                );
                report.warnings.push(warning);
            }
        }

        report.columns.push(ColumnMaskStats {
            table: key.clone(),
            column: rule.column.clone(),
            rule: rule.rule.clone(),
            masked_cells: 0,
        });
        plan.entry(key).or_default().push(PlannedColumn {
            stats_idx: report.columns.len() - 1,
            column_idx,
        });
    }

    // Mask into copies so a failing transform leaves the caller's batches untouched.
    let mut masked_batches = Vec::with_capacity(plan.len());
    for (key, planned) in &plan {
        let Some(batch) = batches.get(key) else {
            continue;
        };
        let mut masked_batch = batch.clone();
        let column_names = &batch.column_names;
        for (row, original) in masked_batch.rows.iter_mut().zip(&batch.rows) {
            for column in planned {
                let Some(value) = original.get(column.column_idx) else {
                    continue;
                };
                let stats = &mut report.columns[column.stats_idx];
                let ctx = RowContext {
                    table: key,
                    column: &column_names[column.column_idx],
                    column_names,
                    row: original,
                };
                let masked = registry.apply(&stats.rule, value, &ctx)?;
                if !value.is_null() {
                    stats.masked_cells += 1;
                }
                row[column.column_idx] = masked;
            }
        }
        info!(table = %key, rows = masked_batch.rows.len(), columns = planned.len(), "masked table");
        masked_batches.push((key.clone(), masked_batch));
    }

    for (key, masked_batch) in masked_batches {
        batches.insert(key, masked_batch);
    }

    Ok(report)
}
