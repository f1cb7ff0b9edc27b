use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tdm_core::{
    Batches, Relationship, RowBatch, SchemaGraph, SemanticType, Table, UnifiedSchema, Value,
    prune_dangling,
};
use tracing::{debug, info, warn};

use crate::errors::{GenerationError, Result};
use crate::provider::{ValueProvider, random_uuid};

/// Requested rows per entity; `"*"` applies to entities without their own entry.
pub type RowCounts = BTreeMap<String, u64>;

pub const DEFAULT_ROWS: u64 = 1_000;
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    pub seed: u64,
    pub default_rows: u64,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            default_rows: DEFAULT_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity: String,
    pub requested_rows: u64,
    pub generated_rows: u64,
    /// Why fewer rows than requested were produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-run summary returned next to the batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub seed: u64,
    pub entities: Vec<EntityReport>,
    pub dropped_rows: BTreeMap<String, usize>,
    pub deferred: Vec<Relationship>,
}

impl GenerationReport {
    pub fn total_rows(&self) -> u64 {
        self.entities.iter().map(|entity| entity.generated_rows).sum()
    }
}

/// Produces FK-consistent synthetic batches for a unified schema.
#[derive(Debug, Clone, Default)]
pub struct SyntheticRelationalGenerator {
    options: GenerateOptions,
}

impl SyntheticRelationalGenerator {
    pub fn new(options: GenerateOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    pub fn generate(
        &self,
        schema: &UnifiedSchema,
        row_counts: &RowCounts,
        providers: &mut dyn ValueProvider,
    ) -> Result<Batches> {
        self.generate_with_report(schema, row_counts, providers)
            .map(|(batches, _)| batches)
    }

    pub fn generate_with_report(
        &self,
        schema: &UnifiedSchema,
        row_counts: &RowCounts,
        providers: &mut dyn ValueProvider,
    ) -> Result<(Batches, GenerationReport)> {
        let graph = schema.to_graph()?;
        let plan = graph.dependency_plan(None)?;
        let seed = self.options.seed;

        info!(
            entities = plan.order.len(),
            deferred = plan.deferred.len(),
            seed,
            "generation started"
        );

        let mut batches = Batches::new();
        let mut report = GenerationReport {
            seed,
            entities: Vec::with_capacity(plan.order.len()),
            dropped_rows: BTreeMap::new(),
            deferred: plan.deferred.clone(),
        };

        for key in &plan.order {
            let table = graph.table(key).ok_or_else(|| {
                GenerationError::InvalidInput(format!("entity '{key}' missing from graph"))
            })?;
            let requested = self.requested_rows(row_counts, key);
            let layout = EntityLayout::new(&graph, key, table, &plan.deferred, &batches);

            let (rows, reason) = match (&layout.empty_parent, &layout.unique_limit) {
                (Some(parent), _) => (0, Some(format!("parent '{parent}' has no rows"))),
                (None, Some(limit)) if limit.rows < requested => (
                    limit.rows,
                    Some(format!(
                        "one-to-one key '{}' allows only {} rows from parent '{}'",
                        limit.column, limit.rows, limit.parent
                    )),
                ),
                (None, _) => (requested, None),
            };
            if let Some(reason) = &reason {
                debug!(entity = %key, reason = %reason, "entity skipped");
            }

            let batch = layout.generate(key, table, rows, seed, providers)?;
            info!(entity = %key, requested, generated = batch.len(), "entity generated");
            report.entities.push(EntityReport {
                entity: key.clone(),
                requested_rows: requested,
                generated_rows: batch.len() as u64,
                reason,
            });
            batches.insert(key.clone(), batch);
        }

        fill_deferred(&graph, &plan.deferred, seed, &mut batches, &mut report)?;

        let pruned = prune_dangling(&graph, &mut batches)?;
        for (table, count) in pruned {
            *report.dropped_rows.entry(table).or_insert(0) += count;
        }
        for entity in &mut report.entities {
            if let Some(batch) = batches.get(&entity.entity) {
                entity.generated_rows = batch.len() as u64;
            }
        }

        info!(
            entities = report.entities.len(),
            rows = report.total_rows(),
            "generation finished"
        );
        Ok((batches, report))
    }

    fn requested_rows(&self, row_counts: &RowCounts, entity: &str) -> u64 {
        row_counts
            .get(entity)
            .or_else(|| row_counts.get(WILDCARD))
            .copied()
            .unwrap_or(self.options.default_rows)
    }
}

enum ColumnSource {
    Surrogate(SurrogateKind),
    Foreign(Vec<Value>),
    /// FK that is also the whole primary key: each parent key is used at most once.
    UniqueForeign(Vec<Value>),
    SelfReference { parent: usize, nullable: bool },
    Deferred,
    Provided(SemanticType),
}

#[derive(Clone, Copy)]
enum SurrogateKind {
    Sequence,
    Uuid,
    Prefixed,
}

struct UniqueLimit {
    column: String,
    parent: String,
    rows: u64,
}

struct EntityLayout {
    columns: Vec<(String, ColumnSource)>,
    empty_parent: Option<String>,
    unique_limit: Option<UniqueLimit>,
}

impl EntityLayout {
    fn new(
        graph: &SchemaGraph,
        key: &str,
        table: &Table,
        deferred: &[Relationship],
        batches: &Batches,
    ) -> Self {
        let parents = graph.parents_of(key);
        let referenced: BTreeSet<&str> = graph
            .children_of(key)
            .into_iter()
            .map(|(relationship, _)| relationship.parent_column.as_str())
            .collect();

        let mut empty_parent = None;
        let mut unique_limit: Option<UniqueLimit> = None;
        let mut columns = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let semantic_type = column
                .inferred_semantic_type
                .clone()
                .unwrap_or_else(|| SemanticType::parse(&column.data_type));
            let relationship = parents
                .iter()
                .map(|(relationship, _)| *relationship)
                .find(|relationship| relationship.child_column == column.name);

            let source = match relationship {
                Some(relationship) if relationship.is_self_reference() => {
                    match table.column_index(&relationship.parent_column) {
                        Some(parent) => ColumnSource::SelfReference {
                            parent,
                            nullable: column.nullable,
                        },
                        None => ColumnSource::Provided(semantic_type),
                    }
                }
                Some(relationship)
                    if deferred.iter().any(|edge| edge.same_endpoints(relationship)) =>
                {
                    ColumnSource::Deferred
                }
                Some(relationship) => {
                    let values = parent_values(batches, relationship);
                    if values.is_empty() && empty_parent.is_none() {
                        empty_parent = Some(relationship.parent_table.clone());
                    }
                    if table.primary_key.len() == 1 && table.is_primary_key(&column.name) {
                        let values = distinct(values);
                        let rows = values.len() as u64;
                        if unique_limit.as_ref().is_none_or(|limit| rows < limit.rows) {
                            unique_limit = Some(UniqueLimit {
                                column: column.name.clone(),
                                parent: relationship.parent_table.clone(),
                                rows,
                            });
                        }
                        ColumnSource::UniqueForeign(values)
                    } else {
                        ColumnSource::Foreign(values)
                    }
                }
                None if table.is_primary_key(&column.name)
                    || referenced.contains(column.name.as_str()) =>
                {
                    ColumnSource::Surrogate(surrogate_kind(&semantic_type))
                }
                None => ColumnSource::Provided(semantic_type),
            };
            columns.push((column.name.clone(), source));
        }

        Self {
            columns,
            empty_parent,
            unique_limit,
        }
    }

    fn generate(
        &self,
        key: &str,
        table: &Table,
        rows: u64,
        seed: u64,
        providers: &mut dyn ValueProvider,
    ) -> Result<RowBatch> {
        let mut batch = RowBatch::new(key, table.column_names());
        let mut rng = ChaCha8Rng::seed_from_u64(hash_seed(seed, key));
        let mut key_rng = ChaCha8Rng::seed_from_u64(hash_seed(seed, &format!("{key}#keys")));
        let mut unique_rng = ChaCha8Rng::seed_from_u64(hash_seed(seed, &format!("{key}#unique")));
        let shuffled: Vec<Vec<Value>> = self
            .columns
            .iter()
            .map(|(_, source)| match source {
                ColumnSource::UniqueForeign(values) => {
                    let mut values = values.clone();
                    values.shuffle(&mut unique_rng);
                    values
                }
                _ => Vec::new(),
            })
            .collect();

        for row_index in 0..rows {
            let mut row = Vec::with_capacity(self.columns.len());
            for (idx, (name, source)) in self.columns.iter().enumerate() {
                let value = match source {
                    ColumnSource::Surrogate(kind) => {
                        surrogate_value(*kind, key, row_index, &mut key_rng)
                    }
                    ColumnSource::Foreign(values) => pick(values, &mut rng),
                    ColumnSource::UniqueForeign(_) => shuffled
                        .get(idx)
                        .and_then(|values| values.get(row_index as usize))
                        .cloned()
                        .unwrap_or(Value::Null),
                    ColumnSource::Provided(semantic_type) => providers.sample(semantic_type, name),
                    ColumnSource::SelfReference { .. } | ColumnSource::Deferred => Value::Null,
                };
                row.push(value);
            }

            for (idx, (_, source)) in self.columns.iter().enumerate() {
                let ColumnSource::SelfReference { parent, nullable } = source else {
                    continue;
                };
                let value = if row_index == 0 {
                    if *nullable {
                        Value::Null
                    } else {
                        row.get(*parent).cloned().unwrap_or(Value::Null)
                    }
                } else {
                    let earlier = rng.random_range(0..batch.rows.len());
                    batch
                        .rows
                        .get(earlier)
                        .and_then(|earlier| earlier.get(*parent))
                        .cloned()
                        .unwrap_or(Value::Null)
                };
                if let Some(slot) = row.get_mut(idx) {
                    *slot = value;
                }
            }

            batch.push(row)?;
        }
        Ok(batch)
    }
}

/// Close cyclic edges once every entity exists.
fn fill_deferred(
    graph: &SchemaGraph,
    deferred: &[Relationship],
    seed: u64,
    batches: &mut Batches,
    report: &mut GenerationReport,
) -> Result<()> {
    for relationship in deferred {
        let values = parent_values(batches, relationship);
        let nullable = graph
            .table(&relationship.child_table)
            .and_then(|table| table.column(&relationship.child_column))
            .map(|column| column.nullable)
            .unwrap_or(true);
        let Some(batch) = batches.get_mut(&relationship.child_table) else {
            continue;
        };
        let Some(idx) = batch.column_index(&relationship.child_column) else {
            continue;
        };

        let mut rng = ChaCha8Rng::seed_from_u64(hash_seed(
            seed,
            &format!(
                "{}.{}#deferred",
                relationship.child_table, relationship.child_column
            ),
        ));
        let before = batch.len();
        if values.is_empty() && !nullable {
            batch.rows.clear();
        } else {
            for row in &mut batch.rows {
                if let Some(slot) = row.get_mut(idx) {
                    *slot = pick(&values, &mut rng);
                }
            }
        }

        let dropped = before - batch.len();
        if dropped > 0 {
            warn!(
                table = %relationship.child_table,
                column = %relationship.child_column,
                parent = %relationship.parent_table,
                dropped,
                "deferred reference has no parent rows"
            );
            *report
                .dropped_rows
                .entry(relationship.child_table.clone())
                .or_insert(0) += dropped;
        }
    }
    Ok(())
}

fn parent_values(batches: &Batches, relationship: &Relationship) -> Vec<Value> {
    batches
        .get(&relationship.parent_table)
        .and_then(|batch| batch.column_values(&relationship.parent_column))
        .map(|values| {
            values
                .into_iter()
                .filter(|value| !value.is_null())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// First occurrence of every value, in order.
fn distinct(values: Vec<Value>) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

/// Uniform pick with replacement; `Null` when there is nothing to pick from.
fn pick(values: &[Value], rng: &mut ChaCha8Rng) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    values
        .get(rng.random_range(0..values.len()))
        .cloned()
        .unwrap_or(Value::Null)
}

fn surrogate_kind(semantic_type: &SemanticType) -> SurrogateKind {
    match semantic_type {
        SemanticType::Integer | SemanticType::Decimal | SemanticType::Other(_) => {
            SurrogateKind::Sequence
        }
        SemanticType::Uuid => SurrogateKind::Uuid,
        _ => SurrogateKind::Prefixed,
    }
}

fn surrogate_value(kind: SurrogateKind, entity: &str, row_index: u64, rng: &mut ChaCha8Rng) -> Value {
    match kind {
        SurrogateKind::Sequence => Value::Int(row_index as i64 + 1),
        SurrogateKind::Uuid => Value::Uuid(random_uuid(rng)),
        SurrogateKind::Prefixed => Value::Text(format!("{entity}_{}", row_index + 1)),
    }
}

fn hash_seed(seed: u64, key: &str) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_seed_depends_on_key_and_seed() {
        assert_eq!(hash_seed(1, "customer"), hash_seed(1, "customer"));
        assert_ne!(hash_seed(1, "customer"), hash_seed(1, "order"));
        assert_ne!(hash_seed(1, "customer"), hash_seed(2, "customer"));
    }

    #[test]
    fn surrogate_kinds_follow_semantic_type() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            surrogate_value(surrogate_kind(&SemanticType::Integer), "c", 0, &mut rng),
            Value::Int(1)
        );
        assert_eq!(
            surrogate_value(surrogate_kind(&SemanticType::String), "c", 4, &mut rng),
            Value::text("c_5")
        );
        let uuid = surrogate_value(surrogate_kind(&SemanticType::Uuid), "c", 0, &mut rng);
        assert!(matches!(uuid, Value::Uuid(ref raw) if uuid::Uuid::parse_str(raw).is_ok()));
    }

    #[test]
    fn pick_from_nothing_is_null() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(pick(&[], &mut rng), Value::Null);
        assert_eq!(pick(&[Value::Int(9)], &mut rng), Value::Int(9));
    }
}
