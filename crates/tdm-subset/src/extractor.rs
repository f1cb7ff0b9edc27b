use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tdm_core::{Batches, DependencyPlan, Row, RowBatch, SchemaGraph, Table, Value, prune_dangling};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, SubsetError};
use crate::source::{RowRequest, RowSource};

/// Equality filters per table: `table -> column -> value`.
pub type Filters = BTreeMap<String, BTreeMap<String, Value>>;
/// Row caps per table; `"*"` applies to tables without an explicit cap.
pub type RowCaps = BTreeMap<String, usize>;

pub const DEFAULT_MAX_ROWS: usize = 100_000;
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsetOptions {
    /// Cap used when neither the table nor `"*"` has one.
    pub default_max_rows: usize,
    /// Also fetch (capped) tables that are not connected to the root.
    pub include_unrelated: bool,
}

impl Default for SubsetOptions {
    fn default() -> Self {
        Self {
            default_max_rows: DEFAULT_MAX_ROWS,
            include_unrelated: false,
        }
    }
}

/// What was extracted before a failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialSubset {
    /// Rows extracted so far, pruned so that every FK value resolves.
    pub batches: Batches,
    /// Tables whose rows are final: extracted, back-filled, and with every child table final.
    pub completed_tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubsetResult {
    pub root: String,
    /// Extraction order, parents first.
    pub order: Vec<String>,
    /// One batch per table of the graph, possibly empty.
    pub batches: Batches,
    /// Rows removed by the final integrity prune, per table.
    pub dropped_rows: BTreeMap<String, usize>,
    /// Tables skipped because their cap is zero.
    pub skipped_tables: BTreeSet<String>,
}

impl SubsetResult {
    pub fn row_counts(&self) -> BTreeMap<String, usize> {
        self.batches
            .iter()
            .map(|(key, batch)| (key.clone(), batch.len()))
            .collect()
    }

    pub fn total_rows(&self) -> usize {
        self.batches.values().map(RowBatch::len).sum()
    }
}

/// FK-aware subset extraction over a [`RowSource`].
#[derive(Debug, Clone, Default)]
pub struct SubsetExtractor {
    options: SubsetOptions,
    cancel: CancelToken,
}

impl SubsetExtractor {
    pub fn new(options: SubsetOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &SubsetOptions {
        &self.options
    }

    /// Extract the rows reachable from `root_table` so that every emitted FK resolves.
    pub fn extract<S: RowSource + ?Sized>(
        &self,
        graph: &SchemaGraph,
        root_table: &str,
        filters: &Filters,
        max_rows_per_table: &RowCaps,
        row_source: &mut S,
    ) -> Result<SubsetResult> {
        let plan = graph.dependency_plan(Some(root_table))?;
        let root = graph
            .table_key(root_table)
            .ok_or_else(|| tdm_core::Error::InvalidSchema(format!("table '{root_table}' not found")))?
            .to_string();

        let mut run = Run {
            graph,
            options: &self.options,
            cancel: &self.cancel,
            filters: normalize_filters(graph, filters)?,
            caps: normalize_caps(graph, max_rows_per_table),
            source: row_source,
            order: plan.order.clone(),
            states: BTreeMap::new(),
            requested: HashSet::new(),
            processed: BTreeSet::new(),
            failed: None,
            skipped: BTreeSet::new(),
        };

        info!(root = %root, tables = plan.order.len(), reachable = plan.reachable.len(), "starting subset extraction");

        run.check_cancel()?;
        run.extract_root(&root)?;
        run.close_over_parents()?;
        run.processed.insert(root.clone());

        for key in &plan.order {
            if *key == root {
                continue;
            }
            run.check_cancel()?;
            if plan.descendants.contains(key) {
                run.extract_children(key, &plan)?;
            } else if !plan.reachable.contains(key) && self.options.include_unrelated {
                run.extract_unrelated(key)?;
            } else {
                run.ensure_state(key)?;
            }
            run.close_over_parents()?;
            run.processed.insert(key.clone());
        }

        let skipped_tables = run.skipped.clone();
        let mut batches: Batches = run
            .states
            .into_iter()
            .map(|(key, state)| (key, state.batch))
            .collect();
        for (key, table) in graph.table_keys().iter().zip(graph.tables()) {
            batches
                .entry(key.clone())
                .or_insert_with(|| RowBatch::new(key.clone(), table.column_names()));
        }

        let dropped_rows = prune_dangling(graph, &mut batches)?;
        for (table, rows) in &dropped_rows {
            warn!(table = %table, rows, "dropped rows whose parents were not extracted");
        }

        let result = SubsetResult {
            root,
            order: plan.order,
            batches,
            dropped_rows,
            skipped_tables,
        };
        info!(root = %result.root, rows = result.total_rows(), "subset extraction finished");
        Ok(result)
    }
}

/// Extract with default options.
pub fn extract<S: RowSource + ?Sized>(
    graph: &SchemaGraph,
    root_table: &str,
    filters: &Filters,
    max_rows_per_table: &RowCaps,
    row_source: &mut S,
) -> Result<SubsetResult> {
    SubsetExtractor::default().extract(graph, root_table, filters, max_rows_per_table, row_source)
}

fn normalize_filters(graph: &SchemaGraph, filters: &Filters) -> Result<Filters> {
    let mut normalized = Filters::new();
    for (table, predicates) in filters {
        let key = graph.table_key(table).ok_or_else(|| {
            tdm_core::Error::InvalidSchema(format!("filter names unknown table '{table}'"))
        })?;
        normalized
            .entry(key.to_string())
            .or_default()
            .extend(predicates.iter().map(|(column, value)| (column.clone(), value.clone())));
    }
    Ok(normalized)
}

fn normalize_caps(graph: &SchemaGraph, caps: &RowCaps) -> RowCaps {
    let mut normalized = RowCaps::new();
    for (table, cap) in caps {
        if table == WILDCARD {
            normalized.insert(WILDCARD.to_string(), *cap);
            continue;
        }
        match graph.table_key(table) {
            Some(key) => {
                normalized.insert(key.to_string(), *cap);
            }
            None => warn!(table = %table, "ignoring row cap for unknown table"),
        }
    }
    normalized
}

fn column_type<'g>(graph: &'g SchemaGraph, key: &str, column: &str) -> Option<&'g str> {
    graph
        .table(key)
        .and_then(|table| table.column(column))
        .map(|column| column.data_type.as_str())
}

/// Key values cross relationships in the kind of the column they are matched against.
fn coerce(value: Value, data_type: Option<&str>) -> Value {
    match data_type {
        Some(data_type) => value.coerce_to(data_type),
        None => value,
    }
}

struct TableState {
    batch: RowBatch,
    key_columns: Vec<usize>,
    seen: HashSet<Vec<Value>>,
}

impl TableState {
    fn new(key: &str, table: &Table) -> Self {
        let key_columns = table
            .primary_key
            .iter()
            .filter_map(|column| table.column_index(column))
            .collect();
        Self {
            batch: RowBatch::new(key, table.column_names()),
            key_columns,
            seen: HashSet::new(),
        }
    }

    /// Append rows not seen before (by primary key, or whole row without one).
    fn add(&mut self, rows: Vec<Row>) -> tdm_core::Result<usize> {
        let mut added = 0;
        for row in rows {
            let key = RowBatch::key_of(&row, &self.key_columns);
            if self.seen.contains(&key) {
                continue;
            }
            self.batch.push(row)?;
            self.seen.insert(key);
            added += 1;
        }
        Ok(added)
    }

    fn distinct_values(&self, column: &str) -> BTreeSet<Value> {
        self.batch
            .column_values(column)
            .unwrap_or_default()
            .into_iter()
            .filter(|value| !value.is_null())
            .cloned()
            .collect()
    }
}

struct Run<'a, S: RowSource + ?Sized> {
    graph: &'a SchemaGraph,
    options: &'a SubsetOptions,
    cancel: &'a CancelToken,
    filters: Filters,
    caps: RowCaps,
    source: &'a mut S,
    order: Vec<String>,
    states: BTreeMap<String, TableState>,
    requested: HashSet<(String, String, Value)>,
    /// Tables whose own extraction step and the parent closure after it ran.
    processed: BTreeSet<String>,
    failed: Option<String>,
    skipped: BTreeSet<String>,
}

impl<S: RowSource + ?Sized> Run<'_, S> {
    fn cap_for(&self, key: &str) -> usize {
        self.caps
            .get(key)
            .or_else(|| self.caps.get(WILDCARD))
            .copied()
            .unwrap_or(self.options.default_max_rows)
    }

    fn table(&self, key: &str) -> Result<&Table> {
        Ok(self
            .graph
            .table(key)
            .ok_or_else(|| tdm_core::Error::InvalidSchema(format!("table '{key}' not found")))?)
    }

    fn ensure_state(&mut self, key: &str) -> Result<()> {
        if !self.states.contains_key(key) {
            let state = TableState::new(key, self.table(key)?);
            self.states.insert(key.to_string(), state);
        }
        Ok(())
    }

    /// Tables whose rows can no longer change: processed, with every child table done too.
    fn completed_tables(&self) -> Vec<String> {
        let mut done: BTreeSet<&str> = BTreeSet::new();
        loop {
            let mut changed = false;
            for key in self.order.iter().rev() {
                if done.contains(key.as_str())
                    || !self.processed.contains(key)
                    || self.failed.as_deref() == Some(key.as_str())
                {
                    continue;
                }
                let children_done =
                    self.graph
                        .children_of(key)
                        .into_iter()
                        .all(|(relationship, _)| {
                            relationship.is_self_reference()
                                || done.contains(relationship.child_table.as_str())
                        });
                if children_done {
                    done.insert(key.as_str());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        self.order
            .iter()
            .filter(|key| done.contains(key.as_str()))
            .cloned()
            .collect()
    }

    /// Everything extracted so far, pruned so every FK value resolves.
    fn partial(&self) -> PartialSubset {
        let mut batches: Batches = self
            .states
            .iter()
            .map(|(key, state)| (key.clone(), state.batch.clone()))
            .collect();
        match prune_dangling(self.graph, &mut batches) {
            Ok(dropped) => {
                for (table, rows) in &dropped {
                    debug!(table = %table, rows, "pruned partial rows with dangling parents");
                }
            }
            Err(err) => {
                warn!(error = %err, "could not prune partial subset, discarding its rows");
                batches.clear();
            }
        }
        PartialSubset {
            batches,
            completed_tables: self.completed_tables(),
        }
    }

    /// Back-fill parents of every extracted row until no new rows arrive.
    fn close_over_parents(&mut self) -> Result<()> {
        let order = self.order.clone();
        loop {
            self.check_cancel()?;
            let mut added = 0;
            for key in order.iter().rev() {
                added += self.backfill_parent(key)?;
            }
            if added == 0 {
                return Ok(());
            }
            debug!(rows = added, "back-fill round added parent rows");
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(processed = self.processed.len(), "subset extraction cancelled");
            return Err(SubsetError::Cancelled {
                partial: Box::new(self.partial()),
            });
        }
        Ok(())
    }

    fn fetch_into(&mut self, key: &str, request: RowRequest) -> Result<usize> {
        self.ensure_state(key)?;
        let graph = self.graph;
        let table = graph
            .table(key)
            .ok_or_else(|| tdm_core::Error::InvalidSchema(format!("table '{key}' not found")))?;

        let rows = match self.source.fetch(table, &request) {
            Ok(rows) => rows,
            Err(source) => {
                warn!(table = %key, error = %source, "row source failed");
                self.failed = Some(key.to_string());
                return Err(SubsetError::SourceUnavailable {
                    table: key.to_string(),
                    source,
                    partial: Box::new(self.partial()),
                });
            }
        };
        let fetched = rows.len();

        let added = match self.states.get_mut(key) {
            Some(state) => state.add(rows)?,
            None => 0,
        };
        debug!(table = %key, fetched, added, "fetched rows");
        Ok(added)
    }

    fn extract_root(&mut self, root: &str) -> Result<()> {
        self.ensure_state(root)?;
        let cap = self.cap_for(root);
        if cap == 0 {
            self.skipped.insert(root.to_string());
        } else {
            let request = RowRequest {
                filters: self.filters.get(root).cloned().unwrap_or_default(),
                key_in: None,
                limit: Some(cap),
            };
            self.fetch_into(root, request)?;
        }
        info!(table = %root, rows = self.rows_in(root), "extracted root table");
        Ok(())
    }

    /// Rows of `key` referencing already-extracted descendant parents, capped.
    fn extract_children(&mut self, key: &str, plan: &DependencyPlan) -> Result<()> {
        self.ensure_state(key)?;
        let cap = self.cap_for(key);
        if cap == 0 {
            debug!(table = %key, "skipping table capped to zero rows");
            self.skipped.insert(key.to_string());
            return Ok(());
        }

        let graph = self.graph;
        for (relationship, _) in graph.parents_of(key) {
            if relationship.is_self_reference()
                || !plan.descendants.contains(&relationship.parent_table)
            {
                continue;
            }
            let Some(parent) = self.states.get(&relationship.parent_table) else {
                continue;
            };
            let child_type = column_type(graph, key, &relationship.child_column);
            let values: Vec<Value> = parent
                .distinct_values(&relationship.parent_column)
                .into_iter()
                .map(|value| coerce(value, child_type))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if values.is_empty() {
                continue;
            }

            let current = self.rows_in(key);
            if current >= cap {
                break;
            }
            let request = RowRequest {
                filters: self.filters.get(key).cloned().unwrap_or_default(),
                key_in: Some((relationship.child_column.clone(), values)),
                limit: Some(cap - current),
            };
            self.fetch_into(key, request)?;
        }

        info!(table = %key, rows = self.rows_in(key), cap, "extracted child table");
        Ok(())
    }

    /// Parent rows referenced by extracted children but not yet present. Uncapped.
    fn backfill_parent(&mut self, key: &str) -> Result<usize> {
        if self.skipped.contains(key) {
            return Ok(0);
        }
        if self.cap_for(key) == 0 {
            self.skipped.insert(key.to_string());
            return Ok(0);
        }
        self.ensure_state(key)?;

        let graph = self.graph;
        let mut added = 0;
        for (relationship, _) in graph.children_of(key) {
            let Some(child) = self.states.get(&relationship.child_table) else {
                continue;
            };
            let parent_type = column_type(graph, key, &relationship.parent_column);
            let wanted: BTreeSet<Value> = child
                .distinct_values(&relationship.child_column)
                .into_iter()
                .map(|value| coerce(value, parent_type))
                .collect();
            let present: BTreeSet<Value> = match self.states.get(key) {
                Some(parent) => parent
                    .distinct_values(&relationship.parent_column)
                    .into_iter()
                    .map(|value| coerce(value, parent_type))
                    .collect(),
                None => BTreeSet::new(),
            };

            let mut missing = Vec::new();
            for value in wanted {
                if present.contains(&value) {
                    continue;
                }
                let marker = (key.to_string(), relationship.parent_column.clone(), value);
                if self.requested.contains(&marker) {
                    continue;
                }
                missing.push(marker.2.clone());
                self.requested.insert(marker);
            }
            if missing.is_empty() {
                continue;
            }

            let request = RowRequest {
                filters: BTreeMap::new(),
                key_in: Some((relationship.parent_column.clone(), missing)),
                limit: None,
            };
            added += self.fetch_into(key, request)?;
        }

        if added > 0 {
            debug!(table = %key, rows = added, "back-filled parent rows");
        }
        Ok(added)
    }

    fn extract_unrelated(&mut self, key: &str) -> Result<()> {
        self.ensure_state(key)?;
        let cap = self.cap_for(key);
        if cap == 0 {
            self.skipped.insert(key.to_string());
            return Ok(());
        }
        let request = RowRequest {
            filters: self.filters.get(key).cloned().unwrap_or_default(),
            key_in: None,
            limit: Some(cap),
        };
        self.fetch_into(key, request)?;
        info!(table = %key, rows = self.rows_in(key), "extracted unrelated table");
        Ok(())
    }

    fn rows_in(&self, key: &str) -> usize {
        self.states.get(key).map_or(0, |state| state.batch.len())
    }
}
