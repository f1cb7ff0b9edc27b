use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::{Relationship, Table};
use crate::validation::validate_tables;

/// Resolved FK edge between two table indices.
#[derive(Debug, Clone, Copy)]
struct Edge {
    parent: usize,
    child: usize,
}

/// Direction of a traversal step over FK edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    ToChildren,
    ToParents,
}

/// FK dependency graph for one schema snapshot.
///
/// Tables are addressed by their key: the bare table name when it is unique in
/// the snapshot, `namespace.name` otherwise. Lookups accept either form.
#[derive(Debug, Clone)]
pub struct SchemaGraph {
    tables: Vec<Table>,
    keys: Vec<String>,
    relationships: Vec<Relationship>,
    edges: Vec<Edge>,
    lookup: HashMap<String, usize>,
    ambiguous_names: BTreeSet<String>,
    children: Vec<Vec<usize>>,
    parents: Vec<Vec<usize>>,
    deferred: BTreeSet<usize>,
}

/// Ordering result for extraction or generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyPlan {
    /// Table keys, parents before children.
    pub order: Vec<String>,
    /// Edges that close a cycle; their FK values are fixed up after ordering.
    pub deferred: Vec<Relationship>,
    /// Edges where a table references itself.
    pub self_references: Vec<Relationship>,
    /// Tables reachable from the root (all tables when there is no root).
    pub reachable: BTreeSet<String>,
    /// Tables reachable from the root following child edges only.
    pub descendants: BTreeSet<String>,
}

impl DependencyPlan {
    pub fn is_deferred(&self, relationship: &Relationship) -> bool {
        self.deferred
            .iter()
            .any(|deferred| deferred.same_endpoints(relationship))
    }

    pub fn position(&self, table: &str) -> Option<usize> {
        self.order.iter().position(|key| key == table)
    }
}

impl SchemaGraph {
    /// Build a graph, failing when a relationship names an unknown table or column.
    pub fn build(tables: Vec<Table>, relationships: Vec<Relationship>) -> Result<Self> {
        validate_tables(&tables)?;

        let mut name_counts: HashMap<&str, usize> = HashMap::new();
        for table in &tables {
            *name_counts.entry(table.name.as_str()).or_insert(0) += 1;
        }

        let mut keys = Vec::with_capacity(tables.len());
        let mut lookup = HashMap::new();
        let mut ambiguous_names = BTreeSet::new();
        for (idx, table) in tables.iter().enumerate() {
            let unique = name_counts.get(table.name.as_str()).copied().unwrap_or(0) == 1;
            let key = if unique {
                table.name.clone()
            } else {
                ambiguous_names.insert(table.name.clone());
                table.qualified_name()
            };
            lookup.insert(table.qualified_name(), idx);
            if unique {
                lookup.insert(table.name.clone(), idx);
            }
            lookup.insert(key.clone(), idx);
            keys.push(key);
        }

        let mut graph = Self {
            children: vec![Vec::new(); tables.len()],
            parents: vec![Vec::new(); tables.len()],
            tables,
            keys,
            relationships: Vec::with_capacity(relationships.len()),
            edges: Vec::with_capacity(relationships.len()),
            lookup,
            ambiguous_names,
            deferred: BTreeSet::new(),
        };

        for relationship in relationships {
            let parent = graph.resolve(&relationship.parent_table).map_err(|err| {
                Error::InvalidSchema(format!("relationship {relationship}: {err}"))
            })?;
            let child = graph.resolve(&relationship.child_table).map_err(|err| {
                Error::InvalidSchema(format!("relationship {relationship}: {err}"))
            })?;

            if graph.tables[parent]
                .column(&relationship.parent_column)
                .is_none()
            {
                return Err(Error::InvalidSchema(format!(
                    "relationship {relationship}: parent column '{}' not found",
                    relationship.parent_column
                )));
            }
            if graph.tables[child].column(&relationship.child_column).is_none() {
                return Err(Error::InvalidSchema(format!(
                    "relationship {relationship}: child column '{}' not found",
                    relationship.child_column
                )));
            }

            let mut normalized = relationship;
            normalized.parent_table = graph.keys[parent].clone();
            normalized.child_table = graph.keys[child].clone();

            let edge_idx = graph.edges.len();
            graph.edges.push(Edge { parent, child });
            graph.relationships.push(normalized);
            graph.children[parent].push(edge_idx);
            graph.parents[child].push(edge_idx);
        }

        graph.deferred = graph.break_cycles();
        debug!(
            tables = graph.tables.len(),
            relationships = graph.relationships.len(),
            deferred = graph.deferred.len(),
            "schema graph built"
        );

        Ok(graph)
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Table keys in declaration order.
    pub fn table_keys(&self) -> &[String] {
        &self.keys
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.lookup.get(name).map(|idx| &self.tables[*idx])
    }

    /// Canonical key of a table, accepting a bare or qualified name.
    pub fn table_key(&self, name: &str) -> Option<&str> {
        self.lookup.get(name).map(|idx| self.keys[*idx].as_str())
    }

    /// Relationships where `table` is the parent, with the child table.
    pub fn children_of(&self, table: &str) -> Vec<(&Relationship, &Table)> {
        let Some(idx) = self.lookup.get(table) else {
            return Vec::new();
        };
        self.children[*idx]
            .iter()
            .map(|edge| (&self.relationships[*edge], &self.tables[self.edges[*edge].child]))
            .collect()
    }

    /// Relationships where `table` is the child, with the parent table.
    pub fn parents_of(&self, table: &str) -> Vec<(&Relationship, &Table)> {
        let Some(idx) = self.lookup.get(table) else {
            return Vec::new();
        };
        self.parents[*idx]
            .iter()
            .map(|edge| (&self.relationships[*edge], &self.tables[self.edges[*edge].parent]))
            .collect()
    }

    /// Whether a column is either end of any relationship.
    pub fn is_relationship_column(&self, table: &str, column: &str) -> bool {
        let Some(key) = self.table_key(table) else {
            return false;
        };
        self.relationships.iter().any(|rel| {
            (rel.parent_table == key && rel.parent_column == column)
                || (rel.child_table == key && rel.child_column == column)
        })
    }

    /// Relationships that close a cycle, in declaration order.
    pub fn deferred_relationships(&self) -> Vec<&Relationship> {
        self.deferred
            .iter()
            .map(|idx| &self.relationships[*idx])
            .collect()
    }

    /// Parent tables first, starting from `root`.
    pub fn topological_order(&self, root: &str) -> Result<Vec<String>> {
        Ok(self.dependency_plan(Some(root))?.order)
    }

    /// Full ordering result; without a root every table is ordered.
    pub fn dependency_plan(&self, root: Option<&str>) -> Result<DependencyPlan> {
        let (reachable, descendants) = match root {
            Some(root) => {
                let root_idx = self.resolve(root)?;
                let descendants = self.walk(&[root_idx], Direction::ToChildren);
                let seeds: Vec<usize> = descendants.iter().copied().collect();
                let mut reachable = self.walk(&seeds, Direction::ToParents);
                reachable.extend(descendants.iter().copied());
                (reachable, descendants)
            }
            None => {
                let all: BTreeSet<usize> = (0..self.tables.len()).collect();
                (all.clone(), all)
            }
        };

        let mut order = self.kahn(&reachable);
        let remainder: BTreeSet<usize> = (0..self.tables.len())
            .filter(|idx| !reachable.contains(idx))
            .collect();
        order.extend(self.kahn(&remainder));

        let deferred = self
            .deferred
            .iter()
            .map(|idx| self.relationships[*idx].clone())
            .collect();
        let self_references = self
            .relationships
            .iter()
            .filter(|rel| rel.is_self_reference())
            .cloned()
            .collect();

        Ok(DependencyPlan {
            order: order.into_iter().map(|idx| self.keys[idx].clone()).collect(),
            deferred,
            self_references,
            reachable: reachable.iter().map(|idx| self.keys[*idx].clone()).collect(),
            descendants: descendants
                .iter()
                .map(|idx| self.keys[*idx].clone())
                .collect(),
        })
    }

    fn resolve(&self, name: &str) -> Result<usize> {
        if let Some(idx) = self.lookup.get(name) {
            return Ok(*idx);
        }
        if self.ambiguous_names.contains(name) {
            return Err(Error::InvalidSchema(format!(
                "table name '{name}' is ambiguous; qualify it with a namespace"
            )));
        }
        Err(Error::InvalidSchema(format!("table '{name}' not found")))
    }

    /// Accept edges in declaration order; an edge that would close a cycle is deferred.
    fn break_cycles(&self) -> BTreeSet<usize> {
        let mut accepted: Vec<Vec<usize>> = vec![Vec::new(); self.tables.len()];
        let mut deferred = BTreeSet::new();

        for (idx, edge) in self.edges.iter().enumerate() {
            if edge.parent == edge.child {
                continue;
            }
            if path_exists(&accepted, edge.child, edge.parent) {
                debug!(
                    relationship = %self.relationships[idx],
                    "deferring relationship that closes a cycle"
                );
                deferred.insert(idx);
            } else {
                accepted[edge.parent].push(edge.child);
            }
        }

        deferred
    }

    fn walk(&self, seeds: &[usize], direction: Direction) -> BTreeSet<usize> {
        let mut visited: HashSet<(usize, Direction)> = HashSet::new();
        let mut reached = BTreeSet::new();
        let mut queue: VecDeque<usize> = seeds.iter().copied().collect();

        while let Some(idx) = queue.pop_front() {
            if !visited.insert((idx, direction)) {
                continue;
            }
            reached.insert(idx);
            let edges = match direction {
                Direction::ToChildren => &self.children[idx],
                Direction::ToParents => &self.parents[idx],
            };
            for edge_idx in edges {
                let edge = self.edges[*edge_idx];
                let next = match direction {
                    Direction::ToChildren => edge.child,
                    Direction::ToParents => edge.parent,
                };
                if !visited.contains(&(next, direction)) {
                    queue.push_back(next);
                }
            }
        }

        reached
    }

    /// Kahn's algorithm over `nodes`, ignoring self-loops and deferred edges.
    fn kahn(&self, nodes: &BTreeSet<usize>) -> Vec<usize> {
        let mut indegree: BTreeMap<usize, usize> = nodes.iter().map(|idx| (*idx, 0)).collect();
        let mut successors: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        for (edge_idx, edge) in self.edges.iter().enumerate() {
            if edge.parent == edge.child || self.deferred.contains(&edge_idx) {
                continue;
            }
            if !nodes.contains(&edge.parent) || !nodes.contains(&edge.child) {
                continue;
            }
            successors.entry(edge.parent).or_default().push(edge.child);
            if let Some(count) = indegree.get_mut(&edge.child) {
                *count += 1;
            }
        }

        let mut ready: BTreeSet<(&str, usize)> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| (self.keys[*idx].as_str(), *idx))
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(entry) = ready.pop_first() {
            let (_, idx) = entry;
            order.push(idx);
            if let Some(children) = successors.get(&idx) {
                for child in children {
                    if let Some(count) = indegree.get_mut(child) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            ready.insert((self.keys[*child].as_str(), *child));
                        }
                    }
                }
            }
        }

        order
    }
}

fn path_exists(adjacency: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut seen = vec![false; adjacency.len()];
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if std::mem::replace(&mut seen[node], true) {
            continue;
        }
        stack.extend(adjacency[node].iter().copied());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn table(name: &str, columns: &[&str]) -> Table {
        Table::new(
            "public",
            name,
            columns
                .iter()
                .map(|column| Column::new(*column, "integer", true))
                .collect(),
            vec!["id".to_string()],
        )
    }

    #[test]
    fn orders_parents_before_children() {
        let graph = SchemaGraph::build(
            vec![
                table("orders", &["id", "customer_id"]),
                table("customers", &["id"]),
                table("order_items", &["id", "order_id"]),
            ],
            vec![
                Relationship::new("customers", "id", "orders", "customer_id"),
                Relationship::new("orders", "id", "order_items", "order_id"),
            ],
        )
        .expect("build graph");

        let order = graph.topological_order("customers").expect("order");
        assert_eq!(order, vec!["customers", "orders", "order_items"]);
    }

    #[test]
    fn rejects_unknown_column() {
        let err = SchemaGraph::build(
            vec![table("orders", &["id"]), table("customers", &["id"])],
            vec![Relationship::new("customers", "id", "orders", "customer_id")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(message) if message.contains("customer_id")));
    }

    #[test]
    fn rejects_unknown_table() {
        let err = SchemaGraph::build(
            vec![table("orders", &["id", "customer_id"])],
            vec![Relationship::new("customers", "id", "orders", "customer_id")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }

    #[test]
    fn defers_second_edge_of_two_cycle() {
        let graph = SchemaGraph::build(
            vec![table("a", &["id", "b_id"]), table("b", &["id", "a_id"])],
            vec![
                Relationship::new("a", "id", "b", "a_id"),
                Relationship::new("b", "id", "a", "b_id"),
            ],
        )
        .expect("build graph");

        let plan = graph.dependency_plan(Some("a")).expect("plan");
        assert_eq!(plan.order, vec!["a", "b"]);
        assert_eq!(plan.deferred.len(), 1);
        assert_eq!(plan.deferred[0].child_table, "a");
    }

    #[test]
    fn appends_unreachable_tables_by_name() {
        let graph = SchemaGraph::build(
            vec![
                table("zeta", &["id"]),
                table("users", &["id"]),
                table("alpha", &["id"]),
            ],
            Vec::new(),
        )
        .expect("build graph");

        let plan = graph.dependency_plan(Some("users")).expect("plan");
        assert_eq!(plan.order, vec!["users", "alpha", "zeta"]);
        assert_eq!(plan.reachable.len(), 1);
    }

    #[test]
    fn reachable_includes_ancestors_but_not_their_other_children() {
        let graph = SchemaGraph::build(
            vec![
                table("customers", &["id"]),
                table("orders", &["id", "customer_id"]),
                table("reviews", &["id", "customer_id"]),
            ],
            vec![
                Relationship::new("customers", "id", "orders", "customer_id"),
                Relationship::new("customers", "id", "reviews", "customer_id"),
            ],
        )
        .expect("build graph");

        let plan = graph.dependency_plan(Some("orders")).expect("plan");
        assert!(plan.reachable.contains("customers"));
        assert!(!plan.reachable.contains("reviews"));
        assert_eq!(plan.order, vec!["customers", "orders", "reviews"]);
    }

    #[test]
    fn duplicate_names_get_qualified_keys() {
        let mut billing = table("accounts", &["id"]);
        billing.namespace = "billing".to_string();
        let graph = SchemaGraph::build(
            vec![table("accounts", &["id"]), billing, table("users", &["id", "account_id"])],
            vec![Relationship::new("billing.accounts", "id", "users", "account_id")],
        )
        .expect("build graph");

        assert_eq!(graph.table_key("billing.accounts"), Some("billing.accounts"));
        assert_eq!(graph.table_key("users"), Some("users"));
        assert!(graph.table("accounts").is_none());
        assert_eq!(graph.relationships()[0].parent_table, "billing.accounts");
    }

    #[test]
    fn relationship_columns_are_detected() {
        let graph = SchemaGraph::build(
            vec![table("customers", &["id", "email"]), table("orders", &["id", "customer_id"])],
            vec![Relationship::new("customers", "id", "orders", "customer_id")],
        )
        .expect("build graph");

        assert!(graph.is_relationship_column("orders", "customer_id"));
        assert!(graph.is_relationship_column("customers", "id"));
        assert!(!graph.is_relationship_column("customers", "email"));
        assert_eq!(graph.children_of("customers").len(), 1);
        assert_eq!(graph.parents_of("orders")[0].1.name, "customers");
    }
}
