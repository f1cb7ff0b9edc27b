use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::SchemaGraph;
use crate::schema::{Column, Relationship, SemanticType, Table};

/// Kind of evidence a schema fragment was derived from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Database,
    Api,
    Ui,
    TestCase,
    DomainPack,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Database,
        SourceKind::Api,
        SourceKind::Ui,
        SourceKind::TestCase,
        SourceKind::DomainPack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Database => "database",
            SourceKind::Api => "api",
            SourceKind::Ui => "ui",
            SourceKind::TestCase => "test_case",
            SourceKind::DomainPack => "domain_pack",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved description of one field of a unified entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldSpec {
    pub semantic_type: SemanticType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub contributing_sources: Vec<SourceKind>,
}

fn default_nullable() -> bool {
    true
}

fn default_confidence() -> f64 {
    1.0
}

impl FieldSpec {
    pub fn new(semantic_type: SemanticType) -> Self {
        Self {
            semantic_type,
            nullable: true,
            sample_values: Vec::new(),
            confidence: 1.0,
            contributing_sources: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Entity {
    pub fields: BTreeMap<String, FieldSpec>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Relationships where this entity is the child.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Entity {
    /// Field names with the primary key first, then the rest by name.
    pub fn ordered_field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .primary_key
            .iter()
            .filter(|pk| self.fields.contains_key(pk.as_str()))
            .cloned()
            .collect();
        names.extend(
            self.fields
                .keys()
                .filter(|name| !self.primary_key.contains(*name))
                .cloned(),
        );
        names
    }
}

/// Fused multi-source schema, keyed by entity name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UnifiedSchema {
    pub entities: BTreeMap<String, Entity>,
}

impl UnifiedSchema {
    /// All relationships across entities, deduplicated by endpoints.
    pub fn relationships(&self) -> Vec<Relationship> {
        let mut all: Vec<Relationship> = Vec::new();
        for entity in self.entities.values() {
            for relationship in &entity.relationships {
                if !all.iter().any(|existing| {
                    existing.same_endpoints(relationship)
                        && existing.cardinality == relationship.cardinality
                }) {
                    all.push(relationship.clone());
                }
            }
        }
        all
    }

    /// Project into a graph: one table per entity, semantic types carried as data types.
    pub fn to_graph(&self) -> Result<SchemaGraph> {
        let tables = self
            .entities
            .iter()
            .map(|(name, entity)| {
                let columns = entity
                    .ordered_field_names()
                    .into_iter()
                    .filter_map(|field| {
                        let spec = entity.fields.get(&field)?;
                        Some(
                            Column::new(field, spec.semantic_type.as_str(), spec.nullable)
                                .with_semantic_type(spec.semantic_type.clone()),
                        )
                    })
                    .collect();
                Table::new("", name.clone(), columns, entity.primary_key.clone())
            })
            .collect();

        let mut relationships: Vec<Relationship> = Vec::new();
        for relationship in self.relationships() {
            if !relationships
                .iter()
                .any(|existing| existing.same_endpoints(&relationship))
            {
                relationships.push(relationship);
            }
        }

        SchemaGraph::build(tables, relationships)
    }
}
