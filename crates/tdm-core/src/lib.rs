//! Core data model for the TDM engine.
//!
//! This crate defines the schema and row types, the FK dependency graph, the
//! unified multi-source schema model, semantic classification and the
//! referential-integrity checks shared by the extraction, generation and
//! masking crates.

pub mod classify;
pub mod error;
pub mod graph;
pub mod integrity;
pub mod schema;
pub mod unified;
pub mod validation;
pub mod value;

pub use classify::infer_semantic_type;
pub use error::{Error, Result};
pub use graph::{DependencyPlan, SchemaGraph};
pub use integrity::{IntegrityReport, RelationshipViolations, check_integrity, prune_dangling};
pub use schema::{Cardinality, Column, Relationship, SchemaSnapshot, SemanticType, Table};
pub use unified::{Entity, FieldSpec, SourceKind, UnifiedSchema};
pub use validation::validate_tables;
pub use value::{Batches, Row, RowBatch, Value};

/// Current contract version for `schema.json` documents.
pub const SCHEMA_VERSION: &str = "0.1";
