//! Multi-source schema fusion.
//!
//! Fragments from database introspection, API descriptions, UI and test-case
//! extraction and domain packs are merged into one [`tdm_core::UnifiedSchema`]
//! by confidence-weighted vote, weighted through a [`SourcePriority`].

pub mod domain;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod priority;

pub use domain::{DomainPack, DomainPackRepository};
pub use engine::{FieldConflict, FusionReport, SchemaFusionEngine, SynthesizedField};
pub use error::{FusionError, Result};
pub use fragment::{
    EntityFragment, FieldFragment, SchemaFragment, fragment_json_schema, normalize_field_name,
    parse_fragment_json, unified_json_schema,
};
pub use priority::SourcePriority;
