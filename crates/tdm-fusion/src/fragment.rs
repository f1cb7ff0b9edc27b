use std::collections::BTreeMap;

use jsonschema::JSONSchema;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use tdm_core::{Relationship, SemanticType, SourceKind, UnifiedSchema};

use crate::error::{FusionError, Result};

/// One field as a single source sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldFragment {
    pub semantic_type: SemanticType,
    /// `None` when the source says nothing about nullability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<String>,
}

impl FieldFragment {
    pub fn new(semantic_type: SemanticType) -> Self {
        Self {
            semantic_type,
            nullable: None,
            sample_values: Vec::new(),
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn with_samples<I, S>(mut self, samples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sample_values = samples.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntityFragment {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldFragment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
}

impl EntityFragment {
    pub fn with_field(mut self, name: impl Into<String>, field: FieldFragment) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|column| column.to_string()).collect();
        self
    }
}

/// Partial schema evidence from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SchemaFragment {
    pub source_kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Overrides the weight configured for `source_kind`; clamped to `[0, 1]` when fused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0.0, max = 1.0))]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityFragment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

impl SchemaFragment {
    pub fn new(source_kind: SourceKind) -> Self {
        Self {
            source_kind,
            source_name: None,
            confidence: None,
            entities: BTreeMap::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_entity(mut self, name: impl Into<String>, entity: EntityFragment) -> Self {
        self.entities.insert(name.into(), entity);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }
}

/// JSON Schema for fragment documents.
pub fn fragment_json_schema() -> RootSchema {
    schema_for!(SchemaFragment)
}

/// JSON Schema for fused `unified.json` documents.
pub fn unified_json_schema() -> RootSchema {
    schema_for!(UnifiedSchema)
}

/// Parse a fragment document, validating it against [`fragment_json_schema`] first.
pub fn parse_fragment_json(raw: &str) -> Result<SchemaFragment> {
    let document: serde_json::Value = serde_json::from_str(raw)?;
    let schema = serde_json::to_value(fragment_json_schema())?;
    let compiled = JSONSchema::compile(&schema).map_err(|err| FusionError::Schema(err.to_string()))?;

    if let Err(errors) = compiled.validate(&document) {
        let issues = errors
            .map(|error| {
                let path = error.instance_path.to_string();
                let path = if path.is_empty() { "/".to_string() } else { path };
                format!("{path}: {error}")
            })
            .collect();
        return Err(FusionError::InvalidFragment { issues });
    }

    Ok(serde_json::from_value(document)?)
}

/// Lower snake case, splitting camel case humps and non-alphanumeric runs.
pub fn normalize_field_name(name: &str) -> String {
    let chars: Vec<char> = name.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    for (idx, ch) in chars.iter().enumerate() {
        if !ch.is_alphanumeric() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if ch.is_uppercase() && idx > 0 {
            let prev = chars[idx - 1];
            let next_is_lower = chars.get(idx + 1).is_some_and(|next| next.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(ch.to_lowercase());
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
