use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tdm_core::{
    Cardinality, Entity, FieldSpec, Relationship, SemanticType, SourceKind, UnifiedSchema,
};
use tracing::{debug, info, warn};

use crate::domain::DomainPackRepository;
use crate::error::Result;
use crate::fragment::{SchemaFragment, normalize_field_name};
use crate::priority::SourcePriority;

const MAX_SAMPLE_VALUES: usize = 5;
const WEIGHT_EPSILON: f64 = 1e-9;

/// A field whose sources disagreed about its semantic type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub entity: String,
    pub field: String,
    /// Summed weight per candidate type, highest first.
    pub candidates: Vec<(SemanticType, f64)>,
    pub resolved: SemanticType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionReport {
    pub conflicts: Vec<FieldConflict>,
    /// Relationships kept with `ambiguous = true`.
    pub ambiguous: Vec<Relationship>,
    /// Relationship endpoints no fragment declared as a field, added from the relationship.
    pub synthesized_fields: Vec<SynthesizedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedField {
    pub entity: String,
    pub field: String,
    pub semantic_type: SemanticType,
    pub relationship: String,
}

/// Who asserted a relationship and with what weight.
#[derive(Debug, Clone, Default)]
struct Assertion {
    weight: f64,
    sources: BTreeSet<SourceKind>,
}

/// Merges schema fragments into one [`UnifiedSchema`] by weighted vote.
#[derive(Debug, Clone, Default)]
pub struct SchemaFusionEngine {
    priority: SourcePriority,
}

#[derive(Default)]
struct TypeVote {
    weight: f64,
    best_rank: u8,
}

#[derive(Default)]
struct FieldVotes {
    types: BTreeMap<SemanticType, TypeVote>,
    total_weight: f64,
    nullable_declarations: Vec<bool>,
    sample_values: Vec<String>,
    sources: BTreeSet<SourceKind>,
}

#[derive(Default)]
struct EntityVotes {
    fields: BTreeMap<String, FieldVotes>,
    primary_key: Option<Vec<String>>,
}

impl SchemaFusionEngine {
    pub fn new(priority: SourcePriority) -> Self {
        Self { priority }
    }

    pub fn priority(&self) -> &SourcePriority {
        &self.priority
    }

    pub fn fuse(&self, fragments: &[SchemaFragment]) -> UnifiedSchema {
        self.fuse_with_report(fragments).0
    }

    /// Fuse the caller's fragments plus one pack from `repository`.
    pub fn fuse_with_domain(
        &self,
        fragments: &[SchemaFragment],
        repository: &DomainPackRepository,
        pack_name: &str,
    ) -> Result<UnifiedSchema> {
        let mut all = fragments.to_vec();
        all.push(repository.fragment(pack_name)?);
        Ok(self.fuse(&all))
    }

    pub fn fuse_with_report(&self, fragments: &[SchemaFragment]) -> (UnifiedSchema, FusionReport) {
        let ordered = self.canonical_order(fragments);
        info!(fragments = ordered.len(), "schema fusion started");

        let mut entities: BTreeMap<String, EntityVotes> = BTreeMap::new();
        for (fragment, weight) in &ordered {
            let rank = SourcePriority::rank(fragment.source_kind);
            for (entity_name, entity) in &fragment.entities {
                let votes = entities
                    .entry(normalize_field_name(entity_name))
                    .or_default();
                if votes.primary_key.is_none() && !entity.primary_key.is_empty() {
                    votes.primary_key = Some(
                        entity
                            .primary_key
                            .iter()
                            .map(|column| normalize_field_name(column))
                            .collect(),
                    );
                }
                for (field_name, field) in &entity.fields {
                    let field_votes = votes
                        .fields
                        .entry(normalize_field_name(field_name))
                        .or_default();
                    let vote = field_votes
                        .types
                        .entry(field.semantic_type.clone())
                        .or_insert(TypeVote {
                            weight: 0.0,
                            best_rank: rank,
                        });
                    vote.weight += weight;
                    vote.best_rank = vote.best_rank.min(rank);
                    field_votes.total_weight += weight;
                    if let Some(nullable) = field.nullable {
                        field_votes.nullable_declarations.push(nullable);
                    }
                    for sample in &field.sample_values {
                        if field_votes.sample_values.len() < MAX_SAMPLE_VALUES
                            && !field_votes.sample_values.contains(sample)
                        {
                            field_votes.sample_values.push(sample.clone());
                        }
                    }
                    field_votes.sources.insert(fragment.source_kind);
                }
            }
        }

        let mut report = FusionReport::default();
        let mut schema = UnifiedSchema::default();
        for (entity_name, votes) in entities {
            let mut entity = Entity::default();
            for (field_name, field_votes) in votes.fields {
                let (spec, conflict) = resolve_field(&entity_name, &field_name, field_votes);
                if let Some(conflict) = conflict {
                    debug!(
                        entity = %entity_name,
                        field = %field_name,
                        resolved = %conflict.resolved,
                        "field type conflict resolved"
                    );
                    report.conflicts.push(conflict);
                }
                entity.fields.insert(field_name, spec);
            }
            entity.primary_key = match votes.primary_key {
                Some(primary_key) => primary_key
                    .into_iter()
                    .filter(|column| entity.fields.contains_key(column))
                    .collect(),
                None if entity.fields.contains_key("id") => vec!["id".to_string()],
                None => Vec::new(),
            };
            schema.entities.insert(entity_name, entity);
        }

        for (relationship, assertion) in merge_relationships(&ordered) {
            synthesize_endpoints(&mut schema, &relationship, &assertion, &mut report);
            if relationship.ambiguous {
                report.ambiguous.push(relationship.clone());
            }
            if let Some(child) = schema.entities.get_mut(&relationship.child_table) {
                child.relationships.push(relationship);
            }
        }

        info!(
            entities = schema.entities.len(),
            conflicts = report.conflicts.len(),
            ambiguous = report.ambiguous.len(),
            synthesized = report.synthesized_fields.len(),
            "schema fusion finished"
        );
        (schema, report)
    }

    /// Highest priority first, so fusion never depends on caller order.
    fn canonical_order<'a>(&self, fragments: &'a [SchemaFragment]) -> Vec<(&'a SchemaFragment, f64)> {
        let mut ordered: Vec<(&SchemaFragment, f64, String)> = fragments
            .iter()
            .map(|fragment| {
                let weight = fragment
                    .confidence
                    .filter(|confidence| confidence.is_finite())
                    .unwrap_or_else(|| self.priority.weight(fragment.source_kind))
                    .clamp(0.0, 1.0);
                let canonical = serde_json::to_string(fragment).unwrap_or_default();
                (fragment, weight, canonical)
            })
            .collect();
        ordered.sort_by(|(a, a_weight, a_raw), (b, b_weight, b_raw)| {
            SourcePriority::rank(a.source_kind)
                .cmp(&SourcePriority::rank(b.source_kind))
                .then_with(|| b_weight.total_cmp(a_weight))
                .then_with(|| a.source_kind.cmp(&b.source_kind))
                .then_with(|| a_raw.cmp(b_raw))
        });
        ordered
            .into_iter()
            .map(|(fragment, weight, _)| (fragment, weight))
            .collect()
    }
}

fn resolve_field(
    entity: &str,
    field: &str,
    votes: FieldVotes,
) -> (FieldSpec, Option<FieldConflict>) {
    let mut candidates: Vec<(SemanticType, TypeVote)> = votes.types.into_iter().collect();
    candidates.sort_by(|(a_type, a), (b_type, b)| compare_votes(a_type, a, b_type, b));

    let resolved = candidates
        .first()
        .map(|(semantic_type, _)| semantic_type.clone())
        .unwrap_or(SemanticType::String);
    let winning_weight = candidates.first().map(|(_, vote)| vote.weight).unwrap_or(0.0);
    let confidence = if votes.total_weight > 0.0 {
        winning_weight / votes.total_weight
    } else {
        0.0
    };

    let conflict = (candidates.len() > 1).then(|| FieldConflict {
        entity: entity.to_string(),
        field: field.to_string(),
        candidates: candidates
            .iter()
            .map(|(semantic_type, vote)| (semantic_type.clone(), vote.weight))
            .collect(),
        resolved: resolved.clone(),
    });

    let nullable = votes.nullable_declarations.is_empty()
        || votes.nullable_declarations.iter().any(|nullable| *nullable);

    let spec = FieldSpec {
        semantic_type: resolved,
        nullable,
        sample_values: votes.sample_values,
        confidence,
        contributing_sources: votes.sources.into_iter().collect(),
    };
    (spec, conflict)
}

/// Heavier summed weight first, then the best-ranked voter, then type name.
fn compare_votes(a_type: &SemanticType, a: &TypeVote, b_type: &SemanticType, b: &TypeVote) -> Ordering {
    let by_weight = if (a.weight - b.weight).abs() <= WEIGHT_EPSILON {
        Ordering::Equal
    } else {
        b.weight.total_cmp(&a.weight)
    };
    by_weight
        .then_with(|| a.best_rank.cmp(&b.best_rank))
        .then_with(|| a_type.as_str().cmp(b_type.as_str()))
}

/// Union of asserted relationships; disagreeing cardinalities are all kept and flagged.
fn merge_relationships(fragments: &[(&SchemaFragment, f64)]) -> Vec<(Relationship, Assertion)> {
    type Endpoints = (String, String, String, String);
    let mut grouped: BTreeMap<Endpoints, (BTreeSet<Cardinality>, Assertion)> = BTreeMap::new();
    for (fragment, weight) in fragments {
        for relationship in &fragment.relationships {
            let endpoints = (
                normalize_field_name(&relationship.parent_table),
                normalize_field_name(&relationship.parent_column),
                normalize_field_name(&relationship.child_table),
                normalize_field_name(&relationship.child_column),
            );
            let (cardinalities, assertion) = grouped.entry(endpoints).or_default();
            if let Some(cardinality) = relationship.cardinality {
                cardinalities.insert(cardinality);
            }
            assertion.weight = assertion.weight.max(*weight);
            assertion.sources.insert(fragment.source_kind);
        }
    }

    let mut merged = Vec::new();
    for ((parent_table, parent_column, child_table, child_column), (cardinalities, assertion)) in
        grouped
    {
        let base = Relationship::new(parent_table, parent_column, child_table, child_column);
        match cardinalities.len() {
            0 => merged.push((base, assertion)),
            1 => merged.extend(
                cardinalities
                    .into_iter()
                    .map(|cardinality| {
                        (base.clone().with_cardinality(cardinality), assertion.clone())
                    }),
            ),
            _ => {
                warn!(relationship = %base, "conflicting cardinality assertions");
                merged.extend(cardinalities.into_iter().map(|cardinality| {
                    let mut relationship = base.clone().with_cardinality(cardinality);
                    relationship.ambiguous = true;
                    (relationship, assertion.clone())
                }));
            }
        }
    }
    merged
}

/// Declare relationship endpoints that no fragment listed as fields.
///
/// A missing parent key takes the child's type (or `integer`) and becomes the
/// primary key of an entity without one; a missing child column takes the
/// parent key's type.
fn synthesize_endpoints(
    schema: &mut UnifiedSchema,
    relationship: &Relationship,
    assertion: &Assertion,
    report: &mut FusionReport,
) {
    let field_type = |schema: &UnifiedSchema, entity: &str, field: &str| {
        schema
            .entities
            .get(entity)
            .and_then(|entity| entity.fields.get(field))
            .map(|spec| spec.semantic_type.clone())
    };

    if field_type(schema, &relationship.parent_table, &relationship.parent_column).is_none() {
        let semantic_type = field_type(schema, &relationship.child_table, &relationship.child_column)
            .unwrap_or(SemanticType::Integer);
        let entity = schema
            .entities
            .entry(relationship.parent_table.clone())
            .or_default();
        let is_key = entity.primary_key.is_empty();
        if is_key {
            entity.primary_key = vec![relationship.parent_column.clone()];
        }
        entity.fields.insert(
            relationship.parent_column.clone(),
            synthesized_spec(semantic_type.clone(), !is_key, assertion),
        );
        record_synthesized(
            report,
            relationship,
            &relationship.parent_table,
            &relationship.parent_column,
            semantic_type,
        );
    }

    if field_type(schema, &relationship.child_table, &relationship.child_column).is_none() {
        let semantic_type = field_type(schema, &relationship.parent_table, &relationship.parent_column)
            .unwrap_or(SemanticType::Integer);
        schema
            .entities
            .entry(relationship.child_table.clone())
            .or_default()
            .fields
            .insert(
                relationship.child_column.clone(),
                synthesized_spec(semantic_type.clone(), true, assertion),
            );
        record_synthesized(
            report,
            relationship,
            &relationship.child_table,
            &relationship.child_column,
            semantic_type,
        );
    }
}

fn synthesized_spec(semantic_type: SemanticType, nullable: bool, assertion: &Assertion) -> FieldSpec {
    FieldSpec {
        semantic_type,
        nullable,
        sample_values: Vec::new(),
        confidence: assertion.weight,
        contributing_sources: assertion.sources.iter().copied().collect(),
    }
}

fn record_synthesized(
    report: &mut FusionReport,
    relationship: &Relationship,
    entity: &str,
    field: &str,
    semantic_type: SemanticType,
) {
    debug!(
        entity = %entity,
        field = %field,
        relationship = %relationship,
        "declared relationship endpoint from assertion"
    );
    report.synthesized_fields.push(SynthesizedField {
        entity: entity.to_string(),
        field: field.to_string(),
        semantic_type,
        relationship: relationship.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{EntityFragment, FieldFragment};

    fn single_field(kind: SourceKind, semantic_type: SemanticType) -> SchemaFragment {
        SchemaFragment::new(kind).with_entity(
            "customer",
            EntityFragment::default().with_field("age", FieldFragment::new(semantic_type)),
        )
    }

    #[test]
    fn equal_weights_fall_back_to_source_rank() {
        let engine = SchemaFusionEngine::default();
        let schema = engine.fuse(&[
            single_field(SourceKind::Ui, SemanticType::Integer).with_confidence(0.8),
            single_field(SourceKind::Api, SemanticType::String).with_confidence(0.8),
        ]);
        assert_eq!(
            schema.entities["customer"].fields["age"].semantic_type,
            SemanticType::String
        );
    }

    #[test]
    fn same_rank_ties_resolve_by_type_name() {
        let engine = SchemaFusionEngine::default();
        let schema = engine.fuse(&[
            single_field(SourceKind::Ui, SemanticType::String),
            single_field(SourceKind::TestCase, SemanticType::Integer),
        ]);
        assert_eq!(
            schema.entities["customer"].fields["age"].semantic_type,
            SemanticType::Integer
        );
    }

    #[test]
    fn confidence_is_winning_share() {
        let engine = SchemaFusionEngine::default();
        let (schema, report) = engine.fuse_with_report(&[
            single_field(SourceKind::Database, SemanticType::Integer),
            single_field(SourceKind::Api, SemanticType::Integer),
            single_field(SourceKind::DomainPack, SemanticType::String),
        ]);
        let field = &schema.entities["customer"].fields["age"];
        assert!((field.confidence - 1.9 / 2.5).abs() < 1e-9);
        assert_eq!(
            field.contributing_sources,
            vec![SourceKind::Database, SourceKind::Api, SourceKind::DomainPack]
        );
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].candidates[0].0, SemanticType::Integer);
    }

    #[test]
    fn identity_key_defaults_to_id() {
        let engine = SchemaFusionEngine::default();
        let schema = engine.fuse(&[SchemaFragment::new(SourceKind::Api).with_entity(
            "Customer",
            EntityFragment::default()
                .with_field("Id", FieldFragment::new(SemanticType::Integer))
                .with_field("EmailAddress", FieldFragment::new(SemanticType::Email)),
        )]);
        let customer = &schema.entities["customer"];
        assert_eq!(customer.primary_key, vec!["id"]);
        assert!(customer.fields.contains_key("email_address"));
    }
}
