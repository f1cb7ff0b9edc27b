use std::fs;

use tdm_core::{Cardinality, Relationship, SemanticType, SourceKind};
use tdm_fusion::{
    DomainPackRepository, EntityFragment, FieldFragment, SchemaFragment, SchemaFusionEngine,
    SourcePriority, unified_json_schema,
};

fn age_fragment(kind: SourceKind, semantic_type: SemanticType) -> SchemaFragment {
    SchemaFragment::new(kind).with_entity(
        "person",
        EntityFragment::default().with_field("age", FieldFragment::new(semantic_type)),
    )
}

#[test]
fn database_beats_domain_pack() {
    let engine = SchemaFusionEngine::default();
    let schema = engine.fuse(&[
        age_fragment(SourceKind::DomainPack, SemanticType::Integer).with_confidence(0.6),
        age_fragment(SourceKind::Database, SemanticType::String).with_confidence(1.0),
    ]);
    let age = &schema.entities["person"].fields["age"];
    assert_eq!(age.semantic_type, SemanticType::String);
    assert!((age.confidence - 1.0 / 1.6).abs() < 1e-9);
}

#[test]
fn fusion_ignores_fragment_order() {
    let engine = SchemaFusionEngine::default();
    let fragments = vec![
        age_fragment(SourceKind::Ui, SemanticType::Integer),
        age_fragment(SourceKind::Api, SemanticType::Decimal),
        age_fragment(SourceKind::TestCase, SemanticType::Integer),
        SchemaFragment::new(SourceKind::Database).with_entity(
            "person",
            EntityFragment::default()
                .with_field(
                    "email",
                    FieldFragment::new(SemanticType::Email).with_samples(["a@x.io", "b@x.io"]),
                )
                .with_field("id", FieldFragment::new(SemanticType::Integer).nullable(false)),
        ),
    ];
    let mut reversed = fragments.clone();
    reversed.reverse();

    let forward = engine.fuse(&fragments);
    assert_eq!(forward, engine.fuse(&reversed));
    assert_eq!(
        forward.entities["person"].fields["age"].semantic_type,
        SemanticType::Integer
    );
}

#[test]
fn nullable_only_when_every_declaration_is_strict() {
    let engine = SchemaFusionEngine::default();
    let field = |nullable: Option<bool>| {
        let mut field = FieldFragment::new(SemanticType::Email);
        field.nullable = nullable;
        SchemaFragment::new(SourceKind::Api)
            .with_entity("user", EntityFragment::default().with_field("email", field))
    };

    let strict = engine.fuse(&[field(Some(false)), field(None)]);
    assert!(!strict.entities["user"].fields["email"].nullable);

    let mixed = engine.fuse(&[field(Some(false)), field(Some(true))]);
    assert!(mixed.entities["user"].fields["email"].nullable);

    let silent = engine.fuse(&[field(None)]);
    assert!(silent.entities["user"].fields["email"].nullable);
}

#[test]
fn conflicting_cardinalities_are_kept_and_flagged() {
    let entities = |kind: SourceKind, cardinality: Cardinality| {
        SchemaFragment::new(kind)
            .with_entity(
                "customer",
                EntityFragment::default().with_field("id", FieldFragment::new(SemanticType::Integer)),
            )
            .with_entity(
                "profile",
                EntityFragment::default()
                    .with_field("id", FieldFragment::new(SemanticType::Integer))
                    .with_field("customer_id", FieldFragment::new(SemanticType::Integer)),
            )
            .with_relationship(
                Relationship::new("customer", "id", "profile", "customer_id")
                    .with_cardinality(cardinality),
            )
    };

    let engine = SchemaFusionEngine::default();
    let (schema, report) = engine.fuse_with_report(&[
        entities(SourceKind::Database, Cardinality::OneToOne),
        entities(SourceKind::Ui, Cardinality::OneToMany),
    ]);

    let relationships = &schema.entities["profile"].relationships;
    assert_eq!(relationships.len(), 2);
    assert!(relationships.iter().all(|relationship| relationship.ambiguous));
    assert_eq!(report.ambiguous.len(), 2);
    assert_eq!(schema.to_graph().expect("graph").relationships().len(), 1);
}

#[test]
fn asserted_relationships_declare_missing_endpoints() {
    let engine = SchemaFusionEngine::default();
    let (schema, report) = engine.fuse_with_report(&[
        SchemaFragment::new(SourceKind::Database).with_entity(
            "customer",
            EntityFragment::default()
                .with_field("id", FieldFragment::new(SemanticType::Uuid).nullable(false))
                .with_primary_key(&["id"]),
        ),
        SchemaFragment::new(SourceKind::Api)
            .with_entity(
                "order",
                EntityFragment::default().with_field("id", FieldFragment::new(SemanticType::Integer)),
            )
            .with_relationship(Relationship::new("customer", "id", "order", "customer_id")),
    ]);

    let order = &schema.entities["order"];
    assert_eq!(order.relationships.len(), 1);
    let customer_id = &order.fields["customer_id"];
    assert_eq!(customer_id.semantic_type, SemanticType::Uuid);
    assert!((customer_id.confidence - 0.9).abs() < 1e-9);
    assert_eq!(customer_id.contributing_sources, vec![SourceKind::Api]);
    assert_eq!(report.synthesized_fields.len(), 1);
    assert_eq!(report.synthesized_fields[0].field, "customer_id");
    assert!(schema.to_graph().is_ok());
}

#[test]
fn relationships_to_unknown_entities_declare_a_parent_key() {
    let engine = SchemaFusionEngine::default();
    let (schema, report) = engine.fuse_with_report(&[SchemaFragment::new(SourceKind::Ui)
        .with_entity(
            "order",
            EntityFragment::default()
                .with_field("id", FieldFragment::new(SemanticType::Integer))
                .with_field("customer_ref", FieldFragment::new(SemanticType::String)),
        )
        .with_relationship(Relationship::new("customer", "ref", "order", "customer_ref"))]);

    let customer = &schema.entities["customer"];
    assert_eq!(customer.primary_key, vec!["ref".to_string()]);
    assert_eq!(customer.fields["ref"].semantic_type, SemanticType::String);
    assert!(!customer.fields["ref"].nullable);
    assert_eq!(report.synthesized_fields.len(), 1);
    assert_eq!(schema.entities["order"].relationships.len(), 1);
    assert_eq!(schema.to_graph().expect("graph").relationships().len(), 1);
}

#[test]
fn out_of_range_confidence_is_clamped() {
    let engine = SchemaFusionEngine::default();
    let schema = engine.fuse(&[
        age_fragment(SourceKind::Api, SemanticType::Integer).with_confidence(4.0),
        age_fragment(SourceKind::Ui, SemanticType::String).with_confidence(-2.0),
    ]);
    let age = &schema.entities["person"].fields["age"];
    assert_eq!(age.semantic_type, SemanticType::Integer);
    assert!((0.0..=1.0).contains(&age.confidence));
    assert!((age.confidence - 1.0).abs() < 1e-9);
}

#[test]
fn camel_case_sources_fuse_with_snake_case() {
    let engine = SchemaFusionEngine::default();
    let schema = engine.fuse(&[
        SchemaFragment::new(SourceKind::Ui).with_entity(
            "Order",
            EntityFragment::default().with_field("CustomerId", FieldFragment::new(SemanticType::Integer)),
        ),
        SchemaFragment::new(SourceKind::Database).with_entity(
            "order",
            EntityFragment::default().with_field("customer_id", FieldFragment::new(SemanticType::Integer)),
        ),
    ]);
    let field = &schema.entities["order"].fields["customer_id"];
    assert_eq!(schema.entities["order"].fields.len(), 1);
    assert_eq!(
        field.contributing_sources,
        vec![SourceKind::Database, SourceKind::Ui]
    );
}

#[test]
fn custom_priority_changes_the_winner() {
    let engine = SchemaFusionEngine::new(SourcePriority {
        domain_pack: 2.0,
        ..SourcePriority::default()
    });
    let schema = engine.fuse(&[
        age_fragment(SourceKind::DomainPack, SemanticType::Integer),
        age_fragment(SourceKind::Database, SemanticType::String),
    ]);
    assert_eq!(
        schema.entities["person"].fields["age"].semantic_type,
        SemanticType::Integer
    );
}

#[test]
fn domain_pack_fills_in_behind_real_sources() {
    let repository = DomainPackRepository::with_builtins();
    let engine = SchemaFusionEngine::default();
    let database = SchemaFragment::new(SourceKind::Database).with_entity(
        "customer",
        EntityFragment::default().with_field("email", FieldFragment::new(SemanticType::String)),
    );

    let schema = engine
        .fuse_with_domain(&[database], &repository, "ecommerce")
        .expect("fuse");
    assert_eq!(
        schema.entities["customer"].fields["email"].semantic_type,
        SemanticType::String
    );
    assert_eq!(schema.entities["order"].relationships.len(), 1);
    assert_eq!(schema.entities["order"].primary_key, vec!["id"]);
    assert!(schema.to_graph().is_ok());

    assert!(engine.fuse_with_domain(&[], &repository, "retail").is_err());
}

#[test]
fn packs_load_from_json_files() {
    let dir = std::env::temp_dir().join(format!("tdm_fusion_{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).expect("create dir");
    fs::write(
        dir.join("retail.json"),
        r#"{
            "name": "retail",
            "entities": {
                "store": {"fields": {"id": {"semantic_type": "integer"}, "city": {"semantic_type": "city"}}}
            }
        }"#,
    )
    .expect("write pack");
    fs::write(dir.join("notes.txt"), "ignored").expect("write note");

    let mut repository = DomainPackRepository::new();
    let loaded = repository.load_dir(&dir).expect("load");
    assert_eq!(loaded, vec!["retail"]);
    let fragment = repository.fragment("retail").expect("fragment");
    assert_eq!(fragment.source_kind, SourceKind::DomainPack);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unified_schema_document_has_a_json_schema() {
    let schema = serde_json::to_value(unified_json_schema()).expect("schema");
    assert!(schema["properties"]["entities"].is_object());
}
