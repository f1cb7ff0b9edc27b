use tdm_core::{Batches, Column, Relationship, RowBatch, SchemaGraph, Table, Value};
use tdm_mask::{
    MaskTransform, MaskingConfig, MaskingError, MaskingRuleSet, MaskingTransformRegistry,
    RowContext, mask_batches,
};

/// Upper-cases values and rejects one of them.
struct RejectBob;

impl MaskTransform for RejectBob {
    fn apply(&self, value: &Value, _ctx: &RowContext<'_>) -> tdm_mask::Result<Value> {
        let rendered = value.render();
        if rendered.starts_with("bob") {
            return Err(MaskingError::Transform {
                rule: "reject_bob".to_string(),
                message: "cannot mask bob".to_string(),
            });
        }
        Ok(Value::Text(rendered.to_uppercase()))
    }

    fn is_fk_safe(&self) -> bool {
        true
    }
}

fn graph() -> SchemaGraph {
    SchemaGraph::build(
        vec![
            Table::new(
                "public",
                "customers",
                vec![
                    Column::new("id", "integer", false),
                    Column::new("email", "text", false),
                ],
                vec!["id".into()],
            ),
            Table::new(
                "public",
                "orders",
                vec![
                    Column::new("id", "integer", false),
                    Column::new("customer_email", "text", false),
                ],
                vec!["id".into()],
            ),
        ],
        vec![Relationship::new(
            "customers",
            "email",
            "orders",
            "customer_email",
        )],
    )
    .expect("graph")
}

fn batches() -> Batches {
    let mut batches = Batches::new();
    batches.insert(
        "customers".to_string(),
        RowBatch {
            table_name: "customers".to_string(),
            column_names: vec!["id".into(), "email".into()],
            rows: vec![
                vec![Value::Int(1), Value::text("alice@example.com")],
                vec![Value::Int(2), Value::text("bob@example.com")],
                vec![Value::Int(3), Value::Null],
            ],
        },
    );
    batches.insert(
        "orders".to_string(),
        RowBatch {
            table_name: "orders".to_string(),
            column_names: vec!["id".into(), "customer_email".into()],
            rows: vec![
                vec![Value::Int(10), Value::text("alice@example.com")],
                vec![Value::Int(11), Value::text("bob@example.com")],
            ],
        },
    );
    batches
}

#[test]
fn email_deterministic_is_stable_and_distinct() {
    let registry = MaskingTransformRegistry::default();
    let ctx = RowContext::detached("customers", "email");
    let first = registry
        .apply("email_deterministic", &Value::text("alice@example.com"), &ctx)
        .expect("mask");
    let second = registry
        .apply("email_deterministic", &Value::text("alice@example.com"), &ctx)
        .expect("mask");
    let bob = registry
        .apply("email_deterministic", &Value::text("bob@example.com"), &ctx)
        .expect("mask");

    assert_eq!(first, second);
    assert_ne!(first, bob);
    assert!(first.render().ends_with("@example.com"));
}

#[test]
fn fk_safe_rules_keep_joins_intact() {
    let graph = graph();
    let registry = MaskingTransformRegistry::default();
    let rules = MaskingRuleSet::new()
        .with("customers", "email", "email_deterministic")
        .with("orders", "customer_email", "email_deterministic");
    let mut batches = batches();

    let report = mask_batches(&registry, &rules, &graph, &mut batches).expect("mask");
    assert!(report.warnings.is_empty());
    assert_eq!(report.masked_cells(), 4);

    assert_eq!(batches["customers"].rows[0][1], batches["orders"].rows[0][1]);
    assert_ne!(batches["customers"].rows[0][1], Value::text("alice@example.com"));
    assert_eq!(batches["customers"].rows[2][1], Value::Null);
    assert!(tdm_core::check_integrity(&graph, &batches).expect("check").is_clean());
}

#[test]
fn redacting_a_relationship_column_warns_but_proceeds() {
    let graph = graph();
    let registry = MaskingTransformRegistry::default();
    let rules = MaskingRuleSet::new().with("orders", "customer_email", "redact");
    let mut batches = batches();

    let report = mask_batches(&registry, &rules, &graph, &mut batches).expect("mask");
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].column, "customer_email");
    assert_eq!(batches["orders"].rows[1][1], Value::text("REDACTED"));
    assert_eq!(batches["orders"].len(), 2);
}

#[test]
fn unknown_rule_leaves_batches_untouched() {
    let graph = graph();
    let registry = MaskingTransformRegistry::default();
    let rules = MaskingRuleSet::new()
        .with("customers", "email", "hash")
        .with("orders", "customer_email", "shuffle");
    let mut batches = batches();
    let before = batches.clone();

    let err = mask_batches(&registry, &rules, &graph, &mut batches).unwrap_err();
    assert!(matches!(err, MaskingError::UnknownRule(name) if name == "shuffle"));
    assert_eq!(batches, before);
}

#[test]
fn failing_transform_leaves_batches_untouched() {
    let graph = graph();
    let mut registry = MaskingTransformRegistry::default();
    registry.register("reject_bob", RejectBob).expect("register");
    let rules = MaskingRuleSet::new()
        .with("customers", "email", "hash")
        .with("orders", "customer_email", "reject_bob");
    let mut batches = batches();
    let before = batches.clone();

    let err = mask_batches(&registry, &rules, &graph, &mut batches).unwrap_err();
    assert!(matches!(err, MaskingError::Transform { rule, .. } if rule == "reject_bob"));
    assert_eq!(batches, before);
}

#[test]
fn null_rule_blanks_a_column_and_warns_on_relationships() {
    let graph = graph();
    let registry = MaskingTransformRegistry::default();
    let rules = MaskingRuleSet::new().with("customers", "email", "null");
    let mut batches = batches();

    let report = mask_batches(&registry, &rules, &graph, &mut batches).expect("mask");
    assert_eq!(report.warnings.len(), 1);
    assert!(batches["customers"].rows.iter().all(|row| row[1] == Value::Null));
    assert_eq!(batches["customers"].len(), 3);
}

#[test]
fn rules_for_missing_tables_and_columns_are_skipped() {
    let graph = graph();
    let registry = MaskingTransformRegistry::new(MaskingConfig::default());
    let rules = MaskingRuleSet::new()
        .with("invoices", "email", "hash")
        .with("customers", "phone", "hash");
    let mut batches = batches();

    let report = mask_batches(&registry, &rules, &graph, &mut batches).expect("mask");
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.masked_cells(), 0);
}

#[test]
fn rule_set_loads_from_json() {
    let rules: MaskingRuleSet = serde_json::from_str(
        r#"{"rules": [{"table": "customers", "column": "email", "rule": "hash"}]}"#,
    )
    .expect("parse rules");
    assert_eq!(rules.rule_for("customers", "email"), Some("hash"));
}
