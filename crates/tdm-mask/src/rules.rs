use serde::{Deserialize, Serialize};
use tdm_core::{SchemaGraph, SemanticType, infer_semantic_type};
use tracing::debug;

use crate::builtin::BuiltinRule;

/// One `(table, column) -> rule` assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingRule {
    pub table: String,
    pub column: String,
    pub rule: String,
}

/// Caller-supplied masking assignments; at most one rule per column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingRuleSet {
    #[serde(default)]
    pub rules: Vec<MaskingRule>,
}

impl MaskingRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a rule, replacing any earlier rule for the same column.
    pub fn insert(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        rule: impl Into<String>,
    ) {
        let (table, column, rule) = (table.into(), column.into(), rule.into());
        if let Some(existing) = self
            .rules
            .iter_mut()
            .find(|existing| existing.table == table && existing.column == column)
        {
            existing.rule = rule;
            return;
        }
        self.rules.push(MaskingRule {
            table,
            column,
            rule,
        });
    }

    pub fn with(mut self, table: &str, column: &str, rule: &str) -> Self {
        self.insert(table, column, rule);
        self
    }

    pub fn rule_for(&self, table: &str, column: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.table == table && rule.column == column)
            .map(|rule| rule.rule.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Propose rules for PII columns from their semantic types.
    ///
    /// Columns that take part in a relationship only get FK-safe rules.
    pub fn suggest(graph: &SchemaGraph) -> Self {
        let mut suggested = Self::new();
        for (key, table) in graph.table_keys().iter().zip(graph.tables()) {
            for column in &table.columns {
                let semantic_type = column.inferred_semantic_type.clone().unwrap_or_else(|| {
                    infer_semantic_type(&column.name, &column.data_type, &[]).0
                });
                let Some(mut rule) = rule_for_type(&semantic_type) else {
                    continue;
                };
                if !rule.is_fk_safe() && graph.is_relationship_column(key, &column.name) {
                    rule = BuiltinRule::Hash;
                }
                debug!(table = %key, column = %column.name, rule = %rule, "suggested masking rule");
                suggested.insert(key.clone(), column.name.clone(), rule.as_str());
            }
        }
        suggested
    }
}

fn rule_for_type(semantic_type: &SemanticType) -> Option<BuiltinRule> {
    let rule = match semantic_type {
        SemanticType::Email => BuiltinRule::EmailDeterministic,
        SemanticType::Phone | SemanticType::Ssn | SemanticType::CreditCard => {
            BuiltinRule::FormatPreserving
        }
        SemanticType::PersonName
        | SemanticType::FirstName
        | SemanticType::LastName
        | SemanticType::Address => BuiltinRule::Tokenize,
        other if other.is_pii() => BuiltinRule::Hash,
        _ => return None,
    };
    Some(rule)
}
