use std::collections::BTreeMap;
use std::sync::Mutex;

use tdm_core::Value;
use tracing::debug;

use crate::builtin::{self, BuiltinRule, TokenVault};
use crate::config::MaskingConfig;
use crate::error::{MaskingError, Result};

/// Row being masked, as seen by a transform.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub table: &'a str,
    pub column: &'a str,
    pub column_names: &'a [String],
    /// Row values before any rule of this pass touched them.
    pub row: &'a [Value],
}

impl<'a> RowContext<'a> {
    /// Context for a value masked outside of any batch.
    pub fn detached(table: &'a str, column: &'a str) -> Self {
        Self {
            table,
            column,
            column_names: &[],
            row: &[],
        }
    }

    pub fn value(&self, column: &str) -> Option<&'a Value> {
        let idx = self.column_names.iter().position(|name| name == column)?;
        self.row.get(idx)
    }
}

/// Caller-supplied masking rule.
///
/// `apply` is never called with `Value::Null`; the registry passes nulls through.
pub trait MaskTransform: Send + Sync {
    fn apply(&self, value: &Value, ctx: &RowContext<'_>) -> Result<Value>;

    /// Whether equal inputs map to equal outputs and distinct inputs stay distinct.
    fn is_fk_safe(&self) -> bool;
}

/// A rule name resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedRule {
    Builtin(BuiltinRule),
    Extension(String),
}

/// Rule table plus the per-run tokenize vault.
pub struct MaskingTransformRegistry {
    config: MaskingConfig,
    extensions: BTreeMap<String, Box<dyn MaskTransform>>,
    vault: Mutex<TokenVault>,
}

impl std::fmt::Debug for MaskingTransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskingTransformRegistry")
            .field("config", &self.config)
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for MaskingTransformRegistry {
    fn default() -> Self {
        Self::new(MaskingConfig::default())
    }
}

impl MaskingTransformRegistry {
    pub fn new(config: MaskingConfig) -> Self {
        let vault = Mutex::new(TokenVault::new(config.token_seed));
        Self {
            config,
            extensions: BTreeMap::new(),
            vault,
        }
    }

    pub fn config(&self) -> &MaskingConfig {
        &self.config
    }

    /// Register an extension rule. Names of built-ins and existing extensions are rejected.
    pub fn register<T>(&mut self, rule_name: impl Into<String>, transform: T) -> Result<()>
    where
        T: MaskTransform + 'static,
    {
        let rule_name = rule_name.into();
        if BuiltinRule::parse(&rule_name).is_some() || self.extensions.contains_key(&rule_name) {
            return Err(MaskingError::DuplicateRule(rule_name));
        }
        debug!(rule = %rule_name, "registered masking rule");
        self.extensions.insert(rule_name, Box::new(transform));
        Ok(())
    }

    pub fn resolve(&self, rule_name: &str) -> Result<ResolvedRule> {
        if let Some(rule) = BuiltinRule::parse(rule_name) {
            return Ok(ResolvedRule::Builtin(rule));
        }
        if self.extensions.contains_key(rule_name) {
            return Ok(ResolvedRule::Extension(rule_name.to_string()));
        }
        Err(MaskingError::UnknownRule(rule_name.to_string()))
    }

    pub fn is_fk_safe(&self, rule_name: &str) -> Result<bool> {
        match self.resolve(rule_name)? {
            ResolvedRule::Builtin(rule) => Ok(rule.is_fk_safe()),
            ResolvedRule::Extension(name) => Ok(self
                .extensions
                .get(&name)
                .is_some_and(|transform| transform.is_fk_safe())),
        }
    }

    /// Every rule name this registry knows, built-ins first.
    pub fn rule_names(&self) -> Vec<String> {
        BuiltinRule::ALL
            .iter()
            .map(|rule| rule.as_str().to_string())
            .chain(self.extensions.keys().cloned())
            .collect()
    }

    /// Mask one value. `Null` always stays `Null`.
    pub fn apply(&self, rule_name: &str, value: &Value, ctx: &RowContext<'_>) -> Result<Value> {
        let rule = self.resolve(rule_name)?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        match rule {
            ResolvedRule::Builtin(rule) => Ok(self.apply_builtin(rule, value)),
            ResolvedRule::Extension(name) => match self.extensions.get(&name) {
                Some(transform) => transform.apply(value, ctx),
                None => Err(MaskingError::UnknownRule(name)),
            },
        }
    }

    fn apply_builtin(&self, rule: BuiltinRule, value: &Value) -> Value {
        if rule == BuiltinRule::Null {
            return Value::Null;
        }
        let rendered = value.render();
        let masked = match rule {
            BuiltinRule::Hash => builtin::salted_hash(&self.config.salt, &rendered),
            BuiltinRule::EmailDeterministic => builtin::email_deterministic(
                &self.config.salt,
                self.config.masked_domain.as_deref(),
                &rendered,
            ),
            BuiltinRule::Redact => self.config.redact_sentinel.clone(),
            BuiltinRule::Tokenize => {
                let mut vault = self
                    .vault
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                vault.token_for(&rendered)
            }
            BuiltinRule::FormatPreserving => builtin::format_preserving(&rendered, '*'),
            BuiltinRule::Null => return Value::Null,
        };
        Value::Text(masked)
    }

    /// Number of distinct inputs tokenized so far in this run.
    pub fn tokens_issued(&self) -> usize {
        self.vault
            .lock()
            .map(|vault| vault.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reverse;

    impl MaskTransform for Reverse {
        fn apply(&self, value: &Value, _ctx: &RowContext<'_>) -> Result<Value> {
            Ok(Value::Text(value.render().chars().rev().collect()))
        }

        fn is_fk_safe(&self) -> bool {
            true
        }
    }

    fn ctx() -> RowContext<'static> {
        RowContext::detached("users", "email")
    }

    #[test]
    fn null_passes_through_every_rule() {
        let mut registry = MaskingTransformRegistry::default();
        registry.register("reverse", Reverse).expect("register");
        for rule in registry.rule_names() {
            let masked = registry.apply(&rule, &Value::Null, &ctx()).expect("apply");
            assert_eq!(masked, Value::Null, "rule {rule}");
        }
    }

    #[test]
    fn unknown_rule_is_an_error() {
        let registry = MaskingTransformRegistry::default();
        let err = registry
            .apply("scramble", &Value::text("x"), &ctx())
            .unwrap_err();
        assert!(matches!(err, MaskingError::UnknownRule(name) if name == "scramble"));
    }

    #[test]
    fn builtin_names_cannot_be_shadowed() {
        let mut registry = MaskingTransformRegistry::default();
        let err = registry.register("hash", Reverse).unwrap_err();
        assert!(matches!(err, MaskingError::DuplicateRule(_)));
        registry.register("reverse", Reverse).expect("register");
        assert!(registry.register("reverse", Reverse).is_err());
    }

    #[test]
    fn hash_is_deterministic_and_distinct() {
        let registry = MaskingTransformRegistry::default();
        let a = registry.apply("hash", &Value::Int(42), &ctx()).expect("hash");
        let b = registry.apply("hash", &Value::Int(42), &ctx()).expect("hash");
        let c = registry.apply("hash", &Value::Int(43), &ctx()).expect("hash");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn tokenize_is_stable_within_a_run() {
        let registry = MaskingTransformRegistry::default();
        let a = registry.apply("tokenize", &Value::text("alice"), &ctx()).expect("token");
        let again = registry.apply("tokenize", &Value::text("alice"), &ctx()).expect("token");
        let b = registry.apply("tokenize", &Value::text("bob"), &ctx()).expect("token");
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(registry.tokens_issued(), 2);
    }

    #[test]
    fn null_rule_blanks_values() {
        let registry = MaskingTransformRegistry::default();
        assert_eq!(
            registry.apply("null", &Value::text("555-0100"), &ctx()).expect("null"),
            Value::Null
        );
        assert!(!registry.is_fk_safe("null").expect("known"));
    }

    #[test]
    fn redact_uses_configured_sentinel() {
        let registry = MaskingTransformRegistry::new(MaskingConfig {
            redact_sentinel: "***".to_string(),
            ..MaskingConfig::default()
        });
        assert_eq!(
            registry.apply("redact", &Value::text("secret"), &ctx()).expect("redact"),
            Value::text("***")
        );
        assert!(!registry.is_fk_safe("redact").expect("known"));
    }
}
