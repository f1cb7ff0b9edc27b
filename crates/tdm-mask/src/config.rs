use serde::{Deserialize, Serialize};

pub const DEFAULT_SALT: &str = "tdm-mask-v1";
pub const DEFAULT_REDACT_SENTINEL: &str = "REDACTED";

/// Parameters shared by the built-in rules of one registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    pub salt: String,
    pub redact_sentinel: String,
    /// When set, `email_deterministic` hashes the whole address and uses this domain.
    pub masked_domain: Option<String>,
    /// Seed of the tokenize vault.
    pub token_seed: u64,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            salt: DEFAULT_SALT.to_string(),
            redact_sentinel: DEFAULT_REDACT_SENTINEL.to_string(),
            masked_domain: None,
            token_seed: 0,
        }
    }
}
