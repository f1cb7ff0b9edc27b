use std::collections::{HashMap, HashSet};
use std::fmt;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// Masking rules shipped with the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinRule {
    Hash,
    EmailDeterministic,
    Redact,
    Tokenize,
    FormatPreserving,
    Null,
}

impl BuiltinRule {
    pub const ALL: [BuiltinRule; 6] = [
        BuiltinRule::Hash,
        BuiltinRule::EmailDeterministic,
        BuiltinRule::Redact,
        BuiltinRule::Tokenize,
        BuiltinRule::FormatPreserving,
        BuiltinRule::Null,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "hash" => Some(BuiltinRule::Hash),
            "email_deterministic" => Some(BuiltinRule::EmailDeterministic),
            "redact" => Some(BuiltinRule::Redact),
            "tokenize" => Some(BuiltinRule::Tokenize),
            "format_preserving" => Some(BuiltinRule::FormatPreserving),
            "null" => Some(BuiltinRule::Null),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuiltinRule::Hash => "hash",
            BuiltinRule::EmailDeterministic => "email_deterministic",
            BuiltinRule::Redact => "redact",
            BuiltinRule::Tokenize => "tokenize",
            BuiltinRule::FormatPreserving => "format_preserving",
            BuiltinRule::Null => "null",
        }
    }

    /// Whether equal inputs map to equal, distinct-per-input outputs, keeping joins intact.
    pub fn is_fk_safe(self) -> bool {
        matches!(
            self,
            BuiltinRule::Hash | BuiltinRule::EmailDeterministic | BuiltinRule::Tokenize
        )
    }
}

impl fmt::Display for BuiltinRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Salted SHA-256, hex encoded, first 16 chars.
pub fn salted_hash(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(value.as_bytes());
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(16);
    encoded
}

/// Replace the local part of an address with its salted hash.
///
/// Values without an email shape are hashed whole so the column stays join-safe.
pub fn email_deterministic(salt: &str, masked_domain: Option<&str>, value: &str) -> String {
    let Some((local, domain)) = split_email(value) else {
        return salted_hash(salt, value);
    };
    match masked_domain {
        Some(masked_domain) => format!("{}@{masked_domain}", salted_hash(salt, value)),
        None => format!("{}@{domain}", salted_hash(salt, local)),
    }
}

/// Mask every letter and every digit except the last four; an email keeps its local
/// edges and domain. Values with four digits or fewer are masked whole, separators aside.
pub fn format_preserving(value: &str, mask_char: char) -> String {
    if let Some((local, domain)) = split_email(value) {
        return format!("{}@{domain}", mask_keep_edges(local, mask_char));
    }

    let digit_count = value.chars().filter(|ch| ch.is_ascii_digit()).count();
    if digit_count == 0 {
        return mask_keep_edges(value, mask_char);
    }

    let keep_from = if digit_count > 4 { digit_count - 4 } else { digit_count };
    let mut seen = 0;
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_digit() {
                seen += 1;
                if seen > keep_from { ch } else { mask_char }
            } else if ch.is_alphanumeric() {
                mask_char
            } else {
                ch
            }
        })
        .collect()
}

fn mask_keep_edges(value: &str, mask_char: char) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 2 {
        return chars.iter().map(|_| mask_char).collect();
    }
    let last = chars.len() - 1;
    chars
        .iter()
        .enumerate()
        .map(|(idx, ch)| if idx == 0 || idx == last { *ch } else { mask_char })
        .collect()
}

fn split_email(value: &str) -> Option<(&str, &str)> {
    let (local, domain) = value.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return None;
    }
    Some((local, domain))
}

/// Per-run surrogate tokens; every distinct input gets a distinct random token.
#[derive(Debug)]
pub(crate) struct TokenVault {
    rng: ChaCha8Rng,
    tokens: HashMap<String, String>,
    issued: HashSet<String>,
}

impl TokenVault {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            tokens: HashMap::new(),
            issued: HashSet::new(),
        }
    }

    pub(crate) fn token_for(&mut self, value: &str) -> String {
        if let Some(token) = self.tokens.get(value) {
            return token.clone();
        }
        let token = loop {
            let candidate = format!("tok_{:016x}", self.rng.next_u64());
            if self.issued.insert(candidate.clone()) {
                break candidate;
            }
        };
        self.tokens.insert(value.to_string(), token.clone());
        token
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_and_truncated() {
        let a = salted_hash("s1", "alice");
        assert_eq!(a.len(), 16);
        assert_eq!(a, salted_hash("s1", "alice"));
        assert_ne!(a, salted_hash("s2", "alice"));
        assert_ne!(a, salted_hash("s1", "bob"));
    }

    #[test]
    fn email_keeps_domain_unless_fixed() {
        let masked = email_deterministic("salt", None, "alice@example.com");
        let (local, domain) = masked.split_once('@').expect("email shape");
        assert_eq!(local.len(), 16);
        assert_eq!(domain, "example.com");

        let fixed = email_deterministic("salt", Some("masked.local"), "alice@example.com");
        assert!(fixed.ends_with("@masked.local"));
    }

    #[test]
    fn non_email_falls_back_to_hash() {
        assert_eq!(
            email_deterministic("salt", None, "not-an-email"),
            salted_hash("salt", "not-an-email")
        );
    }

    #[test]
    fn format_preserving_keeps_layout_and_last_four() {
        assert_eq!(format_preserving("4111-1111-1111-1234", '*'), "****-****-****-1234");
        assert_eq!(format_preserving("123", '*'), "***");
        assert_eq!(format_preserving("4521", '*'), "****");
        assert_eq!(format_preserving("PIN 0042", '*'), "*** ****");
        assert_eq!(format_preserving("Apt 12, Main Street", '*'), "*** **, **** ******");
        assert_eq!(format_preserving("Unit 5, 1234567", '*'), "**** *, ***4567");
        assert_eq!(format_preserving("john.doe@example.com", '*'), "j******e@example.com");
        assert_eq!(format_preserving("Alice", '*'), "A***e");
    }

    #[test]
    fn null_rule_is_known_but_not_join_safe() {
        assert_eq!(BuiltinRule::parse("null"), Some(BuiltinRule::Null));
        assert_eq!(BuiltinRule::Null.as_str(), "null");
        assert!(!BuiltinRule::Null.is_fk_safe());
        assert!(BuiltinRule::ALL.contains(&BuiltinRule::Null));
    }

    #[test]
    fn vault_reuses_tokens_per_input() {
        let mut vault = TokenVault::new(7);
        let a = vault.token_for("alice");
        assert_eq!(a, vault.token_for("alice"));
        assert_ne!(a, vault.token_for("bob"));
        assert!(a.starts_with("tok_"));
        assert_eq!(a.len(), 20);
        assert_eq!(vault.len(), 2);
    }
}
