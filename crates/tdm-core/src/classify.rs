use std::sync::LazyLock;

use regex::Regex;

use crate::schema::{SemanticType, Table};

/// Confidence of a value-pattern match.
pub const PATTERN_CONFIDENCE: f64 = 0.95;
/// Confidence of a column-name hint.
pub const NAME_HINT_CONFIDENCE: f64 = 0.85;
/// Confidence of a mapping from the declared data type.
pub const DATA_TYPE_CONFIDENCE: f64 = 0.5;
/// Confidence of the `string` fallback.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

static PATTERNS: LazyLock<Vec<(SemanticType, Regex)>> = LazyLock::new(|| {
    [
        (
            SemanticType::Email,
            r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$",
        ),
        (SemanticType::Ssn, r"^\d{3}-\d{2}-\d{4}$"),
        (
            SemanticType::CreditCard,
            r"^\d{4}[\s\-]?\d{4}[\s\-]?\d{4}[\s\-]?\d{4}$",
        ),
        (SemanticType::Phone, r"^[\d\s\-+()]{10,20}$"),
    ]
    .into_iter()
    .filter_map(|(semantic_type, pattern)| {
        Regex::new(pattern).ok().map(|regex| (semantic_type, regex))
    })
    .collect()
});

/// Infer the semantic type of a column from its name, declared type and sample values.
///
/// Samples win when every non-empty sample matches one value pattern; then
/// column-name hints; then the data type; `string` otherwise.
pub fn infer_semantic_type(
    column_name: &str,
    data_type: &str,
    samples: &[&str],
) -> (SemanticType, f64) {
    if let Some(semantic_type) = match_samples(samples) {
        return (semantic_type, PATTERN_CONFIDENCE);
    }
    if let Some(semantic_type) = name_hint(column_name) {
        return (semantic_type, NAME_HINT_CONFIDENCE);
    }
    if let Some(semantic_type) = data_type_hint(data_type) {
        return (semantic_type, DATA_TYPE_CONFIDENCE);
    }
    (SemanticType::String, FALLBACK_CONFIDENCE)
}

fn match_samples(samples: &[&str]) -> Option<SemanticType> {
    let samples: Vec<&str> = samples
        .iter()
        .map(|sample| sample.trim())
        .filter(|sample| !sample.is_empty())
        .collect();
    if samples.is_empty() {
        return None;
    }
    PATTERNS
        .iter()
        .find(|(_, regex)| samples.iter().all(|sample| regex.is_match(sample)))
        .map(|(semantic_type, _)| semantic_type.clone())
}

fn name_hint(column_name: &str) -> Option<SemanticType> {
    let name = column_name.trim().to_lowercase();
    let tokens: Vec<&str> = name
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();
    let has = |candidates: &[&str]| tokens.iter().any(|token| candidates.contains(token));

    if has(&["email", "mail"]) || name.contains("e_mail") {
        return Some(SemanticType::Email);
    }
    if has(&["phone", "mobile", "tel", "telephone"]) || name.contains("contact_number") {
        return Some(SemanticType::Phone);
    }
    if has(&["ssn"]) || name.contains("social_security") {
        return Some(SemanticType::Ssn);
    }
    if name.contains("credit_card") || name.contains("card_number") || has(&["pan"]) {
        return Some(SemanticType::CreditCard);
    }
    if has(&["password", "passwd"]) {
        return Some(SemanticType::Password);
    }
    if name.contains("first_name") || name == "firstname" {
        return Some(SemanticType::FirstName);
    }
    if name.contains("last_name") || name == "lastname" || has(&["surname"]) {
        return Some(SemanticType::LastName);
    }
    if name == "name"
        || ["full", "customer", "person", "contact", "employee", "user", "holder"]
            .iter()
            .any(|prefix| name == format!("{prefix}_name"))
    {
        return Some(SemanticType::PersonName);
    }
    if has(&["address", "street"]) {
        return Some(SemanticType::Address);
    }
    if has(&["city"]) {
        return Some(SemanticType::City);
    }
    if has(&["state", "province"]) {
        return Some(SemanticType::State);
    }
    if has(&["country"]) {
        return Some(SemanticType::Country);
    }
    if has(&["zip", "zipcode", "postal", "postcode"]) {
        return Some(SemanticType::Zipcode);
    }
    if has(&["ip"]) || name.contains("ip_address") {
        return Some(SemanticType::IpAddress);
    }
    if has(&["url", "website", "homepage"]) {
        return Some(SemanticType::Url);
    }
    if has(&["dob", "birthday"]) || name.contains("birth_date") || name.contains("date_of_birth") {
        return Some(SemanticType::Date);
    }
    None
}

fn data_type_hint(data_type: &str) -> Option<SemanticType> {
    let base = data_type
        .split('(')
        .next()
        .unwrap_or(data_type)
        .trim()
        .to_lowercase();
    let semantic_type = match base.as_str() {
        "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint" | "serial"
        | "bigserial" => SemanticType::Integer,
        "real" | "double precision" | "float" | "float4" | "float8" | "numeric" | "decimal"
        | "money" => SemanticType::Decimal,
        "boolean" | "bool" => SemanticType::Boolean,
        "date" => SemanticType::Date,
        "timestamp" | "timestamptz" | "timestamp without time zone"
        | "timestamp with time zone" | "datetime" => SemanticType::Datetime,
        "uuid" => SemanticType::Uuid,
        "inet" | "cidr" => SemanticType::IpAddress,
        _ => return None,
    };
    Some(semantic_type)
}

impl Table {
    /// Fill `inferred_semantic_type` for columns that have none; existing values are kept.
    pub fn classify(&mut self) {
        for column in &mut self.columns {
            if column.inferred_semantic_type.is_none() {
                let (semantic_type, _) = infer_semantic_type(&column.name, &column.data_type, &[]);
                column.inferred_semantic_type = Some(semantic_type);
            }
        }
    }
}
