use std::collections::BTreeMap;

use chrono::{Days, NaiveDate, NaiveDateTime};
use fake::Fake;
use fake::faker::address::en::{CityName, CountryName, StateName, StreetName, ZipCode};
use fake::faker::creditcard::en::CreditCardNumber;
use fake::faker::internet::en::{IPv4, Password, SafeEmail};
use fake::faker::lorem::en::Word;
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tdm_core::{SemanticType, Value};

/// Source of scalar values for non-key fields.
pub trait ValueProvider {
    fn sample(&mut self, semantic_type: &SemanticType, field_name: &str) -> Value;
}

/// Realistic values from the `fake` catalog, driven by a seeded RNG.
#[derive(Debug, Clone)]
pub struct FakeValueProvider {
    rng: ChaCha8Rng,
}

impl FakeValueProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl ValueProvider for FakeValueProvider {
    fn sample(&mut self, semantic_type: &SemanticType, _field_name: &str) -> Value {
        let rng = &mut self.rng;
        match semantic_type {
            SemanticType::Email => Value::Text(SafeEmail().fake_with_rng(rng)),
            SemanticType::Phone => Value::Text(PhoneNumber().fake_with_rng(rng)),
            SemanticType::PersonName => Value::Text(Name().fake_with_rng(rng)),
            SemanticType::FirstName => Value::Text(FirstName().fake_with_rng(rng)),
            SemanticType::LastName => Value::Text(LastName().fake_with_rng(rng)),
            SemanticType::Address => {
                let number = rng.random_range(1..9_999);
                let street: String = StreetName().fake_with_rng(rng);
                let city: String = CityName().fake_with_rng(rng);
                Value::Text(format!("{number} {street}, {city}"))
            }
            SemanticType::City => Value::Text(CityName().fake_with_rng(rng)),
            SemanticType::State => Value::Text(StateName().fake_with_rng(rng)),
            SemanticType::Country => Value::Text(CountryName().fake_with_rng(rng)),
            SemanticType::Zipcode => Value::Text(ZipCode().fake_with_rng(rng)),
            SemanticType::Date => Value::Date(date_after_base(rng.random_range(0..3_650))),
            SemanticType::Datetime => {
                let date = date_after_base(rng.random_range(0..3_650));
                let seconds = rng.random_range(0..86_400);
                Value::Timestamp(timestamp(date, seconds))
            }
            SemanticType::Integer => Value::Int(rng.random_range(1..=10_000)),
            SemanticType::Decimal => Value::Float(rng.random_range(100..1_000_000) as f64 / 100.0),
            SemanticType::Boolean => Value::Bool(rng.random_bool(0.5)),
            SemanticType::Uuid => Value::Uuid(random_uuid(rng)),
            SemanticType::Url => {
                let word: String = Word().fake_with_rng(rng);
                Value::Text(format!("https://example.com/{word}"))
            }
            SemanticType::CreditCard => Value::Text(CreditCardNumber().fake_with_rng(rng)),
            SemanticType::Ssn => Value::Text(format!(
                "{:03}-{:02}-{:04}",
                rng.random_range(100..900),
                rng.random_range(10..100),
                rng.random_range(1000..10_000)
            )),
            SemanticType::Password => Value::Text(Password(12..20).fake_with_rng(rng)),
            SemanticType::IpAddress => Value::Text(IPv4().fake_with_rng(rng)),
            SemanticType::String | SemanticType::Other(_) => Value::Text(Word().fake_with_rng(rng)),
        }
    }
}

/// Deterministic counter-based values, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct SequenceValueProvider {
    counter: u64,
}

impl SequenceValueProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValueProvider for SequenceValueProvider {
    fn sample(&mut self, semantic_type: &SemanticType, field_name: &str) -> Value {
        self.counter += 1;
        let n = self.counter;
        match semantic_type {
            SemanticType::Integer => Value::Int(n as i64),
            SemanticType::Decimal => Value::Float(n as f64),
            SemanticType::Boolean => Value::Bool(n % 2 == 0),
            SemanticType::Date => Value::Date(date_after_base(n % 3_650)),
            SemanticType::Datetime => Value::Timestamp(timestamp(date_after_base(n % 3_650), 0)),
            SemanticType::Uuid => Value::Uuid(format!("00000000-0000-4000-8000-{n:012x}")),
            SemanticType::Email => Value::Text(format!("user{n}@example.test")),
            _ => Value::Text(format!("{field_name}_{n}")),
        }
    }
}

/// A default provider plus per-semantic-type overrides.
pub struct ValueProviders {
    default: Box<dyn ValueProvider>,
    overrides: BTreeMap<SemanticType, Box<dyn ValueProvider>>,
}

impl ValueProviders {
    pub fn new(default: impl ValueProvider + 'static) -> Self {
        Self {
            default: Box::new(default),
            overrides: BTreeMap::new(),
        }
    }

    pub fn fake(seed: u64) -> Self {
        Self::new(FakeValueProvider::new(seed))
    }

    pub fn sequence() -> Self {
        Self::new(SequenceValueProvider::new())
    }

    pub fn with_override(
        mut self,
        semantic_type: SemanticType,
        provider: impl ValueProvider + 'static,
    ) -> Self {
        self.overrides.insert(semantic_type, Box::new(provider));
        self
    }
}

impl ValueProvider for ValueProviders {
    fn sample(&mut self, semantic_type: &SemanticType, field_name: &str) -> Value {
        match self.overrides.get_mut(semantic_type) {
            Some(provider) => provider.sample(semantic_type, field_name),
            None => self.default.sample(semantic_type, field_name),
        }
    }
}

/// Random v4-shaped UUID drawn from `rng`, so seeded runs repeat.
pub(crate) fn random_uuid(rng: &mut impl RngCore) -> String {
    let mut bytes = [0_u8; 16];
    rng.fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    uuid::Uuid::from_bytes(bytes).to_string()
}

fn date_after_base(days: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .and_then(|base| base.checked_add_days(Days::new(days)))
        .unwrap_or_default()
}

fn timestamp(date: NaiveDate, seconds: u32) -> NaiveDateTime {
    date.and_hms_opt(seconds / 3_600, (seconds / 60) % 60, seconds % 60)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_provider_is_seeded() {
        let mut a = FakeValueProvider::new(42);
        let mut b = FakeValueProvider::new(42);
        for semantic_type in [SemanticType::Email, SemanticType::Uuid, SemanticType::Date] {
            assert_eq!(
                a.sample(&semantic_type, "field"),
                b.sample(&semantic_type, "field")
            );
        }
    }

    #[test]
    fn fake_email_has_email_shape() {
        let mut provider = FakeValueProvider::new(1);
        let email = provider.sample(&SemanticType::Email, "email").render();
        assert!(email.contains('@'));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut providers = ValueProviders::fake(3)
            .with_override(SemanticType::Email, SequenceValueProvider::new());
        assert_eq!(
            providers.sample(&SemanticType::Email, "email"),
            Value::text("user1@example.test")
        );
    }

    #[test]
    fn sequence_provider_counts_up() {
        let mut provider = SequenceValueProvider::new();
        assert_eq!(provider.sample(&SemanticType::Integer, "qty"), Value::Int(1));
        assert_eq!(provider.sample(&SemanticType::String, "note"), Value::text("note_2"));
    }
}
