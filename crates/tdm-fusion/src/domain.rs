use std::collections::BTreeMap;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tdm_core::{Cardinality, Relationship, SemanticType, SourceKind};
use tracing::debug;

use crate::error::{FusionError, Result};
use crate::fragment::{EntityFragment, FieldFragment, SchemaFragment};

/// Entity template for one business vertical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DomainPack {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityFragment>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl DomainPack {
    pub fn to_fragment(&self) -> SchemaFragment {
        SchemaFragment {
            source_kind: SourceKind::DomainPack,
            source_name: Some(self.name.clone()),
            confidence: None,
            entities: self.entities.clone(),
            relationships: self.relationships.clone(),
        }
    }
}

/// Named domain packs available to one fusion request.
#[derive(Debug, Clone, Default)]
pub struct DomainPackRepository {
    packs: BTreeMap<String, DomainPack>,
}

impl DomainPackRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository preloaded with `ecommerce`, `banking` and `generic`.
    pub fn with_builtins() -> Self {
        let mut repository = Self::new();
        for pack in [ecommerce(), banking(), generic()] {
            repository.insert(pack);
        }
        repository
    }

    /// Add or replace a pack, returning the previous one with that name.
    pub fn insert(&mut self, pack: DomainPack) -> Option<DomainPack> {
        self.packs.insert(pack.name.clone(), pack)
    }

    pub fn get(&self, name: &str) -> Option<&DomainPack> {
        self.packs.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.packs.keys().map(String::as_str).collect()
    }

    pub fn fragment(&self, name: &str) -> Result<SchemaFragment> {
        self.get(name)
            .map(DomainPack::to_fragment)
            .ok_or_else(|| FusionError::UnknownDomainPack(name.to_string()))
    }

    /// Load one pack from a JSON file.
    pub fn load_file(&mut self, path: &Path) -> Result<String> {
        let raw = std::fs::read_to_string(path).map_err(|source| FusionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let pack: DomainPack = serde_json::from_str(&raw)?;
        let name = pack.name.clone();
        debug!(pack = %name, path = %path.display(), "domain pack loaded");
        self.insert(pack);
        Ok(name)
    }

    /// Load every `*.json` file in `dir`, in file name order.
    pub fn load_dir(&mut self, dir: &Path) -> Result<Vec<String>> {
        let io_error = |source| FusionError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|path| self.load_file(path)).collect()
    }
}

fn field(semantic_type: SemanticType, nullable: bool) -> FieldFragment {
    FieldFragment::new(semantic_type).nullable(nullable)
}

fn one_to_many(parent: &str, child: &str, child_column: &str) -> Relationship {
    Relationship::new(parent, "id", child, child_column).with_cardinality(Cardinality::OneToMany)
}

fn ecommerce() -> DomainPack {
    let entities = [
        (
            "customer",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("email", field(SemanticType::Email, false))
                .with_field("first_name", field(SemanticType::FirstName, true))
                .with_field("last_name", field(SemanticType::LastName, true))
                .with_field("phone", field(SemanticType::Phone, true))
                .with_field("created_at", field(SemanticType::Datetime, false)),
        ),
        (
            "product",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("name", field(SemanticType::String, false))
                .with_field("sku", field(SemanticType::String, false))
                .with_field("price", field(SemanticType::Decimal, false)),
        ),
        (
            "order",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("customer_id", field(SemanticType::Integer, false))
                .with_field("status", field(SemanticType::String, false))
                .with_field("total", field(SemanticType::Decimal, false))
                .with_field("created_at", field(SemanticType::Datetime, false)),
        ),
        (
            "order_item",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("order_id", field(SemanticType::Integer, false))
                .with_field("product_id", field(SemanticType::Integer, false))
                .with_field("quantity", field(SemanticType::Integer, false))
                .with_field("unit_price", field(SemanticType::Decimal, false)),
        ),
    ];
    DomainPack {
        name: "ecommerce".to_string(),
        description: Some("Customers, products and orders".to_string()),
        entities: with_id_keys(entities),
        relationships: vec![
            one_to_many("customer", "order", "customer_id"),
            one_to_many("order", "order_item", "order_id"),
            one_to_many("product", "order_item", "product_id"),
        ],
    }
}

fn banking() -> DomainPack {
    let entities = [
        (
            "customer",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("first_name", field(SemanticType::FirstName, false))
                .with_field("last_name", field(SemanticType::LastName, false))
                .with_field("email", field(SemanticType::Email, true))
                .with_field("ssn", field(SemanticType::Ssn, true))
                .with_field("date_of_birth", field(SemanticType::Date, true)),
        ),
        (
            "account",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("customer_id", field(SemanticType::Integer, false))
                .with_field("iban", field(SemanticType::String, false))
                .with_field("balance", field(SemanticType::Decimal, false))
                .with_field("opened_on", field(SemanticType::Date, false)),
        ),
        (
            "transaction",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("account_id", field(SemanticType::Integer, false))
                .with_field("amount", field(SemanticType::Decimal, false))
                .with_field("booked_at", field(SemanticType::Datetime, false))
                .with_field("description", field(SemanticType::String, true)),
        ),
        (
            "card",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("account_id", field(SemanticType::Integer, false))
                .with_field("number", field(SemanticType::CreditCard, false))
                .with_field("expires_on", field(SemanticType::Date, false)),
        ),
    ];
    DomainPack {
        name: "banking".to_string(),
        description: Some("Customers, accounts, cards and transactions".to_string()),
        entities: with_id_keys(entities),
        relationships: vec![
            one_to_many("customer", "account", "customer_id"),
            one_to_many("account", "transaction", "account_id"),
            one_to_many("account", "card", "account_id"),
        ],
    }
}

fn generic() -> DomainPack {
    let entities = [
        (
            "user",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("email", field(SemanticType::Email, false))
                .with_field("name", field(SemanticType::PersonName, true))
                .with_field("created_at", field(SemanticType::Datetime, false)),
        ),
        (
            "address",
            EntityFragment::default()
                .with_field("id", field(SemanticType::Integer, false))
                .with_field("user_id", field(SemanticType::Integer, false))
                .with_field("street", field(SemanticType::Address, false))
                .with_field("city", field(SemanticType::City, false))
                .with_field("zipcode", field(SemanticType::Zipcode, true))
                .with_field("country", field(SemanticType::Country, false)),
        ),
    ];
    DomainPack {
        name: "generic".to_string(),
        description: Some("Users and their addresses".to_string()),
        entities: with_id_keys(entities),
        relationships: vec![one_to_many("user", "address", "user_id")],
    }
}

fn with_id_keys<const N: usize>(
    entities: [(&str, EntityFragment); N],
) -> BTreeMap<String, EntityFragment> {
    entities
        .into_iter()
        .map(|(name, entity)| (name.to_string(), entity.with_primary_key(&["id"])))
        .collect()
}
