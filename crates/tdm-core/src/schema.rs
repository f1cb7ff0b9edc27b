use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Serialize};

/// Advisory meaning of a column, used for masking defaults and value synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SemanticType {
    Email,
    Phone,
    PersonName,
    FirstName,
    LastName,
    Address,
    City,
    State,
    Country,
    Zipcode,
    Date,
    Datetime,
    Integer,
    Decimal,
    Boolean,
    Uuid,
    Url,
    CreditCard,
    Ssn,
    Password,
    IpAddress,
    String,
    Other(String),
}

impl SemanticType {
    pub fn as_str(&self) -> &str {
        match self {
            SemanticType::Email => "email",
            SemanticType::Phone => "phone",
            SemanticType::PersonName => "person_name",
            SemanticType::FirstName => "first_name",
            SemanticType::LastName => "last_name",
            SemanticType::Address => "address",
            SemanticType::City => "city",
            SemanticType::State => "state",
            SemanticType::Country => "country",
            SemanticType::Zipcode => "zipcode",
            SemanticType::Date => "date",
            SemanticType::Datetime => "datetime",
            SemanticType::Integer => "integer",
            SemanticType::Decimal => "decimal",
            SemanticType::Boolean => "boolean",
            SemanticType::Uuid => "uuid",
            SemanticType::Url => "url",
            SemanticType::CreditCard => "credit_card",
            SemanticType::Ssn => "ssn",
            SemanticType::Password => "password",
            SemanticType::IpAddress => "ip_address",
            SemanticType::String => "string",
            SemanticType::Other(value) => value.as_str(),
        }
    }

    /// Parse a type label, accepting the common aliases seen in schema sources.
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_lowercase();
        match normalized.as_str() {
            "email" | "e_mail" => SemanticType::Email,
            "phone" | "phone_number" | "mobile" => SemanticType::Phone,
            "person_name" | "name" | "full_name" => SemanticType::PersonName,
            "first_name" | "firstname" => SemanticType::FirstName,
            "last_name" | "lastname" | "surname" => SemanticType::LastName,
            "address" | "street" => SemanticType::Address,
            "city" => SemanticType::City,
            "state" => SemanticType::State,
            "country" => SemanticType::Country,
            "zipcode" | "zip" | "postal_code" => SemanticType::Zipcode,
            "date" => SemanticType::Date,
            "datetime" | "timestamp" => SemanticType::Datetime,
            "integer" | "int" | "bigint" | "smallint" => SemanticType::Integer,
            "decimal" | "number" | "numeric" | "float" => SemanticType::Decimal,
            "boolean" | "bool" => SemanticType::Boolean,
            "uuid" => SemanticType::Uuid,
            "url" | "uri" => SemanticType::Url,
            "credit_card" | "card_number" => SemanticType::CreditCard,
            "ssn" => SemanticType::Ssn,
            "password" => SemanticType::Password,
            "ip_address" | "ip" => SemanticType::IpAddress,
            "string" | "text" | "varchar" => SemanticType::String,
            _ => SemanticType::Other(normalized),
        }
    }

    /// Whether values of this type identify or describe a person.
    pub fn is_pii(&self) -> bool {
        matches!(
            self,
            SemanticType::Email
                | SemanticType::Phone
                | SemanticType::PersonName
                | SemanticType::FirstName
                | SemanticType::LastName
                | SemanticType::Address
                | SemanticType::Zipcode
                | SemanticType::CreditCard
                | SemanticType::Ssn
                | SemanticType::Password
                | SemanticType::IpAddress
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SemanticType::Integer | SemanticType::Decimal)
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(SemanticType::parse(value))
    }
}

impl From<String> for SemanticType {
    fn from(value: String) -> Self {
        SemanticType::parse(&value)
    }
}

impl From<SemanticType> for String {
    fn from(value: SemanticType) -> Self {
        value.as_str().to_string()
    }
}

impl JsonSchema for SemanticType {
    fn schema_name() -> String {
        "SemanticType".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        String::json_schema(generator)
    }
}

/// Column metadata for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Column {
    pub name: String,
    /// Source data type as reported by introspection (e.g. `integer`, `varchar(255)`).
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_semantic_type: Option<SemanticType>,
    pub nullable: bool,
    pub ordinal: u32,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            inferred_semantic_type: None,
            nullable,
            ordinal: 0,
        }
    }

    pub fn with_semantic_type(mut self, semantic_type: SemanticType) -> Self {
        self.inferred_semantic_type = Some(semantic_type);
        self
    }
}

/// A table snapshot. Identity is `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count_estimate: Option<u64>,
}

impl Table {
    /// Build a table, assigning column ordinals from their position.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<Column>,
        primary_key: Vec<String>,
    ) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(idx, mut column)| {
                column.ordinal = idx as u32 + 1;
                column
            })
            .collect();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            columns,
            primary_key,
            row_count_estimate: None,
        }
    }

    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == column)
    }
}

/// Cardinality asserted for a relationship by a schema source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// Foreign-key edge: `child_table.child_column` references `parent_table.parent_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Relationship {
    pub parent_table: String,
    pub parent_column: String,
    pub child_table: String,
    pub child_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
    /// Set when sources disagree about this relationship and a caller must adjudicate.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ambiguous: bool,
}

impl Relationship {
    pub fn new(
        parent_table: impl Into<String>,
        parent_column: impl Into<String>,
        child_table: impl Into<String>,
        child_column: impl Into<String>,
    ) -> Self {
        Self {
            parent_table: parent_table.into(),
            parent_column: parent_column.into(),
            child_table: child_table.into(),
            child_column: child_column.into(),
            cardinality: None,
            ambiguous: false,
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = Some(cardinality);
        self
    }

    pub fn is_self_reference(&self) -> bool {
        self.parent_table == self.child_table
    }

    pub fn same_endpoints(&self, other: &Relationship) -> bool {
        self.parent_table == other.parent_table
            && self.parent_column == other.parent_column
            && self.child_table == other.child_table
            && self.child_column == other.child_column
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.child_table, self.child_column, self.parent_table, self.parent_column
        )
    }
}

/// Discovered schema document: the tables and FK edges of one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SchemaSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub tables: Vec<Table>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

fn default_schema_version() -> String {
    crate::SCHEMA_VERSION.to_string()
}

impl SchemaSnapshot {
    pub fn new(tables: Vec<Table>, relationships: Vec<Relationship>) -> Self {
        Self {
            schema_version: default_schema_version(),
            tables,
            relationships,
        }
    }

    /// Fill missing semantic types, then build the dependency graph.
    pub fn into_graph(mut self) -> crate::Result<crate::graph::SchemaGraph> {
        for table in &mut self.tables {
            table.classify();
        }
        crate::graph::SchemaGraph::build(self.tables, self.relationships)
    }
}
