//! Schema record types

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field nullability / cardinality mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    Nullable,
    Required,
    Repeated,
}

/// One field of a schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDef {
    pub name: String,
    /// Upper-case type tag, e.g. `STRING`, `INTEGER`, `FLOAT`, `BOOLEAN`,
    /// `TIMESTAMP`, `RECORD`
    pub field_type: String,
    pub mode: FieldMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>, mode: FieldMode) -> Self {
        FieldDef {
            name: name.into(),
            field_type: field_type.into().to_uppercase(),
            mode,
            default: None,
        }
    }

    pub fn required(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        FieldDef::new(name, field_type, FieldMode::Required)
    }

    pub fn nullable(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        FieldDef::new(name, field_type, FieldMode::Nullable)
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Serialization format a schema describes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFormat {
    Json,
    Avro,
    Parquet,
    Csv,
}

/// An unversioned schema definition: an ordered field list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDefinition {
    pub fields: Vec<FieldDef>,
}

impl SchemaDefinition {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        SchemaDefinition { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Immutable versioned schema record; `(schema_name, version)` is unique
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub schema_id: String,
    pub schema_name: String,
    pub definition: SchemaDefinition,
    pub format: SchemaFormat,
    pub version: Version,
    /// SHA-256 of the canonical schema form
    pub fingerprint: String,
    pub source_id: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Whether widening `from` into `to` loses no information. Widened type
/// changes are non-breaking modifications.
pub fn is_type_widening(from: &str, to: &str) -> bool {
    matches!(
        (from, to),
        ("INTEGER", "FLOAT") | ("INTEGER", "STRING") | ("FLOAT", "STRING")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_types_are_normalized_uppercase() {
        let f = FieldDef::required("amount", "float");
        assert_eq!(f.field_type, "FLOAT");
    }

    #[test]
    fn widening_whitelist() {
        assert!(is_type_widening("INTEGER", "FLOAT"));
        assert!(is_type_widening("FLOAT", "STRING"));
        assert!(!is_type_widening("STRING", "INTEGER"));
        assert!(!is_type_widening("FLOAT", "INTEGER"));
    }
}
