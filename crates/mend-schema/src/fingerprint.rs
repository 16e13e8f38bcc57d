//! Stable schema fingerprints

use crate::types::SchemaDefinition;
use serde_json::json;
use sha2::{Digest, Sha256};

/// SHA-256 over the canonical schema form.
///
/// The canonical form sorts fields by name and serializes each as a fixed
/// `(name, type, mode, default)` tuple, so field order and incidental
/// attributes do not perturb identity.
pub fn fingerprint(definition: &SchemaDefinition) -> String {
    let mut fields: Vec<_> = definition.fields.iter().collect();
    fields.sort_by(|a, b| a.name.cmp(&b.name));

    let canonical: Vec<_> = fields
        .into_iter()
        .map(|f| {
            json!([
                f.name,
                f.field_type,
                f.mode,
                f.default.clone().unwrap_or(serde_json::Value::Null),
            ])
        })
        .collect();
    let bytes = serde_json::to_vec(&canonical).expect("canonical form serializes");

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldDef;

    #[test]
    fn stable_across_field_order() {
        let a = SchemaDefinition::new(vec![
            FieldDef::required("a", "INTEGER"),
            FieldDef::nullable("b", "STRING"),
        ]);
        let b = SchemaDefinition::new(vec![
            FieldDef::nullable("b", "STRING"),
            FieldDef::required("a", "INTEGER"),
        ]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn sensitive_to_type_and_mode() {
        let base = SchemaDefinition::new(vec![FieldDef::required("a", "INTEGER")]);
        let other_type = SchemaDefinition::new(vec![FieldDef::required("a", "FLOAT")]);
        let other_mode = SchemaDefinition::new(vec![FieldDef::nullable("a", "INTEGER")]);
        assert_ne!(fingerprint(&base), fingerprint(&other_type));
        assert_ne!(fingerprint(&base), fingerprint(&other_mode));
    }

    #[test]
    fn hex_encoded_sha256() {
        let f = fingerprint(&SchemaDefinition::new(vec![]));
        assert_eq!(f.len(), 64);
        assert!(f.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
