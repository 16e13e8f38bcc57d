//! Schema comparison and compatibility rules

use crate::types::{is_type_widening, FieldDef, FieldMode, SchemaDefinition};
use serde::{Deserialize, Serialize};

/// Compatibility expectation between schema versions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    /// New schema can read data written with the old schema
    Backward,
    /// Old schema can read data written with the new schema
    Forward,
    /// Both directions
    Full,
}

/// A modified field: same name, changed shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModifiedField {
    pub name: String,
    pub before: FieldDef,
    pub after: FieldDef,
}

/// Structural difference between two schemas
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaDiff {
    pub added: Vec<FieldDef>,
    pub removed: Vec<FieldDef>,
    pub modified: Vec<ModifiedField>,
    /// Human-readable descriptions of breaking changes
    pub breaking_changes: Vec<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn has_breaking_changes(&self) -> bool {
        !self.breaking_changes.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Result of a compatibility check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub reason: String,
    pub details: SchemaDiff,
}

/// Diff `old` against `new`. Swapping arguments swaps `added` and
/// `removed`, keeps `modified` symmetric and preserves the breaking-change
/// count.
pub fn compare_schemas(old: &SchemaDefinition, new: &SchemaDefinition) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    for field in &new.fields {
        match old.field(&field.name) {
            None => diff.added.push(field.clone()),
            Some(before) if before != field => diff.modified.push(ModifiedField {
                name: field.name.clone(),
                before: before.clone(),
                after: field.clone(),
            }),
            Some(_) => {}
        }
    }
    for field in &old.fields {
        if new.field(&field.name).is_none() {
            diff.removed.push(field.clone());
        }
    }

    for field in &diff.removed {
        diff.breaking_changes
            .push(format!("field '{}' removed", field.name));
    }
    for field in &diff.added {
        if field.mode == FieldMode::Required && field.default.is_none() {
            diff.breaking_changes.push(format!(
                "field '{}' added as REQUIRED without a default",
                field.name
            ));
        }
    }
    for change in &diff.modified {
        if change.before.field_type != change.after.field_type
            && !is_type_widening(&change.before.field_type, &change.after.field_type)
        {
            diff.breaking_changes.push(format!(
                "field '{}' type narrowed from {} to {}",
                change.name, change.before.field_type, change.after.field_type
            ));
        }
        if change.before.mode == FieldMode::Nullable && change.after.mode == FieldMode::Required {
            diff.breaking_changes.push(format!(
                "field '{}' tightened from NULLABLE to REQUIRED",
                change.name
            ));
        }
        if change.before.mode == FieldMode::Repeated && change.after.mode != FieldMode::Repeated {
            diff.breaking_changes.push(format!(
                "field '{}' is no longer REPEATED",
                change.name
            ));
        }
    }

    diff
}

/// Check whether `new` satisfies the compatibility mode against `old`
pub fn check_compatibility(
    old: &SchemaDefinition,
    new: &SchemaDefinition,
    mode: CompatibilityMode,
) -> CompatibilityReport {
    let (compatible, reason, details) = match mode {
        CompatibilityMode::Backward => {
            let diff = compare_schemas(old, new);
            let ok = !diff.has_breaking_changes();
            let reason = if ok {
                "new schema can read data written with the old schema".to_string()
            } else {
                format!("{} breaking change(s) for readers", diff.breaking_changes.len())
            };
            (ok, reason, diff)
        }
        CompatibilityMode::Forward => {
            let reverse = compare_schemas(new, old);
            let ok = !reverse.has_breaking_changes();
            let reason = if ok {
                "old schema can read data written with the new schema".to_string()
            } else {
                format!(
                    "{} breaking change(s) for old readers",
                    reverse.breaking_changes.len()
                )
            };
            // Report details from the old -> new perspective
            (ok, reason, compare_schemas(old, new))
        }
        CompatibilityMode::Full => {
            let forward = compare_schemas(old, new);
            let backward = compare_schemas(new, old);
            let ok = !forward.has_breaking_changes() && !backward.has_breaking_changes();
            let reason = if ok {
                "schemas are mutually readable".to_string()
            } else {
                "schemas are not mutually readable".to_string()
            };
            (ok, reason, forward)
        }
    };
    CompatibilityReport {
        compatible,
        reason,
        details,
    }
}
