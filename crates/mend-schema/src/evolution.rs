//! Schema evolution planning

use crate::compat::{check_compatibility, CompatibilityMode, CompatibilityReport};
use crate::types::{FieldDef, FieldMode, SchemaDefinition};
use mend_common::{Error, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// One requested change in an evolution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    AddField { field: FieldDef },
    RemoveField { name: String },
    ModifyField { field: FieldDef },
}

/// A planned evolution: the evolved definition, its compatibility verdict
/// and a migration script for external SQL systems
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionPlan {
    pub schema_name: String,
    pub base_version: Version,
    pub changes: Vec<SchemaChange>,
    pub mode: CompatibilityMode,
    pub evolved: SchemaDefinition,
    pub compatibility: CompatibilityReport,
    pub migration_script: String,
}

/// Apply a change set to a definition
pub fn apply_changes(
    base: &SchemaDefinition,
    changes: &[SchemaChange],
) -> Result<SchemaDefinition> {
    let mut evolved = base.clone();
    for change in changes {
        match change {
            SchemaChange::AddField { field } => {
                if evolved.field(&field.name).is_some() {
                    return Err(Error::Schema(format!(
                        "cannot add field '{}': it already exists",
                        field.name
                    )));
                }
                evolved.fields.push(field.clone());
            }
            SchemaChange::RemoveField { name } => {
                if evolved.field(name).is_none() {
                    return Err(Error::Schema(format!(
                        "cannot remove field '{name}': it does not exist"
                    )));
                }
                evolved.fields.retain(|f| &f.name != name);
            }
            SchemaChange::ModifyField { field } => {
                let existing = evolved
                    .fields
                    .iter_mut()
                    .find(|f| f.name == field.name)
                    .ok_or_else(|| {
                        Error::Schema(format!(
                            "cannot modify field '{}': it does not exist",
                            field.name
                        ))
                    })?;
                *existing = field.clone();
            }
        }
    }
    Ok(evolved)
}

/// Build an evolution plan against a base definition
pub fn plan(
    schema_name: &str,
    base_version: Version,
    base: &SchemaDefinition,
    changes: Vec<SchemaChange>,
    mode: CompatibilityMode,
) -> Result<EvolutionPlan> {
    let evolved = apply_changes(base, &changes)?;
    let compatibility = check_compatibility(base, &evolved, mode);
    let migration_script = migration_script(schema_name, &changes, mode);
    Ok(EvolutionPlan {
        schema_name: schema_name.to_string(),
        base_version,
        changes,
        mode,
        evolved,
        compatibility,
        migration_script,
    })
}

/// SQL migration for the change set, parameterized by the compatibility
/// mode: under BACKWARD, removals are soft (renamed aside) so old readers
/// keep working until cleanup.
fn migration_script(table: &str, changes: &[SchemaChange], mode: CompatibilityMode) -> String {
    let mut script = format!("-- migration for {table} ({mode:?} mode)\n");
    for change in changes {
        match change {
            SchemaChange::AddField { field } => {
                let nullability = match field.mode {
                    FieldMode::Required => " NOT NULL",
                    _ => "",
                };
                let default = field
                    .default
                    .as_ref()
                    .map(|d| format!(" DEFAULT {d}"))
                    .unwrap_or_default();
                let _ = writeln!(
                    script,
                    "ALTER TABLE {table} ADD COLUMN {} {}{nullability}{default};",
                    field.name,
                    sql_type(&field.field_type)
                );
            }
            SchemaChange::RemoveField { name } => match mode {
                CompatibilityMode::Backward => {
                    let _ = writeln!(
                        script,
                        "ALTER TABLE {table} RENAME COLUMN {name} TO {name}_deprecated;"
                    );
                }
                _ => {
                    let _ = writeln!(script, "ALTER TABLE {table} DROP COLUMN {name};");
                }
            },
            SchemaChange::ModifyField { field } => {
                let _ = writeln!(
                    script,
                    "ALTER TABLE {table} ALTER COLUMN {} SET DATA TYPE {};",
                    field.name,
                    sql_type(&field.field_type)
                );
            }
        }
    }
    script
}

fn sql_type(field_type: &str) -> &str {
    match field_type {
        "INTEGER" => "BIGINT",
        "FLOAT" => "DOUBLE PRECISION",
        "BOOLEAN" => "BOOLEAN",
        "TIMESTAMP" => "TIMESTAMP",
        _ => "TEXT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SchemaDefinition {
        SchemaDefinition::new(vec![
            FieldDef::required("a", "INTEGER"),
            FieldDef::required("b", "STRING"),
        ])
    }

    #[test]
    fn add_field_plan_is_backward_compatible() {
        let plan = plan(
            "events",
            Version::new(1, 0, 0),
            &base(),
            vec![SchemaChange::AddField {
                field: FieldDef::nullable("c", "STRING"),
            }],
            CompatibilityMode::Backward,
        )
        .unwrap();
        assert!(plan.compatibility.compatible);
        assert_eq!(plan.evolved.fields.len(), 3);
        assert!(plan.migration_script.contains("ADD COLUMN c TEXT"));
    }

    #[test]
    fn backward_removals_are_soft() {
        let plan = plan(
            "events",
            Version::new(1, 0, 0),
            &base(),
            vec![SchemaChange::RemoveField { name: "b".into() }],
            CompatibilityMode::Backward,
        )
        .unwrap();
        assert!(!plan.compatibility.compatible);
        assert!(plan.migration_script.contains("RENAME COLUMN b TO b_deprecated"));
    }

    #[test]
    fn unknown_field_changes_are_rejected() {
        let result = apply_changes(
            &base(),
            &[SchemaChange::RemoveField { name: "zz".into() }],
        );
        assert!(result.is_err());
        let result = apply_changes(
            &base(),
            &[SchemaChange::AddField {
                field: FieldDef::required("a", "STRING"),
            }],
        );
        assert!(result.is_err());
    }
}
