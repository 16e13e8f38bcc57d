//! Schema drift detection against live data samples

use crate::compat::{compare_schemas, SchemaDiff};
use crate::types::{FieldDef, FieldMode, SchemaDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Severity of detected drift, classified by the drift score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
}

/// Result of a drift check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub drift_detected: bool,
    /// `(added + removed + modified) / |registered fields|`
    pub drift_score: f64,
    pub severity: DriftSeverity,
    pub diff: SchemaDiff,
    pub inferred: SchemaDefinition,
}

/// Infer a schema from a sample of JSON rows.
///
/// A field is NULLABLE when it is null or absent in any sampled row;
/// arrays infer as REPEATED with the element type.
pub fn infer_schema(sample: &[Value]) -> SchemaDefinition {
    #[derive(Default)]
    struct FieldObservation {
        types: Vec<String>,
        present: usize,
        saw_null: bool,
        repeated: bool,
    }

    let mut observations: BTreeMap<String, FieldObservation> = BTreeMap::new();
    let rows: Vec<&serde_json::Map<String, Value>> =
        sample.iter().filter_map(|v| v.as_object()).collect();

    for row in &rows {
        for (key, value) in row.iter() {
            let obs = observations.entry(key.clone()).or_default();
            obs.present += 1;
            match value {
                Value::Null => obs.saw_null = true,
                Value::Array(items) => {
                    obs.repeated = true;
                    if let Some(first) = items.iter().find(|i| !i.is_null()) {
                        push_type(&mut obs.types, scalar_type(first));
                    }
                }
                other => push_type(&mut obs.types, scalar_type(other)),
            }
        }
    }

    let fields = observations
        .into_iter()
        .map(|(name, obs)| {
            let field_type = unify_types(&obs.types);
            let mode = if obs.repeated {
                FieldMode::Repeated
            } else if obs.saw_null || obs.present < rows.len() {
                FieldMode::Nullable
            } else {
                FieldMode::Required
            };
            FieldDef::new(name, field_type, mode)
        })
        .collect();
    SchemaDefinition::new(fields)
}

fn push_type(types: &mut Vec<String>, t: &str) {
    if !types.iter().any(|x| x == t) {
        types.push(t.to_string());
    }
}

fn scalar_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "BOOLEAN",
        Value::Number(n) if n.is_i64() || n.is_u64() => "INTEGER",
        Value::Number(_) => "FLOAT",
        Value::String(_) => "STRING",
        Value::Object(_) => "RECORD",
        _ => "STRING",
    }
}

/// Collapse observed types to one tag: mixed INTEGER/FLOAT widens to FLOAT,
/// anything else mixed widens to STRING
fn unify_types(types: &[String]) -> String {
    match types.len() {
        0 => "STRING".to_string(),
        1 => types[0].clone(),
        _ => {
            let numeric_only = types.iter().all(|t| t == "INTEGER" || t == "FLOAT");
            if numeric_only {
                "FLOAT".to_string()
            } else {
                "STRING".to_string()
            }
        }
    }
}

/// Compare a registered schema against a data sample and classify the
/// drift severity: LOW < 0.2 ≤ MEDIUM < 0.5 ≤ HIGH.
pub fn detect_drift(registered: &SchemaDefinition, sample: &[Value]) -> DriftReport {
    let inferred = infer_schema(sample);
    let diff = compare_schemas(registered, &inferred);
    let field_count = registered.fields.len().max(1);
    let drift_score = diff.change_count() as f64 / field_count as f64;
    let severity = if drift_score < 0.2 {
        DriftSeverity::Low
    } else if drift_score < 0.5 {
        DriftSeverity::Medium
    } else {
        DriftSeverity::High
    };
    DriftReport {
        drift_detected: !diff.is_empty(),
        drift_score,
        severity,
        diff,
        inferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registered() -> SchemaDefinition {
        SchemaDefinition::new(vec![
            FieldDef::required("id", "INTEGER"),
            FieldDef::required("name", "STRING"),
            FieldDef::nullable("score", "FLOAT"),
            FieldDef::nullable("active", "BOOLEAN"),
            FieldDef::nullable("note", "STRING"),
        ])
    }

    #[test]
    fn inference_covers_types_and_modes() {
        let sample = vec![
            json!({"id": 1, "name": "a", "tags": ["x"], "score": 1.5}),
            json!({"id": 2, "name": "b", "tags": [], "score": null}),
        ];
        let inferred = infer_schema(&sample);
        assert_eq!(inferred.field("id").unwrap().field_type, "INTEGER");
        assert_eq!(inferred.field("id").unwrap().mode, FieldMode::Required);
        assert_eq!(inferred.field("tags").unwrap().mode, FieldMode::Repeated);
        assert_eq!(inferred.field("score").unwrap().mode, FieldMode::Nullable);
    }

    #[test]
    fn mixed_numeric_widens_to_float() {
        let sample = vec![json!({"v": 1}), json!({"v": 2.5})];
        assert_eq!(infer_schema(&sample).field("v").unwrap().field_type, "FLOAT");
    }

    #[test]
    fn fully_populated_sample_only_tightens_modes() {
        let sample = vec![json!({
            "id": 1, "name": "a", "score": 0.5, "active": true, "note": "x"
        })];
        let report = detect_drift(&registered(), &sample);
        // Columns observed non-null in every row infer REQUIRED, which
        // counts as a modification against NULLABLE; nothing is added or
        // removed
        assert!(report.diff.added.is_empty());
        assert!(report.diff.removed.is_empty());
        assert!(report.drift_score < 0.7);
    }

    #[test]
    fn severity_thresholds() {
        // 1 change over 5 fields = 0.2 -> MEDIUM boundary
        let sample = vec![json!({
            "id": 1, "name": "a", "score": null, "active": null, "note": null, "extra": "x"
        })];
        let report = detect_drift(&registered(), &sample);
        assert_eq!(report.diff.added.len(), 1);
        assert!(report.drift_score >= 0.2);
        assert!(report.severity >= DriftSeverity::Medium);

        // Entirely different sample drifts HIGH
        let report = detect_drift(&registered(), &[json!({"other": 1})]);
        assert_eq!(report.severity, DriftSeverity::High);
    }
}
