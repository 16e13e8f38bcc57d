//! Data correction engine for data-quality issues

use crate::{compose_confidence, CorrectionContext, CorrectionEngine, CorrectionResult};
use async_trait::async_trait;
use mend_common::{Error, IssueCategory, Result};
use mend_store::{ObjectMetadata, ObjectStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const IQR_FACTOR: f64 = 1.5;
const ZSCORE_CUTOFF: f64 = 3.0;

/// Corrects data-quality issues by producing a staged copy of the input
/// rows. The original rows are referenced, never modified in place.
pub struct DataCorrector {
    staging: Arc<dyn ObjectStore>,
    bucket: String,
}

impl DataCorrector {
    pub fn new(staging: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        DataCorrector {
            staging,
            bucket: bucket.into(),
        }
    }

    fn pick_strategy(issue: &mend_diagnosis::IssueClassification) -> (&'static str, f64) {
        // (strategy, base prior)
        match issue.issue_type.as_str() {
            "missing_values" => ("impute_missing_values", 0.9),
            "outliers" => {
                // Removal only when the issue explicitly asks for it;
                // flagging keeps rows reviewable
                if issue.features.get("outlier_action").and_then(|v| v.as_str()) == Some("remove") {
                    ("remove_outliers", 0.8)
                } else {
                    ("flag_outliers", 0.85)
                }
            }
            "type_mismatch" => ("coerce_types", 0.9),
            "duplicates" => ("remove_duplicates", 0.95),
            "schema_mismatch" => ("adapt_schema_drift", 0.8),
            _ => ("normalize_formats", 0.7),
        }
    }
}

#[async_trait]
impl CorrectionEngine for DataCorrector {
    fn name(&self) -> &'static str {
        "data_corrector"
    }

    fn handles(&self, category: IssueCategory) -> bool {
        category == IssueCategory::DataQuality
    }

    async fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<CorrectionResult> {
        let rows = ctx.original_state["rows"]
            .as_array()
            .ok_or_else(|| Error::Data("original state carries no rows".to_string()))?;
        let column = ctx.issue.features.get("column").and_then(|v| v.as_str());
        let (strategy, prior) = Self::pick_strategy(ctx.issue);

        debug!(strategy, column = column.unwrap_or("-"), rows = rows.len(), "correcting data");
        let corrected_rows = match strategy {
            "impute_missing_values" => impute_missing(rows, column),
            "flag_outliers" => handle_outliers(rows, column, IQR_FACTOR, ZSCORE_CUTOFF, false),
            "remove_outliers" => handle_outliers(rows, column, IQR_FACTOR, ZSCORE_CUTOFF, true),
            "coerce_types" => coerce_types(rows, column),
            "remove_duplicates" => remove_duplicates(rows),
            "adapt_schema_drift" => adapt_schema_drift(rows, &ctx.issue.features),
            _ => normalize_formats(rows),
        };

        // Stage the corrected artifact under a fresh id
        let staging_id = uuid::Uuid::new_v4().to_string();
        let path = format!("corrections/{staging_id}.json");
        let original_ref = ctx.original_state["staging_path"]
            .as_str()
            .unwrap_or("inline")
            .to_string();
        let mut metadata = ObjectMetadata::default();
        metadata.content_type = Some("application/json".into());
        metadata.labels.insert("strategy".into(), strategy.into());
        metadata.labels.insert("source_ref".into(), original_ref.clone());
        self.staging
            .upload(
                &self.bucket,
                &path,
                serde_json::to_vec(&corrected_rows)?,
                metadata,
            )
            .await?;

        let mut result = CorrectionResult::new(
            strategy,
            ctx.original_state.clone(),
            json!({
                "staging_id": staging_id,
                "staging_path": path,
                "source_ref": original_ref,
                "row_count": corrected_rows.len(),
            }),
        );
        result.confidence =
            compose_confidence(prior, ctx.action_success_rate, ctx.issue.confidence);
        result.successful = true;
        result
            .metadata
            .insert("rows_in".into(), json!(rows.len()));
        result
            .metadata
            .insert("rows_out".into(), json!(corrected_rows.len()));
        info!(
            correction_id = %result.correction_id,
            strategy,
            confidence = result.confidence,
            "data correction staged"
        );
        Ok(result)
    }
}

fn numeric_values(rows: &[Value], column: &str) -> Vec<f64> {
    rows.iter()
        .filter_map(|r| r[column].as_f64())
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Fill null/absent values in the target column: interior numeric gaps are
/// linearly interpolated from their neighbours, edge gaps take the column
/// mean, non-numeric columns carry the most recent value forward
fn impute_missing(rows: &[Value], column: Option<&str>) -> Vec<Value> {
    let Some(column) = column else {
        return rows.to_vec();
    };
    let fill_numeric = mean(&numeric_values(rows, column));
    let neighbors = |from: usize, direction: i64| -> Option<f64> {
        let mut i = from as i64 + direction;
        while (0..rows.len() as i64).contains(&i) {
            if let Some(v) = rows[i as usize][column].as_f64() {
                return Some(v);
            }
            i += direction;
        }
        None
    };

    let mut last_seen: Option<Value> = None;
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let mut row = row.clone();
            if row[column].is_null() {
                match (neighbors(i, -1), neighbors(i, 1)) {
                    (Some(prev), Some(next)) => row[column] = json!((prev + next) / 2.0),
                    _ => {
                        if let Some(m) = fill_numeric {
                            row[column] = json!(m);
                        } else if let Some(prev) = &last_seen {
                            row[column] = prev.clone();
                        }
                    }
                }
            } else {
                last_seen = Some(row[column].clone());
            }
            row
        })
        .collect()
}

/// Flag (or, with `remove`, drop) rows whose column value falls outside the
/// IQR fence or the z-score cutoff
fn handle_outliers(
    rows: &[Value],
    column: Option<&str>,
    iqr_factor: f64,
    z_cutoff: f64,
    remove: bool,
) -> Vec<Value> {
    let Some(column) = column else {
        return rows.to_vec();
    };
    let mut values = numeric_values(rows, column);
    if values.len() < 4 {
        return rows.to_vec();
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = values[values.len() / 4];
    let q3 = values[values.len() * 3 / 4];
    let iqr = q3 - q1;
    let (lo, hi) = (q1 - iqr_factor * iqr, q3 + iqr_factor * iqr);

    let m = mean(&values).unwrap_or(0.0);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    let sd = variance.sqrt();
    let is_outlier = |v: f64| {
        let iqr_out = v < lo || v > hi;
        let z_out = sd > 0.0 && ((v - m) / sd).abs() > z_cutoff;
        iqr_out || z_out
    };

    rows.iter()
        .filter(|row| {
            !(remove && row[column].as_f64().is_some_and(is_outlier))
        })
        .map(|row| {
            let mut row = row.clone();
            if !remove {
                if let Some(v) = row[column].as_f64() {
                    if is_outlier(v) {
                        row["_outlier"] = json!(true);
                    }
                }
            }
            row
        })
        .collect()
}

/// Parse string-encoded numbers and booleans in the target column
fn coerce_types(rows: &[Value], column: Option<&str>) -> Vec<Value> {
    let Some(column) = column else {
        return rows.to_vec();
    };
    rows.iter()
        .map(|row| {
            let mut row = row.clone();
            if let Some(s) = row[column].as_str() {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    row[column] = json!(i);
                } else if let Ok(f) = trimmed.parse::<f64>() {
                    row[column] = json!(f);
                } else if let Ok(b) = trimmed.parse::<bool>() {
                    row[column] = json!(b);
                }
            }
            row
        })
        .collect()
}

/// Drop exact-duplicate rows, keeping first occurrence
fn remove_duplicates(rows: &[Value]) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .filter(|row| seen.insert(row.to_string()))
        .cloned()
        .collect()
}

/// Trim and collapse whitespace in every string field
fn normalize_formats(rows: &[Value]) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            let mut row = row.clone();
            if let Some(map) = row.as_object_mut() {
                for value in map.values_mut() {
                    if let Some(s) = value.as_str() {
                        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
                        *value = json!(normalized);
                    }
                }
            }
            row
        })
        .collect()
}

/// Align rows with the expected schema carried in the issue features:
/// missing expected columns become nulls, unexpected columns are kept
/// under an `_extra` map
fn adapt_schema_drift(rows: &[Value], features: &HashMap<String, Value>) -> Vec<Value> {
    let expected: Vec<String> = features
        .get("expected_columns")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if expected.is_empty() {
        return rows.to_vec();
    }
    rows.iter()
        .map(|row| {
            let mut out = serde_json::Map::new();
            let mut extra = serde_json::Map::new();
            if let Some(map) = row.as_object() {
                for name in &expected {
                    out.insert(name.clone(), map.get(name).cloned().unwrap_or(Value::Null));
                }
                for (key, value) in map {
                    if !expected.contains(key) {
                        extra.insert(key.clone(), value.clone());
                    }
                }
            }
            if !extra.is_empty() {
                out.insert("_extra".into(), Value::Object(extra));
            }
            Value::Object(out)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_common::{ActionKind, Recoverability, Severity};
    use mend_diagnosis::RootCauseAnalysis;
    use mend_store::MemoryObjectStore;

    fn classification(issue_type: &str, column: Option<&str>) -> mend_diagnosis::IssueClassification {
        let mut features = HashMap::new();
        if let Some(c) = column {
            features.insert("column".to_string(), json!(c));
        }
        mend_diagnosis::IssueClassification {
            issue_id: "i1".into(),
            category: IssueCategory::DataQuality,
            severity: Severity::Medium,
            issue_type: issue_type.into(),
            description: String::new(),
            recommended_action: ActionKind::DataCorrection,
            confidence: 0.9,
            recoverability: Recoverability::AutoRecoverable,
            features,
            extensions: Default::default(),
        }
    }

    fn analysis() -> RootCauseAnalysis {
        RootCauseAnalysis {
            analysis_id: "a1".into(),
            issue_id: "i1".into(),
            root_causes: Vec::new(),
            causality_graph: json!({}),
            context: HashMap::new(),
        }
    }

    async fn run(issue_type: &str, column: Option<&str>, rows: Value) -> CorrectionResult {
        let store = Arc::new(MemoryObjectStore::new());
        let corrector = DataCorrector::new(store, "staging");
        let issue = classification(issue_type, column);
        let analysis = analysis();
        let state = json!({"rows": rows});
        corrector
            .apply(&CorrectionContext {
                original_state: &state,
                issue: &issue,
                root_cause: &analysis,
                action_success_rate: Some(0.8),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn imputes_missing_numeric_values_with_mean() {
        let store = Arc::new(MemoryObjectStore::new());
        let corrector = DataCorrector::new(store.clone(), "staging");
        let issue = classification("missing_values", Some("v"));
        let analysis = analysis();
        let state = json!({"rows": [{"v": 1.0}, {"v": null}, {"v": 3.0}]});
        let result = corrector
            .apply(&CorrectionContext {
                original_state: &state,
                issue: &issue,
                root_cause: &analysis,
                action_success_rate: None,
            })
            .await
            .unwrap();

        assert!(result.successful);
        let path = result.corrected_state["staging_path"].as_str().unwrap();
        let staged = store.download("staging", path).await.unwrap();
        let rows: Vec<Value> = serde_json::from_slice(&staged.bytes).unwrap();
        assert_eq!(rows[1]["v"], 2.0);
        // Original state is untouched
        assert!(state["rows"][1]["v"].is_null());
    }

    #[tokio::test]
    async fn staged_artifact_references_the_original() {
        let result = run("missing_values", Some("v"), json!([{"v": 1}])).await;
        assert_eq!(result.corrected_state["source_ref"], "inline");
        assert!(result.corrected_state["staging_id"].is_string());
        assert!(result.confidence > 0.0);
    }

    #[tokio::test]
    async fn interior_gaps_are_interpolated_from_neighbours() {
        let store = Arc::new(MemoryObjectStore::new());
        let corrector = DataCorrector::new(store.clone(), "staging");
        let issue = classification("missing_values", Some("v"));
        let analysis = analysis();
        let state = json!({"rows": [{"v": 1.0}, {"v": null}, {"v": 2.0}, {"v": 10.0}]});
        let result = corrector
            .apply(&CorrectionContext {
                original_state: &state,
                issue: &issue,
                root_cause: &analysis,
                action_success_rate: None,
            })
            .await
            .unwrap();

        let path = result.corrected_state["staging_path"].as_str().unwrap();
        let staged = store.download("staging", path).await.unwrap();
        let rows: Vec<Value> = serde_json::from_slice(&staged.bytes).unwrap();
        // Neighbours (1.0, 2.0) give 1.5; the column mean would be ~4.33
        assert_eq!(rows[1]["v"], 1.5);
    }

    #[tokio::test]
    async fn outliers_are_flagged_not_dropped() {
        let rows = json!([
            {"v": 10}, {"v": 11}, {"v": 9}, {"v": 10}, {"v": 12}, {"v": 1000}
        ]);
        let result = run("outliers", Some("v"), rows).await;
        assert_eq!(result.strategy, "flag_outliers");
        assert_eq!(result.metadata["rows_out"], 6);
    }

    #[tokio::test]
    async fn explicit_removal_request_drops_outlier_rows() {
        let store = Arc::new(MemoryObjectStore::new());
        let corrector = DataCorrector::new(store, "staging");
        let mut issue = classification("outliers", Some("v"));
        issue
            .features
            .insert("outlier_action".to_string(), json!("remove"));
        let analysis = analysis();
        let state = json!({"rows": [
            {"v": 10}, {"v": 11}, {"v": 9}, {"v": 10}, {"v": 12}, {"v": 1000}
        ]});
        let result = corrector
            .apply(&CorrectionContext {
                original_state: &state,
                issue: &issue,
                root_cause: &analysis,
                action_success_rate: None,
            })
            .await
            .unwrap();
        assert_eq!(result.strategy, "remove_outliers");
        assert_eq!(result.metadata["rows_out"], 5);
    }

    #[tokio::test]
    async fn coerces_string_numbers() {
        let result = run("type_mismatch", Some("v"), json!([{"v": " 42 "}, {"v": "x"}])).await;
        assert_eq!(result.strategy, "coerce_types");
        assert_eq!(result.metadata["rows_out"], 2);
    }

    #[tokio::test]
    async fn removes_exact_duplicates() {
        let result = run(
            "duplicates",
            None,
            json!([{"a": 1}, {"a": 1}, {"a": 2}]),
        )
        .await;
        assert_eq!(result.metadata["rows_out"], 2);
    }

    #[tokio::test]
    async fn confidence_composes_with_history() {
        let result = run("missing_values", Some("v"), json!([{"v": 1}])).await;
        // 0.9 prior * 0.8 history * 0.9 classification
        assert!((result.confidence - 0.648).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_rows_is_an_error() {
        let store = Arc::new(MemoryObjectStore::new());
        let corrector = DataCorrector::new(store, "staging");
        let issue = classification("missing_values", None);
        let analysis = analysis();
        let state = json!({"not_rows": []});
        let result = corrector
            .apply(&CorrectionContext {
                original_state: &state,
                issue: &issue,
                root_cause: &analysis,
                action_success_rate: None,
            })
            .await;
        assert!(result.is_err());
    }
}
