//! Per-category feature extraction for pattern matching

use crate::issue::IssueDescriptor;
use mend_common::IssueCategory;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Tokens in the error text that carry diagnostic signal
const SIGNAL_TOKENS: [&str; 14] = [
    "timeout",
    "timed",
    "connection",
    "refused",
    "memory",
    "quota",
    "permission",
    "denied",
    "schema",
    "null",
    "type",
    "mismatch",
    "duplicate",
    "unavailable",
];

/// Extract the feature vector an issue is matched on, shaped by category:
/// data-quality issues carry schema and column attributes, pipeline issues
/// carry error-text features plus the resource snapshot, system and
/// resource issues carry metric deltas.
pub fn extract_features(
    descriptor: &IssueDescriptor,
    category: IssueCategory,
) -> HashMap<String, Value> {
    let mut features = HashMap::new();
    features.insert("component".into(), json!(descriptor.component));

    match category {
        IssueCategory::DataQuality => {
            if let Some(dataset) = &descriptor.dataset {
                features.insert("dataset".into(), json!(dataset));
            }
            if let Some(table) = &descriptor.table {
                features.insert("table".into(), json!(table));
            }
            for key in ["column", "rule", "expected_type", "actual_type"] {
                if let Some(value) = descriptor.metrics.get(key) {
                    features.insert(key.into(), value.clone());
                }
            }
            features.insert(
                "error_kind".into(),
                json!(error_kind(&descriptor.error_message)),
            );
        }
        IssueCategory::Pipeline => {
            features.insert(
                "error_kind".into(),
                json!(error_kind(&descriptor.error_message)),
            );
            for token in error_tokens(&descriptor.error_message) {
                features.insert(format!("token:{token}"), json!(true));
            }
            for key in ["memory_mb", "cpu_percent", "retry_count", "batch_size"] {
                if let Some(value) = descriptor.metrics.get(key) {
                    features.insert(key.into(), value.clone());
                }
            }
        }
        IssueCategory::System | IssueCategory::Resource => {
            for (key, value) in &descriptor.metrics {
                if value.is_number() {
                    features.insert(format!("metric:{key}"), value.clone());
                }
            }
            features.insert(
                "error_kind".into(),
                json!(error_kind(&descriptor.error_message)),
            );
        }
    }
    features
}

/// Canonical short label for the kind of error text
pub fn error_kind(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("schema") && (lower.contains("mismatch") || lower.contains("drift")) {
        "schema_mismatch"
    } else if lower.contains("null") || lower.contains("missing value") {
        "missing_values"
    } else if lower.contains("duplicate") {
        "duplicates"
    } else if lower.contains("outlier") || lower.contains("anomal") {
        "outliers"
    } else if lower.contains("type") && lower.contains("mismatch") {
        "type_mismatch"
    } else if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("memory") || lower.contains("oom") {
        "out_of_memory"
    } else if lower.contains("quota") || lower.contains("rate") {
        "quota_exceeded"
    } else if lower.contains("permission") || lower.contains("denied") || lower.contains("auth") {
        "permission_denied"
    } else if lower.contains("connect") || lower.contains("unavailable") {
        "connectivity"
    } else if lower.contains("depend") {
        "dependency_failure"
    } else {
        "unknown"
    }
}

fn error_tokens(message: &str) -> Vec<&'static str> {
    let lower = message.to_lowercase();
    SIGNAL_TOKENS
        .iter()
        .copied()
        .filter(|t| lower.contains(t))
        .collect()
}

/// Similarity between an issue's features and a pattern's features: the
/// mean of key overlap (share of the pattern's keys present in the issue)
/// and value equality over the overlapping keys. The pattern's keys are
/// the reference set, so a sparse pattern can still match a richly
/// featured issue.
pub fn similarity(
    issue: &HashMap<String, Value>,
    pattern: &HashMap<String, Value>,
) -> f64 {
    if pattern.is_empty() {
        return 0.0;
    }
    let overlap: Vec<&String> = pattern.keys().filter(|k| issue.contains_key(*k)).collect();

    let key_overlap = overlap.len() as f64 / pattern.len() as f64;
    let value_match = if overlap.is_empty() {
        0.0
    } else {
        let equal = overlap
            .iter()
            .filter(|k| issue.get(k.as_str()) == pattern.get(k.as_str()))
            .count();
        equal as f64 / overlap.len() as f64
    };
    (key_overlap + value_match) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_labels() {
        assert_eq!(error_kind("Schema mismatch on field x"), "schema_mismatch");
        assert_eq!(error_kind("query timed out after 30s"), "timeout");
        assert_eq!(error_kind("NULL constraint violated"), "missing_values");
        assert_eq!(error_kind("something odd"), "unknown");
    }

    #[test]
    fn data_quality_features_carry_dataset_attributes() {
        let descriptor = IssueDescriptor::new("schema mismatch", "load_task")
            .with_dataset("analytics", "orders")
            .with_metric("column", "amount");
        let features = extract_features(&descriptor, IssueCategory::DataQuality);
        assert_eq!(features["dataset"], "analytics");
        assert_eq!(features["column"], "amount");
        assert_eq!(features["error_kind"], "schema_mismatch");
    }

    #[test]
    fn identical_features_are_fully_similar() {
        let descriptor = IssueDescriptor::new("timed out", "extract");
        let f = extract_features(&descriptor, IssueCategory::Pipeline);
        assert!((similarity(&f, &f) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_features_score_zero() {
        let mut a = HashMap::new();
        a.insert("x".to_string(), json!(1));
        let mut b = HashMap::new();
        b.insert("y".to_string(), json!(2));
        assert_eq!(similarity(&a, &b), 0.0);
    }

    #[test]
    fn sparse_pattern_matches_rich_issue() {
        let mut issue = HashMap::new();
        issue.insert("error_kind".to_string(), json!("timeout"));
        issue.insert("component".to_string(), json!("extract"));
        issue.insert("dataset".to_string(), json!("d"));
        let mut pattern = HashMap::new();
        pattern.insert("error_kind".to_string(), json!("timeout"));

        // every pattern key is present and equal in the issue
        assert!((similarity(&issue, &pattern) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn similarity_is_mean_of_key_overlap_and_value_equality() {
        let mut issue = HashMap::new();
        issue.insert("error_kind".to_string(), json!("timeout"));
        let mut pattern = HashMap::new();
        pattern.insert("error_kind".to_string(), json!("timeout"));
        pattern.insert("dataset".to_string(), json!("d"));

        // overlap 1 of 2 pattern keys -> 0.5; values equal -> 1.0; mean 0.75
        assert!((similarity(&issue, &pattern) - 0.75).abs() < 1e-9);
    }
}
