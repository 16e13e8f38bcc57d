//! Pattern recognition over learned issue templates

use crate::features::similarity;
use crate::issue::IssueClassification;
use chrono::Utc;
use mend_common::{Error, HealingConfig, IssueCategory, IssuePattern, Result};
use mend_store::{Criteria, DocumentStore};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const PATTERN_COLLECTION: &str = "issue_patterns";
const HISTORY_COLLECTION: &str = "issue_history";

/// A refresh this soon after the previous one reuses its result
const REFRESH_REUSE_WINDOW: Duration = Duration::from_millis(500);

/// A matched pattern with its similarity score
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern: IssuePattern,
    pub similarity: f64,
}

/// Matches issues against learned patterns and grows the pattern set from
/// recurring unmatched issues.
///
/// The pattern cache is shared across classifier requests; refreshes are
/// single-flight — one loader runs, concurrent callers wait on it and reuse
/// its result.
pub struct PatternRecognizer {
    store: Arc<dyn DocumentStore>,
    cache: RwLock<HashMap<IssueCategory, Vec<IssuePattern>>>,
    refresh_gate: Mutex<Option<Instant>>,
    config: HealingConfig,
}

impl PatternRecognizer {
    pub fn new(store: Arc<dyn DocumentStore>, config: HealingConfig) -> Self {
        PatternRecognizer {
            store,
            cache: RwLock::new(HashMap::new()),
            refresh_gate: Mutex::new(None),
            config,
        }
    }

    /// Create and persist a pattern
    pub async fn create_pattern(
        &self,
        name: &str,
        category: IssueCategory,
        features: HashMap<String, Value>,
        confidence_threshold: f64,
    ) -> Result<IssuePattern> {
        let mut pattern = IssuePattern::new(name, category);
        pattern.features = features;
        pattern.confidence_threshold = confidence_threshold.clamp(0.0, 1.0);
        self.store
            .set(
                PATTERN_COLLECTION,
                &pattern.pattern_id,
                serde_json::to_value(&pattern)?,
            )
            .await?;
        self.cache
            .write()
            .entry(category)
            .or_default()
            .push(pattern.clone());
        info!(pattern_id = %pattern.pattern_id, name, "created issue pattern");
        Ok(pattern)
    }

    pub async fn get_pattern(&self, pattern_id: &str) -> Result<Option<IssuePattern>> {
        match self.store.get(PATTERN_COLLECTION, pattern_id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Reload the pattern cache from the store. Concurrent refreshes
    /// coalesce: whoever holds the gate loads, late arrivals see the fresh
    /// timestamp and return immediately.
    pub async fn refresh_cache(&self) -> Result<()> {
        let mut gate = self.refresh_gate.lock().await;
        if let Some(last) = *gate {
            if last.elapsed() < REFRESH_REUSE_WINDOW {
                return Ok(());
            }
        }
        let docs = self
            .store
            .query(PATTERN_COLLECTION, &Criteria::new(), None)
            .await?;
        let mut grouped: HashMap<IssueCategory, Vec<IssuePattern>> = HashMap::new();
        for doc in docs {
            let pattern: IssuePattern = serde_json::from_value(doc)?;
            grouped.entry(pattern.category).or_default().push(pattern);
        }
        let total: usize = grouped.values().map(Vec::len).sum();
        *self.cache.write() = grouped;
        *gate = Some(Instant::now());
        debug!(patterns = total, "refreshed pattern cache");
        Ok(())
    }

    /// All matches for an issue at or above each pattern's own threshold,
    /// sorted by similarity descending
    pub async fn match_issue(
        &self,
        classification: &IssueClassification,
    ) -> Result<Vec<PatternMatch>> {
        if self.cache.read().is_empty() {
            self.refresh_cache().await?;
        }
        let cache = self.cache.read();
        let mut matches: Vec<PatternMatch> = cache
            .get(&classification.category)
            .into_iter()
            .flatten()
            .filter_map(|pattern| {
                let score = similarity(&classification.features, &pattern.features);
                (score >= pattern.confidence_threshold).then(|| PatternMatch {
                    pattern: pattern.clone(),
                    similarity: score,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches)
    }

    /// Atomically record a healing outcome on a pattern, recomputing its
    /// success rate
    pub async fn update_stats(&self, pattern_id: &str, healing_success: bool) -> Result<IssuePattern> {
        let updated = self
            .store
            .update(
                PATTERN_COLLECTION,
                pattern_id,
                Box::new(move |doc| {
                    let mut pattern: IssuePattern = serde_json::from_value(doc.clone())?;
                    pattern.record_outcome(healing_success);
                    *doc = serde_json::to_value(&pattern)?;
                    Ok(())
                }),
            )
            .await?;
        let pattern: IssuePattern = serde_json::from_value(updated)?;

        let mut cache = self.cache.write();
        if let Some(patterns) = cache.get_mut(&pattern.category) {
            if let Some(cached) = patterns.iter_mut().find(|p| p.pattern_id == pattern_id) {
                *cached = pattern.clone();
            }
        }
        Ok(pattern)
    }

    /// Record an issue and its (possibly absent) match for later learning
    pub async fn add_issue_to_history(
        &self,
        classification: &IssueClassification,
        matched_pattern_id: Option<&str>,
        healing_success: Option<bool>,
    ) -> Result<()> {
        let doc = json!({
            "issue_id": classification.issue_id,
            "category": classification.category,
            "issue_type": classification.issue_type,
            "features": classification.features,
            "matched_pattern_id": matched_pattern_id,
            "healing_success": healing_success,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.store
            .set(HISTORY_COLLECTION, &classification.issue_id, doc)
            .await
    }

    /// Scan unmatched history for recurring issues and promote clusters of
    /// at least `min_pattern_occurrences` to new patterns. The new
    /// pattern's threshold is the cluster's intra-similarity floor.
    pub async fn detect_new_patterns(&self) -> Result<Vec<IssuePattern>> {
        let history = self
            .store
            .query(HISTORY_COLLECTION, &Criteria::new(), None)
            .await?;

        // Cluster unmatched issues by (category, issue_type)
        let mut clusters: HashMap<(IssueCategory, String), Vec<HashMap<String, Value>>> =
            HashMap::new();
        for entry in &history {
            if !entry["matched_pattern_id"].is_null() {
                continue;
            }
            let Ok(category) = serde_json::from_value::<IssueCategory>(entry["category"].clone())
            else {
                continue;
            };
            let issue_type = entry["issue_type"].as_str().unwrap_or("unknown").to_string();
            let features: HashMap<String, Value> = entry["features"]
                .as_object()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            clusters.entry((category, issue_type)).or_default().push(features);
        }

        let mut created = Vec::new();
        for ((category, issue_type), members) in clusters {
            if members.len() < self.config.min_pattern_occurrences {
                continue;
            }
            let threshold = intra_similarity_floor(&members);
            let shared = shared_features(&members);
            if shared.is_empty() {
                continue;
            }
            let pattern = self
                .create_pattern(
                    &format!("recurring {issue_type}"),
                    category,
                    shared,
                    threshold,
                )
                .await?;
            created.push(pattern);
        }
        if !created.is_empty() {
            info!(count = created.len(), "promoted recurring issues to patterns");
        }
        Ok(created)
    }

    /// Delete a pattern (administrative surface)
    pub async fn delete_pattern(&self, pattern_id: &str) -> Result<()> {
        let Some(pattern) = self.get_pattern(pattern_id).await? else {
            return Err(Error::NotFound(format!("pattern {pattern_id}")));
        };
        self.store.delete(PATTERN_COLLECTION, pattern_id).await?;
        let mut cache = self.cache.write();
        if let Some(patterns) = cache.get_mut(&pattern.category) {
            patterns.retain(|p| p.pattern_id != pattern_id);
        }
        Ok(())
    }
}

/// Minimum pairwise similarity within a cluster
fn intra_similarity_floor(members: &[HashMap<String, Value>]) -> f64 {
    let mut floor: f64 = 1.0;
    for (i, a) in members.iter().enumerate() {
        for b in members.iter().skip(i + 1) {
            floor = floor.min(similarity(a, b));
        }
    }
    floor
}

/// Feature entries present with the same value in every member
fn shared_features(members: &[HashMap<String, Value>]) -> HashMap<String, Value> {
    let Some(first) = members.first() else {
        return HashMap::new();
    };
    first
        .iter()
        .filter(|(key, value)| {
            members
                .iter()
                .all(|m| m.get(key.as_str()) == Some(*value))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_common::{ActionKind, Recoverability, Severity};
    use mend_store::MemoryDocumentStore;

    fn classification(features: &[(&str, Value)]) -> IssueClassification {
        IssueClassification {
            issue_id: uuid::Uuid::new_v4().to_string(),
            category: IssueCategory::DataQuality,
            severity: Severity::Medium,
            issue_type: "schema_mismatch".into(),
            description: "test".into(),
            recommended_action: ActionKind::SchemaEvolution,
            confidence: 0.9,
            recoverability: Recoverability::AutoRecoverable,
            features: features
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            extensions: Default::default(),
        }
    }

    fn recognizer() -> PatternRecognizer {
        PatternRecognizer::new(Arc::new(MemoryDocumentStore::new()), HealingConfig::default())
    }

    #[tokio::test]
    async fn matches_sorted_by_similarity() {
        let recognizer = recognizer();
        let mut exact = HashMap::new();
        exact.insert("error_kind".to_string(), json!("schema_mismatch"));
        exact.insert("dataset".to_string(), json!("d"));
        recognizer
            .create_pattern("exact", IssueCategory::DataQuality, exact, 0.5)
            .await
            .unwrap();
        let mut partial = HashMap::new();
        partial.insert("error_kind".to_string(), json!("schema_mismatch"));
        partial.insert("dataset".to_string(), json!("other"));
        recognizer
            .create_pattern("partial", IssueCategory::DataQuality, partial, 0.5)
            .await
            .unwrap();

        let issue = classification(&[
            ("error_kind", json!("schema_mismatch")),
            ("dataset", json!("d")),
        ]);
        let matches = recognizer.match_issue(&issue).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].pattern.name, "exact");
        assert!(matches[0].similarity > matches[1].similarity);
    }

    #[tokio::test]
    async fn pattern_threshold_gates_matches() {
        let recognizer = recognizer();
        let mut features = HashMap::new();
        features.insert("error_kind".to_string(), json!("schema_mismatch"));
        features.insert("dataset".to_string(), json!("other"));
        recognizer
            .create_pattern("strict", IssueCategory::DataQuality, features, 0.95)
            .await
            .unwrap();

        let issue = classification(&[("error_kind", json!("schema_mismatch"))]);
        let matches = recognizer.match_issue(&issue).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn update_stats_recomputes_success_rate() {
        let recognizer = recognizer();
        let pattern = recognizer
            .create_pattern("p", IssueCategory::Pipeline, HashMap::new(), 0.7)
            .await
            .unwrap();
        recognizer.update_stats(&pattern.pattern_id, true).await.unwrap();
        recognizer.update_stats(&pattern.pattern_id, true).await.unwrap();
        let updated = recognizer.update_stats(&pattern.pattern_id, false).await.unwrap();
        assert_eq!(updated.occurrence_count, 3);
        assert_eq!(updated.success_count, 2);
        assert!((updated.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recurring_unmatched_issues_become_patterns() {
        let recognizer = recognizer();
        for _ in 0..3 {
            let issue = classification(&[
                ("error_kind", json!("schema_mismatch")),
                ("dataset", json!("analytics")),
            ]);
            recognizer.add_issue_to_history(&issue, None, None).await.unwrap();
        }
        let created = recognizer.detect_new_patterns().await.unwrap();
        assert_eq!(created.len(), 1);
        let pattern = &created[0];
        assert_eq!(pattern.category, IssueCategory::DataQuality);
        assert_eq!(pattern.features["error_kind"], "schema_mismatch");
        // Identical members give an intra-similarity floor of 1.0
        assert!((pattern.confidence_threshold - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn matched_issues_do_not_spawn_patterns() {
        let recognizer = recognizer();
        for _ in 0..5 {
            let issue = classification(&[("error_kind", json!("schema_mismatch"))]);
            recognizer
                .add_issue_to_history(&issue, Some("existing"), Some(true))
                .await
                .unwrap();
        }
        assert!(recognizer.detect_new_patterns().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_refreshes_coalesce() {
        let recognizer = Arc::new(recognizer());
        recognizer
            .create_pattern("p", IssueCategory::Pipeline, HashMap::new(), 0.7)
            .await
            .unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = recognizer.clone();
            handles.push(tokio::spawn(async move { r.refresh_cache().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(recognizer.cache.read()[&IssueCategory::Pipeline].len(), 1);
    }
}
