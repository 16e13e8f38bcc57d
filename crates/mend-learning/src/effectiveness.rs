//! Effectiveness analysis over patterns, actions and feedback

use crate::feedback::FeedbackRecord;
use chrono::{Duration, Utc};
use mend_common::{HealingAction, IssuePattern, Result};
use mend_store::{Criteria, DocumentStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

const PATTERN_COLLECTION: &str = "issue_patterns";
const ACTION_COLLECTION: &str = "healing_actions";
const FEEDBACK_COLLECTION: &str = "healing_feedback";

/// Attempts inspected by the deactivation rule
const DEACTIVATION_WINDOW: usize = 20;

/// What a recommendation asks the operator (or automation) to do
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    DeactivateAction,
    ReviewPattern,
    RaiseThreshold,
}

/// A produced improvement recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementRecommendation {
    pub kind: RecommendationKind,
    pub target_id: String,
    pub reason: String,
}

/// Success-rate trend over a rolling window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub window_start_days_ago: i64,
    pub attempts: usize,
    pub success_rate: f64,
}

/// Periodic analyzer of pattern and action effectiveness
pub struct EffectivenessAnalyzer {
    store: Arc<dyn DocumentStore>,
}

impl EffectivenessAnalyzer {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        EffectivenessAnalyzer { store }
    }

    /// Success rates per pattern id
    pub async fn pattern_effectiveness(&self) -> Result<HashMap<String, f64>> {
        let docs = self
            .store
            .query(PATTERN_COLLECTION, &Criteria::new(), None)
            .await?;
        let mut rates = HashMap::new();
        for doc in docs {
            let pattern: IssuePattern = serde_json::from_value(doc)?;
            rates.insert(pattern.pattern_id, pattern.success_rate);
        }
        Ok(rates)
    }

    /// Success rates per action id
    pub async fn action_effectiveness(&self) -> Result<HashMap<String, f64>> {
        let docs = self
            .store
            .query(ACTION_COLLECTION, &Criteria::new(), None)
            .await?;
        let mut rates = HashMap::new();
        for doc in docs {
            let action: HealingAction = serde_json::from_value(doc)?;
            rates.insert(action.action_id, action.success_rate);
        }
        Ok(rates)
    }

    /// Rolling success-rate trend for one action over the given windows
    /// (days ago, newest first)
    pub async fn action_trend(
        &self,
        action_id: &str,
        window_days: &[i64],
    ) -> Result<Vec<TrendPoint>> {
        let docs = self
            .store
            .query(
                FEEDBACK_COLLECTION,
                &Criteria::new().eq("action_id", action_id),
                None,
            )
            .await?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            records.push(serde_json::from_value::<FeedbackRecord>(doc)?);
        }

        let now = Utc::now();
        let mut trend = Vec::new();
        for &days in window_days {
            let start = now - Duration::days(days);
            let in_window: Vec<&FeedbackRecord> =
                records.iter().filter(|r| r.timestamp >= start).collect();
            let successes = in_window.iter().filter(|r| r.successful).count();
            trend.push(TrendPoint {
                window_start_days_ago: days,
                attempts: in_window.len(),
                success_rate: if in_window.is_empty() {
                    0.0
                } else {
                    successes as f64 / in_window.len() as f64
                },
            });
        }
        Ok(trend)
    }

    /// Produce improvement recommendations:
    /// - deactivate actions with zero successes in their last 20 attempts,
    /// - review patterns whose overall success rate is poor despite volume,
    /// - raise thresholds on patterns that match often but heal rarely.
    pub async fn recommendations(&self) -> Result<Vec<ImprovementRecommendation>> {
        let mut recommendations = Vec::new();

        let action_docs = self
            .store
            .query(ACTION_COLLECTION, &Criteria::new(), None)
            .await?;
        for doc in action_docs {
            let action: HealingAction = serde_json::from_value(doc)?;
            if !action.active || action.execution_count < DEACTIVATION_WINDOW as u64 {
                continue;
            }
            let recent = self
                .recent_outcomes(&action.action_id, DEACTIVATION_WINDOW)
                .await?;
            if recent.len() >= DEACTIVATION_WINDOW && recent.iter().all(|s| !s) {
                recommendations.push(ImprovementRecommendation {
                    kind: RecommendationKind::DeactivateAction,
                    target_id: action.action_id.clone(),
                    reason: format!(
                        "0 successes in last {} attempts",
                        recent.len()
                    ),
                });
            }
        }

        let pattern_docs = self
            .store
            .query(PATTERN_COLLECTION, &Criteria::new(), None)
            .await?;
        for doc in pattern_docs {
            let pattern: IssuePattern = serde_json::from_value(doc)?;
            if pattern.occurrence_count >= 10 && pattern.success_rate < 0.3 {
                recommendations.push(ImprovementRecommendation {
                    kind: RecommendationKind::ReviewPattern,
                    target_id: pattern.pattern_id.clone(),
                    reason: format!(
                        "success rate {:.2} over {} occurrences",
                        pattern.success_rate, pattern.occurrence_count
                    ),
                });
            } else if pattern.occurrence_count >= 10
                && pattern.success_rate < 0.5
                && pattern.confidence_threshold < 0.8
            {
                recommendations.push(ImprovementRecommendation {
                    kind: RecommendationKind::RaiseThreshold,
                    target_id: pattern.pattern_id.clone(),
                    reason: format!(
                        "threshold {:.2} admits too many weak matches",
                        pattern.confidence_threshold
                    ),
                });
            }
        }

        info!(count = recommendations.len(), "effectiveness recommendations produced");
        Ok(recommendations)
    }

    /// Most recent outcome flags for an action, newest last
    async fn recent_outcomes(&self, action_id: &str, limit: usize) -> Result<Vec<bool>> {
        let docs = self
            .store
            .query(
                FEEDBACK_COLLECTION,
                &Criteria::new().eq("action_id", action_id),
                None,
            )
            .await?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            records.push(serde_json::from_value::<FeedbackRecord>(doc)?);
        }
        records.sort_by_key(|r| r.timestamp);
        Ok(records
            .iter()
            .rev()
            .take(limit)
            .rev()
            .map(|r| r.successful)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{FeedbackCollector, FeedbackKind};
    use mend_common::ActionKind;
    use mend_store::MemoryDocumentStore;

    #[tokio::test]
    async fn hopeless_actions_get_deactivation_recommendations() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut action = HealingAction::new(ActionKind::PipelineRetry, "pat1".to_string());
        for _ in 0..25 {
            action.record_outcome(false);
        }
        store
            .set(ACTION_COLLECTION, &action.action_id, serde_json::to_value(&action).unwrap())
            .await
            .unwrap();

        let collector = FeedbackCollector::new(store.clone(), 90);
        for _ in 0..DEACTIVATION_WINDOW {
            collector
                .record_feedback(&FeedbackRecord::new(
                    &action.action_id,
                    FeedbackKind::Automatic,
                    false,
                ))
                .await
                .unwrap();
        }

        let analyzer = EffectivenessAnalyzer::new(store);
        let recommendations = analyzer.recommendations().await.unwrap();
        assert!(recommendations
            .iter()
            .any(|r| r.kind == RecommendationKind::DeactivateAction
                && r.target_id == action.action_id));
    }

    #[tokio::test]
    async fn struggling_patterns_get_review_recommendations() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut pattern = IssuePattern::new("weak", mend_common::IssueCategory::Pipeline);
        for i in 0..12 {
            pattern.record_outcome(i % 6 == 0);
        }
        store
            .set(PATTERN_COLLECTION, &pattern.pattern_id, serde_json::to_value(&pattern).unwrap())
            .await
            .unwrap();

        let analyzer = EffectivenessAnalyzer::new(store);
        let recommendations = analyzer.recommendations().await.unwrap();
        assert!(recommendations
            .iter()
            .any(|r| r.kind == RecommendationKind::ReviewPattern));
    }

    #[tokio::test]
    async fn trend_windows_partition_feedback_by_age() {
        let store = Arc::new(MemoryDocumentStore::new());
        let action = HealingAction::new(ActionKind::DataCorrection, "pat1".to_string());
        store
            .set(ACTION_COLLECTION, &action.action_id, serde_json::to_value(&action).unwrap())
            .await
            .unwrap();
        let collector = FeedbackCollector::new(store.clone(), 90);

        let mut old = FeedbackRecord::new(&action.action_id, FeedbackKind::Manual, false);
        old.timestamp = Utc::now() - Duration::days(20);
        collector.record_feedback(&old).await.unwrap();
        collector
            .record_feedback(&FeedbackRecord::new(
                &action.action_id,
                FeedbackKind::Manual,
                true,
            ))
            .await
            .unwrap();

        let analyzer = EffectivenessAnalyzer::new(store);
        let trend = analyzer
            .action_trend(&action.action_id, &[7, 30])
            .await
            .unwrap();
        assert_eq!(trend[0].attempts, 1);
        assert!((trend[0].success_rate - 1.0).abs() < 1e-9);
        assert_eq!(trend[1].attempts, 2);
        assert!((trend[1].success_rate - 0.5).abs() < 1e-9);
    }
}
