//! Feedback collection over healing outcomes

use chrono::{DateTime, Duration, Utc};
use mend_common::{HealingAction, Result};
use mend_store::{Criteria, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const FEEDBACK_COLLECTION: &str = "healing_feedback";
const ACTION_COLLECTION: &str = "healing_actions";

/// Where a feedback observation came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// System metrics observed after the healing ran
    Automatic,
    /// Outcome of the pipeline restart that followed
    Resolution,
    /// A human filled in the form
    Manual,
    /// Downstream pipeline behaviour implied the verdict
    Inferred,
}

impl FeedbackKind {
    /// Base weight of this observation kind in the impact score
    pub fn base_weight(&self) -> f64 {
        match self {
            FeedbackKind::Automatic => 0.2,
            FeedbackKind::Resolution => 0.5,
            FeedbackKind::Manual => 0.7,
            FeedbackKind::Inferred => 0.3,
        }
    }
}

/// One observation about a healing outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: String,
    pub action_id: String,
    pub kind: FeedbackKind,
    /// Confidence of the observation itself
    pub confidence: f64,
    pub successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Free-form context; `category` participates in the impact score
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(action_id: impl Into<String>, kind: FeedbackKind, successful: bool) -> Self {
        FeedbackRecord {
            feedback_id: uuid::Uuid::new_v4().to_string(),
            action_id: action_id.into(),
            kind,
            confidence: 1.0,
            successful,
            comment: None,
            context: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.context
            .insert("category".to_string(), Value::String(category.to_string()));
        self
    }

    /// Impact of this record on training data:
    /// `base(kind) · confidence · category_multiplier · 0.9^(age_days/30)`
    pub fn impact(&self, now: DateTime<Utc>) -> f64 {
        let category_multiplier = match self.context.get("category").and_then(|v| v.as_str()) {
            Some("data_quality") => 1.2,
            Some("pipeline") => 0.8,
            _ => 1.0,
        };
        let age_days = (now - self.timestamp).num_seconds().max(0) as f64 / 86_400.0;
        self.kind.base_weight() * self.confidence * category_multiplier * decay(age_days)
    }
}

/// `0.9^(days/30)`
pub fn decay(age_days: f64) -> f64 {
    0.9f64.powf(age_days / 30.0)
}

/// Persists feedback and folds each record into the referenced action's
/// counters. Retention is bounded; expired feedback is purged.
pub struct FeedbackCollector {
    store: Arc<dyn DocumentStore>,
    retention_days: i64,
}

impl FeedbackCollector {
    pub fn new(store: Arc<dyn DocumentStore>, retention_days: i64) -> Self {
        FeedbackCollector {
            store,
            retention_days,
        }
    }

    /// Record one observation; the referenced action's counters are
    /// updated in the same atomic single-document style as the
    /// orchestrator's own writes.
    pub async fn record_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        self.store
            .set(
                FEEDBACK_COLLECTION,
                &record.feedback_id,
                serde_json::to_value(record)?,
            )
            .await?;
        let successful = record.successful;
        self.store
            .update(
                ACTION_COLLECTION,
                &record.action_id,
                Box::new(move |doc| {
                    let mut action: HealingAction = serde_json::from_value(doc.clone())?;
                    action.record_outcome(successful);
                    *doc = serde_json::to_value(&action)?;
                    Ok(())
                }),
            )
            .await?;
        debug!(
            feedback_id = %record.feedback_id,
            action_id = %record.action_id,
            kind = ?record.kind,
            successful,
            "recorded feedback"
        );
        Ok(())
    }

    pub async fn feedback_for_action(&self, action_id: &str) -> Result<Vec<FeedbackRecord>> {
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
            records.push(serde_json::from_value(doc)?);
        }
        Ok(records)
    }

    /// All feedback newer than the given instant
    pub async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackRecord>> {
        let docs = self
            .store
            .query(
                FEEDBACK_COLLECTION,
                &Criteria::new().gte("timestamp", since.to_rfc3339()),
                None,
            )
            .await?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            records.push(serde_json::from_value(doc)?);
        }
        Ok(records)
    }

    /// Delete feedback older than the retention window; returns the purge
    /// count
    pub async fn purge_expired(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(self.retention_days);
        let expired = self
            .store
            .query(
                FEEDBACK_COLLECTION,
                &Criteria::new().lte("timestamp", cutoff.to_rfc3339()),
                None,
            )
            .await?;
        let mut purged = 0usize;
        for doc in expired {
            if let Some(id) = doc["feedback_id"].as_str() {
                self.store.delete(FEEDBACK_COLLECTION, id).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "purged expired feedback");
        }
        Ok(purged)
    }
}
