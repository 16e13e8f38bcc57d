//! Model training runs over collected feedback

use crate::feedback::FeedbackCollector;
use crate::knowledge::{KnowledgeBase, KnowledgeEntry, KnowledgeFlavor};
use chrono::{Duration, Utc};
use mend_common::Result;
use mend_diagnosis::{ModelArtifact, ModelHandle};
use mend_store::{Criteria, DocumentStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const VERSION_COLLECTION: &str = "model_versions";

/// Outcome of one training run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_version: String,
    pub artifact_path: PathBuf,
    pub trained_on: usize,
    pub validated_on: usize,
    pub validation_accuracy: f64,
    pub champion_accuracy: Option<f64>,
    pub promoted: bool,
}

/// Orchestrates retraining of the local issue model from feedback and
/// knowledge. Every run registers a new artifact version; promotion to
/// champion requires strict improvement on validation accuracy by at
/// least the configured margin.
pub struct ModelTrainer {
    store: Arc<dyn DocumentStore>,
    collector: FeedbackCollector,
    knowledge: KnowledgeBase,
    promotion_margin: f64,
}

impl ModelTrainer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collector: FeedbackCollector,
        knowledge: KnowledgeBase,
        promotion_margin: f64,
    ) -> Self {
        ModelTrainer {
            store,
            collector,
            knowledge,
            promotion_margin,
        }
    }

    /// Run one training pass over the feedback window and register the
    /// resulting artifact. `handle`, when given, receives the new artifact
    /// on promotion.
    pub async fn train(
        &self,
        window_days: i64,
        artifact_dir: &Path,
        handle: Option<&ModelHandle>,
    ) -> Result<TrainingReport> {
        let since = Utc::now() - Duration::days(window_days);
        let records = self.collector.feedback_since(since).await?;

        // Feature preparation: (issue_type, impact weight, outcome)
        let now = Utc::now();
        let mut samples: Vec<(String, f64, bool)> = records
            .iter()
            .filter_map(|r| {
                let issue_type = r.context.get("issue_type")?.as_str()?.to_string();
                Some((issue_type, r.impact(now), r.successful))
            })
            .collect();
        // Deterministic split: stable order, alternating assignment
        samples.sort_by(|a, b| a.0.cmp(&b.0));
        let (train, validation): (Vec<_>, Vec<_>) = samples
            .iter()
            .enumerate()
            .partition(|(i, _)| i % 2 == 0);

        // Weighted success rate per issue type becomes the confidence prior
        let mut weighted: HashMap<String, (f64, f64)> = HashMap::new();
        for (_, (issue_type, impact, successful)) in &train {
            let entry = weighted.entry(issue_type.clone()).or_insert((0.0, 0.0));
            entry.1 += impact;
            if *successful {
                entry.0 += impact;
            }
        }
        let priors: HashMap<String, f64> = weighted
            .into_iter()
            .filter(|(_, (_, total))| *total > 0.0)
            .map(|(issue_type, (success, total))| (issue_type, success / total))
            .collect();

        let version_number = self
            .store
            .query(VERSION_COLLECTION, &Criteria::new(), None)
            .await?
            .len()
            + 1;
        let model_version = format!("v{version_number}");
        let artifact = ModelArtifact {
            model_version: model_version.clone(),
            priors,
            weights: HashMap::new(),
            default_confidence: 0.5,
        };

        // Evaluate on the held-out half
        let correct = validation
            .iter()
            .filter(|(_, (issue_type, _, successful))| {
                let predicted = artifact
                    .priors
                    .get(issue_type)
                    .copied()
                    .unwrap_or(artifact.default_confidence)
                    >= 0.5;
                predicted == *successful
            })
            .count();
        let validation_accuracy = if validation.is_empty() {
            0.0
        } else {
            correct as f64 / validation.len() as f64
        };

        let artifact_path = artifact_dir.join(format!("issue-model-{model_version}.json"));
        artifact.save(&artifact_path)?;

        // Champion comparison
        let champion = self.current_champion().await?;
        let champion_accuracy = champion
            .as_ref()
            .and_then(|doc| doc["validation_accuracy"].as_f64());
        let promoted = match champion_accuracy {
            None => !validation.is_empty(),
            Some(current) => validation_accuracy >= current + self.promotion_margin,
        };

        self.store
            .set(
                VERSION_COLLECTION,
                &model_version,
                json!({
                    "model_version": model_version,
                    "artifact_path": artifact_path.to_string_lossy(),
                    "validation_accuracy": validation_accuracy,
                    "trained_on": train.len(),
                    "validated_on": validation.len(),
                    "champion": promoted,
                    "created_at": Utc::now().to_rfc3339(),
                }),
            )
            .await?;
        if promoted {
            if let Some(previous) = champion.as_ref().and_then(|d| d["model_version"].as_str()) {
                let previous = previous.to_string();
                self.store
                    .update(
                        VERSION_COLLECTION,
                        &previous,
                        Box::new(|doc| {
                            doc["champion"] = Value::Bool(false);
                            Ok(())
                        }),
                    )
                    .await?;
            }
            if let Some(handle) = handle {
                handle.swap(artifact.clone());
            }
        }

        // The run itself becomes knowledge for later analysis
        self.knowledge
            .add_entry(&KnowledgeEntry::new(
                KnowledgeFlavor::Effectiveness,
                format!("training run {model_version}"),
                json!({
                    "validation_accuracy": validation_accuracy,
                    "promoted": promoted,
                    "samples": records.len(),
                }),
            ))
            .await?;

        info!(
            model_version = %model_version,
            validation_accuracy,
            promoted,
            "training run complete"
        );
        Ok(TrainingReport {
            model_version,
            artifact_path,
            trained_on: train.len(),
            validated_on: validation.len(),
            validation_accuracy,
            champion_accuracy,
            promoted,
        })
    }

    async fn current_champion(&self) -> Result<Option<Value>> {
        let docs = self
            .store
            .query(
                VERSION_COLLECTION,
                &Criteria::new().eq("champion", true),
                Some(1),
            )
            .await?;
        Ok(docs.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{FeedbackKind, FeedbackRecord};
    use mend_store::MemoryDocumentStore;

    fn trainer(store: Arc<MemoryDocumentStore>) -> ModelTrainer {
        ModelTrainer::new(
            store.clone(),
            FeedbackCollector::new(store.clone(), 90),
            KnowledgeBase::new(store),
            0.01,
        )
    }

    async fn seed_feedback(store: &Arc<MemoryDocumentStore>, issue_type: &str, outcomes: &[bool]) {
        // Feedback is stored directly; the referenced action does not
        // matter for training
        for (i, &successful) in outcomes.iter().enumerate() {
            let mut record =
                FeedbackRecord::new(format!("a-{issue_type}"), FeedbackKind::Manual, successful);
            record
                .context
                .insert("issue_type".into(), json!(issue_type));
            record.feedback_id = format!("{issue_type}-{i:03}");
            store
                .set(
                    "healing_feedback",
                    &record.feedback_id,
                    serde_json::to_value(&record).unwrap(),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn first_run_becomes_champion() {
        let store = Arc::new(MemoryDocumentStore::new());
        seed_feedback(&store, "timeout", &[true, true, true, false]).await;
        let dir = tempfile::tempdir().unwrap();

        let report = trainer(store.clone())
            .train(30, dir.path(), None)
            .await
            .unwrap();
        assert_eq!(report.model_version, "v1");
        assert!(report.promoted);
        assert!(report.artifact_path.exists());

        let loaded = ModelArtifact::load(&report.artifact_path).unwrap();
        assert!(loaded.priors.contains_key("timeout"));
    }

    #[tokio::test]
    async fn promotion_requires_margin_over_champion() {
        let store = Arc::new(MemoryDocumentStore::new());
        seed_feedback(&store, "timeout", &[true, true, true, true]).await;
        let dir = tempfile::tempdir().unwrap();
        let t = trainer(store.clone());

        let first = t.train(30, dir.path(), None).await.unwrap();
        assert!(first.promoted);

        // Identical data cannot strictly improve on the champion
        let second = t.train(30, dir.path(), None).await.unwrap();
        assert_eq!(second.model_version, "v2");
        assert!(!second.promoted);
        assert_eq!(second.champion_accuracy, Some(first.validation_accuracy));
    }

    #[tokio::test]
    async fn promotion_swaps_the_live_handle() {
        let store = Arc::new(MemoryDocumentStore::new());
        seed_feedback(&store, "connectivity", &[true, true]).await;
        let dir = tempfile::tempdir().unwrap();
        let handle = ModelHandle::baseline();

        trainer(store).train(30, dir.path(), Some(&handle)).await.unwrap();
        assert_eq!(handle.get().model_version, "v1");
    }

    #[tokio::test]
    async fn empty_window_registers_but_never_promotes() {
        let store = Arc::new(MemoryDocumentStore::new());
        let dir = tempfile::tempdir().unwrap();
        let report = trainer(store).train(30, dir.path(), None).await.unwrap();
        assert_eq!(report.validated_on, 0);
        assert!(!report.promoted);
    }
}
