//! Issue classifier with local and remote prediction paths

use crate::features::{error_kind, extract_features};
use crate::issue::{IssueClassification, IssueDescriptor};
use crate::model::ModelHandle;
use mend_common::{ActionKind, HealingConfig, IssueCategory, Recoverability, Result, Severity};
use mend_store::ModelServer;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where predictions come from. Local mode combines the deterministic rule
/// engine with a model artifact loaded from disk; remote mode defers the
/// confidence call to an inference endpoint. Output shape is identical
/// across modes.
#[derive(Clone)]
pub enum PredictionMode {
    Local {
        model: ModelHandle,
    },
    Remote {
        server: Arc<dyn ModelServer>,
        endpoint: String,
    },
}

/// Maps failure signals to structured issue classifications
pub struct IssueClassifier {
    mode: PredictionMode,
    config: HealingConfig,
}

impl IssueClassifier {
    pub fn new(mode: PredictionMode, config: HealingConfig) -> Self {
        IssueClassifier { mode, config }
    }

    pub fn local(config: HealingConfig) -> Self {
        IssueClassifier::new(
            PredictionMode::Local {
                model: ModelHandle::baseline(),
            },
            config,
        )
    }

    /// Local mode with a model artifact loaded from disk
    pub fn local_from_artifact(path: &std::path::Path, config: HealingConfig) -> Result<Self> {
        let model = ModelHandle::new(crate::model::ModelArtifact::load(path)?);
        Ok(IssueClassifier::new(PredictionMode::Local { model }, config))
    }

    /// Swap in a new model artifact from disk. Remote mode has nothing to
    /// reload.
    pub fn reload_model(&self, path: &std::path::Path) -> Result<()> {
        match &self.mode {
            PredictionMode::Local { model } => model.reload_from(path),
            PredictionMode::Remote { .. } => Ok(()),
        }
    }

    /// Classify an issue descriptor.
    ///
    /// Classifications below the configured confidence threshold are
    /// downgraded to manual recoverability but still surfaced.
    pub async fn classify(&self, descriptor: &IssueDescriptor) -> Result<IssueClassification> {
        let issue_type = error_kind(&descriptor.error_message).to_string();
        let category = categorize(&issue_type);
        let features = extract_features(descriptor, category);

        let (issue_type, confidence) = match &self.mode {
            PredictionMode::Local { model } => {
                let snapshot = model.get();
                let keys: Vec<&str> = features.keys().map(String::as_str).collect();
                (issue_type.clone(), snapshot.confidence(&issue_type, &keys))
            }
            PredictionMode::Remote { server, endpoint } => {
                let prediction = server.predict(endpoint, &features).await?;
                let label = prediction
                    .predictions
                    .get("label")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or(issue_type.clone());
                (label, prediction.confidence)
            }
        };
        // Remote labels re-run categorization so both paths agree on shape
        let category = categorize(&issue_type);

        let mut recoverability = base_recoverability(&issue_type);
        if confidence < self.config.confidence_threshold
            && recoverability == Recoverability::AutoRecoverable
        {
            warn!(
                issue_type = %issue_type,
                confidence,
                threshold = self.config.confidence_threshold,
                "classification below confidence threshold, downgrading to manual"
            );
            recoverability = Recoverability::ManualRecoverable;
        }

        let classification = IssueClassification {
            issue_id: uuid::Uuid::new_v4().to_string(),
            category,
            severity: severity_for(&issue_type),
            description: describe(&issue_type, descriptor),
            recommended_action: action_for(&issue_type),
            confidence,
            recoverability,
            issue_type,
            features,
            extensions: Default::default(),
        };
        debug!(
            issue_id = %classification.issue_id,
            issue_type = %classification.issue_type,
            category = %classification.category,
            confidence = classification.confidence,
            "classified issue"
        );
        Ok(classification)
    }
}

fn categorize(issue_type: &str) -> IssueCategory {
    match issue_type {
        "schema_mismatch" | "missing_values" | "duplicates" | "outliers" | "type_mismatch" => {
            IssueCategory::DataQuality
        }
        "out_of_memory" | "quota_exceeded" => IssueCategory::Resource,
        "permission_denied" => IssueCategory::System,
        _ => IssueCategory::Pipeline,
    }
}

fn severity_for(issue_type: &str) -> Severity {
    match issue_type {
        "permission_denied" => Severity::High,
        "outliers" => Severity::Low,
        _ => Severity::Medium,
    }
}

fn action_for(issue_type: &str) -> ActionKind {
    match issue_type {
        "schema_mismatch" => ActionKind::SchemaEvolution,
        "missing_values" | "duplicates" | "outliers" | "type_mismatch" => ActionKind::DataCorrection,
        "timeout" => ActionKind::ParameterAdjustment,
        "out_of_memory" | "quota_exceeded" => ActionKind::ResourceScaling,
        "connectivity" => ActionKind::PipelineRetry,
        "dependency_failure" => ActionKind::DependencyResolution,
        _ => ActionKind::PipelineRetry,
    }
}

fn base_recoverability(issue_type: &str) -> Recoverability {
    match issue_type {
        "permission_denied" => Recoverability::ManualRecoverable,
        "unknown" => Recoverability::ManualRecoverable,
        _ => Recoverability::AutoRecoverable,
    }
}

fn describe(issue_type: &str, descriptor: &IssueDescriptor) -> String {
    match (&descriptor.dataset, &descriptor.table) {
        (Some(dataset), Some(table)) => format!(
            "{issue_type} in {}.{} ({}): {}",
            dataset, table, descriptor.component, descriptor.error_message
        ),
        _ => format!(
            "{issue_type} in {}: {}",
            descriptor.component, descriptor.error_message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_store::StaticModelServer;

    fn config() -> HealingConfig {
        HealingConfig::default()
    }

    #[tokio::test]
    async fn local_mode_classifies_schema_issue() {
        let classifier = IssueClassifier::local(config());
        let descriptor = IssueDescriptor::new("schema mismatch on column amount", "load_task")
            .with_dataset("analytics", "orders");
        let c = classifier.classify(&descriptor).await.unwrap();
        assert_eq!(c.issue_type, "schema_mismatch");
        assert_eq!(c.category, IssueCategory::DataQuality);
        assert_eq!(c.recommended_action, ActionKind::SchemaEvolution);
        assert!(c.is_self_healable());
        assert!(c.confidence > 0.85);
    }

    #[tokio::test]
    async fn low_confidence_downgrades_to_manual_but_surfaces() {
        let classifier = IssueClassifier::local(config());
        let descriptor = IssueDescriptor::new("anomalous row distribution", "validate");
        let c = classifier.classify(&descriptor).await.unwrap();
        assert_eq!(c.issue_type, "outliers");
        assert!(c.confidence < config().confidence_threshold);
        assert_eq!(c.recoverability, Recoverability::ManualRecoverable);
    }

    #[tokio::test]
    async fn remote_mode_shares_the_output_shape() {
        let server = Arc::new(StaticModelServer::with_label("timeout", 0.91));
        let classifier = IssueClassifier::new(
            PredictionMode::Remote {
                server,
                endpoint: "projects/p/models/issue-classifier".into(),
            },
            config(),
        );
        let descriptor = IssueDescriptor::new("worker died", "transform");
        let c = classifier.classify(&descriptor).await.unwrap();
        assert_eq!(c.issue_type, "timeout");
        assert_eq!(c.category, IssueCategory::Pipeline);
        assert_eq!(c.confidence, 0.91);
        assert_eq!(c.recommended_action, ActionKind::ParameterAdjustment);
    }

    #[tokio::test]
    async fn artifact_from_disk_drives_local_confidence() {
        use crate::model::ModelArtifact;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issue-model.json");
        let mut artifact = ModelArtifact::baseline();
        artifact.priors.insert("timeout".into(), 0.99);
        artifact.save(&path).unwrap();

        let classifier = IssueClassifier::local_from_artifact(&path, config()).unwrap();
        let c = classifier
            .classify(&IssueDescriptor::new("job timed out", "transform"))
            .await
            .unwrap();
        assert_eq!(c.confidence, 0.99);
    }

    #[tokio::test]
    async fn permission_issues_always_require_a_human() {
        let classifier = IssueClassifier::local(config());
        let descriptor = IssueDescriptor::new("permission denied for table orders", "load");
        let c = classifier.classify(&descriptor).await.unwrap();
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.recoverability, Recoverability::ManualRecoverable);
    }
}
