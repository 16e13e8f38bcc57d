//! Local model artifacts with atomic reload

use mend_common::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A versioned model artifact loaded from disk.
///
/// The artifact refines the rule engine: per issue type it carries a weight
/// table over feature tokens plus a confidence prior. The shape is plain
/// JSON so trainer runs can write new versions without this crate changing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_version: String,
    /// issue type -> confidence prior in [0, 1]
    pub priors: HashMap<String, f64>,
    /// issue type -> feature token -> additive weight
    #[serde(default)]
    pub weights: HashMap<String, HashMap<String, f64>>,
    /// Confidence used when no prior is known for an issue type
    pub default_confidence: f64,
}

impl ModelArtifact {
    /// Built-in fallback artifact used before any trained model lands
    pub fn baseline() -> Self {
        let mut priors = HashMap::new();
        for (issue_type, prior) in [
            ("schema_mismatch", 0.92),
            ("missing_values", 0.90),
            ("duplicates", 0.88),
            ("outliers", 0.80),
            ("type_mismatch", 0.90),
            ("timeout", 0.88),
            ("out_of_memory", 0.90),
            ("quota_exceeded", 0.93),
            ("permission_denied", 0.95),
            ("connectivity", 0.87),
            ("dependency_failure", 0.85),
        ] {
            priors.insert(issue_type.to_string(), prior);
        }
        ModelArtifact {
            model_version: "baseline".to_string(),
            priors,
            weights: HashMap::new(),
            default_confidence: 0.5,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Configuration(format!("cannot read model artifact: {e}")))?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
        Ok(artifact)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)
            .map_err(|e| Error::Configuration(format!("cannot write model artifact: {e}")))?;
        Ok(())
    }

    /// Confidence for an issue type given the feature tokens present
    pub fn confidence(&self, issue_type: &str, feature_keys: &[&str]) -> f64 {
        let mut confidence = self
            .priors
            .get(issue_type)
            .copied()
            .unwrap_or(self.default_confidence);
        if let Some(weights) = self.weights.get(issue_type) {
            for key in feature_keys {
                if let Some(w) = weights.get(*key) {
                    confidence += w;
                }
            }
        }
        confidence.clamp(0.0, 1.0)
    }
}

/// Shared-read, single-writer handle to the current model.
///
/// Readers clone the inner `Arc` under a short lock, so an in-flight
/// inference keeps the artifact it started with and a reload can never
/// tear it.
#[derive(Clone)]
pub struct ModelHandle {
    current: Arc<RwLock<Arc<ModelArtifact>>>,
}

impl ModelHandle {
    pub fn new(artifact: ModelArtifact) -> Self {
        ModelHandle {
            current: Arc::new(RwLock::new(Arc::new(artifact))),
        }
    }

    pub fn baseline() -> Self {
        ModelHandle::new(ModelArtifact::baseline())
    }

    /// Snapshot of the current artifact
    pub fn get(&self) -> Arc<ModelArtifact> {
        self.current.read().clone()
    }

    /// Atomically swap in a new artifact
    pub fn swap(&self, artifact: ModelArtifact) {
        let version = artifact.model_version.clone();
        *self.current.write() = Arc::new(artifact);
        info!(model_version = %version, "model artifact swapped");
    }

    /// Reload the artifact from disk and swap it in
    pub fn reload_from(&self, path: &Path) -> Result<()> {
        self.swap(ModelArtifact::load(path)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_knows_common_issue_types() {
        let model = ModelArtifact::baseline();
        assert!(model.confidence("schema_mismatch", &[]) > 0.9);
        assert_eq!(model.confidence("never_seen", &[]), 0.5);
    }

    #[test]
    fn weights_adjust_confidence_within_bounds() {
        let mut model = ModelArtifact::baseline();
        model
            .weights
            .entry("timeout".into())
            .or_default()
            .insert("token:memory".into(), 0.5);
        assert_eq!(model.confidence("timeout", &["token:memory"]), 1.0);
    }

    #[test]
    fn artifact_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let model = ModelArtifact::baseline();
        model.save(&path).unwrap();

        let handle = ModelHandle::new(ModelArtifact {
            model_version: "old".into(),
            priors: HashMap::new(),
            weights: HashMap::new(),
            default_confidence: 0.1,
        });
        handle.reload_from(&path).unwrap();
        assert_eq!(handle.get().model_version, "baseline");
    }

    #[test]
    fn swap_does_not_disturb_existing_snapshots() {
        let handle = ModelHandle::baseline();
        let snapshot = handle.get();
        handle.swap(ModelArtifact {
            model_version: "v2".into(),
            priors: HashMap::new(),
            weights: HashMap::new(),
            default_confidence: 0.2,
        });
        assert_eq!(snapshot.model_version, "baseline");
        assert_eq!(handle.get().model_version, "v2");
    }
}
