//! Correction engines for the mend pipeline core
//!
//! Three sibling engines share one contract: given the original state, the
//! issue classification and the root-cause analysis, produce a staged
//! correction without mutating the original. The recovery orchestrator
//! picks the engine and records the outcome.

pub mod data_corrector;
pub mod pipeline_adjuster;
pub mod resource_optimizer;

pub use data_corrector::DataCorrector;
pub use pipeline_adjuster::PipelineAdjuster;
pub use resource_optimizer::ResourceOptimizer;

use async_trait::async_trait;
use mend_common::{IssueCategory, Result};
use mend_diagnosis::{IssueClassification, RootCauseAnalysis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Everything an engine needs for one correction attempt
pub struct CorrectionContext<'a> {
    pub original_state: &'a Value,
    pub issue: &'a IssueClassification,
    pub root_cause: &'a RootCauseAnalysis,
    /// Historical success rate of the selected action, when known
    pub action_success_rate: Option<f64>,
}

/// Outcome of one correction attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub correction_id: String,
    pub strategy: String,
    pub original_state: Value,
    pub corrected_state: Value,
    pub confidence: f64,
    pub successful: bool,
    pub metadata: HashMap<String, Value>,
}

impl CorrectionResult {
    pub fn new(strategy: impl Into<String>, original_state: Value, corrected_state: Value) -> Self {
        CorrectionResult {
            correction_id: uuid::Uuid::new_v4().to_string(),
            strategy: strategy.into(),
            original_state,
            corrected_state,
            confidence: 0.0,
            successful: false,
            metadata: HashMap::new(),
        }
    }
}

/// Common engine contract
#[async_trait]
pub trait CorrectionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this engine handles issues of the given category
    fn handles(&self, category: IssueCategory) -> bool;

    /// Apply a correction. Engines never mutate the original state; data
    /// corrections land in a fresh staged artifact referencing it.
    async fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<CorrectionResult>;
}

/// Engine confidence: base strategy prior × historical action success rate
/// × classification confidence, clamped to [0, 1]. An action with no
/// history contributes no penalty.
pub fn compose_confidence(
    strategy_prior: f64,
    action_success_rate: Option<f64>,
    classification_confidence: f64,
) -> f64 {
    (strategy_prior * action_success_rate.unwrap_or(1.0) * classification_confidence)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_composes_multiplicatively() {
        let c = compose_confidence(0.9, Some(0.8), 0.9);
        assert!((c - 0.648).abs() < 1e-9);
    }

    #[test]
    fn missing_history_is_neutral() {
        assert_eq!(compose_confidence(0.9, None, 1.0), 0.9);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(compose_confidence(2.0, Some(1.0), 1.0), 1.0);
    }
}
