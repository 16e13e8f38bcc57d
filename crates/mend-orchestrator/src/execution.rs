//! Healing execution records

use chrono::{DateTime, Utc};
use mend_common::{Error, HealingStatus, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One attempt to apply a healing action, auditable end to end.
///
/// The status walks the healing state machine; terminal transitions set
/// `completion_time` and propagate the outcome to the owning action and
/// pattern counters in the same commit sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingExecution {
    pub healing_id: String,
    /// Pipeline execution being healed
    pub execution_id: String,
    pub pipeline_id: String,
    pub pattern_id: String,
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_id: Option<String>,
    pub status: HealingStatus,
    /// Classifier confidence at selection time
    pub confidence: f64,
    /// Stable issue signature used for duplicate and attempt accounting
    pub issue_signature: String,
    pub issue_details: Value,
    pub execution_details: Value,
    pub metrics: HashMap<String, Value>,
    pub execution_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

impl HealingExecution {
    pub fn new(
        execution_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        pattern_id: impl Into<String>,
        action_id: impl Into<String>,
        issue_signature: impl Into<String>,
        confidence: f64,
    ) -> Self {
        HealingExecution {
            healing_id: uuid::Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            pipeline_id: pipeline_id.into(),
            pattern_id: pattern_id.into(),
            action_id: action_id.into(),
            validation_id: None,
            status: HealingStatus::Pending,
            confidence,
            issue_signature: issue_signature.into(),
            issue_details: Value::Null,
            execution_details: Value::Null,
            metrics: HashMap::new(),
            execution_time: Utc::now(),
            completion_time: None,
        }
    }

    /// Validate and apply a state transition
    pub fn transition(&mut self, next: HealingStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition(format!(
                "healing {} cannot move {} -> {next}",
                self.healing_id, self.status
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.completion_time = Some(Utc::now());
        }
        Ok(())
    }
}
