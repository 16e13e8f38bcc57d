//! Issue descriptors and classifications

use chrono::{DateTime, Utc};
use mend_common::{ActionKind, IssueCategory, Recoverability, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A structured failure signal handed to the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDescriptor {
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Component the failure was observed in (task kind, service name)
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// Resource/metric snapshot at failure time
    #[serde(default)]
    pub metrics: HashMap<String, Value>,
    pub observed_at: DateTime<Utc>,
}

impl IssueDescriptor {
    pub fn new(error_message: impl Into<String>, component: impl Into<String>) -> Self {
        IssueDescriptor {
            error_message: error_message.into(),
            stack_trace: None,
            component: component.into(),
            dataset: None,
            table: None,
            pipeline_id: None,
            execution_id: None,
            metrics: HashMap::new(),
            observed_at: Utc::now(),
        }
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self.table = Some(table.into());
        self
    }

    pub fn with_execution(
        mut self,
        pipeline_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    /// Stable signature for duplicate-healing detection: the issue's
    /// component and normalized error head
    pub fn signature(&self) -> String {
        let head: String = self
            .error_message
            .chars()
            .take(120)
            .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("{}:{}", self.component, head)
    }
}

/// Structured classification of an issue. Consumers match on the enum
/// tags; forward-compatible additions ride in `extensions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueClassification {
    pub issue_id: String,
    pub category: IssueCategory,
    pub severity: Severity,
    pub issue_type: String,
    pub description: String,
    pub recommended_action: ActionKind,
    pub confidence: f64,
    pub recoverability: Recoverability,
    /// Feature vector used for pattern matching
    pub features: HashMap<String, Value>,
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
}

impl IssueClassification {
    pub fn is_self_healable(&self) -> bool {
        self.recoverability == Recoverability::AutoRecoverable
    }
}
