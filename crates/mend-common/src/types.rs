//! Common types shared across the mend pipeline core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for pipelines
pub type PipelineId = String;

/// Unique identifier for pipeline executions
pub type ExecutionId = String;

/// Unique identifier for issue patterns
pub type PatternId = String;

/// Unique identifier for healing actions
pub type ActionId = String;

/// Unique identifier for healing executions
pub type HealingId = String;

/// Unique identifier for validations
pub type ValidationId = String;

/// Status of a pipeline or task execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Healing,
}

impl ExecutionStatus {
    /// Terminal statuses admit no further transitions except manual reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Healing => "HEALING",
        };
        f.write_str(s)
    }
}

/// Status of a healing execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealingStatus {
    Pending,
    InProgress,
    ApprovalRequired,
    Approved,
    Rejected,
    Success,
    Failed,
}

impl HealingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HealingStatus::Success | HealingStatus::Failed | HealingStatus::Rejected
        )
    }

    /// Legal transitions of the healing state machine
    pub fn can_transition_to(&self, next: HealingStatus) -> bool {
        use HealingStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, ApprovalRequired)
                | (InProgress, Success)
                | (InProgress, Failed)
                | (ApprovalRequired, Approved)
                | (ApprovalRequired, Rejected)
                | (Approved, InProgress)
        )
    }
}

impl fmt::Display for HealingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealingStatus::Pending => "PENDING",
            HealingStatus::InProgress => "IN_PROGRESS",
            HealingStatus::ApprovalRequired => "APPROVAL_REQUIRED",
            HealingStatus::Approved => "APPROVED",
            HealingStatus::Rejected => "REJECTED",
            HealingStatus::Success => "SUCCESS",
            HealingStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// High-level category of a diagnosed issue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    DataQuality,
    Pipeline,
    System,
    Resource,
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueCategory::DataQuality => "data_quality",
            IssueCategory::Pipeline => "pipeline",
            IssueCategory::System => "system",
            IssueCategory::Resource => "resource",
        };
        f.write_str(s)
    }
}

/// Kinds of parameterized remediation actions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DataCorrection,
    PipelineRetry,
    ParameterAdjustment,
    ResourceScaling,
    SchemaEvolution,
    DependencyResolution,
}

/// Alert severity used for error classification and visibility rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// How a failure of a given severity surfaces to humans
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Logged and counted, never alerted
    LogOnly,
    /// Alerted only when the aggregate rate exceeds its threshold
    AggregateAlert,
    /// Alerted per incident
    IncidentAlert,
    /// Pages the on-call
    Page,
}

impl Severity {
    /// Raise severity by one level, saturating at Critical
    pub fn bump(self) -> Severity {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High => Severity::Critical,
            Severity::Critical => Severity::Critical,
        }
    }

    pub fn visibility(self) -> Visibility {
        match self {
            Severity::Low => Visibility::LogOnly,
            Severity::Medium => Visibility::AggregateAlert,
            Severity::High => Visibility::IncidentAlert,
            Severity::Critical => Visibility::Page,
        }
    }
}

/// Kind of a registered data source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    ObjectStore,
    RelationalDb,
    Api,
    Streaming,
    Custom(String),
}

/// A learned template of recurring issues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePattern {
    pub pattern_id: PatternId,
    pub name: String,
    pub category: IssueCategory,
    /// Feature vector used for similarity matching
    pub features: HashMap<String, serde_json::Value>,
    /// Similarity threshold in [0, 1] an issue must meet to match
    pub confidence_threshold: f64,
    pub occurrence_count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub last_seen: DateTime<Utc>,
}

impl IssuePattern {
    pub fn new(name: impl Into<String>, category: IssueCategory) -> Self {
        IssuePattern {
            pattern_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            category,
            features: HashMap::new(),
            confidence_threshold: 0.7,
            occurrence_count: 0,
            success_count: 0,
            success_rate: 0.0,
            last_seen: Utc::now(),
        }
    }

    /// Record one more occurrence and recompute the success rate
    pub fn record_outcome(&mut self, healing_success: bool) {
        self.occurrence_count += 1;
        if healing_success {
            self.success_count += 1;
        }
        self.success_rate = self.success_count as f64 / self.occurrence_count as f64;
        self.last_seen = Utc::now();
    }
}

/// A specific, parameterized remediation recipe owned by a pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAction {
    pub action_id: ActionId,
    pub kind: ActionKind,
    pub parameters: HashMap<String, serde_json::Value>,
    pub pattern_id: PatternId,
    pub execution_count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub active: bool,
}

impl HealingAction {
    pub fn new(kind: ActionKind, pattern_id: PatternId) -> Self {
        HealingAction {
            action_id: uuid::Uuid::new_v4().to_string(),
            kind,
            parameters: HashMap::new(),
            pattern_id,
            execution_count: 0,
            success_count: 0,
            success_rate: 0.0,
            active: true,
        }
    }

    /// Record one more execution and recompute the success rate
    pub fn record_outcome(&mut self, success: bool) {
        self.execution_count += 1;
        if success {
            self.success_count += 1;
        }
        self.success_rate = self.success_count as f64 / self.execution_count as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healing_status_transitions() {
        use HealingStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(ApprovalRequired));
        assert!(ApprovalRequired.can_transition_to(Approved));
        assert!(Approved.can_transition_to(InProgress));
        assert!(!Success.can_transition_to(Failed));
        assert!(!Rejected.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Success));
    }

    #[test]
    fn pattern_success_rate_recomputed() {
        let mut p = IssuePattern::new("schema drift", IssueCategory::DataQuality);
        p.record_outcome(true);
        p.record_outcome(false);
        p.record_outcome(true);
        assert_eq!(p.occurrence_count, 3);
        assert_eq!(p.success_count, 2);
        assert!((p.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn severity_bump_saturates() {
        assert_eq!(Severity::Low.bump(), Severity::Medium);
        assert_eq!(Severity::Critical.bump(), Severity::Critical);
    }

    #[test]
    fn visibility_escalates_with_severity() {
        assert_eq!(Severity::Low.visibility(), Visibility::LogOnly);
        assert_eq!(Severity::Medium.visibility(), Visibility::AggregateAlert);
        assert_eq!(Severity::High.visibility(), Visibility::IncidentAlert);
        assert_eq!(Severity::Critical.visibility(), Visibility::Page);
    }
}
