//! Typed metadata records and their collection routing

use chrono::{DateTime, Utc};
use mend_common::{ExecutionStatus, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Kinds of tracked metadata records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    SourceSystem,
    PipelineDefinition,
    PipelineExecution,
    TaskExecution,
    SchemaMetadata,
    QualityMetadata,
    HealingMetadata,
}

impl RecordType {
    /// Document-store collection for this record type
    pub fn collection(&self) -> &'static str {
        match self {
            RecordType::SourceSystem => "source_systems",
            RecordType::PipelineDefinition => "pipeline_definitions",
            RecordType::PipelineExecution => "pipeline_executions",
            RecordType::TaskExecution => "task_executions",
            RecordType::SchemaMetadata => "schema_metadata",
            RecordType::QualityMetadata => "quality_metadata",
            RecordType::HealingMetadata => "healing_metadata",
        }
    }

    pub const ALL: [RecordType; 7] = [
        RecordType::SourceSystem,
        RecordType::PipelineDefinition,
        RecordType::PipelineExecution,
        RecordType::TaskExecution,
        RecordType::SchemaMetadata,
        RecordType::QualityMetadata,
        RecordType::HealingMetadata,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RecordType::SourceSystem => "source_system",
            RecordType::PipelineDefinition => "pipeline_definition",
            RecordType::PipelineExecution => "pipeline_execution",
            RecordType::TaskExecution => "task_execution",
            RecordType::SchemaMetadata => "schema_metadata",
            RecordType::QualityMetadata => "quality_metadata",
            RecordType::HealingMetadata => "healing_metadata",
        }
    }
}

/// A registered logical data origin. Never hard-deleted; retirement is a
/// flag flip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSystem {
    pub source_id: String,
    pub name: String,
    pub kind: SourceKind,
    /// Connection details; sensitive values are masked before persistence
    pub connection_details: Value,
    pub schema_version: Option<String>,
    #[serde(default)]
    pub retired: bool,
}

/// A named transformation from a source to a target dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub pipeline_id: String,
    pub name: String,
    pub source_id: String,
    pub target_dataset: String,
    pub target_table: String,
    pub dag_id: String,
    pub config: Value,
}

/// One run of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub execution_id: String,
    pub pipeline_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub parameters: HashMap<String, Value>,
    pub metrics: HashMap<String, Value>,
    pub error_details: Option<Value>,
}

impl PipelineExecution {
    pub fn started(execution_id: impl Into<String>, pipeline_id: impl Into<String>) -> Self {
        PipelineExecution {
            execution_id: execution_id.into(),
            pipeline_id: pipeline_id.into(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: None,
            parameters: HashMap::new(),
            metrics: HashMap::new(),
            error_details: None,
        }
    }
}

/// One step within a pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Unique within its execution
    pub task_id: String,
    pub execution_id: String,
    pub task_kind: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub parameters: HashMap<String, Value>,
    pub metrics: HashMap<String, Value>,
    pub error_details: Option<Value>,
}

/// A data quality observation tied to an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityEvent {
    pub validation_id: String,
    pub execution_id: String,
    pub dataset: String,
    pub table: String,
    pub rules_evaluated: u64,
    pub rules_failed: u64,
    pub quality_score: f64,
    pub details: Value,
}

/// Derive a pipeline status from its task statuses: SUCCESS only when every
/// task succeeded, FAILED when any task failed, HEALING while any task is
/// being healed.
pub fn derive_pipeline_status(task_statuses: &[ExecutionStatus]) -> ExecutionStatus {
    if task_statuses.is_empty() {
        return ExecutionStatus::Pending;
    }
    if task_statuses.iter().any(|s| *s == ExecutionStatus::Healing) {
        return ExecutionStatus::Healing;
    }
    if task_statuses.iter().any(|s| *s == ExecutionStatus::Failed) {
        return ExecutionStatus::Failed;
    }
    if task_statuses.iter().all(|s| *s == ExecutionStatus::Success) {
        return ExecutionStatus::Success;
    }
    ExecutionStatus::Running
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_status_derivation() {
        use ExecutionStatus::*;
        assert_eq!(derive_pipeline_status(&[]), Pending);
        assert_eq!(derive_pipeline_status(&[Success, Success]), Success);
        assert_eq!(derive_pipeline_status(&[Success, Failed]), Failed);
        assert_eq!(derive_pipeline_status(&[Success, Healing]), Healing);
        assert_eq!(derive_pipeline_status(&[Success, Running]), Running);
    }

    #[test]
    fn record_types_route_to_distinct_collections() {
        let mut seen = std::collections::HashSet::new();
        for rt in RecordType::ALL {
            assert!(seen.insert(rt.collection()));
        }
    }
}
