//! Operator hooks invoked by the workflow orchestrator
//!
//! These are the inbound seams an external scheduler drives: validate a
//! dataset against quality rules, heal a failed validation, adjust a
//! failing pipeline's configuration, or run full recovery for an issue.

use crate::orchestrator::{RecoveryOrchestrator, RecoveryOutcome};
use mend_common::{Error, Result};
use mend_diagnosis::IssueDescriptor;
use mend_lineage::LineageTracker;
use mend_metadata::{MetadataTracker, QualityEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A declarative data quality rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum QualityRule {
    NotNull { column: String },
    Unique { column: String },
    Range { column: String, min: f64, max: f64 },
    MinRowCount { count: usize },
}

impl QualityRule {
    fn name(&self) -> String {
        match self {
            QualityRule::NotNull { column } => format!("not_null:{column}"),
            QualityRule::Unique { column } => format!("unique:{column}"),
            QualityRule::Range { column, .. } => format!("range:{column}"),
            QualityRule::MinRowCount { count } => format!("min_row_count:{count}"),
        }
    }

    fn evaluate(&self, rows: &[Value]) -> bool {
        match self {
            QualityRule::NotNull { column } => {
                rows.iter().all(|r| !r[column.as_str()].is_null())
            }
            QualityRule::Unique { column } => {
                let mut seen = HashSet::new();
                rows.iter()
                    .all(|r| seen.insert(r[column.as_str()].to_string()))
            }
            QualityRule::Range { column, min, max } => rows.iter().all(|r| {
                r[column.as_str()]
                    .as_f64()
                    .map_or(true, |v| v >= *min && v <= *max)
            }),
            QualityRule::MinRowCount { count } => rows.len() >= *count,
        }
    }
}

/// Result handed back to the workflow orchestrator's validation task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validation_id: String,
    pub dataset: String,
    pub table: String,
    pub passed: bool,
    pub quality_score: f64,
    pub rules_evaluated: usize,
    pub rules_failed: usize,
    pub failed_rules: Vec<String>,
}

/// The operator surface wired into external workflow tasks
pub struct PipelineOperators {
    orchestrator: Arc<RecoveryOrchestrator>,
    metadata: Arc<MetadataTracker>,
    lineage: Arc<LineageTracker>,
}

impl PipelineOperators {
    pub fn new(
        orchestrator: Arc<RecoveryOrchestrator>,
        metadata: Arc<MetadataTracker>,
        lineage: Arc<LineageTracker>,
    ) -> Self {
        PipelineOperators {
            orchestrator,
            metadata,
            lineage,
        }
    }

    /// Validate rows against the rules file; records a quality event and a
    /// validation lineage edge either way.
    pub async fn validate(
        &self,
        dataset: &str,
        table: &str,
        rules_path: &Path,
        quality_threshold: f64,
        execution_id: &str,
        rows: &[Value],
    ) -> Result<ValidationResult> {
        let bytes = std::fs::read(rules_path)
            .map_err(|e| Error::Configuration(format!("cannot read rules file: {e}")))?;
        let rules: Vec<QualityRule> = serde_json::from_slice(&bytes)?;
        if rules.is_empty() {
            return Err(Error::Configuration(format!(
                "rules file {} defines no rules",
                rules_path.display()
            )));
        }

        let failed_rules: Vec<String> = rules
            .iter()
            .filter(|r| !r.evaluate(rows))
            .map(QualityRule::name)
            .collect();
        let quality_score = 1.0 - failed_rules.len() as f64 / rules.len() as f64;
        let result = ValidationResult {
            validation_id: uuid::Uuid::new_v4().to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
            passed: quality_score >= quality_threshold,
            quality_score,
            rules_evaluated: rules.len(),
            rules_failed: failed_rules.len(),
            failed_rules,
        };

        self.metadata
            .track_data_quality_metadata(&QualityEvent {
                validation_id: result.validation_id.clone(),
                execution_id: execution_id.to_string(),
                dataset: dataset.to_string(),
                table: table.to_string(),
                rules_evaluated: result.rules_evaluated as u64,
                rules_failed: result.rules_failed as u64,
                quality_score: result.quality_score,
                details: json!({"failed_rules": result.failed_rules}),
            })
            .await?;
        self.lineage
            .record_validation(
                dataset,
                table,
                &result.validation_id,
                json!({
                    "execution_id": execution_id,
                    "quality_score": result.quality_score,
                    "passed": result.passed,
                }),
            )
            .await?;
        debug!(
            validation_id = %result.validation_id,
            score = result.quality_score,
            passed = result.passed,
            "validation evaluated"
        );
        Ok(result)
    }

    /// Heal a failed validation: builds the issue from the validation
    /// outcome and runs recovery against the offending rows.
    pub async fn heal_data_quality(
        &self,
        validation: &ValidationResult,
        pipeline_id: &str,
        execution_id: &str,
        rows: Vec<Value>,
    ) -> Result<RecoveryOutcome> {
        if validation.passed {
            return Err(Error::Validation(format!(
                "validation {} passed; nothing to heal",
                validation.validation_id
            )));
        }
        let failed = validation.failed_rules.join(", ");
        let message = if failed.contains("not_null") {
            format!("missing values violate rules: {failed}")
        } else if failed.contains("unique") {
            format!("duplicate rows violate rules: {failed}")
        } else {
            format!("data quality rules failed: {failed}")
        };
        let mut descriptor = IssueDescriptor::new(message, "data_validation")
            .with_dataset(&validation.dataset, &validation.table)
            .with_execution(pipeline_id, execution_id)
            .with_metric("quality_score", validation.quality_score);
        if let Some(rule) = validation.failed_rules.first() {
            if let Some(column) = rule.split(':').nth(1) {
                descriptor = descriptor.with_metric("column", column);
            }
        }
        info!(
            validation_id = %validation.validation_id,
            "triggering data-quality healing"
        );
        self.orchestrator
            .heal(&descriptor, json!({"rows": rows, "validation_id": validation.validation_id}))
            .await
    }

    /// Heal a failing pipeline by adjusting its configuration. The issue is
    /// built from the execution's recorded error details.
    pub async fn adjust_pipeline(
        &self,
        pipeline_id: &str,
        execution_id: &str,
        pipeline_config: Value,
    ) -> Result<RecoveryOutcome> {
        let execution = self
            .metadata
            .get_execution_metadata(execution_id, false, false, false)
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id}")))?;
        let error_message = execution["execution"]["error_details"]["message"]
            .as_str()
            .unwrap_or("pipeline execution failed")
            .to_string();

        let descriptor = IssueDescriptor::new(error_message, pipeline_id)
            .with_execution(pipeline_id, execution_id);
        self.orchestrator.heal(&descriptor, pipeline_config).await
    }

    /// Full recovery for an arbitrary issue descriptor with caller context
    pub async fn orchestrate_recovery(
        &self,
        descriptor: &IssueDescriptor,
        context: Value,
    ) -> Result<RecoveryOutcome> {
        self.orchestrator.heal(descriptor, context).await
    }
}
