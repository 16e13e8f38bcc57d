//! Pipeline adjustment engine for execution failures

use crate::{compose_confidence, CorrectionContext, CorrectionEngine, CorrectionResult};
use async_trait::async_trait;
use mend_common::{Error, IssueCategory, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

const TIMEOUT_FACTOR: f64 = 2.0;
const MAX_TIMEOUT_SECONDS: f64 = 3600.0;
const MEMORY_FACTOR: f64 = 1.5;
const CPU_FACTOR: f64 = 1.5;
const MAX_MEMORY_MB: f64 = 65536.0;
const MAX_CPU_CORES: f64 = 64.0;
const RETRY_INITIAL_SECONDS: u64 = 60;
const RETRY_BACKOFF_FACTOR: f64 = 2.0;
const RETRY_MAX_DELAY_SECONDS: u64 = 3600;
const MIN_BATCH_SIZE: u64 = 1;
const MAX_PARALLELISM: u64 = 32;

/// Config fields an adjustment must never touch
const CRITICAL_FIELDS: [&str; 4] = ["pipeline_id", "source_id", "target_dataset", "target_table"];

/// Adjusts pipeline configuration in response to execution failures.
/// Every strategy is validated: the adjusted config must differ from the
/// original only in the strategy's own fields and must preserve the
/// critical identity fields.
pub struct PipelineAdjuster;

impl PipelineAdjuster {
    pub fn new() -> Self {
        PipelineAdjuster
    }

    fn pick_strategy(issue_type: &str, config: &Value) -> (&'static str, f64) {
        match issue_type {
            "timeout" => {
                // Prefer raising the timeout until the cap, then reshape
                let current = config["timeout_seconds"].as_f64().unwrap_or(300.0);
                if current * TIMEOUT_FACTOR <= MAX_TIMEOUT_SECONDS {
                    ("increase_timeout", 0.9)
                } else {
                    ("optimize_execution", 0.75)
                }
            }
            "out_of_memory" | "quota_exceeded" => ("increase_resources", 0.85),
            "connectivity" => ("retry_with_backoff", 0.85),
            "dependency_failure" => {
                if config["dependencies"]
                    .as_array()
                    .is_some_and(|deps| deps.iter().any(|d| d["critical"] == false))
                {
                    ("skip_dependency", 0.7)
                } else {
                    ("retry_with_backoff", 0.85)
                }
            }
            "configuration" | "unknown" => ("use_default_config", 0.6),
            _ => ("fix_configuration", 0.7),
        }
    }
}

impl Default for PipelineAdjuster {
    fn default() -> Self {
        PipelineAdjuster::new()
    }
}

#[async_trait]
impl CorrectionEngine for PipelineAdjuster {
    fn name(&self) -> &'static str {
        "pipeline_adjuster"
    }

    fn handles(&self, category: IssueCategory) -> bool {
        matches!(category, IssueCategory::Pipeline | IssueCategory::Resource)
    }

    async fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<CorrectionResult> {
        let config = ctx.original_state;
        if !config.is_object() {
            return Err(Error::Configuration(
                "pipeline adjustment needs a config object".to_string(),
            ));
        }
        let (strategy, prior) = Self::pick_strategy(&ctx.issue.issue_type, config);
        debug!(strategy, issue_type = %ctx.issue.issue_type, "adjusting pipeline config");

        let adjusted = match strategy {
            "increase_timeout" => increase_timeout(config),
            "optimize_execution" => optimize_execution(config),
            "increase_resources" => increase_resources(config),
            "optimize_resource_usage" => optimize_resource_usage(config),
            "retry_with_backoff" => retry_with_backoff(config),
            "skip_dependency" => skip_dependency(config)?,
            "use_default_config" => use_default_config(config, &ctx.issue.features),
            _ => fix_configuration(config, ctx),
        };

        validate_adjustment(config, &adjusted, strategy)?;

        let mut result = CorrectionResult::new(strategy, config.clone(), adjusted);
        result.confidence = compose_confidence(prior, ctx.action_success_rate, ctx.issue.confidence);
        result.successful = true;
        result
            .metadata
            .insert("issue_type".into(), json!(ctx.issue.issue_type));
        info!(
            correction_id = %result.correction_id,
            strategy,
            confidence = result.confidence,
            "pipeline adjustment prepared"
        );
        Ok(result)
    }
}

fn increase_timeout(config: &Value) -> Value {
    let mut adjusted = config.clone();
    let current = config["timeout_seconds"].as_f64().unwrap_or(300.0);
    adjusted["timeout_seconds"] = json!((current * TIMEOUT_FACTOR).min(MAX_TIMEOUT_SECONDS));
    adjusted
}

fn optimize_execution(config: &Value) -> Value {
    let mut adjusted = config.clone();
    let batch = config["batch_size"].as_u64().unwrap_or(1000);
    let parallelism = config["parallelism"].as_u64().unwrap_or(4);
    adjusted["batch_size"] = json!((batch / 2).max(MIN_BATCH_SIZE));
    adjusted["parallelism"] = json!((parallelism * 2).min(MAX_PARALLELISM));
    adjusted
}

fn increase_resources(config: &Value) -> Value {
    let mut adjusted = config.clone();
    let memory = config["memory_mb"].as_f64().unwrap_or(2048.0);
    let cpu = config["cpu_cores"].as_f64().unwrap_or(2.0);
    adjusted["memory_mb"] = json!((memory * MEMORY_FACTOR).min(MAX_MEMORY_MB));
    adjusted["cpu_cores"] = json!((cpu * CPU_FACTOR).min(MAX_CPU_CORES));
    adjusted
}

fn optimize_resource_usage(config: &Value) -> Value {
    let mut adjusted = config.clone();
    let batch = config["batch_size"].as_u64().unwrap_or(1000);
    adjusted["batch_size"] = json!((batch / 2).max(MIN_BATCH_SIZE));
    adjusted["spill_to_disk"] = json!(true);
    adjusted
}

fn retry_with_backoff(config: &Value) -> Value {
    let mut adjusted = config.clone();
    adjusted["retry"] = json!({
        "initial_delay_seconds": RETRY_INITIAL_SECONDS,
        "backoff_factor": RETRY_BACKOFF_FACTOR,
        "max_delay_seconds": RETRY_MAX_DELAY_SECONDS,
    });
    adjusted
}

fn skip_dependency(config: &Value) -> Result<Value> {
    let mut adjusted = config.clone();
    let deps = adjusted["dependencies"]
        .as_array_mut()
        .ok_or_else(|| Error::Dependency("config has no dependencies to skip".to_string()))?;
    let mut skipped = false;
    for dep in deps.iter_mut() {
        if dep["critical"] == false && dep["skip"] != true {
            dep["skip"] = json!(true);
            skipped = true;
            break;
        }
    }
    if !skipped {
        return Err(Error::Dependency(
            "no non-critical dependency available to skip".to_string(),
        ));
    }
    Ok(adjusted)
}

/// Replace one named section with defaults, keeping the rest intact
fn use_default_config(config: &Value, features: &std::collections::HashMap<String, Value>) -> Value {
    let mut adjusted = config.clone();
    let section = features
        .get("config_section")
        .and_then(|v| v.as_str())
        .unwrap_or("execution");
    adjusted[section] = default_section(section);
    adjusted
}

fn default_section(section: &str) -> Value {
    match section {
        "execution" => json!({
            "batch_size": 1000,
            "parallelism": 4,
            "timeout_seconds": 300,
        }),
        "retry" => json!({
            "initial_delay_seconds": RETRY_INITIAL_SECONDS,
            "backoff_factor": RETRY_BACKOFF_FACTOR,
            "max_delay_seconds": RETRY_MAX_DELAY_SECONDS,
        }),
        _ => json!({}),
    }
}

/// Targeted field edits taken from the root-cause evidence
fn fix_configuration(config: &Value, ctx: &CorrectionContext<'_>) -> Value {
    let mut adjusted = config.clone();
    if let Some(cause) = ctx.root_cause.primary_cause() {
        for evidence in &cause.evidence {
            if let Some(fixes) = evidence["config_fixes"].as_object() {
                for (key, value) in fixes {
                    if !CRITICAL_FIELDS.contains(&key.as_str()) {
                        adjusted[key] = value.clone();
                    }
                }
            }
        }
    }
    adjusted
}

/// Fields each strategy may touch
fn allowed_fields(strategy: &str) -> &'static [&'static str] {
    match strategy {
        "increase_timeout" => &["timeout_seconds"],
        "optimize_execution" => &["batch_size", "parallelism"],
        "increase_resources" => &["memory_mb", "cpu_cores"],
        "optimize_resource_usage" => &["batch_size", "spill_to_disk"],
        "retry_with_backoff" => &["retry"],
        "skip_dependency" => &["dependencies"],
        "use_default_config" => &["execution", "retry"],
        _ => &[],
    }
}

/// The adjusted config must differ from the original in exactly the
/// strategy-appropriate way and preserve critical fields.
fn validate_adjustment(original: &Value, adjusted: &Value, strategy: &str) -> Result<()> {
    for field in CRITICAL_FIELDS {
        if original.get(field) != adjusted.get(field) {
            return Err(Error::Validation(format!(
                "adjustment '{strategy}' modified critical field '{field}'"
            )));
        }
    }

    let (Some(before), Some(after)) = (original.as_object(), adjusted.as_object()) else {
        return Err(Error::Validation("configs must be objects".to_string()));
    };

    let mut changed: Vec<&str> = Vec::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            changed.push(key.as_str());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            changed.push(key.as_str());
        }
    }

    if changed.is_empty() && strategy != "fix_configuration" {
        return Err(Error::Validation(format!(
            "adjustment '{strategy}' changed nothing"
        )));
    }
    let allowed = allowed_fields(strategy);
    if !allowed.is_empty() {
        for key in &changed {
            if !allowed.contains(key) {
                return Err(Error::Validation(format!(
                    "adjustment '{strategy}' touched unexpected field '{key}'"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_common::{ActionKind, Recoverability, Severity};
    use mend_diagnosis::{IssueClassification, RootCauseAnalysis};
    use std::collections::HashMap;

    fn classification(issue_type: &str) -> IssueClassification {
        IssueClassification {
            issue_id: "i1".into(),
            category: IssueCategory::Pipeline,
            severity: Severity::Medium,
            issue_type: issue_type.into(),
            description: String::new(),
            recommended_action: ActionKind::ParameterAdjustment,
            confidence: 0.9,
            recoverability: Recoverability::AutoRecoverable,
            features: HashMap::new(),
            extensions: Default::default(),
        }
    }

    fn analysis() -> RootCauseAnalysis {
        RootCauseAnalysis {
            analysis_id: "a1".into(),
            issue_id: "i1".into(),
            root_causes: Vec::new(),
            causality_graph: json!({}),
            context: HashMap::new(),
        }
    }

    fn base_config() -> Value {
        json!({
            "pipeline_id": "p1",
            "source_id": "s1",
            "target_dataset": "analytics",
            "target_table": "orders",
            "timeout_seconds": 300.0,
            "batch_size": 1000,
            "parallelism": 4,
            "memory_mb": 2048.0,
            "cpu_cores": 2.0,
            "dependencies": [
                {"name": "upstream_a", "critical": true},
                {"name": "enrichment", "critical": false}
            ]
        })
    }

    async fn run(issue_type: &str, config: Value) -> CorrectionResult {
        let adjuster = PipelineAdjuster::new();
        let issue = classification(issue_type);
        let analysis = analysis();
        adjuster
            .apply(&CorrectionContext {
                original_state: &config,
                issue: &issue,
                root_cause: &analysis,
                action_success_rate: Some(0.8),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn timeout_doubles_up_to_cap() {
        let result = run("timeout", base_config()).await;
        assert_eq!(result.strategy, "increase_timeout");
        assert_eq!(result.corrected_state["timeout_seconds"], 600.0);
        // Identity fields survive
        assert_eq!(result.corrected_state["pipeline_id"], "p1");
    }

    #[tokio::test]
    async fn capped_timeout_switches_to_execution_reshaping() {
        let mut config = base_config();
        config["timeout_seconds"] = json!(3000.0);
        let result = run("timeout", config).await;
        assert_eq!(result.strategy, "optimize_execution");
        assert_eq!(result.corrected_state["batch_size"], 500);
        assert_eq!(result.corrected_state["parallelism"], 8);
    }

    #[tokio::test]
    async fn resource_issues_scale_within_system_caps() {
        let result = run("out_of_memory", base_config()).await;
        assert_eq!(result.strategy, "increase_resources");
        assert_eq!(result.corrected_state["memory_mb"], 3072.0);
        assert_eq!(result.corrected_state["cpu_cores"], 3.0);

        let mut huge = base_config();
        huge["memory_mb"] = json!(60000.0);
        let result = run("out_of_memory", huge).await;
        assert_eq!(result.corrected_state["memory_mb"], MAX_MEMORY_MB);
    }

    #[tokio::test]
    async fn dependency_failure_skips_non_critical() {
        let result = run("dependency_failure", base_config()).await;
        assert_eq!(result.strategy, "skip_dependency");
        let deps = result.corrected_state["dependencies"].as_array().unwrap();
        assert_eq!(deps[1]["skip"], true);
        assert!(deps[0].get("skip").is_none());
    }

    #[tokio::test]
    async fn all_critical_dependencies_fall_back_to_retry() {
        let mut config = base_config();
        config["dependencies"] = json!([{"name": "upstream_a", "critical": true}]);
        let result = run("dependency_failure", config).await;
        assert_eq!(result.strategy, "retry_with_backoff");
        assert_eq!(result.corrected_state["retry"]["initial_delay_seconds"], 60);
        assert_eq!(result.corrected_state["retry"]["max_delay_seconds"], 3600);
    }

    #[tokio::test]
    async fn connectivity_adds_backoff_retry() {
        let result = run("connectivity", base_config()).await;
        assert_eq!(result.strategy, "retry_with_backoff");
        assert_eq!(result.corrected_state["retry"]["backoff_factor"], 2.0);
    }

    #[test]
    fn validator_rejects_critical_field_edits() {
        let original = base_config();
        let mut adjusted = increase_timeout(&original);
        adjusted["pipeline_id"] = json!("other");
        assert!(validate_adjustment(&original, &adjusted, "increase_timeout").is_err());
    }

    #[test]
    fn validator_rejects_out_of_scope_edits() {
        let original = base_config();
        let mut adjusted = increase_timeout(&original);
        adjusted["batch_size"] = json!(1);
        assert!(validate_adjustment(&original, &adjusted, "increase_timeout").is_err());
    }

    #[test]
    fn validator_rejects_no_op_adjustments() {
        let original = base_config();
        assert!(validate_adjustment(&original, &original.clone(), "increase_timeout").is_err());
    }
}
