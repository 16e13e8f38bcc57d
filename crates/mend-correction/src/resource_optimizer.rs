//! Resource optimization engine for resource-health issues

use crate::{compose_confidence, CorrectionContext, CorrectionEngine, CorrectionResult};
use async_trait::async_trait;
use mend_common::{Error, IssueCategory, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

const SLOT_FACTOR: f64 = 1.5;
const MAX_QUERY_SLOTS: f64 = 2000.0;
const WORKER_FACTOR: f64 = 1.5;
const MAX_WORKERS: f64 = 128.0;
const HEADROOM_FACTOR: f64 = 1.25;
const MAX_HEADROOM_MB: f64 = 16384.0;
const CACHE_PRUNE_FACTOR: f64 = 0.5;

/// Tunes shared resource allocations (query slots, worker pools, memory
/// headroom, caches) when resource-health issues fire.
pub struct ResourceOptimizer;

impl ResourceOptimizer {
    pub fn new() -> Self {
        ResourceOptimizer
    }

    /// Choose a strategy from the metric snapshot: slot saturation scales
    /// slots, queue depth grows the worker pool, memory pressure first
    /// raises headroom and then prunes cache.
    fn pick_strategy(issue: &mend_diagnosis::IssueClassification, state: &Value) -> (&'static str, f64) {
        let metric = |key: &str| {
            issue
                .features
                .get(&format!("metric:{key}"))
                .and_then(|v| v.as_f64())
        };
        if metric("slot_utilization").is_some_and(|v| v > 0.9) {
            return ("scale_query_slots", 0.85);
        }
        if metric("queue_depth").is_some_and(|v| v > 100.0) {
            return ("resize_worker_pool", 0.8);
        }
        if metric("memory_utilization").is_some_and(|v| v > 0.9) {
            let cache = state["cache_size_mb"].as_f64().unwrap_or(0.0);
            if cache > 256.0 {
                return ("prune_cache", 0.75);
            }
            return ("adjust_memory_headroom", 0.8);
        }
        ("adjust_memory_headroom", 0.7)
    }
}

impl Default for ResourceOptimizer {
    fn default() -> Self {
        ResourceOptimizer::new()
    }
}

#[async_trait]
impl CorrectionEngine for ResourceOptimizer {
    fn name(&self) -> &'static str {
        "resource_optimizer"
    }

    fn handles(&self, category: IssueCategory) -> bool {
        matches!(category, IssueCategory::Resource | IssueCategory::System)
    }

    async fn apply(&self, ctx: &CorrectionContext<'_>) -> Result<CorrectionResult> {
        let state = ctx.original_state;
        if !state.is_object() {
            return Err(Error::Resource(
                "resource optimization needs a resource state object".to_string(),
            ));
        }
        let (strategy, prior) = Self::pick_strategy(ctx.issue, state);
        debug!(strategy, "optimizing resources");

        let mut adjusted = state.clone();
        match strategy {
            "scale_query_slots" => {
                let slots = state["query_slots"].as_f64().unwrap_or(100.0);
                adjusted["query_slots"] = json!((slots * SLOT_FACTOR).min(MAX_QUERY_SLOTS));
            }
            "resize_worker_pool" => {
                let workers = state["worker_count"].as_f64().unwrap_or(4.0);
                adjusted["worker_count"] = json!((workers * WORKER_FACTOR).min(MAX_WORKERS));
            }
            "prune_cache" => {
                let cache = state["cache_size_mb"].as_f64().unwrap_or(512.0);
                adjusted["cache_size_mb"] = json!(cache * CACHE_PRUNE_FACTOR);
            }
            _ => {
                let headroom = state["memory_headroom_mb"].as_f64().unwrap_or(1024.0);
                adjusted["memory_headroom_mb"] =
                    json!((headroom * HEADROOM_FACTOR).min(MAX_HEADROOM_MB));
            }
        }

        let mut result = CorrectionResult::new(strategy, state.clone(), adjusted);
        result.confidence = compose_confidence(prior, ctx.action_success_rate, ctx.issue.confidence);
        result.successful = true;
        info!(
            correction_id = %result.correction_id,
            strategy,
            confidence = result.confidence,
            "resource optimization prepared"
        );
        Ok(result)
    }
}
