//! Process-wide configuration for the healing core

use crate::breaker::BreakerConfig;
use serde::{Deserialize, Serialize};

/// Operating mode of the self-healing subsystem
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealingMode {
    /// Record issues only; never classify or act
    Disabled,
    /// Classify and recommend, but never execute corrections
    Advisory,
    /// Full autonomous remediation with the approval gate
    Automatic,
}

/// Configuration for the healing core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Minimum classifier confidence before a result is trusted
    pub confidence_threshold: f64,
    /// Maximum transport-level retry attempts before escalation
    pub max_retry_attempts: u32,
    /// Maximum healing executions per (execution, issue signature)
    pub max_recovery_attempts: u32,
    pub healing_mode: HealingMode,
    /// Healing confidence below this requires human approval
    pub approval_required_below_confidence: f64,
    /// Minimum historical success rate for an action to be auto-selected
    pub action_success_threshold: f64,
    /// Minutes after which an orphaned IN_PROGRESS healing is failed
    pub orphan_timeout_minutes: i64,
    /// Hours after which a pending approval is auto-rejected
    pub approval_timeout_hours: i64,
    /// Bounded healing queue depth per pipeline
    pub healing_queue_depth: usize,
    /// Minimum cluster size before a recurring issue becomes a pattern
    pub min_pattern_occurrences: usize,
    /// Days of feedback kept for learning
    pub feedback_retention_days: i64,
    /// Seconds the persistence store may be unreachable at startup
    pub startup_grace_seconds: u64,
    /// Time window for related-event correlation, in minutes
    pub correlation_window_minutes: i64,
    /// Maximum causality graph depth
    pub causality_graph_depth: usize,
    /// Environment tag stamped on every metadata record
    pub environment: String,
    pub breaker: BreakerConfig,
}

impl Default for HealingConfig {
    fn default() -> Self {
        HealingConfig {
            confidence_threshold: 0.85,
            max_retry_attempts: 5,
            max_recovery_attempts: 3,
            healing_mode: HealingMode::Automatic,
            approval_required_below_confidence: 0.9,
            action_success_threshold: 0.6,
            orphan_timeout_minutes: 30,
            approval_timeout_hours: 24,
            healing_queue_depth: 10,
            min_pattern_occurrences: 3,
            feedback_retention_days: 90,
            startup_grace_seconds: 60,
            correlation_window_minutes: 15,
            causality_graph_depth: 3,
            environment: "dev".to_string(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl HealingConfig {
    /// Validate configuration at startup; invalid configuration is fatal
    pub fn validate(&self) -> crate::Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(crate::Error::Configuration(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.approval_required_below_confidence) {
            return Err(crate::Error::Configuration(format!(
                "approval_required_below_confidence must be in [0, 1], got {}",
                self.approval_required_below_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.action_success_threshold) {
            return Err(crate::Error::Configuration(format!(
                "action_success_threshold must be in [0, 1], got {}",
                self.action_success_threshold
            )));
        }
        if self.healing_queue_depth == 0 {
            return Err(crate::Error::Configuration(
                "healing_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.max_recovery_attempts == 0 {
            return Err(crate::Error::Configuration(
                "max_recovery_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
