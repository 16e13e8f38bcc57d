//! The recovery orchestrator

use crate::execution::HealingExecution;
use crate::repository::HealingRepository;
use mend_common::{
    ActionKind, Error, HealingAction, HealingConfig, HealingMode, HealingStatus, Result,
};
use mend_correction::{CorrectionContext, CorrectionEngine, CorrectionResult};
use mend_diagnosis::{
    IssueClassification, IssueClassifier, IssueDescriptor, PatternMatch, PatternRecognizer,
    RootCauseAnalysis, RootCauseAnalyzer,
};
use mend_lineage::LineageTracker;
use mend_metadata::MetadataTracker;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one recovery request
#[derive(Debug)]
pub enum RecoveryOutcome {
    /// Healing is disabled; the issue was recorded only
    Disabled,
    /// Advisory mode: classification and recommendation, nothing executed
    Advisory {
        classification: IssueClassification,
        recommended_action: ActionKind,
    },
    /// The issue cannot be healed autonomously
    NotSelfHealable { classification: IssueClassification },
    /// The pipeline's healing queue is saturated; issue recorded, no
    /// execution created
    QueueFull,
    /// The per-issue attempt budget is spent
    AttemptsExhausted { attempts: usize },
    /// Waiting for human approval
    ApprovalPending { healing: HealingExecution },
    /// Correction applied successfully
    Healed {
        healing: HealingExecution,
        correction: CorrectionResult,
    },
    /// Correction ran and failed, or no strategy was viable
    Failed {
        healing: HealingExecution,
        reason: String,
    },
}

/// Central coordinator for healing attempts.
///
/// Per healing execution the state machine is serialized through the
/// repository's atomic transitions; pattern and action counters are updated
/// in the same commit sequence as the terminal transition.
pub struct RecoveryOrchestrator {
    config: HealingConfig,
    metadata: Arc<MetadataTracker>,
    lineage: Arc<LineageTracker>,
    classifier: Arc<IssueClassifier>,
    recognizer: Arc<PatternRecognizer>,
    analyzer: Arc<RootCauseAnalyzer>,
    engines: Vec<Arc<dyn CorrectionEngine>>,
    repo: HealingRepository,
    /// Issues currently being healed, keyed by execution + signature
    in_flight: Mutex<HashSet<String>>,
}

impl RecoveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: HealingConfig,
        metadata: Arc<MetadataTracker>,
        lineage: Arc<LineageTracker>,
        classifier: Arc<IssueClassifier>,
        recognizer: Arc<PatternRecognizer>,
        analyzer: Arc<RootCauseAnalyzer>,
        engines: Vec<Arc<dyn CorrectionEngine>>,
        repo: HealingRepository,
    ) -> Self {
        RecoveryOrchestrator {
            config,
            metadata,
            lineage,
            classifier,
            recognizer,
            analyzer,
            engines,
            repo,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn repository(&self) -> &HealingRepository {
        &self.repo
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    /// Heal one issue against the state it manifests in.
    ///
    /// A second request for the same `(execution, issue)` while one is in
    /// flight is rejected with a duplicate error and increments nothing.
    pub async fn heal(
        &self,
        descriptor: &IssueDescriptor,
        original_state: Value,
    ) -> Result<RecoveryOutcome> {
        if self.config.healing_mode == HealingMode::Disabled {
            self.record_issue_only(descriptor, "healing disabled").await?;
            return Ok(RecoveryOutcome::Disabled);
        }

        let classification = self.classifier.classify(descriptor).await?;
        // Only non-recoverable issues abort outright; manual-recoverable
        // ones continue and pause at the approval gate
        if classification.recoverability == mend_common::Recoverability::NonRecoverable {
            self.recognizer
                .add_issue_to_history(&classification, None, None)
                .await?;
            self.record_issue_only(descriptor, "not recoverable").await?;
            return Ok(RecoveryOutcome::NotSelfHealable { classification });
        }

        if self.config.healing_mode == HealingMode::Advisory {
            let recommended_action = classification.recommended_action;
            self.recognizer
                .add_issue_to_history(&classification, None, None)
                .await?;
            return Ok(RecoveryOutcome::Advisory {
                classification,
                recommended_action,
            });
        }

        let execution_id = descriptor
            .execution_id
            .clone()
            .unwrap_or_else(|| "unattached".to_string());
        let pipeline_id = descriptor
            .pipeline_id
            .clone()
            .unwrap_or_else(|| "unattached".to_string());
        let signature = descriptor.signature();
        let key = in_flight_key(&execution_id, &signature);

        self.mark_in_flight(&key)?;
        let result = self
            .heal_guarded(
                descriptor,
                classification,
                original_state,
                &execution_id,
                &pipeline_id,
                &signature,
            )
            .await;
        match &result {
            // Approval keeps the issue in flight until a human (or the
            // sweep) resolves it
            Ok(RecoveryOutcome::ApprovalPending { .. }) => {}
            _ => self.clear_in_flight(&key),
        }
        result
    }

    async fn heal_guarded(
        &self,
        descriptor: &IssueDescriptor,
        classification: IssueClassification,
        original_state: Value,
        execution_id: &str,
        pipeline_id: &str,
        signature: &str,
    ) -> Result<RecoveryOutcome> {
        // Backpressure: a saturated pipeline drops the request loudly
        let active = self.repo.active_healings_for_pipeline(pipeline_id).await?;
        if active.len() >= self.config.healing_queue_depth {
            warn!(
                pipeline_id,
                depth = active.len(),
                "healing queue full, dropping issue"
            );
            self.record_issue_only(descriptor, "healing queue full").await?;
            return Ok(RecoveryOutcome::QueueFull);
        }

        // Attempt budget per (execution, issue signature)
        let prior = self.repo.healings_for_issue(execution_id, signature).await?;
        if prior.len() >= self.config.max_recovery_attempts as usize {
            warn!(
                execution_id,
                signature,
                attempts = prior.len(),
                "recovery attempts exhausted"
            );
            return Ok(RecoveryOutcome::AttemptsExhausted {
                attempts: prior.len(),
            });
        }

        let matches = self.recognizer.match_issue(&classification).await?;
        let analysis = self.analyzer.analyze_issue(descriptor, &classification).await?;

        let selected = self
            .select_strategy(&classification, &matches, &analysis)
            .await?;
        let Some((pattern_id, action)) = selected else {
            // Rule 3: escalate with a terminal FAILED record
            let mut healing = HealingExecution::new(
                execution_id,
                pipeline_id,
                "",
                "",
                signature,
                classification.confidence,
            );
            healing.issue_details = serde_json::to_value(&classification)?;
            self.repo.save_healing(&healing).await?;
            self.repo
                .transition_healing(&healing.healing_id, HealingStatus::InProgress)
                .await?;
            let healing = self
                .repo
                .transition_healing(&healing.healing_id, HealingStatus::Failed)
                .await?;
            self.track_healing(&healing, "no viable strategy").await?;
            return Ok(RecoveryOutcome::Failed {
                healing,
                reason: "no viable strategy".to_string(),
            });
        };

        let mut healing = HealingExecution::new(
            execution_id,
            pipeline_id,
            pattern_id.clone(),
            action.action_id.clone(),
            signature,
            classification.confidence,
        );
        healing.issue_details = serde_json::to_value(&classification)?;
        healing.execution_details = json!({
            "original_state": original_state,
            "analysis_id": analysis.analysis_id,
            "dataset": descriptor.dataset,
            "table": descriptor.table,
        });
        self.repo.save_healing(&healing).await?;
        let healing = self
            .repo
            .transition_healing(&healing.healing_id, HealingStatus::InProgress)
            .await?;

        // Approval gate: low confidence or a manual-recoverability verdict
        // pauses the execution for a human
        if classification.confidence < self.config.approval_required_below_confidence
            || !classification.is_self_healable()
        {
            let healing = self
                .repo
                .transition_healing(&healing.healing_id, HealingStatus::ApprovalRequired)
                .await?;
            info!(
                healing_id = %healing.healing_id,
                confidence = classification.confidence,
                "healing paused for approval"
            );
            return Ok(RecoveryOutcome::ApprovalPending { healing });
        }

        self.run_engine(healing, &classification, &analysis, &original_state, &action)
            .await
    }

    /// Strategy selection per the selection order: a matching pattern with
    /// a proven active action, else the root-cause recommendation, else
    /// nothing.
    async fn select_strategy(
        &self,
        classification: &IssueClassification,
        matches: &[PatternMatch],
        analysis: &RootCauseAnalysis,
    ) -> Result<Option<(String, HealingAction)>> {
        if classification.confidence >= self.config.approval_required_below_confidence {
            for m in matches {
                let actions = self.repo.actions_for_pattern(&m.pattern.pattern_id).await?;
                let best = actions
                    .into_iter()
                    .filter(|a| {
                        a.execution_count > 0
                            && a.success_rate >= self.config.action_success_threshold
                    })
                    .max_by(|a, b| {
                        a.success_rate
                            .partial_cmp(&b.success_rate)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                if let Some(action) = best {
                    return Ok(Some((m.pattern.pattern_id.clone(), action)));
                }
            }
        }

        // Fall back to the analyzer's highest-confidence recommendation
        let kind = analysis
            .primary_cause()
            .map(|c| c.recommended_action)
            .unwrap_or(classification.recommended_action);

        // The action must be owned by a pattern; reuse the best match or
        // grow a new pattern from this classification
        let pattern_id = match matches.first() {
            Some(m) => m.pattern.pattern_id.clone(),
            None => {
                let pattern = self
                    .recognizer
                    .create_pattern(
                        &format!("auto:{}", classification.issue_type),
                        classification.category,
                        classification.features.clone(),
                        0.7,
                    )
                    .await?;
                pattern.pattern_id
            }
        };
        let existing = self.repo.actions_for_pattern(&pattern_id).await?;
        let action = match existing.into_iter().find(|a| a.kind == kind) {
            Some(action) => action,
            None => self.repo.create_action(kind, &pattern_id, json!({})).await?,
        };
        Ok(Some((pattern_id, action)))
    }

    async fn run_engine(
        &self,
        healing: HealingExecution,
        classification: &IssueClassification,
        analysis: &RootCauseAnalysis,
        original_state: &Value,
        action: &HealingAction,
    ) -> Result<RecoveryOutcome> {
        let Some(engine) = self
            .engines
            .iter()
            .find(|e| e.handles(classification.category))
        else {
            let healing = self.complete(healing, false, None).await?;
            let reason = format!("no engine handles {}", classification.category);
            self.track_healing(&healing, &reason).await?;
            return Ok(RecoveryOutcome::Failed { healing, reason });
        };

        let ctx = CorrectionContext {
            original_state,
            issue: classification,
            root_cause: analysis,
            action_success_rate: (action.execution_count > 0).then_some(action.success_rate),
        };
        match engine.apply(&ctx).await {
            Ok(correction) => {
                let success = correction.successful;
                let healing = self.complete(healing, success, Some(&correction)).await?;
                self.track_healing(&healing, &correction.strategy).await?;
                if success {
                    Ok(RecoveryOutcome::Healed { healing, correction })
                } else {
                    Ok(RecoveryOutcome::Failed {
                        healing,
                        reason: format!("engine {} reported failure", engine.name()),
                    })
                }
            }
            Err(e) => {
                let healing = self.complete(healing, false, None).await?;
                let reason = format!("engine {} failed: {e}", engine.name());
                self.track_healing(&healing, &reason).await?;
                Ok(RecoveryOutcome::Failed { healing, reason })
            }
        }
    }

    /// Terminal commit: transition the healing record, then propagate the
    /// outcome to action and pattern counters and emit the lineage record.
    /// Each write is an atomic single-document update; the sequence runs
    /// with no interleaved reads.
    pub(crate) async fn complete(
        &self,
        healing: HealingExecution,
        success: bool,
        correction: Option<&CorrectionResult>,
    ) -> Result<HealingExecution> {
        let next = if success {
            HealingStatus::Success
        } else {
            HealingStatus::Failed
        };
        if let Some(correction) = correction {
            self.repo
                .annotate_healing(
                    &healing.healing_id,
                    json!({
                        "correction_id": correction.correction_id,
                        "strategy": correction.strategy,
                        "corrected_state": correction.corrected_state,
                        "engine_confidence": correction.confidence,
                    }),
                )
                .await?;
        }
        let healing = self
            .repo
            .transition_healing(&healing.healing_id, next)
            .await?;

        if !healing.action_id.is_empty() {
            self.repo
                .record_action_outcome(&healing.action_id, success)
                .await?;
        }
        if !healing.pattern_id.is_empty() {
            self.recognizer
                .update_stats(&healing.pattern_id, success)
                .await?;
        }

        if let (Some(dataset), Some(table)) = (
            healing.execution_details["dataset"].as_str(),
            healing.execution_details["table"].as_str(),
        ) {
            self.lineage
                .record_healing(
                    dataset,
                    table,
                    &healing.healing_id,
                    json!({
                        "execution_id": healing.execution_id,
                        "successful": success,
                    }),
                )
                .await?;
        }

        self.clear_in_flight(&in_flight_key(&healing.execution_id, &healing.issue_signature));
        info!(
            healing_id = %healing.healing_id,
            status = %healing.status,
            "healing execution completed"
        );
        Ok(healing)
    }

    /// Approve a paused healing and run its engine
    pub async fn approve(&self, healing_id: &str) -> Result<RecoveryOutcome> {
        self.repo
            .transition_healing(healing_id, HealingStatus::Approved)
            .await?;
        let healing = self
            .repo
            .transition_healing(healing_id, HealingStatus::InProgress)
            .await?;

        let classification: IssueClassification =
            serde_json::from_value(healing.issue_details.clone())?;
        let analysis = match healing.execution_details["analysis_id"].as_str() {
            Some(id) => self.analyzer.get_analysis(id).await?,
            None => None,
        }
        .unwrap_or(RootCauseAnalysis {
            analysis_id: String::new(),
            issue_id: classification.issue_id.clone(),
            root_causes: Vec::new(),
            causality_graph: json!({}),
            context: HashMap::new(),
        });
        let original_state = healing.execution_details["original_state"].clone();
        let action = self.repo.require_action(&healing.action_id).await?;
        self.run_engine(healing, &classification, &analysis, &original_state, &action)
            .await
    }

    /// Reject a paused healing; terminal, counts as an unsuccessful
    /// outcome for the owning pattern and action
    pub async fn reject(&self, healing_id: &str, reason: &str) -> Result<HealingExecution> {
        let healing = self
            .repo
            .transition_healing(healing_id, HealingStatus::Rejected)
            .await?;
        if !healing.action_id.is_empty() {
            self.repo
                .record_action_outcome(&healing.action_id, false)
                .await?;
        }
        if !healing.pattern_id.is_empty() {
            self.recognizer
                .update_stats(&healing.pattern_id, false)
                .await?;
        }
        self.clear_in_flight(&in_flight_key(&healing.execution_id, &healing.issue_signature));
        self.track_healing(&healing, reason).await?;
        warn!(healing_id, reason, "healing rejected");
        Ok(healing)
    }

    /// Manual healing with a pre-selected action; bypasses strategy
    /// selection but still honors the approval gate unless forced.
    pub async fn heal_manual(
        &self,
        descriptor: &IssueDescriptor,
        original_state: Value,
        action_id: &str,
        force: bool,
    ) -> Result<RecoveryOutcome> {
        let action = self.repo.require_action(action_id).await?;
        let classification = self.classifier.classify(descriptor).await?;
        let analysis = self.analyzer.analyze_issue(descriptor, &classification).await?;

        let execution_id = descriptor
            .execution_id
            .clone()
            .unwrap_or_else(|| "unattached".to_string());
        let pipeline_id = descriptor
            .pipeline_id
            .clone()
            .unwrap_or_else(|| "unattached".to_string());
        let signature = descriptor.signature();
        let key = in_flight_key(&execution_id, &signature);
        self.mark_in_flight(&key)?;

        let mut healing = HealingExecution::new(
            &execution_id,
            &pipeline_id,
            action.pattern_id.clone(),
            action.action_id.clone(),
            &signature,
            classification.confidence,
        );
        healing.issue_details = serde_json::to_value(&classification)?;
        healing.execution_details = json!({
            "original_state": original_state,
            "analysis_id": analysis.analysis_id,
            "dataset": descriptor.dataset,
            "table": descriptor.table,
            "manual": true,
        });
        self.repo.save_healing(&healing).await?;
        let healing = self
            .repo
            .transition_healing(&healing.healing_id, HealingStatus::InProgress)
            .await?;

        if !force
            && (classification.confidence < self.config.approval_required_below_confidence
                || !classification.is_self_healable())
        {
            let healing = self
                .repo
                .transition_healing(&healing.healing_id, HealingStatus::ApprovalRequired)
                .await?;
            return Ok(RecoveryOutcome::ApprovalPending { healing });
        }

        let result = self
            .run_engine(healing, &classification, &analysis, &original_state, &action)
            .await;
        if !matches!(result, Ok(RecoveryOutcome::ApprovalPending { .. })) {
            self.clear_in_flight(&key);
        }
        result
    }

    fn mark_in_flight(&self, key: &str) -> Result<()> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(key.to_string()) {
            return Err(Error::DuplicateInFlight(key.to_string()));
        }
        Ok(())
    }

    pub(crate) fn clear_in_flight(&self, key: &str) {
        self.in_flight.lock().remove(key);
    }

    async fn record_issue_only(&self, descriptor: &IssueDescriptor, reason: &str) -> Result<()> {
        let id = uuid::Uuid::new_v4().to_string();
        self.metadata
            .track_self_healing_metadata(
                &id,
                json!({
                    "execution_id": descriptor.execution_id,
                    "pipeline_id": descriptor.pipeline_id,
                    "component": descriptor.component,
                    "error_message": descriptor.error_message,
                    "status": "NOT_ATTEMPTED",
                    "reason": reason,
                }),
            )
            .await?;
        Ok(())
    }

    async fn track_healing(&self, healing: &HealingExecution, note: &str) -> Result<()> {
        self.metadata
            .track_self_healing_metadata(
                &healing.healing_id,
                json!({
                    "healing_id": healing.healing_id,
                    "execution_id": healing.execution_id,
                    "pipeline_id": healing.pipeline_id,
                    "pattern_id": healing.pattern_id,
                    "action_id": healing.action_id,
                    "status": healing.status,
                    "confidence": healing.confidence,
                    "note": note,
                }),
            )
            .await?;
        Ok(())
    }
}

pub(crate) fn in_flight_key(execution_id: &str, signature: &str) -> String {
    format!("{execution_id}:{signature}")
}
