//! Persistence for healing actions and executions

use crate::execution::HealingExecution;
use mend_common::{ActionKind, Error, HealingAction, HealingStatus, Result};
use mend_store::{Criteria, DocumentStore};
use serde_json::Value;
use std::sync::Arc;

const ACTION_COLLECTION: &str = "healing_actions";
const EXECUTION_COLLECTION: &str = "healing_executions";

/// Repository over healing actions and healing executions.
///
/// Counter updates go through the store's atomic single-document update;
/// there is no read-then-write anywhere in this layer.
#[derive(Clone)]
pub struct HealingRepository {
    store: Arc<dyn DocumentStore>,
}

impl HealingRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        HealingRepository { store }
    }

    // Actions

    pub async fn create_action(
        &self,
        kind: ActionKind,
        pattern_id: &str,
        parameters: Value,
    ) -> Result<HealingAction> {
        let mut action = HealingAction::new(kind, pattern_id.to_string());
        if let Value::Object(params) = parameters {
            action.parameters = params.into_iter().collect();
        }
        self.store
            .set(
                ACTION_COLLECTION,
                &action.action_id,
                serde_json::to_value(&action)?,
            )
            .await?;
        Ok(action)
    }

    /// Seed an action with prior history (administrative import surface)
    pub async fn import_action(&self, action: &HealingAction) -> Result<()> {
        self.store
            .set(
                ACTION_COLLECTION,
                &action.action_id,
                serde_json::to_value(action)?,
            )
            .await
    }

    pub async fn get_action(&self, action_id: &str) -> Result<Option<HealingAction>> {
        match self.store.get(ACTION_COLLECTION, action_id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Active actions owned by a pattern
    pub async fn actions_for_pattern(&self, pattern_id: &str) -> Result<Vec<HealingAction>> {
        let docs = self
            .store
            .query(
                ACTION_COLLECTION,
                &Criteria::new().eq("pattern_id", pattern_id).eq("active", true),
                None,
            )
            .await?;
        let mut actions = Vec::with_capacity(docs.len());
        for doc in docs {
            actions.push(serde_json::from_value(doc)?);
        }
        Ok(actions)
    }

    /// Atomically record an execution outcome on an action
    pub async fn record_action_outcome(&self, action_id: &str, success: bool) -> Result<HealingAction> {
        let updated = self
            .store
            .update(
                ACTION_COLLECTION,
                action_id,
                Box::new(move |doc| {
                    let mut action: HealingAction = serde_json::from_value(doc.clone())?;
                    action.record_outcome(success);
                    *doc = serde_json::to_value(&action)?;
                    Ok(())
                }),
            )
            .await?;
        Ok(serde_json::from_value(updated)?)
    }

    /// Deactivate an action so it is no longer eligible for selection
    pub async fn deactivate_action(&self, action_id: &str) -> Result<()> {
        self.store
            .update(
                ACTION_COLLECTION,
                action_id,
                Box::new(|doc| {
                    doc["active"] = Value::Bool(false);
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    // Healing executions

    pub async fn save_healing(&self, healing: &HealingExecution) -> Result<()> {
        self.store
            .set(
                EXECUTION_COLLECTION,
                &healing.healing_id,
                serde_json::to_value(healing)?,
            )
            .await
    }

    pub async fn get_healing(&self, healing_id: &str) -> Result<Option<HealingExecution>> {
        match self.store.get(EXECUTION_COLLECTION, healing_id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Atomically transition a healing execution, enforcing the state
    /// machine inside the update
    pub async fn transition_healing(
        &self,
        healing_id: &str,
        next: HealingStatus,
    ) -> Result<HealingExecution> {
        let updated = self
            .store
            .update(
                EXECUTION_COLLECTION,
                healing_id,
                Box::new(move |doc| {
                    let mut healing: HealingExecution = serde_json::from_value(doc.clone())?;
                    healing.transition(next)?;
                    *doc = serde_json::to_value(&healing)?;
                    Ok(())
                }),
            )
            .await?;
        Ok(serde_json::from_value(updated)?)
    }

    /// Merge details into a healing execution record
    pub async fn annotate_healing(&self, healing_id: &str, details: Value) -> Result<()> {
        self.store
            .update(
                EXECUTION_COLLECTION,
                healing_id,
                Box::new(move |doc| {
                    if let (Some(target), Some(source)) =
                        (doc["execution_details"].as_object_mut(), details.as_object())
                    {
                        for (k, v) in source {
                            target.insert(k.clone(), v.clone());
                        }
                    } else {
                        doc["execution_details"] = details;
                    }
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    /// Healing executions for a pipeline execution and issue signature
    pub async fn healings_for_issue(
        &self,
        execution_id: &str,
        issue_signature: &str,
    ) -> Result<Vec<HealingExecution>> {
        let docs = self
            .store
            .query(
                EXECUTION_COLLECTION,
                &Criteria::new()
                    .eq("execution_id", execution_id)
                    .eq("issue_signature", issue_signature),
                None,
            )
            .await?;
        let mut healings = Vec::with_capacity(docs.len());
        for doc in docs {
            healings.push(serde_json::from_value(doc)?);
        }
        Ok(healings)
    }

    /// Non-terminal healing executions for a pipeline
    pub async fn active_healings_for_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<HealingExecution>> {
        let docs = self
            .store
            .query(
                EXECUTION_COLLECTION,
                &Criteria::new().eq("pipeline_id", pipeline_id),
                None,
            )
            .await?;
        let mut healings = Vec::new();
        for doc in docs {
            let healing: HealingExecution = serde_json::from_value(doc)?;
            if !healing.status.is_terminal() {
                healings.push(healing);
            }
        }
        Ok(healings)
    }

    /// All healing executions currently in the given status
    pub async fn healings_in_status(&self, status: HealingStatus) -> Result<Vec<HealingExecution>> {
        let docs = self
            .store
            .query(
                EXECUTION_COLLECTION,
                &Criteria::new().eq("status", serde_json::to_value(status)?),
                None,
            )
            .await?;
        let mut healings = Vec::with_capacity(docs.len());
        for doc in docs {
            healings.push(serde_json::from_value(doc)?);
        }
        Ok(healings)
    }

    pub async fn require_action(&self, action_id: &str) -> Result<HealingAction> {
        self.get_action(action_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("healing action {action_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_store::MemoryDocumentStore;
    use serde_json::json;

    fn repo() -> HealingRepository {
        HealingRepository::new(Arc::new(MemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn action_counters_recompute_rate() {
        let repo = repo();
        let action = repo
            .create_action(ActionKind::PipelineRetry, "pat1", json!({}))
            .await
            .unwrap();
        repo.record_action_outcome(&action.action_id, true).await.unwrap();
        repo.record_action_outcome(&action.action_id, true).await.unwrap();
        let updated = repo
            .record_action_outcome(&action.action_id, false)
            .await
            .unwrap();
        assert_eq!(updated.execution_count, 3);
        assert_eq!(updated.success_count, 2);
        assert!((updated.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn inactive_actions_drop_out_of_selection() {
        let repo = repo();
        let action = repo
            .create_action(ActionKind::DataCorrection, "pat1", json!({}))
            .await
            .unwrap();
        assert_eq!(repo.actions_for_pattern("pat1").await.unwrap().len(), 1);
        repo.deactivate_action(&action.action_id).await.unwrap();
        assert!(repo.actions_for_pattern("pat1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn healing_transitions_are_validated_in_the_store() {
        let repo = repo();
        let healing = HealingExecution::new("e1", "p1", "pat1", "act1", "sig", 0.9);
        repo.save_healing(&healing).await.unwrap();
        repo.transition_healing(&healing.healing_id, HealingStatus::InProgress)
            .await
            .unwrap();
        let bad = repo
            .transition_healing(&healing.healing_id, HealingStatus::Pending)
            .await;
        assert!(bad.is_err());
        // Rejected transition left the stored status untouched
        let stored = repo.get_healing(&healing.healing_id).await.unwrap().unwrap();
        assert_eq!(stored.status, HealingStatus::InProgress);
    }
}
