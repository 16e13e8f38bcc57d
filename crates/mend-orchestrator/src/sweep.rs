//! Reconciliation sweeps for orphaned and stale healing executions

use crate::orchestrator::{in_flight_key, RecoveryOrchestrator};
use chrono::{Duration, Utc};
use mend_common::{HealingStatus, Result};
use serde_json::json;
use tracing::{info, warn};

impl RecoveryOrchestrator {
    /// Fail healing executions stuck IN_PROGRESS past the orphan timeout
    /// (typically after a cancellation lost the driving task). Returns the
    /// number of executions reconciled.
    pub async fn sweep_orphans(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::minutes(self.config().orphan_timeout_minutes);
        let stuck = self
            .repository()
            .healings_in_status(HealingStatus::InProgress)
            .await?;
        let mut swept = 0usize;
        for healing in stuck {
            if healing.execution_time >= cutoff {
                continue;
            }
            warn!(
                healing_id = %healing.healing_id,
                started = %healing.execution_time,
                "orphaned healing execution, marking failed"
            );
            self.repository()
                .annotate_healing(&healing.healing_id, json!({"failure_reason": "cancelled"}))
                .await?;
            self.complete(healing, false, None).await?;
            swept += 1;
        }
        if swept > 0 {
            info!(swept, "orphan sweep reconciled executions");
        }
        Ok(swept)
    }

    /// Auto-reject approvals that have waited past the approval timeout
    pub async fn sweep_stale_approvals(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::hours(self.config().approval_timeout_hours);
        let waiting = self
            .repository()
            .healings_in_status(HealingStatus::ApprovalRequired)
            .await?;
        let mut swept = 0usize;
        for healing in waiting {
            if healing.execution_time >= cutoff {
                continue;
            }
            warn!(
                healing_id = %healing.healing_id,
                "approval timed out, auto-rejecting"
            );
            self.reject(&healing.healing_id, "approval timed out").await?;
            self.clear_in_flight(&in_flight_key(
                &healing.execution_id,
                &healing.issue_signature,
            ));
            swept += 1;
        }
        Ok(swept)
    }
}
