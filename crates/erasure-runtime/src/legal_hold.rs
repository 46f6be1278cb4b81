//! Legal hold manager (spec.md §4.12).
//!
//! Applying a hold does not call a connector: the step is frozen exactly where
//! it stands. A held step still satisfies checkpoint completion
//! (`StepStatus::satisfies_checkpoint`) so the workflow is not stuck waiting on
//! data it is legally forbidden to delete; the certificate generator (§4.10)
//! surfaces it as an exception instead.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use erasure_common::{LegalHoldError, LegalHoldInfo, StepStatus};
use uuid::Uuid;

use crate::workflow_manager::WorkflowStateManager;

pub struct LegalHoldManager {
    workflows: Arc<WorkflowStateManager>,
}

impl LegalHoldManager {
    pub fn new(workflows: Arc<WorkflowStateManager>) -> Self {
        Self { workflows }
    }

    /// Freezes `step_name` under hold. Idempotent: re-applying a hold to an
    /// already-held step just refreshes its conditions and expiry.
    pub fn apply_hold(
        &self,
        workflow_id: Uuid,
        step_name: &str,
        conditions: Vec<String>,
        max_duration_days: u32,
    ) -> Result<(), LegalHoldError> {
        let workflow = self
            .workflows
            .load_workflow(workflow_id)
            .map_err(|_| LegalHoldError::Held {
                workflow_id,
                step_name: step_name.to_string(),
                reason: "workflow not found".into(),
            })?;
        if let Some(record) = workflow.steps.get(step_name) {
            if record.status == StepStatus::Deleted {
                return Err(LegalHoldError::Held {
                    workflow_id,
                    step_name: step_name.to_string(),
                    reason: "step already deleted, hold has no effect".into(),
                });
            }
        }

        let applied_at = Utc::now();
        let expires_at = applied_at + ChronoDuration::days(max_duration_days as i64);
        self.workflows
            .update_step(workflow_id, step_name, |record| {
                record.status = StepStatus::LegalHold;
                record.legal_hold = Some(LegalHoldInfo {
                    conditions: conditions.clone(),
                    max_duration_days,
                    applied_at,
                    expires_at,
                });
            })
            .map_err(|err| LegalHoldError::Held {
                workflow_id,
                step_name: step_name.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    pub fn is_expired(&self, workflow_id: Uuid, step_name: &str) -> bool {
        self.workflows
            .load_workflow(workflow_id)
            .ok()
            .and_then(|w| w.steps.get(step_name).cloned())
            .and_then(|record| record.legal_hold)
            .map(|hold| hold.expires_at <= Utc::now())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::policy_manager::PolicyManager;
    use crate::store::{MemoryStateStore, StateStore};
    use erasure_common::{CreateErasureRequest, Jurisdiction, StepStatus, UserIdentifiers};

    fn setup() -> (LegalHoldManager, Arc<WorkflowStateManager>, Uuid) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        let policy = Arc::new(PolicyManager::new(store.clone()));
        let workflows = Arc::new(WorkflowStateManager::new(store, audit, policy));
        let created = workflows
            .create_workflow(CreateErasureRequest {
                user_identifiers: UserIdentifiers::new("u1"),
                jurisdiction: Jurisdiction::Eu,
                requested_by: "legal".into(),
                legal_proof: "proof".into(),
                reason: None,
                original_workflow_id: None,
            })
            .unwrap();
        (
            LegalHoldManager::new(workflows.clone()),
            workflows,
            created.workflow_id,
        )
    }

    #[test]
    fn applying_a_hold_freezes_the_step_and_satisfies_checkpoint() {
        let (manager, workflows, workflow_id) = setup();
        manager
            .apply_hold(
                workflow_id,
                "stripe",
                vec!["active_litigation".into()],
                365,
            )
            .unwrap();
        let workflow = workflows.load_workflow(workflow_id).unwrap();
        let record = &workflow.steps["stripe"];
        assert_eq!(record.status, StepStatus::LegalHold);
        assert!(record.status.satisfies_checkpoint());
        assert!(record.legal_hold.is_some());
    }

    #[test]
    fn holding_an_already_deleted_step_is_rejected() {
        let (manager, workflows, workflow_id) = setup();
        workflows
            .record_receipt(workflow_id, "stripe", "receipt-1".into(), None)
            .unwrap();
        let err = manager
            .apply_hold(workflow_id, "stripe", vec!["active_litigation".into()], 365)
            .unwrap_err();
        assert!(matches!(err, LegalHoldError::Held { .. }));
    }
}
