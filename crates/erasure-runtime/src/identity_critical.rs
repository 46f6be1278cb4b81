//! Identity-critical orchestrator (spec.md §4.7).
//!
//! Subscribes to `workflow-created`. Its only job is to flip the phase to
//! `identity-critical` and kick off the first step in the sequential chain
//! (payments, then the primary database, chained by the step executor itself).

use std::sync::Arc;

use async_trait::async_trait;
use erasure_common::{AuditEventType, BusEvent, Phase, StepInvocation, System};
use serde_json::json;

use crate::audit::AuditLog;
use crate::bus::Bus;
use crate::dispatcher::Handler;
use crate::workflow_manager::WorkflowStateManager;

pub struct IdentityCriticalOrchestrator {
    workflows: Arc<WorkflowStateManager>,
    audit: Arc<AuditLog>,
    bus: Bus,
}

impl IdentityCriticalOrchestrator {
    pub fn new(workflows: Arc<WorkflowStateManager>, audit: Arc<AuditLog>, bus: Bus) -> Self {
        Self { workflows, audit, bus }
    }
}

#[async_trait]
impl Handler for IdentityCriticalOrchestrator {
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        let BusEvent::WorkflowCreated(payload) = event else {
            return Ok(());
        };
        let workflow_id = payload.workflow_id;
        let workflow = self.workflows.load_workflow(workflow_id)?;
        if workflow.phase != Phase::Created {
            return Ok(());
        }

        self.workflows.advance_phase(workflow_id, Phase::IdentityCritical)?;
        self.audit.append(
            workflow_id,
            workflow.created_at,
            AuditEventType::IdentityCriticalPhaseStarted,
            json!({}),
            json!({}),
        )?;

        self.bus
            .emit(BusEvent::StripeDeletion(StepInvocation {
                workflow_id,
                step_name: System::Stripe.as_str().to_string(),
                attempt: 1,
            }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::policy_manager::PolicyManager;
    use crate::store::{MemoryStateStore, StateStore};
    use erasure_common::{CreateErasureRequest, Jurisdiction, UserIdentifiers, WorkflowCreatedPayload};

    #[tokio::test]
    async fn sets_phase_and_emits_stripe_deletion() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        let policy = Arc::new(PolicyManager::new(store.clone()));
        let workflows = Arc::new(WorkflowStateManager::new(store, audit.clone(), policy));

        let created = workflows
            .create_workflow(CreateErasureRequest {
                user_identifiers: UserIdentifiers::new("u1"),
                jurisdiction: Jurisdiction::Eu,
                requested_by: "api".into(),
                legal_proof: "proof".into(),
                reason: None,
                original_workflow_id: None,
            })
            .unwrap();

        let (dispatcher, receivers) = Dispatcher::new(DispatcherConfig::default());
        let dispatcher = Arc::new(dispatcher);
        let _workers = dispatcher.spawn_workers(receivers);
        let bus = Bus::new(&dispatcher);

        let orchestrator = IdentityCriticalOrchestrator::new(workflows.clone(), audit, bus);
        orchestrator
            .handle(&BusEvent::WorkflowCreated(WorkflowCreatedPayload {
                workflow_id: created.workflow_id,
            }))
            .await
            .unwrap();

        let workflow = workflows.load_workflow(created.workflow_id).unwrap();
        assert_eq!(workflow.phase, Phase::IdentityCritical);
    }
}
