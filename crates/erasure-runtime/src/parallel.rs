//! Parallel orchestrator (spec.md §4.9).
//!
//! Subscribes to `parallel-deletion-trigger`. Fans out one step invocation per
//! non-critical system named in the trigger payload. Does not advance the
//! workflow's phase itself — the checkpoint validator (§4.8) is the sole
//! authority for phase transitions; this orchestrator only validates the
//! identity-critical precondition and fans out.

use std::sync::Arc;

use async_trait::async_trait;
use erasure_common::{BusEvent, StepInvocation, System, WorkflowStateError};
use tracing::warn;

use crate::bus::Bus;
use crate::dispatcher::Handler;
use crate::workflow_manager::WorkflowStateManager;

pub struct ParallelOrchestrator {
    workflows: Arc<WorkflowStateManager>,
    bus: Bus,
}

impl ParallelOrchestrator {
    pub fn new(workflows: Arc<WorkflowStateManager>, bus: Bus) -> Self {
        Self { workflows, bus }
    }

    fn invocation_event(system: System, invocation: StepInvocation) -> Option<BusEvent> {
        match system {
            System::Intercom => Some(BusEvent::IntercomDeletion(invocation)),
            System::Sendgrid => Some(BusEvent::SendgridDeletion(invocation)),
            System::Crm => Some(BusEvent::CrmDeletion(invocation)),
            System::Analytics => Some(BusEvent::AnalyticsDeletion(invocation)),
            System::Stripe | System::Database => None,
        }
    }
}

#[async_trait]
impl Handler for ParallelOrchestrator {
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        let BusEvent::ParallelDeletionTrigger(payload) = event else {
            return Ok(());
        };
        let workflow_id = payload.workflow_id;
        let workflow = self.workflows.load_workflow(workflow_id)?;

        if !workflow.identity_critical_completed {
            return Err(WorkflowStateError::IdentityCriticalNotCompleted(workflow_id).into());
        }
        if workflow.cancelled {
            return Ok(());
        }

        for step_name in &payload.steps {
            let Some(system) = System::parse(step_name) else {
                warn!(%step_name, "unknown system named in parallel deletion trigger");
                continue;
            };
            let invocation = StepInvocation {
                workflow_id,
                step_name: step_name.clone(),
                attempt: 1,
            };
            if let Some(event) = Self::invocation_event(system, invocation) {
                self.bus.emit(event).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::policy_manager::PolicyManager;
    use crate::store::{MemoryStateStore, StateStore};
    use erasure_common::{CreateErasureRequest, Jurisdiction, ParallelTriggerPayload, UserIdentifiers};

    fn setup() -> (Arc<WorkflowStateManager>, uuid::Uuid, Arc<Dispatcher>) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        let policy = Arc::new(PolicyManager::new(store.clone()));
        let workflows = Arc::new(WorkflowStateManager::new(store, audit, policy));

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
        (workflows, created.workflow_id, dispatcher)
    }

    #[tokio::test]
    async fn rejects_fan_out_when_identity_critical_not_completed() {
        let (workflows, workflow_id, dispatcher) = setup();
        let bus = Bus::new(&dispatcher);
        let orchestrator = ParallelOrchestrator::new(workflows, bus);

        let err = orchestrator
            .handle(&BusEvent::ParallelDeletionTrigger(ParallelTriggerPayload {
                workflow_id,
                steps: vec!["intercom".into()],
            }))
            .await
            .unwrap_err();
        assert!(err
            .downcast_ref::<WorkflowStateError>()
            .map(|e| matches!(e, WorkflowStateError::IdentityCriticalNotCompleted(_)))
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn fans_out_one_event_per_non_critical_system() {
        let (workflows, workflow_id, dispatcher) = setup();
        workflows.set_identity_critical_completed(workflow_id).unwrap();
        let bus = Bus::new(&dispatcher);
        let orchestrator = ParallelOrchestrator::new(workflows, bus);

        orchestrator
            .handle(&BusEvent::ParallelDeletionTrigger(ParallelTriggerPayload {
                workflow_id,
                steps: vec!["intercom".into(), "sendgrid".into()],
            }))
            .await
            .unwrap();
    }
}
