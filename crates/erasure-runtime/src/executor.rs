//! Step executors (spec.md §4.6).
//!
//! One instance per external system, each subscribed to that system's
//! deletion topic. Connector failures never propagate out of the worker
//! (spec.md §7): the executor owns its own backoff-and-reemit cycle so the
//! dispatcher's generic retry path is reserved for unexpected (store/I-O)
//! failures, not expected connector flakiness.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use erasure_common::{
    AuditEventType, BusEvent, CheckpointValidationPayload, StepInvocation, StepOutcome, StepStatus,
    System, Topic, WorkflowStatus,
};
use serde_json::json;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::bus::Bus;
use crate::connector::Connector;
use crate::dispatcher::{Handler, RetryPolicy};
use crate::workflow_manager::WorkflowStateManager;

pub struct StepExecutor {
    system: System,
    connector: Arc<dyn Connector>,
    workflows: Arc<WorkflowStateManager>,
    audit: Arc<AuditLog>,
    bus: Bus,
    retry: RetryPolicy,
}

impl StepExecutor {
    pub fn new(
        system: System,
        connector: Arc<dyn Connector>,
        workflows: Arc<WorkflowStateManager>,
        audit: Arc<AuditLog>,
        bus: Bus,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            system,
            connector,
            workflows,
            audit,
            bus,
            retry,
        }
    }

    fn step_name(&self) -> String {
        self.system.as_str().to_string()
    }

    async fn emit_checkpoint_validation(&self, workflow_id: uuid::Uuid, status: StepStatus) -> anyhow::Result<()> {
        self.bus
            .emit(BusEvent::CheckpointValidation(CheckpointValidationPayload {
                workflow_id,
                step_name: self.step_name(),
                status,
                completed_at: chrono::Utc::now(),
            }))
            .await
    }

    async fn chain_next_identity_critical(&self, workflow_id: uuid::Uuid) -> anyhow::Result<()> {
        if self.system == System::Stripe {
            self.bus
                .emit(BusEvent::DatabaseDeletion(StepInvocation {
                    workflow_id,
                    step_name: System::Database.as_str().to_string(),
                    attempt: 1,
                }))
                .await?;
        }
        Ok(())
    }

    fn invocation_for(&self, workflow_id: uuid::Uuid, attempt: u32) -> BusEvent {
        let invocation = StepInvocation {
            workflow_id,
            step_name: self.step_name(),
            attempt,
        };
        match self.system {
            System::Stripe => BusEvent::StripeDeletion(invocation),
            System::Database => BusEvent::DatabaseDeletion(invocation),
            System::Intercom => BusEvent::IntercomDeletion(invocation),
            System::Sendgrid => BusEvent::SendgridDeletion(invocation),
            System::Crm => BusEvent::CrmDeletion(invocation),
            System::Analytics => BusEvent::AnalyticsDeletion(invocation),
        }
    }

    fn schedule_retry(&self, workflow_id: uuid::Uuid, next_attempt: u32) {
        let delay = self.retry.delay_for_attempt(next_attempt);
        let bus = self.bus.clone();
        let event = self.invocation_for(workflow_id, next_attempt);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = bus.emit(event).await {
                warn!(%err, "failed to re-emit step invocation after backoff");
            }
        });
    }
}

#[async_trait]
impl Handler for StepExecutor {
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        let invocation = match event {
            BusEvent::StripeDeletion(p)
            | BusEvent::DatabaseDeletion(p)
            | BusEvent::IntercomDeletion(p)
            | BusEvent::SendgridDeletion(p)
            | BusEvent::CrmDeletion(p)
            | BusEvent::AnalyticsDeletion(p) => p,
            _ => return Ok(()),
        };

        let workflow_id = invocation.workflow_id;
        let step_name = self.step_name();
        let attempt = invocation.attempt;

        let workflow = self.workflows.load_workflow(workflow_id)?;
        if workflow.cancelled {
            return Ok(());
        }

        // Legal hold applied before this invocation landed: do not call the connector.
        if let Some(record) = workflow.steps.get(&step_name) {
            if record.status == StepStatus::LegalHold {
                self.emit_checkpoint_validation(workflow_id, StepStatus::LegalHold).await?;
                return Ok(());
            }
        }

        if !self.system.is_identity_critical() && !workflow.identity_critical_completed {
            self.workflows
                .set_status(workflow_id, WorkflowStatus::AwaitingManualReview)
                .ok();
            self.audit.append(
                workflow_id,
                workflow.created_at,
                AuditEventType::StateUpdated,
                json!({"error": "Identity-critical checkpoint not completed"}),
                json!({"step_name": step_name}),
            )?;
            return Ok(());
        }

        self.workflows.update_step(workflow_id, &step_name, |record| {
            record.status = StepStatus::InProgress;
            record.attempts = attempt;
        })?;
        self.audit.append(
            workflow_id,
            workflow.created_at,
            AuditEventType::StepStarted,
            json!({"step_name": step_name, "attempt": attempt}),
            json!({}),
        )?;

        let result = self.connector.delete_user(&workflow.user_identifiers.user_id).await;

        if result.success {
            let receipt = result.receipt.unwrap_or_default();
            self.workflows
                .record_receipt(workflow_id, &step_name, receipt, result.api_response)?;
            self.audit.append(
                workflow_id,
                workflow.created_at,
                AuditEventType::StepCompleted,
                json!({"step_name": step_name, "attempt": attempt}),
                json!({}),
            )?;
            self.bus
                .emit(BusEvent::StepCompleted(StepOutcome {
                    workflow_id,
                    step_name: step_name.clone(),
                    status: StepStatus::Deleted,
                    attempt,
                    error: None,
                }))
                .await?;
            if !self.system.is_identity_critical() {
                self.bus
                    .emit(BusEvent::ParallelStepCompleted(StepOutcome {
                        workflow_id,
                        step_name: step_name.clone(),
                        status: StepStatus::Deleted,
                        attempt,
                        error: None,
                    }))
                    .await?;
            }
            self.emit_checkpoint_validation(workflow_id, StepStatus::Deleted).await?;
            self.chain_next_identity_critical(workflow_id).await?;
            return Ok(());
        }

        let error = result.error.unwrap_or_else(|| "unknown connector error".into());
        if attempt < self.retry.max_attempts {
            info!(%workflow_id, %step_name, attempt, "step failed, retrying after backoff");
            self.schedule_retry(workflow_id, attempt + 1);
            return Ok(());
        }

        self.workflows.update_step(workflow_id, &step_name, |record| {
            record.status = StepStatus::Failed;
            record.attempts = attempt;
        })?;
        self.audit.append(
            workflow_id,
            workflow.created_at,
            AuditEventType::StepFailed,
            json!({"step_name": step_name, "attempt": attempt, "error": error}),
            json!({}),
        )?;
        self.bus
            .emit(BusEvent::StepFailed(StepOutcome {
                workflow_id,
                step_name: step_name.clone(),
                status: StepStatus::Failed,
                attempt,
                error: Some(error),
            }))
            .await?;
        self.emit_checkpoint_validation(workflow_id, StepStatus::Failed).await?;
        Ok(())
    }
}

pub fn topic_for(system: System) -> Topic {
    system.deletion_topic_enum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::FakeConnector;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::policy_manager::PolicyManager;
    use crate::store::{MemoryStateStore, StateStore};
    use erasure_common::{CreateErasureRequest, Jurisdiction, UserIdentifiers};

    fn setup() -> (
        Arc<Dispatcher>,
        Arc<WorkflowStateManager>,
        Arc<AuditLog>,
        uuid::Uuid,
    ) {
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
        workflows
            .set_identity_critical_completed(created.workflow_id)
            .unwrap();
        workflows
            .advance_phase(created.workflow_id, erasure_common::Phase::IdentityCritical)
            .unwrap();

        let (dispatcher, receivers) = Dispatcher::new(DispatcherConfig::default().with_shard_count(1));
        let dispatcher = Arc::new(dispatcher);
        let _workers = dispatcher.spawn_workers(receivers);

        (dispatcher, workflows, audit, created.workflow_id)
    }

    #[tokio::test]
    async fn successful_delete_marks_step_deleted_and_chains_database() {
        let (dispatcher, workflows, _audit, workflow_id) = setup();
        let bus = Bus::new(&dispatcher);
        let connector = Arc::new(FakeConnector::new(System::Stripe, 0));
        let db_connector = Arc::new(FakeConnector::new(System::Database, 0));

        let stripe_executor = Arc::new(StepExecutor::new(
            System::Stripe,
            connector,
            workflows.clone(),
            _audit.clone(),
            bus.clone(),
            RetryPolicy::default(),
        ));
        let db_executor = Arc::new(StepExecutor::new(
            System::Database,
            db_connector,
            workflows.clone(),
            _audit.clone(),
            bus.clone(),
            RetryPolicy::default(),
        ));
        dispatcher.register(Topic::StripeDeletion, stripe_executor);
        dispatcher.register(Topic::DatabaseDeletion, db_executor);

        dispatcher
            .emit(BusEvent::StripeDeletion(StepInvocation {
                workflow_id,
                step_name: "stripe".into(),
                attempt: 1,
            }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let workflow = workflows.load_workflow(workflow_id).unwrap();
        assert_eq!(workflow.steps["stripe"].status, StepStatus::Deleted);
        assert_eq!(workflow.steps["database"].status, StepStatus::Deleted);
    }

    #[tokio::test]
    async fn permanent_failure_sets_step_failed_after_max_attempts() {
        let (dispatcher, workflows, audit, workflow_id) = setup();
        let bus = Bus::new(&dispatcher);
        let connector = Arc::new(FakeConnector::new(System::Stripe, 100));
        let executor = Arc::new(StepExecutor::new(
            System::Stripe,
            connector,
            workflows.clone(),
            audit,
            bus,
            RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(2),
                backoff_multiplier: 1.0,
            },
        ));
        dispatcher.register(Topic::StripeDeletion, executor);

        dispatcher
            .emit(BusEvent::StripeDeletion(StepInvocation {
                workflow_id,
                step_name: "stripe".into(),
                attempt: 1,
            }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let workflow = workflows.load_workflow(workflow_id).unwrap();
        assert_eq!(workflow.steps["stripe"].status, StepStatus::Failed);
        assert_eq!(workflow.steps["stripe"].attempts, 3);
    }
}
