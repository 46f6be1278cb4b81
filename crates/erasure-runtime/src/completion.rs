//! Completion handler and certificate generator (spec.md §4.10).
//!
//! Subscribes to `workflow-completed`. Gathers per-system evidence into a
//! signed `Certificate`, schedules the zombie re-verification check, and
//! leaves workflow status untouched (the checkpoint validator already set it
//! to `COMPLETED` or `COMPLETED_WITH_EXCEPTIONS`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use erasure_common::{AuditEventType, BusEvent, Certificate, CertificateException, System, SystemReceipt};
use serde_json::json;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::crypto::SigningContext;
use crate::policy_manager::PolicyManager;
use crate::store::{ns, StateStore};
use crate::workflow_manager::WorkflowStateManager;
use crate::zombie_scheduler::ZombieScheduler;

#[cfg(test)]
use crate::store::MemoryStateStore;

pub struct CompletionHandler {
    store: Arc<dyn StateStore>,
    workflows: Arc<WorkflowStateManager>,
    audit: Arc<AuditLog>,
    policy: Arc<PolicyManager>,
    signing: Arc<SigningContext>,
    zombie: Arc<ZombieScheduler>,
}

impl CompletionHandler {
    pub fn new(
        store: Arc<dyn StateStore>,
        workflows: Arc<WorkflowStateManager>,
        audit: Arc<AuditLog>,
        policy: Arc<PolicyManager>,
        signing: Arc<SigningContext>,
        zombie: Arc<ZombieScheduler>,
    ) -> Self {
        Self {
            store,
            workflows,
            audit,
            policy,
            signing,
            zombie,
        }
    }

    fn save_certificate(&self, certificate: &Certificate) -> anyhow::Result<()> {
        self.store.set(
            ns::CERTIFICATE,
            &certificate.workflow_id.to_string(),
            serde_json::to_value(certificate)?,
        )
    }

    pub fn load_certificate(&self, workflow_id: Uuid) -> anyhow::Result<Option<Certificate>> {
        match self.store.get(ns::CERTIFICATE, &workflow_id.to_string())? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl crate::dispatcher::Handler for CompletionHandler {
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        let BusEvent::WorkflowCompleted(payload) = event else {
            return Ok(());
        };
        let workflow_id = payload.workflow_id;
        let workflow = self.workflows.load_workflow(workflow_id)?;
        let policy = self.policy.get_policy_for_jurisdiction(workflow.jurisdiction);

        let mut system_receipts = Vec::new();
        let mut exceptions = Vec::new();
        for system in System::ALL {
            let Some(record) = workflow.steps.get(system.as_str()) else {
                continue;
            };
            system_receipts.push(SystemReceipt {
                system,
                receipt: record.evidence.receipt.clone(),
                status: record.status,
            });
            match record.status {
                erasure_common::StepStatus::Failed => exceptions.push(CertificateException {
                    system,
                    reason: "step failed after exhausting retries".into(),
                }),
                erasure_common::StepStatus::LegalHold => exceptions.push(CertificateException {
                    system,
                    reason: record
                        .legal_hold
                        .as_ref()
                        .map(|h| h.conditions.join(", "))
                        .unwrap_or_else(|| "legal hold".into()),
                }),
                _ => {}
            }
        }

        let audit_hash_root = self.audit.load(workflow_id)?.last_hash(workflow.created_at);
        let issued_at = Utc::now();
        let certificate_id = Uuid::new_v4();
        let signature = if policy.certificate.sign_certificates {
            Some(self.signing.sign_certificate(
                &workflow_id.to_string(),
                &audit_hash_root,
                &workflow.policy_version,
                &issued_at.to_rfc3339(),
            ))
        } else {
            None
        };

        let certificate = Certificate {
            certificate_id,
            workflow_id,
            audit_hash_root,
            signature,
            system_receipts,
            policy_version: workflow.policy_version.clone(),
            issued_at,
            exceptions,
        };
        self.save_certificate(&certificate)?;
        self.audit.append(
            workflow_id,
            workflow.created_at,
            AuditEventType::CertificateGenerated,
            json!({"certificate_id": certificate_id}),
            json!({}),
        )?;

        let schedule = self
            .zombie
            .schedule_zombie_check(workflow_id, &workflow, issued_at)
            .await?;
        self.audit.append(
            workflow_id,
            workflow.created_at,
            AuditEventType::ZombieCheckScheduled,
            json!({"schedule_id": schedule.schedule_id, "scheduled_for": schedule.scheduled_for}),
            json!({}),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::connector::FakeConnector;
    use crate::dispatcher::{Dispatcher, DispatcherConfig, Handler};
    use erasure_common::{CreateErasureRequest, Jurisdiction, Phase, UserIdentifiers, WorkflowCompletedPayload};

    /// A bus backed by a dispatcher kept alive for the test's duration
    /// (leaked, test-only) so the zombie scheduler's `bus.emit` calls have
    /// somewhere to go instead of silently failing against a dropped dispatcher.
    fn test_bus() -> Bus {
        let (dispatcher, _receivers) = Dispatcher::new(DispatcherConfig::default());
        let dispatcher: &'static Arc<Dispatcher> = Box::leak(Box::new(Arc::new(dispatcher)));
        Bus::new(dispatcher)
    }

    fn setup() -> (Arc<CompletionHandler>, Arc<WorkflowStateManager>, Uuid) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        let policy = Arc::new(PolicyManager::new(store.clone()));
        let workflows = Arc::new(WorkflowStateManager::new(store.clone(), audit.clone(), policy.clone()));

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
            .record_receipt(created.workflow_id, "stripe", "receipt-1".into(), None)
            .unwrap();
        workflows
            .record_receipt(created.workflow_id, "database", "receipt-2".into(), None)
            .unwrap();
        workflows.advance_phase(created.workflow_id, Phase::IdentityCritical).unwrap();
        workflows.advance_phase(created.workflow_id, Phase::ParallelDeletion).unwrap();
        workflows.advance_phase(created.workflow_id, Phase::Completed).unwrap();

        let connectors: Vec<Arc<dyn crate::connector::Connector>> = System::ALL
            .iter()
            .map(|s| Arc::new(FakeConnector::new(*s, 0)) as Arc<dyn crate::connector::Connector>)
            .collect();
        let zombie = Arc::new(ZombieScheduler::new(
            store.clone(),
            policy.clone(),
            connectors,
            test_bus(),
        ));
        let signing = Arc::new(SigningContext::generate());
        let handler = Arc::new(CompletionHandler::new(
            store,
            workflows.clone(),
            audit,
            policy,
            signing,
            zombie,
        ));
        (handler, workflows, created.workflow_id)
    }

    #[tokio::test]
    async fn completion_generates_a_signed_certificate_with_receipts() {
        let (handler, _workflows, workflow_id) = setup();
        handler
            .handle(&BusEvent::WorkflowCompleted(WorkflowCompletedPayload { workflow_id }))
            .await
            .unwrap();
        let certificate = handler.load_certificate(workflow_id).unwrap().unwrap();
        assert_eq!(certificate.workflow_id, workflow_id);
        assert!(certificate.signature.is_some());
        assert!(certificate.exceptions.is_empty());
        assert!(certificate
            .system_receipts
            .iter()
            .any(|r| r.system == System::Stripe && r.receipt.as_deref() == Some("receipt-1")));
    }
}
