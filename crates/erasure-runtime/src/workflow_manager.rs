//! Workflow state manager (spec.md §4.4).
//!
//! Owns workflow creation (with request-hash dedupe and the user lock),
//! transactional step/checkpoint updates, and phase transitions. Callers must
//! not interleave updates to the same workflow without external serialization —
//! the dispatcher's per-workflow shard affinity (§4.5) provides that.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use erasure_common::{
    AuditEventType, CheckpointRecord, CheckpointStatus, CreateErasureRequest, Phase, StepEvidence,
    StepRecord, StepStatus, UserIdentifiers, ValidationError, Workflow, WorkflowStateError,
    WorkflowStatus,
};
use serde_json::json;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::crypto::{canonicalize, sha256_hex};
use crate::policy_manager::PolicyManager;
use crate::store::{ns, StateStore};

pub struct WorkflowStateManager {
    store: Arc<dyn StateStore>,
    audit: Arc<AuditLog>,
    policy: Arc<PolicyManager>,
}

pub struct CreatedWorkflow {
    pub workflow_id: Uuid,
    pub workflow: Workflow,
    pub newly_created: bool,
}

impl WorkflowStateManager {
    pub fn new(store: Arc<dyn StateStore>, audit: Arc<AuditLog>, policy: Arc<PolicyManager>) -> Self {
        Self { store, audit, policy }
    }

    fn validate(req: &CreateErasureRequest) -> Result<(), ValidationError> {
        if req.user_identifiers.user_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId);
        }
        if req.legal_proof.trim().is_empty() {
            return Err(ValidationError::MissingLegalProof);
        }
        if req.requested_by.trim().is_empty() {
            return Err(ValidationError::MissingRequestedBy);
        }
        Ok(())
    }

    fn request_hash(identifiers: &UserIdentifiers, legal_proof: &str, jurisdiction: &str) -> anyhow::Result<String> {
        let canonical = canonicalize(&(identifiers, legal_proof, jurisdiction))?;
        Ok(sha256_hex(canonical.as_bytes()))
    }

    /// `createWorkflow` (spec.md §4.4). Idempotent: a repeat call with the same
    /// `(userIdentifiers, legalProof, jurisdiction)`, or a call for a user that
    /// already has an active workflow, returns the existing workflow unchanged.
    pub fn create_workflow(&self, req: CreateErasureRequest) -> anyhow::Result<CreatedWorkflow> {
        Self::validate(&req).map_err(anyhow::Error::from)?;

        let req_hash = Self::request_hash(
            &req.user_identifiers,
            &req.legal_proof,
            &req.jurisdiction.to_string(),
        )?;

        if let Some(existing_id) = self.store.get(ns::REQUEST, &req_hash)? {
            let workflow_id: Uuid = serde_json::from_value(existing_id)?;
            let workflow = self.load_workflow(workflow_id)?;
            return Ok(CreatedWorkflow {
                workflow_id,
                workflow,
                newly_created: false,
            });
        }

        let user_lock_key = format!("user:{}", req.user_identifiers.user_id);
        if let Some(existing_id) = self.store.get(ns::USER_LOCK, &user_lock_key)? {
            let workflow_id: Uuid = serde_json::from_value(existing_id)?;
            if let Ok(workflow) = self.load_workflow(workflow_id) {
                if !workflow.status.is_terminal() {
                    return Ok(CreatedWorkflow {
                        workflow_id,
                        workflow,
                        newly_created: false,
                    });
                }
            }
        }

        let workflow_id = Uuid::new_v4();
        let now = Utc::now();
        let policy = self.policy.get_policy_for_jurisdiction(req.jurisdiction);
        self.policy.record_policy_application(workflow_id, &policy)?;

        let workflow = Workflow {
            workflow_id,
            request_id: Uuid::new_v4(),
            user_identifiers: req.user_identifiers.clone(),
            jurisdiction: req.jurisdiction,
            requested_by: req.requested_by.clone(),
            legal_proof: req.legal_proof.clone(),
            policy_version: policy.version.clone(),
            phase: Phase::Created,
            status: WorkflowStatus::InProgress,
            created_at: now,
            updated_at: now,
            identity_critical_completed: false,
            steps: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
            data_lineage: None,
            cancelled: false,
            schema_version: 1,
        };

        self.save_workflow(&workflow)?;
        self.store
            .set(ns::REQUEST, &req_hash, serde_json::to_value(workflow_id)?)?;
        self.store
            .set(ns::USER_LOCK, &user_lock_key, serde_json::to_value(workflow_id)?)?;

        self.audit.append(
            workflow_id,
            now,
            AuditEventType::WorkflowCreated,
            json!({
                "workflow_id": workflow_id,
                "user_id": req.user_identifiers.user_id,
                "jurisdiction": req.jurisdiction,
                "reason": req.reason,
                "original_workflow_id": req.original_workflow_id,
            }),
            json!({}),
        )?;

        Ok(CreatedWorkflow {
            workflow_id,
            workflow,
            newly_created: true,
        })
    }

    pub fn load_workflow(&self, workflow_id: Uuid) -> Result<Workflow, WorkflowStateError> {
        let value = self
            .store
            .get(ns::WORKFLOW, &workflow_id.to_string())
            .map_err(WorkflowStateError::Store)?
            .ok_or(WorkflowStateError::NotFound(workflow_id))?;
        serde_json::from_value(value).map_err(|e| WorkflowStateError::Store(e.into()))
    }

    fn save_workflow(&self, workflow: &Workflow) -> anyhow::Result<()> {
        self.store.set(
            ns::WORKFLOW,
            &workflow.workflow_id.to_string(),
            serde_json::to_value(workflow)?,
        )
    }

    /// Read-modify-write a single step record. `f` receives the current record
    /// (created `NOT_STARTED` on first touch) and mutates it in place.
    pub fn update_step<F>(&self, workflow_id: Uuid, step_name: &str, f: F) -> Result<Workflow, WorkflowStateError>
    where
        F: FnOnce(&mut StepRecord),
    {
        let mut workflow = self.load_workflow(workflow_id)?;
        let record = workflow
            .steps
            .entry(step_name.to_string())
            .or_insert_with(StepRecord::not_started);
        f(record);
        workflow.updated_at = Utc::now();
        self.save_workflow(&workflow)
            .map_err(WorkflowStateError::Store)?;
        Ok(workflow)
    }

    /// Sets a step's `receipt` only if unset, enforcing receipt idempotence
    /// (spec.md §8, invariant 6): re-executing a successful step is a no-op.
    pub fn record_receipt(
        &self,
        workflow_id: Uuid,
        step_name: &str,
        receipt: String,
        api_response: Option<serde_json::Value>,
    ) -> Result<Workflow, WorkflowStateError> {
        self.update_step(workflow_id, step_name, |record| {
            if record.evidence.receipt.is_none() {
                record.evidence.receipt = Some(receipt);
                record.evidence.timestamp = Some(Utc::now());
                record.evidence.api_response = api_response;
            }
            record.status = StepStatus::Deleted;
        })
    }

    pub fn record_checkpoint(
        &self,
        workflow_id: Uuid,
        phase_key: &str,
        result: CheckpointRecord,
    ) -> Result<Workflow, WorkflowStateError> {
        let mut workflow = self.load_workflow(workflow_id)?;
        workflow.checkpoints.insert(phase_key.to_string(), result);
        workflow.updated_at = Utc::now();
        self.save_workflow(&workflow)
            .map_err(WorkflowStateError::Store)?;
        Ok(workflow)
    }

    /// Advances `workflow.phase`, enforcing phase monotonicity (spec.md §8, invariant 1).
    pub fn advance_phase(&self, workflow_id: Uuid, next: Phase) -> Result<Workflow, WorkflowStateError> {
        let mut workflow = self.load_workflow(workflow_id)?;
        if !workflow.phase.can_advance_to(next) {
            return Err(WorkflowStateError::IllegalPhaseTransition {
                workflow_id,
                from: format!("{:?}", workflow.phase),
                to: format!("{next:?}"),
            });
        }
        workflow.phase = next;
        workflow.updated_at = Utc::now();
        self.save_workflow(&workflow)
            .map_err(WorkflowStateError::Store)?;
        Ok(workflow)
    }

    pub fn set_status(&self, workflow_id: Uuid, status: WorkflowStatus) -> Result<Workflow, WorkflowStateError> {
        let mut workflow = self.load_workflow(workflow_id)?;
        if workflow.status.is_terminal() {
            return Err(WorkflowStateError::AlreadyTerminal(workflow_id));
        }
        workflow.status = status;
        workflow.updated_at = Utc::now();
        self.save_workflow(&workflow)
            .map_err(WorkflowStateError::Store)?;
        Ok(workflow)
    }

    pub fn set_identity_critical_completed(&self, workflow_id: Uuid) -> Result<Workflow, WorkflowStateError> {
        let mut workflow = self.load_workflow(workflow_id)?;
        workflow.identity_critical_completed = true;
        workflow.updated_at = Utc::now();
        self.save_workflow(&workflow)
            .map_err(WorkflowStateError::Store)?;
        Ok(workflow)
    }

    pub fn cancel(&self, workflow_id: Uuid) -> Result<Workflow, WorkflowStateError> {
        let mut workflow = self.load_workflow(workflow_id)?;
        if !workflow.cancelled {
            workflow.cancelled = true;
            workflow.updated_at = Utc::now();
            self.save_workflow(&workflow)
                .map_err(WorkflowStateError::Store)?;
            self.audit
                .append(
                    workflow_id,
                    workflow.created_at,
                    AuditEventType::StateUpdated,
                    json!({"cancelled": true}),
                    json!({}),
                )
                .map_err(WorkflowStateError::Store)?;
        }
        Ok(workflow)
    }
}
