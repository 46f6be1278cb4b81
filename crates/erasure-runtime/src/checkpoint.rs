//! Checkpoint validator (spec.md §4.8): the join-point that aggregates
//! per-phase step completions and gates the next phase.
//!
//! Open question pinned per DESIGN.md: a FAILED parallel step counts toward
//! checkpoint completion (the validator's `completed ∪ failed ⊇ required`
//! rule), while the certificate generator still records it as an exception.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use erasure_common::{
    AuditEventType, BusEvent, CheckpointPhasePayload, CheckpointRecord, CheckpointStatus,
    CheckpointValidationPayload, ParallelTriggerPayload, Phase, StepStatus, System, WorkflowCompletedPayload,
    WorkflowStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::AuditLog;
use crate::bus::Bus;
use crate::policy_manager::PolicyManager;
use crate::store::{ns, StateStore};
use crate::workflow_manager::WorkflowStateManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepProgress {
    status: StepStatus,
    completed_at: chrono::DateTime<Utc>,
}

pub struct CheckpointValidator {
    store: Arc<dyn StateStore>,
    workflows: Arc<WorkflowStateManager>,
    audit: Arc<AuditLog>,
    policy: Arc<PolicyManager>,
    bus: Bus,
}

impl CheckpointValidator {
    pub fn new(
        store: Arc<dyn StateStore>,
        workflows: Arc<WorkflowStateManager>,
        audit: Arc<AuditLog>,
        policy: Arc<PolicyManager>,
        bus: Bus,
    ) -> Self {
        Self {
            store,
            workflows,
            audit,
            policy,
            bus,
        }
    }

    fn load_progress(&self, workflow_id: uuid::Uuid) -> anyhow::Result<BTreeMap<String, StepProgress>> {
        let ns = ns::checkpoint(&workflow_id.to_string());
        match self.store.get(&ns, "progress")? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(BTreeMap::new()),
        }
    }

    fn save_progress(
        &self,
        workflow_id: uuid::Uuid,
        progress: &BTreeMap<String, StepProgress>,
    ) -> anyhow::Result<()> {
        let ns = ns::checkpoint(&workflow_id.to_string());
        self.store.set(&ns, "progress", serde_json::to_value(progress)?)
    }

    fn required_for(&self, phase: Phase, jurisdiction: erasure_common::Jurisdiction) -> Vec<System> {
        match phase {
            Phase::IdentityCritical => System::IDENTITY_CRITICAL.to_vec(),
            Phase::ParallelDeletion | Phase::Background => {
                let policy = self.policy.get_policy_for_jurisdiction(jurisdiction);
                policy.non_critical_systems()
            }
            Phase::Created | Phase::Completed => vec![],
        }
    }
}

#[async_trait]
impl crate::dispatcher::Handler for CheckpointValidator {
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        let BusEvent::CheckpointValidation(CheckpointValidationPayload {
            workflow_id,
            step_name,
            status,
            completed_at,
        }) = event
        else {
            return Ok(());
        };

        let mut progress = self.load_progress(*workflow_id)?;
        // Idempotent record: never downgrade a step away from a terminal status
        // already recorded for it (spec.md §4.8 step 1).
        let already_terminal = progress
            .get(step_name)
            .map(|p| p.status.is_terminal())
            .unwrap_or(false);
        if !already_terminal {
            progress.insert(
                step_name.clone(),
                StepProgress {
                    status: *status,
                    completed_at: *completed_at,
                },
            );
            self.save_progress(*workflow_id, &progress)?;
        }

        let workflow = self.workflows.load_workflow(*workflow_id)?;
        let phase = workflow.phase;
        let required = self.required_for(phase, workflow.jurisdiction);
        if required.is_empty() {
            return Ok(());
        }

        let completed: Vec<&str> = required
            .iter()
            .filter(|s| {
                progress
                    .get(s.as_str())
                    .map(|p| p.status.satisfies_checkpoint())
                    .unwrap_or(false)
            })
            .map(|s| s.as_str())
            .collect();
        let failed: Vec<&str> = required
            .iter()
            .filter(|s| {
                progress
                    .get(s.as_str())
                    .map(|p| p.status == StepStatus::Failed)
                    .unwrap_or(false)
            })
            .map(|s| s.as_str())
            .collect();

        if completed.len() + failed.len() < required.len() {
            return Ok(());
        }

        // Tie-break: a phase that has already advanced past `phase` does not
        // re-trigger a transition for late-arriving events (spec.md §4.8 tie-breaks).
        if workflow.checkpoints.contains_key(phase.as_key()) {
            return Ok(());
        }

        let record = CheckpointRecord {
            status: if failed.is_empty() {
                CheckpointStatus::Passed
            } else {
                CheckpointStatus::Failed
            },
            validated_steps: completed.iter().map(|s| s.to_string()).collect(),
            failed_steps: failed.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
        };
        self.workflows
            .record_checkpoint(*workflow_id, phase.as_key(), record.clone())?;

        if failed.is_empty() {
            self.audit.append(
                *workflow_id,
                workflow.created_at,
                AuditEventType::CheckpointPassed,
                json!({"phase": phase.as_key()}),
                json!({}),
            )?;
            self.bus
                .emit(BusEvent::CheckpointPassed(CheckpointPhasePayload {
                    workflow_id: *workflow_id,
                    phase,
                }))
                .await?;

            match phase {
                Phase::IdentityCritical => {
                    self.workflows.set_identity_critical_completed(*workflow_id)?;
                    self.workflows.advance_phase(*workflow_id, Phase::ParallelDeletion)?;
                    let policy = self.policy.get_policy_for_jurisdiction(workflow.jurisdiction);
                    let steps = policy
                        .non_critical_systems()
                        .into_iter()
                        .map(|s| s.as_str().to_string())
                        .collect();
                    self.bus
                        .emit(BusEvent::ParallelDeletionTrigger(ParallelTriggerPayload {
                            workflow_id: *workflow_id,
                            steps,
                        }))
                        .await?;
                }
                Phase::ParallelDeletion => {
                    self.workflows.advance_phase(*workflow_id, Phase::Completed)?;
                    self.workflows
                        .set_status(*workflow_id, WorkflowStatus::Completed)
                        .ok();
                    self.bus
                        .emit(BusEvent::WorkflowCompleted(WorkflowCompletedPayload {
                            workflow_id: *workflow_id,
                        }))
                        .await?;
                }
                _ => {}
            }
        } else {
            self.audit.append(
                *workflow_id,
                workflow.created_at,
                AuditEventType::CheckpointFailed,
                json!({"phase": phase.as_key(), "failed_steps": record.failed_steps}),
                json!({}),
            )?;
            self.bus
                .emit(BusEvent::CheckpointFailed(CheckpointPhasePayload {
                    workflow_id: *workflow_id,
                    phase,
                }))
                .await?;

            if phase == Phase::ParallelDeletion {
                self.workflows.advance_phase(*workflow_id, Phase::Completed)?;
                self.workflows
                    .set_status(*workflow_id, WorkflowStatus::CompletedWithExceptions)
                    .ok();
                self.bus
                    .emit(BusEvent::WorkflowCompleted(WorkflowCompletedPayload {
                        workflow_id: *workflow_id,
                    }))
                    .await?;
            } else {
                self.workflows
                    .set_status(*workflow_id, WorkflowStatus::AwaitingManualReview)
                    .ok();
            }
        }

        Ok(())
    }
}
