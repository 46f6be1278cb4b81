use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::identifiers::System;
use crate::workflow::{CreateErasureRequest, Phase, StepStatus};

/// Audit event taxonomy (spec.md §4.3, extended with the two types referenced
/// in prose at §4.7 and §4.11 but omitted from the enumerated set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    WorkflowCreated,
    IdentityCriticalPhaseStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    StateUpdated,
    CheckpointPassed,
    CheckpointFailed,
    CertificateGenerated,
    ZombieCheckScheduled,
    ZombieCheckCompleted,
    ZombieCheckFailed,
    ZombieDataDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    WorkflowCreated,
    StripeDeletion,
    DatabaseDeletion,
    IntercomDeletion,
    SendgridDeletion,
    CrmDeletion,
    AnalyticsDeletion,
    StepCompleted,
    StepFailed,
    ParallelStepCompleted,
    CheckpointValidation,
    CheckpointPassed,
    CheckpointFailed,
    ParallelDeletionTrigger,
    WorkflowCompleted,
    ZombieCheckScheduled,
    ZombieCheckCompleted,
    ZombieDataDetected,
    CreateErasureRequest,
    AuditLog,
}

impl System {
    pub fn deletion_topic_enum(&self) -> Topic {
        match self {
            System::Stripe => Topic::StripeDeletion,
            System::Database => Topic::DatabaseDeletion,
            System::Intercom => Topic::IntercomDeletion,
            System::Sendgrid => Topic::SendgridDeletion,
            System::Crm => Topic::CrmDeletion,
            System::Analytics => Topic::AnalyticsDeletion,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInvocation {
    pub workflow_id: Uuid,
    pub step_name: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub workflow_id: Uuid,
    pub step_name: String,
    pub status: StepStatus,
    pub attempt: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointValidationPayload {
    pub workflow_id: Uuid,
    pub step_name: String,
    pub status: StepStatus,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPhasePayload {
    pub workflow_id: Uuid,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelTriggerPayload {
    pub workflow_id: Uuid,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCreatedPayload {
    pub workflow_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCompletedPayload {
    pub workflow_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZombieCheckPayload {
    pub schedule_id: Uuid,
    pub workflow_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZombieCheckResultPayload {
    pub schedule_id: Uuid,
    pub workflow_id: Uuid,
    pub zombie_data_detected: bool,
    pub zombie_data_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZombieDataDetectedPayload {
    pub workflow_id: Uuid,
    pub severity: String,
    pub alert_legal_team: bool,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogPayload {
    pub workflow_id: Uuid,
    pub event_type: AuditEventType,
    pub data: Value,
}

/// Tagged bus envelope. Replaces the duck-typed `any` payloads the design notes
/// flag for redesign: the dispatcher routes on `type`, never on probing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BusEvent {
    WorkflowCreated(WorkflowCreatedPayload),
    StripeDeletion(StepInvocation),
    DatabaseDeletion(StepInvocation),
    IntercomDeletion(StepInvocation),
    SendgridDeletion(StepInvocation),
    CrmDeletion(StepInvocation),
    AnalyticsDeletion(StepInvocation),
    StepCompleted(StepOutcome),
    StepFailed(StepOutcome),
    ParallelStepCompleted(StepOutcome),
    CheckpointValidation(CheckpointValidationPayload),
    CheckpointPassed(CheckpointPhasePayload),
    CheckpointFailed(CheckpointPhasePayload),
    ParallelDeletionTrigger(ParallelTriggerPayload),
    WorkflowCompleted(WorkflowCompletedPayload),
    ZombieCheckScheduled(ZombieCheckPayload),
    ZombieCheckCompleted(ZombieCheckResultPayload),
    ZombieDataDetected(ZombieDataDetectedPayload),
    CreateErasureRequest(Box<CreateErasureRequest>),
    AuditLog(AuditLogPayload),
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::WorkflowCreated(_) => Topic::WorkflowCreated,
            BusEvent::StripeDeletion(_) => Topic::StripeDeletion,
            BusEvent::DatabaseDeletion(_) => Topic::DatabaseDeletion,
            BusEvent::IntercomDeletion(_) => Topic::IntercomDeletion,
            BusEvent::SendgridDeletion(_) => Topic::SendgridDeletion,
            BusEvent::CrmDeletion(_) => Topic::CrmDeletion,
            BusEvent::AnalyticsDeletion(_) => Topic::AnalyticsDeletion,
            BusEvent::StepCompleted(_) => Topic::StepCompleted,
            BusEvent::StepFailed(_) => Topic::StepFailed,
            BusEvent::ParallelStepCompleted(_) => Topic::ParallelStepCompleted,
            BusEvent::CheckpointValidation(_) => Topic::CheckpointValidation,
            BusEvent::CheckpointPassed(_) => Topic::CheckpointPassed,
            BusEvent::CheckpointFailed(_) => Topic::CheckpointFailed,
            BusEvent::ParallelDeletionTrigger(_) => Topic::ParallelDeletionTrigger,
            BusEvent::WorkflowCompleted(_) => Topic::WorkflowCompleted,
            BusEvent::ZombieCheckScheduled(_) => Topic::ZombieCheckScheduled,
            BusEvent::ZombieCheckCompleted(_) => Topic::ZombieCheckCompleted,
            BusEvent::ZombieDataDetected(_) => Topic::ZombieDataDetected,
            BusEvent::CreateErasureRequest(_) => Topic::CreateErasureRequest,
            BusEvent::AuditLog(_) => Topic::AuditLog,
        }
    }

    /// The workflow this event serializes with respect to, used for shard routing
    /// (spec.md §4.5, "per-workflow ordering"). `None` for events with no workflow
    /// affinity yet (e.g. a fresh `create-erasure-request` not spawned from a zombie check).
    pub fn workflow_id(&self) -> Option<Uuid> {
        match self {
            BusEvent::WorkflowCreated(p) => Some(p.workflow_id),
            BusEvent::StripeDeletion(p)
            | BusEvent::DatabaseDeletion(p)
            | BusEvent::IntercomDeletion(p)
            | BusEvent::SendgridDeletion(p)
            | BusEvent::CrmDeletion(p)
            | BusEvent::AnalyticsDeletion(p) => Some(p.workflow_id),
            BusEvent::StepCompleted(p)
            | BusEvent::StepFailed(p)
            | BusEvent::ParallelStepCompleted(p) => Some(p.workflow_id),
            BusEvent::CheckpointValidation(p) => Some(p.workflow_id),
            BusEvent::CheckpointPassed(p) | BusEvent::CheckpointFailed(p) => Some(p.workflow_id),
            BusEvent::ParallelDeletionTrigger(p) => Some(p.workflow_id),
            BusEvent::WorkflowCompleted(p) => Some(p.workflow_id),
            BusEvent::ZombieCheckScheduled(p) => Some(p.workflow_id),
            BusEvent::ZombieCheckCompleted(p) => Some(p.workflow_id),
            BusEvent::ZombieDataDetected(p) => Some(p.workflow_id),
            BusEvent::CreateErasureRequest(p) => p.original_workflow_id,
            BusEvent::AuditLog(p) => Some(p.workflow_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::UserIdentifiers;

    #[test]
    fn tagged_envelope_round_trips() {
        let event = BusEvent::StripeDeletion(StepInvocation {
            workflow_id: Uuid::nil(),
            step_name: "stripe".into(),
            attempt: 1,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"stripe-deletion\""));
        let back: BusEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.topic(), Topic::StripeDeletion);
    }

    #[test]
    fn workflow_id_extraction_covers_create_request_without_origin() {
        let event = BusEvent::CreateErasureRequest(Box::new(CreateErasureRequest {
            user_identifiers: UserIdentifiers::new("u1"),
            jurisdiction: crate::identifiers::Jurisdiction::Eu,
            requested_by: "api".into(),
            legal_proof: "proof".into(),
            reason: None,
            original_workflow_id: None,
        }));
        assert_eq!(event.workflow_id(), None);
    }
}
