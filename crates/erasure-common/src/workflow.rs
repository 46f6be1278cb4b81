use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::identifiers::{Jurisdiction, UserIdentifiers};

/// Phase ordering is `Created < IdentityCritical < ParallelDeletion < Background < Completed`.
/// The checkpoint validator (§4.8 of the design notes) only ever drives the
/// `Created -> IdentityCritical -> ParallelDeletion -> Completed` line today; `Background`
/// is kept as a reachable phase for forward compatibility (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Created,
    IdentityCritical,
    ParallelDeletion,
    Background,
    Completed,
}

impl Phase {
    pub fn ordinal(self) -> u8 {
        match self {
            Phase::Created => 0,
            Phase::IdentityCritical => 1,
            Phase::ParallelDeletion => 2,
            Phase::Background => 3,
            Phase::Completed => 4,
        }
    }

    /// Phase monotonicity invariant (spec.md §8, invariant 1): a transition is legal
    /// iff it strictly increases the ordinal.
    pub fn can_advance_to(self, next: Phase) -> bool {
        next.ordinal() > self.ordinal()
    }

    /// Key used to index `Workflow::checkpoints` and the `gdpr-checkpoint-*`
    /// namespace, matching this type's kebab-case serde representation.
    pub fn as_key(self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::IdentityCritical => "identity-critical",
            Phase::ParallelDeletion => "parallel-deletion",
            Phase::Background => "background",
            Phase::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    InProgress,
    AwaitingManualReview,
    Completed,
    CompletedWithExceptions,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::CompletedWithExceptions
                | WorkflowStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Deleted,
    Failed,
    LegalHold,
}

impl StepStatus {
    /// Steps that satisfy checkpoint completion (§4.8 step 2).
    pub fn satisfies_checkpoint(self) -> bool {
        matches!(self, StepStatus::Deleted | StepStatus::LegalHold)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Deleted | StepStatus::Failed | StepStatus::LegalHold
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    Passed,
    Failed,
}

/// Evidence written once a step's connector call succeeds. The `receipt` is the
/// idempotence key: once set it is never overwritten (spec.md §8, invariant 6).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepEvidence {
    pub receipt: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub api_response: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalHoldInfo {
    pub conditions: Vec<String>,
    pub max_duration_days: u32,
    pub applied_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    pub attempts: u32,
    pub evidence: StepEvidence,
    pub legal_hold: Option<LegalHoldInfo>,
}

impl StepRecord {
    pub fn not_started() -> Self {
        Self {
            status: StepStatus::NotStarted,
            attempts: 0,
            evidence: StepEvidence::default(),
            legal_hold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub status: CheckpointStatus,
    pub validated_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Primary aggregate (spec.md §3, "Workflow").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: Uuid,
    pub request_id: Uuid,
    pub user_identifiers: UserIdentifiers,
    pub jurisdiction: Jurisdiction,
    pub requested_by: String,
    pub legal_proof: String,
    pub policy_version: String,
    pub phase: Phase,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub identity_critical_completed: bool,
    pub steps: BTreeMap<String, StepRecord>,
    pub checkpoints: BTreeMap<String, CheckpointRecord>,
    pub data_lineage: Option<Value>,
    pub cancelled: bool,
    #[serde(default = "schema_version")]
    pub schema_version: u32,
}

fn schema_version() -> u32 {
    1
}

/// Input to `WorkflowStateManager::create_workflow` (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateErasureRequest {
    pub user_identifiers: UserIdentifiers,
    pub jurisdiction: Jurisdiction,
    pub requested_by: String,
    pub legal_proof: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub original_workflow_id: Option<Uuid>,
}

impl CreateErasureRequest {
    pub fn is_zombie_remediation(&self) -> bool {
        self.reason.as_deref() == Some("ZOMBIE_DATA_DETECTED")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_monotonicity_rejects_backward_and_equal_transitions() {
        assert!(Phase::Created.can_advance_to(Phase::IdentityCritical));
        assert!(!Phase::IdentityCritical.can_advance_to(Phase::Created));
        assert!(!Phase::Created.can_advance_to(Phase::Created));
        assert!(Phase::ParallelDeletion.can_advance_to(Phase::Completed));
    }

    #[test]
    fn step_status_checkpoint_satisfaction() {
        assert!(StepStatus::Deleted.satisfies_checkpoint());
        assert!(StepStatus::LegalHold.satisfies_checkpoint());
        assert!(!StepStatus::Failed.satisfies_checkpoint());
        assert!(!StepStatus::InProgress.satisfies_checkpoint());
    }

    #[test]
    fn zombie_reason_detection() {
        let req = CreateErasureRequest {
            user_identifiers: UserIdentifiers::new("u1"),
            jurisdiction: Jurisdiction::Eu,
            requested_by: "cron".into(),
            legal_proof: "proof".into(),
            reason: Some("ZOMBIE_DATA_DETECTED".into()),
            original_workflow_id: Some(Uuid::nil()),
        };
        assert!(req.is_zombie_remediation());
    }
}
