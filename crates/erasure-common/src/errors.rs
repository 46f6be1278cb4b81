//! Typed error hierarchy for the erasure-workflow orchestration engine.
//!
//! One enum per subsystem named in the error handling design (spec.md §7):
//! `ValidationError`, `WorkflowStateError`, `ConnectorError`,
//! `PermanentConnectorError`, `LegalHoldError`, `IntegrityError`, and
//! `BackgroundJobError`.

use uuid::Uuid;

use thiserror::Error;

/// Bad input at workflow creation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("user_id must not be empty")]
    MissingUserId,

    #[error("legal_proof must not be empty")]
    MissingLegalProof,

    #[error("requested_by must not be empty")]
    MissingRequestedBy,

    #[error("unknown system '{0}'")]
    UnknownSystem(String),
}

/// Illegal transition or missing workflow (spec.md §4.4).
#[derive(Debug, Error)]
pub enum WorkflowStateError {
    #[error("workflow {0} not found")]
    NotFound(Uuid),

    #[error("workflow {workflow_id} cannot transition from {from} to {to}")]
    IllegalPhaseTransition {
        workflow_id: Uuid,
        from: String,
        to: String,
    },

    #[error("workflow {0} status is already terminal")]
    AlreadyTerminal(Uuid),

    #[error("parallel-deletion-trigger rejected for {0}: identity-critical checkpoint not completed")]
    IdentityCriticalNotCompleted(Uuid),

    #[error("step {step_name} on workflow {workflow_id} is already terminal")]
    StepAlreadyTerminal { workflow_id: Uuid, step_name: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Retryable connector failure: network, 5xx, timeout (spec.md §7).
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector call to {system} timed out after {timeout_ms}ms")]
    Timeout { system: String, timeout_ms: u64 },

    #[error("connector call to {system} failed: {message}")]
    Transient { system: String, message: String },

    #[error("connector returned an ambiguous result for {system}")]
    Ambiguous { system: String },
}

/// Non-retryable connector failure: 4xx semantic. Not-found is treated as
/// success per the connector contract and never surfaces here.
#[derive(Debug, Error)]
pub enum PermanentConnectorError {
    #[error("connector rejected the request for {system}: {message}")]
    Rejected { system: String, message: String },
}

/// A step cannot proceed because of a discovered legal hold (spec.md §4.6 edge case).
#[derive(Debug, Error)]
pub enum LegalHoldError {
    #[error("step {step_name} on workflow {workflow_id} is under legal hold: {reason}")]
    Held {
        workflow_id: Uuid,
        step_name: String,
        reason: String,
    },
}

/// Audit hash-chain mismatch. Non-recoverable; the workflow is marked FAILED
/// and an operator alert is required (spec.md §7).
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("audit trail for workflow {workflow_id} is corrupt at entry index {index}")]
    ChainBroken { workflow_id: Uuid, index: usize },

    #[error("audit trail for workflow {workflow_id} is empty but was expected to have a genesis entry")]
    MissingGenesis { workflow_id: Uuid },
}

/// Errors from the zombie-check cron scanner (spec.md §4.11).
#[derive(Debug, Error)]
pub enum BackgroundJobError {
    #[error("zombie check {schedule_id} failed: {message}")]
    ZombieCheckFailed { schedule_id: Uuid, message: String },

    #[error(transparent)]
    WorkflowState(#[from] WorkflowStateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_state_error_illegal_transition_carries_phases() {
        let err = WorkflowStateError::IllegalPhaseTransition {
            workflow_id: Uuid::nil(),
            from: "created".into(),
            to: "parallel-deletion".into(),
        };
        assert!(err.to_string().contains("created"));
        assert!(err.to_string().contains("parallel-deletion"));
    }

    #[test]
    fn connector_error_variants_are_distinct() {
        let timeout = ConnectorError::Timeout {
            system: "stripe".into(),
            timeout_ms: 10_000,
        };
        let transient = ConnectorError::Transient {
            system: "stripe".into(),
            message: "503".into(),
        };
        assert!(matches!(timeout, ConnectorError::Timeout { .. }));
        assert!(!matches!(timeout, ConnectorError::Transient { .. }));
        assert!(transient.to_string().contains("503"));
    }

    #[test]
    fn background_job_error_converts_from_workflow_state_error() {
        let inner = WorkflowStateError::NotFound(Uuid::nil());
        let outer: BackgroundJobError = inner.into();
        match &outer {
            BackgroundJobError::WorkflowState(WorkflowStateError::NotFound(id)) => {
                assert_eq!(*id, Uuid::nil());
            }
            _ => panic!("expected WorkflowState(NotFound(..))"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ValidationError::MissingUserId);
        assert_std_error(&WorkflowStateError::NotFound(Uuid::nil()));
        assert_std_error(&ConnectorError::Ambiguous {
            system: "crm".into(),
        });
        assert_std_error(&PermanentConnectorError::Rejected {
            system: "crm".into(),
            message: "bad request".into(),
        });
        assert_std_error(&LegalHoldError::Held {
            workflow_id: Uuid::nil(),
            step_name: "stripe".into(),
            reason: "litigation".into(),
        });
        assert_std_error(&IntegrityError::MissingGenesis {
            workflow_id: Uuid::nil(),
        });
        assert_std_error(&BackgroundJobError::ZombieCheckFailed {
            schedule_id: Uuid::nil(),
            message: "probe failed".into(),
        });
    }
}
