//! Shared domain types for the erasure-workflow orchestration engine.
//!
//! This crate has no I/O and no async runtime dependency; it is the vocabulary
//! `erasure-runtime` and `erasure-orchestrator` build on.

pub mod certificate;
pub mod errors;
pub mod events;
pub mod identifiers;
pub mod policy;
pub mod workflow;
pub mod zombie;

pub use certificate::{Certificate, CertificateException, SystemReceipt};
pub use errors::{
    BackgroundJobError, ConnectorError, IntegrityError, LegalHoldError, PermanentConnectorError,
    ValidationError, WorkflowStateError,
};
pub use events::{
    AuditEventType, AuditLogPayload, BusEvent, CheckpointPhasePayload, CheckpointValidationPayload,
    ParallelTriggerPayload, StepInvocation, StepOutcome, Topic, WorkflowCompletedPayload,
    WorkflowCreatedPayload, ZombieCheckPayload, ZombieCheckResultPayload,
    ZombieDataDetectedPayload,
};
pub use identifiers::{Jurisdiction, System, UserIdentifiers};
pub use policy::{
    CertificateRequirements, ConfidenceThresholds, DeletionTimeline, LegalHoldRule, PolicyApplication,
    PolicyConfig, RetentionRule,
};
pub use workflow::{
    CheckpointRecord, CheckpointStatus, CreateErasureRequest, LegalHoldInfo, Phase, StepEvidence,
    StepRecord, StepStatus, Workflow, WorkflowStatus,
};
pub use zombie::{ZombieSchedule, ZombieScheduleStatus};
