use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identifiers::System;
use crate::workflow::StepStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemReceipt {
    pub system: System,
    pub receipt: Option<String>,
    pub status: StepStatus,
}

/// A legal hold or failed step surfaced as an exception rather than hidden
/// behind a blanket COMPLETED status (spec.md §4.12).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateException {
    pub system: System,
    pub reason: String,
}

/// Cryptographic proof of completion (spec.md §3, "Certificate").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate_id: Uuid,
    pub workflow_id: Uuid,
    pub audit_hash_root: String,
    pub signature: Option<String>,
    pub system_receipts: Vec<SystemReceipt>,
    pub policy_version: String,
    pub issued_at: DateTime<Utc>,
    pub exceptions: Vec<CertificateException>,
}
