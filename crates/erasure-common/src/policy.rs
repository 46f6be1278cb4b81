use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identifiers::{Jurisdiction, System};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionRule {
    pub system: System,
    pub retention_days: u32,
    pub priority: u8,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalHoldRule {
    pub system: System,
    pub conditions: Vec<String>,
    pub max_duration_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub auto_delete: f64,
    pub manual_review: f64,
}

impl ConfidenceThresholds {
    pub fn is_valid(&self) -> bool {
        self.auto_delete >= self.manual_review
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionTimeline {
    pub identity_critical_hours: u32,
    pub non_critical_hours: u32,
    pub background_scans_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequirements {
    pub sign_certificates: bool,
    pub require_receipts: bool,
}

/// Per-jurisdiction policy record (spec.md §3, "Policy configuration"). Built-in,
/// versioned, and immutable within a version (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub jurisdiction: Jurisdiction,
    pub version: String,
    pub retention_rules: BTreeMap<System, RetentionRule>,
    pub legal_hold_rules: BTreeMap<System, LegalHoldRule>,
    pub zombie_check_interval_days: u32,
    pub confidence_thresholds: ConfidenceThresholds,
    pub deletion_timeline: DeletionTimeline,
    pub certificate: CertificateRequirements,
}

impl PolicyConfig {
    pub fn retention_rule(&self, system: System) -> Option<&RetentionRule> {
        self.retention_rules.get(&system)
    }

    pub fn non_critical_systems(&self) -> Vec<System> {
        self.retention_rules
            .values()
            .filter(|r| r.priority >= 3)
            .map(|r| r.system)
            .collect()
    }
}

/// Immutable snapshot of the policy applied to a workflow at creation time
/// (spec.md §4.4 step 3: "so later re-reads cannot drift").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyApplication {
    pub workflow_id: Uuid,
    pub policy: PolicyConfig,
    pub applied_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_ordering_invariant() {
        let valid = ConfidenceThresholds {
            auto_delete: 0.95,
            manual_review: 0.6,
        };
        assert!(valid.is_valid());

        let invalid = ConfidenceThresholds {
            auto_delete: 0.4,
            manual_review: 0.6,
        };
        assert!(!invalid.is_valid());
    }
}
