use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identifiers::{Jurisdiction, System, UserIdentifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZombieScheduleStatus {
    Scheduled,
    Processing,
    Completed,
    Failed,
}

/// Per-completed-workflow re-verification record (spec.md §3, "Zombie schedule").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZombieSchedule {
    pub schedule_id: Uuid,
    pub workflow_id: Uuid,
    pub user_identifiers: UserIdentifiers,
    pub jurisdiction: Jurisdiction,
    pub scheduled_for: DateTime<Utc>,
    pub status: ZombieScheduleStatus,
    pub systems_to_check: Vec<System>,
    pub zombie_data_detected: bool,
    pub zombie_data_sources: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ZombieSchedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ZombieScheduleStatus::Scheduled && self.scheduled_for <= now
    }
}
