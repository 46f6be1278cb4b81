//! Append-only, hash-chained per-workflow audit trail (spec.md §4.3).
//!
//! Grounded on the hash-chain pattern used by process-triage's audit entries
//! and forge-agent's workflow checkpoints in the retrieval pack: compute the
//! hash over the entry with its own hash field cleared, then store it.

use chrono::{DateTime, Utc};
use erasure_common::{AuditEventType, AuditLogPayload, BusEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::bus::Bus;
use crate::crypto::{canonicalize, genesis_hash, link_hash};
use crate::store::{ns, StateStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub workflow_id: Uuid,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: AuditEvent,
    pub hash: String,
    pub previous_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditTrail {
    pub workflow_id: Uuid,
    pub entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            workflow_id,
            entries: vec![],
        }
    }

    pub fn last_hash(&self, created_at: DateTime<Utc>) -> String {
        match self.entries.last() {
            Some(entry) => entry.hash.clone(),
            None => genesis_hash(&self.workflow_id.to_string(), &created_at.to_rfc3339()),
        }
    }

    pub fn verify_integrity(&self, created_at: DateTime<Utc>) -> bool {
        self.detect_tampering(created_at).is_none()
    }

    /// Returns the index of the first corrupt entry, if any.
    pub fn detect_tampering(&self, created_at: DateTime<Utc>) -> Option<usize> {
        let mut expected_previous = genesis_hash(&self.workflow_id.to_string(), &created_at.to_rfc3339());
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.previous_hash != expected_previous {
                return Some(index);
            }
            let canonical = match canonicalize(&entry.event) {
                Ok(c) => c,
                Err(_) => return Some(index),
            };
            let recomputed = link_hash(&entry.previous_hash, &canonical);
            if recomputed != entry.hash {
                return Some(index);
            }
            expected_previous = entry.hash.clone();
        }
        None
    }
}

/// Persists audit trails under `audit_trails:{workflow_id}` (spec.md §6).
pub struct AuditLog {
    store: std::sync::Arc<dyn StateStore>,
    /// When set, every appended event is also re-emitted on the bus so the
    /// monitoring fan-out (§4.13) can subscribe to `Topic::AuditLog` instead
    /// of every handler pushing notifications itself.
    bus: Option<Bus>,
}

impl AuditLog {
    pub fn new(store: std::sync::Arc<dyn StateStore>) -> Self {
        Self { store, bus: None }
    }

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn load(&self, workflow_id: Uuid) -> anyhow::Result<AuditTrail> {
        match self.store.get(ns::AUDIT_TRAILS, &workflow_id.to_string())? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(AuditTrail {
                workflow_id,
                entries: vec![],
            }),
        }
    }

    fn save(&self, trail: &AuditTrail) -> anyhow::Result<()> {
        self.store.set(
            ns::AUDIT_TRAILS,
            &trail.workflow_id.to_string(),
            serde_json::to_value(trail)?,
        )
    }

    /// Append an event, computing its link hash against the trail's current tip.
    pub fn append(
        &self,
        workflow_id: Uuid,
        created_at: DateTime<Utc>,
        event_type: AuditEventType,
        data: Value,
        metadata: Value,
    ) -> anyhow::Result<AuditEntry> {
        let mut trail = self.load(workflow_id)?;
        let previous_hash = trail.last_hash(created_at);
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            workflow_id,
            event_type,
            timestamp: Utc::now(),
            data,
            metadata,
        };
        let canonical = canonicalize(&event)?;
        let hash = link_hash(&previous_hash, &canonical);
        let entry = AuditEntry {
            event,
            hash,
            previous_hash,
        };
        trail.entries.push(entry.clone());
        self.save(&trail)?;

        if let Some(bus) = self.bus.clone() {
            let notification = BusEvent::AuditLog(AuditLogPayload {
                workflow_id,
                event_type: entry.event.event_type,
                data: entry.event.data.clone(),
            });
            tokio::spawn(async move {
                if let Err(err) = bus.emit(notification).await {
                    warn!(%err, "failed to publish audit event to monitoring bus");
                }
            });
        }

        Ok(entry)
    }

    pub fn verify_integrity(&self, workflow_id: Uuid, created_at: DateTime<Utc>) -> anyhow::Result<bool> {
        Ok(self.load(workflow_id)?.verify_integrity(created_at))
    }

    pub fn detect_tampering(
        &self,
        workflow_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<usize>> {
        Ok(self.load(workflow_id)?.detect_tampering(created_at))
    }
}
