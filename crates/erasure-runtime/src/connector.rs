//! Connector interface (spec.md §6, "Connector interface").
//!
//! Per-vendor deletion connectors are out of scope (spec.md §1) — they are
//! external collaborators with only their interface specified here. Executors
//! are built against this trait so they are testable with fakes, replacing the
//! source's shared-singleton connectors (design notes).

use async_trait::async_trait;
use serde_json::Value;

use erasure_common::System;

#[derive(Debug, Clone)]
pub struct ConnectorResult {
    pub success: bool,
    pub receipt: Option<String>,
    pub api_response: Option<Value>,
    pub error: Option<String>,
}

impl ConnectorResult {
    pub fn ok(receipt: impl Into<String>) -> Self {
        Self {
            success: true,
            receipt: Some(receipt.into()),
            api_response: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            receipt: None,
            api_response: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn system(&self) -> System;

    async fn delete_user(&self, user_id: &str) -> ConnectorResult;

    async fn verify_deletion(&self, user_id: &str) -> bool;
}

/// Object-store systems (warehouses, blob buckets) additionally expose
/// bucket-level scanning and bulk deletion (spec.md §6, "Connector interface").
#[async_trait]
pub trait ObjectStoreConnector: Connector {
    async fn scan_bucket(&self, bucket: &str, user_id: &str) -> anyhow::Result<Vec<String>>;

    async fn delete_files(&self, bucket: &str, object_keys: &[String]) -> ConnectorResult;

    async fn list_objects(&self, bucket: &str) -> anyhow::Result<Vec<String>>;
}

/// In-memory fake used by tests and demo runs. Deterministic: `fail_times`
/// controls how many `delete_user` calls fail before a call succeeds.
pub struct FakeConnector {
    system: System,
    fail_times: std::sync::atomic::AtomicU32,
    present_users: dashmap::DashSet<String>,
}

impl FakeConnector {
    pub fn new(system: System, fail_times: u32) -> Self {
        Self {
            system,
            fail_times: std::sync::atomic::AtomicU32::new(fail_times),
            present_users: dashmap::DashSet::new(),
        }
    }

    /// Simulate zombie data reappearing for a user after deletion.
    pub fn inject_zombie_data(&self, user_id: &str) {
        self.present_users.insert(user_id.to_string());
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn system(&self) -> System {
        self.system
    }

    async fn delete_user(&self, user_id: &str) -> ConnectorResult {
        use std::sync::atomic::Ordering;
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.fetch_sub(1, Ordering::SeqCst);
            return ConnectorResult::failure(format!("{} temporarily unavailable", self.system));
        }
        ConnectorResult::ok(format!("receipt-{}-{user_id}", self.system))
    }

    async fn verify_deletion(&self, user_id: &str) -> bool {
        !self.present_users.contains(user_id)
    }
}
