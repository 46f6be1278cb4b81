//! Monitoring fan-out (spec.md §4.13).
//!
//! Every audit append also lands on one of three logical streams:
//! `workflow_status`, `error_notifications`, `completion_notifications`. A
//! publish failure must never fail the workflow — sinks only ever log and
//! continue (spec.md §7).

use async_trait::async_trait;
use erasure_common::{AuditEventType, BusEvent};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    WorkflowStatus,
    ErrorNotifications,
    CompletionNotifications,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub workflow_id: uuid::Uuid,
    pub event_type: AuditEventType,
    pub stream: Stream,
    pub data: serde_json::Value,
}

fn stream_for(event_type: AuditEventType) -> Stream {
    match event_type {
        AuditEventType::StepFailed
        | AuditEventType::CheckpointFailed
        | AuditEventType::ZombieCheckFailed
        | AuditEventType::ZombieDataDetected => Stream::ErrorNotifications,
        AuditEventType::CertificateGenerated | AuditEventType::ZombieCheckCompleted => {
            Stream::CompletionNotifications
        }
        _ => Stream::WorkflowStatus,
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notification: Notification);
}

/// Default sink: structured logging only, matching how the rest of the engine
/// reports state (no external delivery is in scope, spec.md §1 non-goals).
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn publish(&self, notification: Notification) {
        match notification.stream {
            Stream::ErrorNotifications => {
                error!(workflow_id = %notification.workflow_id, event_type = ?notification.event_type, data = %notification.data, "error notification");
            }
            Stream::CompletionNotifications => {
                info!(workflow_id = %notification.workflow_id, event_type = ?notification.event_type, data = %notification.data, "completion notification");
            }
            Stream::WorkflowStatus => {
                info!(workflow_id = %notification.workflow_id, event_type = ?notification.event_type, "workflow status update");
            }
        }
    }
}

/// Test/demo sink that retains notifications for inspection.
#[derive(Default)]
pub struct InMemorySink {
    notifications: std::sync::Mutex<Vec<Notification>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications.lock().expect("notification sink lock poisoned"))
    }
}

#[async_trait]
impl NotificationSink for InMemorySink {
    async fn publish(&self, notification: Notification) {
        self.notifications
            .lock()
            .expect("notification sink lock poisoned")
            .push(notification);
    }
}

/// Publishes one notification per audit event, fanning out to every registered
/// sink. Never returns an error: a sink that panics internally would still be
/// caught by the spawned task boundary in the engine, not here.
pub struct MonitoringFanout {
    sinks: Vec<std::sync::Arc<dyn NotificationSink>>,
}

impl MonitoringFanout {
    pub fn new(sinks: Vec<std::sync::Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub async fn notify(
        &self,
        workflow_id: uuid::Uuid,
        event_type: AuditEventType,
        data: serde_json::Value,
    ) {
        let stream = stream_for(event_type);
        for sink in &self.sinks {
            sink.publish(Notification {
                workflow_id,
                event_type,
                stream,
                data: data.clone(),
            })
            .await;
        }
    }
}

/// Subscribes to `Topic::AuditLog` and `Topic::ZombieDataDetected`, forwarding
/// both to the fan-out. The audit-log subscription is how `AuditLog::append`
/// (wired via `with_bus`) reaches the monitoring streams without every
/// handler pushing notifications itself; `ZombieDataDetected` is subscribed
/// directly since it is the HIGH-severity legal-team alert (spec.md §4.11
/// step 4), not a routine audit entry.
pub struct MonitoringHandler {
    fanout: std::sync::Arc<MonitoringFanout>,
}

impl MonitoringHandler {
    pub fn new(fanout: std::sync::Arc<MonitoringFanout>) -> Self {
        Self { fanout }
    }
}

#[async_trait]
impl crate::dispatcher::Handler for MonitoringHandler {
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        match event {
            BusEvent::AuditLog(payload) => {
                self.fanout
                    .notify(payload.workflow_id, payload.event_type, payload.data.clone())
                    .await;
            }
            BusEvent::ZombieDataDetected(payload) => {
                self.fanout
                    .notify(
                        payload.workflow_id,
                        AuditEventType::ZombieDataDetected,
                        serde_json::json!({
                            "severity": payload.severity,
                            "alert_legal_team": payload.alert_legal_team,
                            "sources": payload.sources,
                        }),
                    )
                    .await;
            }
            _ => {}
        }
        Ok(())
    }
}
