//! Zombie scheduler and cron scanner (spec.md §4.11).
//!
//! Every completed workflow gets a deferred re-verification check: did the
//! data actually disappear from each system, or is it a "zombie" that
//! reappeared (backup restore, replication lag, a connector that lied about
//! success)? `schedule_zombie_check` runs inline off `workflow-completed`;
//! `scan_due_checks` is meant to be driven by a periodic `tokio::time::interval`
//! in the engine's background task.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use erasure_common::{
    AuditEventType, BusEvent, CreateErasureRequest, Jurisdiction, System, UserIdentifiers, Workflow,
    ZombieDataDetectedPayload, ZombieSchedule, ZombieScheduleStatus,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::bus::Bus;
use crate::connector::Connector;
use crate::policy_manager::PolicyManager;
use crate::store::{ns, StateStore};
use crate::workflow_manager::WorkflowStateManager;
use serde_json::json;

pub struct ZombieScheduler {
    store: Arc<dyn StateStore>,
    policy: Arc<PolicyManager>,
    connectors: Vec<Arc<dyn Connector>>,
    bus: Bus,
}

impl ZombieScheduler {
    pub fn new(
        store: Arc<dyn StateStore>,
        policy: Arc<PolicyManager>,
        connectors: Vec<Arc<dyn Connector>>,
        bus: Bus,
    ) -> Self {
        Self {
            store,
            policy,
            connectors,
            bus,
        }
    }

    fn connector_for(&self, system: System) -> Option<&Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.system() == system)
    }

    fn save(&self, schedule: &ZombieSchedule) -> anyhow::Result<()> {
        self.store.set(
            ns::ZOMBIE_CHECK_SCHEDULES,
            &schedule.schedule_id.to_string(),
            serde_json::to_value(schedule)?,
        )?;
        self.store.set(
            ns::ZOMBIE_CHECKS_BY_WORKFLOW,
            &schedule.workflow_id.to_string(),
            serde_json::to_value(schedule.schedule_id)?,
        )
    }

    pub fn load(&self, schedule_id: Uuid) -> anyhow::Result<Option<ZombieSchedule>> {
        match self.store.get(ns::ZOMBIE_CHECK_SCHEDULES, &schedule_id.to_string())? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn load_for_workflow(&self, workflow_id: Uuid) -> anyhow::Result<Option<ZombieSchedule>> {
        match self.store.get(ns::ZOMBIE_CHECKS_BY_WORKFLOW, &workflow_id.to_string())? {
            Some(value) => {
                let schedule_id: Uuid = serde_json::from_value(value)?;
                self.load(schedule_id)
            }
            None => Ok(None),
        }
    }

    /// Schedules the next check `zombie_check_interval_days` out from `completed_at`
    /// (spec.md §4.11 step 1).
    pub async fn schedule_zombie_check(
        &self,
        workflow_id: Uuid,
        workflow: &Workflow,
        completed_at: chrono::DateTime<Utc>,
    ) -> anyhow::Result<ZombieSchedule> {
        let interval_days = self.policy.get_zombie_check_interval(workflow.jurisdiction);
        let scheduled_for = completed_at + ChronoDuration::days(interval_days as i64);
        let systems_to_check: Vec<System> = workflow
            .steps
            .keys()
            .filter_map(|name| System::parse(name))
            .collect();

        let schedule = ZombieSchedule {
            schedule_id: Uuid::new_v4(),
            workflow_id,
            user_identifiers: workflow.user_identifiers.clone(),
            jurisdiction: workflow.jurisdiction,
            scheduled_for,
            status: ZombieScheduleStatus::Scheduled,
            systems_to_check,
            zombie_data_detected: false,
            zombie_data_sources: vec![],
            completed_at: None,
        };
        self.save(&schedule)?;
        Ok(schedule)
    }

    /// Probe every due schedule, transition it, and spawn a remediation workflow
    /// when zombie data is detected (spec.md §4.11 steps 2-5).
    pub async fn scan_due_checks(
        &self,
        audit: &AuditLog,
        workflows: &WorkflowStateManager,
        now: chrono::DateTime<Utc>,
    ) -> anyhow::Result<Vec<ZombieSchedule>> {
        let mut processed = Vec::new();
        for value in self.store.get_group(ns::ZOMBIE_CHECK_SCHEDULES)? {
            let mut schedule: ZombieSchedule = serde_json::from_value(value)?;
            if !schedule.is_due(now) {
                continue;
            }
            schedule.status = ZombieScheduleStatus::Processing;
            self.save(&schedule)?;

            match self.probe(&schedule).await {
                Ok((detected, sources)) => {
                    schedule.zombie_data_detected = detected;
                    schedule.zombie_data_sources = sources.clone();
                    schedule.status = ZombieScheduleStatus::Completed;
                    schedule.completed_at = Some(now);
                    self.save(&schedule)?;

                    audit.append(
                        schedule.workflow_id,
                        now,
                        AuditEventType::ZombieCheckCompleted,
                        json!({"schedule_id": schedule.schedule_id, "zombie_data_detected": detected}),
                        json!({}),
                    )?;

                    if detected {
                        warn!(workflow_id = %schedule.workflow_id, ?sources, "zombie data detected, spawning remediation workflow");
                        workflows.create_workflow(CreateErasureRequest {
                            user_identifiers: schedule.user_identifiers.clone(),
                            jurisdiction: schedule.jurisdiction,
                            requested_by: "zombie-scanner".into(),
                            legal_proof: "zombie-remediation-auto-generated".into(),
                            reason: Some("ZOMBIE_DATA_DETECTED".into()),
                            original_workflow_id: Some(schedule.workflow_id),
                        })?;

                        // spec.md §4.11 step 4: a positive check is a HIGH-severity
                        // legal-team alert, not just a remediation workflow.
                        if let Err(err) = self
                            .bus
                            .emit(BusEvent::ZombieDataDetected(ZombieDataDetectedPayload {
                                workflow_id: schedule.workflow_id,
                                severity: "HIGH".into(),
                                alert_legal_team: true,
                                sources: sources.clone(),
                            }))
                            .await
                        {
                            warn!(workflow_id = %schedule.workflow_id, %err, "failed to publish zombie-data-detected alert");
                        }
                    }
                }
                Err(err) => {
                    error!(workflow_id = %schedule.workflow_id, %err, "zombie check probe failed");
                    schedule.status = ZombieScheduleStatus::Failed;
                    self.save(&schedule)?;
                    audit.append(
                        schedule.workflow_id,
                        now,
                        AuditEventType::ZombieCheckFailed,
                        json!({"schedule_id": schedule.schedule_id, "error": err.to_string()}),
                        json!({}),
                    )?;
                }
            }
            processed.push(schedule);
        }
        info!(count = processed.len(), "zombie scan pass complete");
        Ok(processed)
    }

    async fn probe(&self, schedule: &ZombieSchedule) -> anyhow::Result<(bool, Vec<String>)> {
        let mut sources = Vec::new();
        for system in &schedule.systems_to_check {
            let Some(connector) = self.connector_for(*system) else {
                continue;
            };
            let still_gone = connector.verify_deletion(&schedule.user_identifiers.user_id).await;
            if !still_gone {
                sources.push(system.as_str().to_string());
            }
        }
        Ok((!sources.is_empty(), sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::FakeConnector;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::store::MemoryStateStore;
    use erasure_common::Phase;

    /// A bus backed by a dispatcher kept alive for the test's duration (leaked,
    /// test-only) so `bus.emit` actually succeeds instead of silently failing
    /// against an already-dropped dispatcher.
    fn test_bus() -> Bus {
        let (dispatcher, _receivers) = Dispatcher::new(DispatcherConfig::default());
        let dispatcher: &'static Arc<Dispatcher> = Box::leak(Box::new(Arc::new(dispatcher)));
        Bus::new(dispatcher)
    }

    fn scheduler_and_workflow(
        fail_connector_present: bool,
    ) -> (ZombieScheduler, Arc<WorkflowStateManager>, Arc<AuditLog>, Uuid) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        let policy = Arc::new(PolicyManager::new(store.clone()));
        let workflows = Arc::new(WorkflowStateManager::new(store.clone(), audit.clone(), policy.clone()));

        let created = workflows
            .create_workflow(erasure_common::CreateErasureRequest {
                user_identifiers: UserIdentifiers::new("u1"),
                jurisdiction: Jurisdiction::Eu,
                requested_by: "api".into(),
                legal_proof: "proof".into(),
                reason: None,
                original_workflow_id: None,
            })
            .unwrap();
        workflows
            .record_receipt(created.workflow_id, "stripe", "receipt-1".into(), None)
            .unwrap();
        workflows.advance_phase(created.workflow_id, Phase::IdentityCritical).unwrap();

        let stripe_connector = Arc::new(FakeConnector::new(System::Stripe, 0));
        if fail_connector_present {
            stripe_connector.inject_zombie_data("u1");
        }
        let connectors: Vec<Arc<dyn Connector>> = vec![stripe_connector];
        let scheduler = ZombieScheduler::new(store, policy, connectors, test_bus());
        (scheduler, workflows, audit, created.workflow_id)
    }

    #[tokio::test]
    async fn scheduling_sets_scheduled_for_interval_days_out() {
        let (scheduler, workflows, _audit, workflow_id) = scheduler_and_workflow(false);
        let workflow = workflows.load_workflow(workflow_id).unwrap();
        let completed_at = Utc::now();
        let schedule = scheduler
            .schedule_zombie_check(workflow_id, &workflow, completed_at)
            .await
            .unwrap();
        assert_eq!(schedule.status, ZombieScheduleStatus::Scheduled);
        assert!(schedule.scheduled_for > completed_at);
    }

    #[tokio::test]
    async fn due_scan_with_no_zombie_data_completes_clean() {
        let (scheduler, workflows, audit, workflow_id) = scheduler_and_workflow(false);
        let workflow = workflows.load_workflow(workflow_id).unwrap();
        let past = Utc::now() - ChronoDuration::days(100);
        scheduler
            .schedule_zombie_check(workflow_id, &workflow, past)
            .await
            .unwrap();

        let results = scheduler.scan_due_checks(&audit, &workflows, Utc::now()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ZombieScheduleStatus::Completed);
        assert!(!results[0].zombie_data_detected);
    }

    #[tokio::test]
    async fn due_scan_with_zombie_data_spawns_remediation_workflow() {
        let (scheduler, workflows, audit, workflow_id) = scheduler_and_workflow(true);
        let workflow = workflows.load_workflow(workflow_id).unwrap();
        let past = Utc::now() - ChronoDuration::days(100);
        scheduler
            .schedule_zombie_check(workflow_id, &workflow, past)
            .await
            .unwrap();

        let results = scheduler.scan_due_checks(&audit, &workflows, Utc::now()).await.unwrap();
        assert!(results[0].zombie_data_detected);
        assert_eq!(results[0].zombie_data_sources, vec!["stripe".to_string()]);

        let remediation = workflows
            .create_workflow(CreateErasureRequest {
                user_identifiers: UserIdentifiers::new("u1"),
                jurisdiction: Jurisdiction::Eu,
                requested_by: "zombie-scanner".into(),
                legal_proof: "zombie-remediation-auto-generated".into(),
                reason: Some("ZOMBIE_DATA_DETECTED".into()),
                original_workflow_id: Some(workflow_id),
            })
            .unwrap();
        assert!(!remediation.newly_created, "the scan should already have created it");
    }

    struct CapturingHandler {
        events: Arc<std::sync::Mutex<Vec<BusEvent>>>,
    }

    #[async_trait::async_trait]
    impl crate::dispatcher::Handler for CapturingHandler {
        async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn due_scan_with_zombie_data_emits_high_severity_legal_alert() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        let policy = Arc::new(PolicyManager::new(store.clone()));
        let workflows = Arc::new(WorkflowStateManager::new(store.clone(), audit.clone(), policy.clone()));

        let created = workflows
            .create_workflow(erasure_common::CreateErasureRequest {
                user_identifiers: UserIdentifiers::new("u1"),
                jurisdiction: Jurisdiction::Eu,
                requested_by: "api".into(),
                legal_proof: "proof".into(),
                reason: None,
                original_workflow_id: None,
            })
            .unwrap();
        workflows
            .record_receipt(created.workflow_id, "stripe", "receipt-1".into(), None)
            .unwrap();
        workflows.advance_phase(created.workflow_id, Phase::IdentityCritical).unwrap();

        let stripe_connector = Arc::new(FakeConnector::new(System::Stripe, 0));
        stripe_connector.inject_zombie_data("u1");
        let connectors: Vec<Arc<dyn Connector>> = vec![stripe_connector];

        let (dispatcher, receivers) = Dispatcher::new(DispatcherConfig::default().with_shard_count(1));
        let dispatcher = Arc::new(dispatcher);
        let captured = Arc::new(std::sync::Mutex::new(Vec::new()));
        dispatcher.register(
            erasure_common::Topic::ZombieDataDetected,
            Arc::new(CapturingHandler {
                events: captured.clone(),
            }),
        );
        let _workers = dispatcher.spawn_workers(receivers);
        let bus = Bus::new(&dispatcher);

        let scheduler = ZombieScheduler::new(store, policy, connectors, bus);
        let workflow = workflows.load_workflow(created.workflow_id).unwrap();
        let past = Utc::now() - ChronoDuration::days(100);
        scheduler
            .schedule_zombie_check(created.workflow_id, &workflow, past)
            .await
            .unwrap();
        scheduler.scan_due_checks(&audit, &workflows, Utc::now()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = captured.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            BusEvent::ZombieDataDetected(payload) => {
                assert_eq!(payload.workflow_id, created.workflow_id);
                assert_eq!(payload.severity, "HIGH");
                assert!(payload.alert_legal_team);
                assert_eq!(payload.sources, vec!["stripe".to_string()]);
            }
            other => panic!("expected ZombieDataDetected, got {other:?}"),
        }
    }
}
