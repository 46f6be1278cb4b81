//! Engine wiring: builds the dispatcher, registers every handler on its
//! topic, and owns the background zombie-scan loop (spec.md §2, §4.5-§4.13).
//!
//! This is the single place that knows how all the components fit together;
//! everything else in this crate is testable in isolation from it.

use std::sync::Arc;

use erasure_common::{CreateErasureRequest, System, Topic};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::bus::Bus;
use crate::checkpoint::CheckpointValidator;
use crate::completion::CompletionHandler;
use crate::config::EngineConfig;
use crate::connector::Connector;
use crate::crypto::SigningContext;
use crate::dispatcher::{Dispatcher, DispatcherConfig, RetryPolicy};
use crate::executor::StepExecutor;
use crate::identity_critical::IdentityCriticalOrchestrator;
use crate::legal_hold::LegalHoldManager;
use crate::monitoring::{MonitoringFanout, MonitoringHandler, NotificationSink};
use crate::parallel::ParallelOrchestrator;
use crate::policy_manager::PolicyManager;
use crate::store::StateStore;
use crate::workflow_manager::{CreatedWorkflow, WorkflowStateManager};
use crate::zombie_scheduler::ZombieScheduler;

/// Everything the engine needs besides configuration: a state store, one
/// connector per external system, a signing key, and the notification sinks
/// the monitoring fan-out publishes to.
pub struct EngineDeps {
    pub store: Arc<dyn StateStore>,
    pub connectors: Vec<Arc<dyn Connector>>,
    pub signing: Arc<SigningContext>,
    pub sinks: Vec<Arc<dyn NotificationSink>>,
}

/// The running engine: the dispatcher, every manager it fronts, and the
/// handles needed to shut it down cleanly.
pub struct Engine {
    pub dispatcher: Arc<Dispatcher>,
    pub workflows: Arc<WorkflowStateManager>,
    pub audit: Arc<AuditLog>,
    pub policy: Arc<PolicyManager>,
    pub legal_hold: Arc<LegalHoldManager>,
    pub completion: Arc<CompletionHandler>,
    pub zombie: Arc<ZombieScheduler>,
    config: EngineConfig,
    workers: Vec<JoinHandle<()>>,
    zombie_loop: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let EngineDeps {
            store,
            connectors,
            signing,
            sinks,
        } = deps;

        let dispatcher_config = DispatcherConfig::default()
            .with_worker_pool_size(config.worker_pool_size)
            .with_shard_count(config.worker_pool_size)
            .with_queue_capacity(config.queue_capacity)
            .with_retry(RetryPolicy {
                max_attempts: config.max_retry_attempts,
                initial_delay: config.initial_retry_delay(),
                backoff_multiplier: config.retry_backoff_multiplier,
            });
        let (dispatcher, receivers) = Dispatcher::new(dispatcher_config);
        let dispatcher = Arc::new(dispatcher);
        let bus = Bus::new(&dispatcher);

        let policy = Arc::new(PolicyManager::new(store.clone()));
        let audit = Arc::new(AuditLog::new(store.clone()).with_bus(bus.clone()));
        let workflows = Arc::new(WorkflowStateManager::new(store.clone(), audit.clone(), policy.clone()));
        let legal_hold = Arc::new(LegalHoldManager::new(workflows.clone()));
        let zombie = Arc::new(ZombieScheduler::new(
            store.clone(),
            policy.clone(),
            connectors.clone(),
            bus.clone(),
        ));
        let completion = Arc::new(CompletionHandler::new(
            store.clone(),
            workflows.clone(),
            audit.clone(),
            policy.clone(),
            signing,
            zombie.clone(),
        ));

        let identity_critical = Arc::new(IdentityCriticalOrchestrator::new(
            workflows.clone(),
            audit.clone(),
            bus.clone(),
        ));
        let parallel = Arc::new(ParallelOrchestrator::new(workflows.clone(), bus.clone()));
        let checkpoint = Arc::new(CheckpointValidator::new(
            store.clone(),
            workflows.clone(),
            audit.clone(),
            policy.clone(),
            bus.clone(),
        ));
        let fanout = Arc::new(MonitoringFanout::new(sinks));
        let monitoring = Arc::new(MonitoringHandler::new(fanout));

        dispatcher.register(Topic::WorkflowCreated, identity_critical);
        dispatcher.register(Topic::ParallelDeletionTrigger, parallel);
        dispatcher.register(Topic::CheckpointValidation, checkpoint);
        dispatcher.register(Topic::WorkflowCompleted, completion.clone());
        dispatcher.register(Topic::AuditLog, monitoring.clone());
        dispatcher.register(Topic::ZombieDataDetected, monitoring);

        for connector in &connectors {
            let system = connector.system();
            let executor = Arc::new(StepExecutor::new(
                system,
                connector.clone(),
                workflows.clone(),
                audit.clone(),
                bus.clone(),
                dispatcher_config.retry,
            ));
            dispatcher.register(crate::executor::topic_for(system), executor);
        }

        let workers = dispatcher.spawn_workers(receivers);

        Self {
            dispatcher,
            workflows,
            audit,
            policy,
            legal_hold,
            completion,
            zombie,
            config,
            workers,
            zombie_loop: None,
        }
    }

    /// Submit a new erasure request (spec.md §4.4 entry point). Emits
    /// `workflow-created` for newly-created workflows only; a deduped repeat
    /// call is a pure read with no side effects.
    pub async fn submit_request(&self, request: CreateErasureRequest) -> anyhow::Result<CreatedWorkflow> {
        let created = self.workflows.create_workflow(request)?;
        if created.newly_created {
            self.bus()
                .emit(erasure_common::BusEvent::WorkflowCreated(
                    erasure_common::WorkflowCreatedPayload {
                        workflow_id: created.workflow_id,
                    },
                ))
                .await?;
        }
        Ok(created)
    }

    pub fn cancel_workflow(&self, workflow_id: Uuid) -> anyhow::Result<()> {
        self.workflows.cancel(workflow_id)?;
        self.dispatcher.cancel_workflow(workflow_id);
        Ok(())
    }

    pub fn bus(&self) -> Bus {
        Bus::new(&self.dispatcher)
    }

    /// Starts the periodic zombie-scan background task (spec.md §4.11,
    /// "one cron entry: zombie scanner, default cadence every 6 hours").
    /// Idempotent: calling this twice leaves the first loop running and
    /// drops the second handle's effect, since a second call simply
    /// overwrites `zombie_loop` with a fresh task and the old one is aborted
    /// on drop.
    pub fn start_zombie_scan_loop(&mut self) {
        let zombie = self.zombie.clone();
        let audit = self.audit.clone();
        let workflows = self.workflows.clone();
        let cadence = self.config.zombie_scan_cadence();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            loop {
                ticker.tick().await;
                info!("running scheduled zombie scan");
                if let Err(err) = zombie.scan_due_checks(&audit, &workflows, chrono::Utc::now()).await {
                    tracing::error!(%err, "zombie scan pass failed");
                }
            }
        });
        self.zombie_loop = Some(handle);
    }

    /// Runs a single zombie scan pass immediately (`--scan-now`), independent
    /// of the periodic loop's cadence.
    pub async fn scan_zombies_now(&self) -> anyhow::Result<Vec<erasure_common::ZombieSchedule>> {
        self.zombie.scan_due_checks(&self.audit, &self.workflows, chrono::Utc::now()).await
    }

    pub fn legal_hold(&self) -> &LegalHoldManager {
        &self.legal_hold
    }

    pub fn load_certificate(&self, workflow_id: Uuid) -> anyhow::Result<Option<erasure_common::Certificate>> {
        self.completion.load_certificate(workflow_id)
    }

    /// Aborts the worker and zombie-scan tasks. Queued events are dropped.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.zombie_loop.take() {
            handle.abort();
        }
        for worker in self.workers.drain(..) {
            worker.abort();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::FakeConnector;
    use crate::monitoring::InMemorySink;
    use crate::store::MemoryStateStore;
    use erasure_common::{Jurisdiction, UserIdentifiers};
    use std::time::Duration;

    fn engine() -> (Engine, Arc<InMemorySink>) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let connectors: Vec<Arc<dyn Connector>> = System::ALL
            .iter()
            .map(|s| Arc::new(FakeConnector::new(*s, 0)) as Arc<dyn Connector>)
            .collect();
        let sink = Arc::new(InMemorySink::new());
        let deps = EngineDeps {
            store,
            connectors,
            signing: Arc::new(SigningContext::generate()),
            sinks: vec![sink.clone() as Arc<dyn NotificationSink>],
        };
        let config = EngineConfig::default();
        (Engine::new(config, deps), sink)
    }

    #[tokio::test]
    async fn submitting_a_request_runs_the_workflow_to_completion() {
        let (engine, _sink) = engine();
        let created = engine
            .submit_request(CreateErasureRequest {
                user_identifiers: UserIdentifiers::new("u1"),
                jurisdiction: Jurisdiction::Eu,
                requested_by: "api".into(),
                legal_proof: "proof".into(),
                reason: None,
                original_workflow_id: None,
            })
            .await
            .unwrap();
        assert!(created.newly_created);

        tokio::time::sleep(Duration::from_millis(200)).await;

        let workflow = engine.workflows.load_workflow(created.workflow_id).unwrap();
        assert_eq!(workflow.phase, erasure_common::Phase::Completed);
        assert_eq!(workflow.status, erasure_common::WorkflowStatus::Completed);

        let certificate = engine.load_certificate(created.workflow_id).unwrap();
        assert!(certificate.is_some(), "completion handler should have generated a certificate");
    }

    #[tokio::test]
    async fn resubmitting_the_same_request_does_not_duplicate_the_workflow() {
        let (engine, _sink) = engine();
        let request = CreateErasureRequest {
            user_identifiers: UserIdentifiers::new("u2"),
            jurisdiction: Jurisdiction::Us,
            requested_by: "api".into(),
            legal_proof: "proof".into(),
            reason: None,
            original_workflow_id: None,
        };
        let first = engine.submit_request(request.clone()).await.unwrap();
        let second = engine.submit_request(request).await.unwrap();
        assert_eq!(first.workflow_id, second.workflow_id);
        assert!(!second.newly_created);
    }
}
