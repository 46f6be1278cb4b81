//! Event dispatcher and worker pool (spec.md §4.5).
//!
//! A fixed set of worker tasks drains a single bounded queue. Events carrying
//! the same `workflow_id` are routed to the same shard by `hash(workflow_id) %
//! shard_count`, which serializes processing order per workflow while letting
//! unrelated workflows run fully in parallel. Retries are scheduled on a
//! detached timer task rather than sleeping a worker, so backoff never ties up
//! pool capacity (design notes, "move `setTimeout`-based retries to the
//! dispatcher as a first-class backoff wheel").

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use erasure_common::{BusEvent, Topic};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// `initialDelay · multiplier^(attempt-1)` (spec.md §4.5).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.initial_delay.as_secs_f64() * factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub worker_pool_size: usize,
    pub shard_count: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            shard_count: 4,
            queue_capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("queue is at capacity")]
    QueueFull,
}

/// A handler processes one event and either succeeds or returns a retryable error.
/// Handlers must be idempotent with respect to workflow state (spec.md §4.5).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()>;
}

pub struct Envelope {
    event: BusEvent,
    attempt: u32,
}

fn shard_for(workflow_id: Option<uuid::Uuid>, shard_count: usize) -> usize {
    match workflow_id {
        Some(id) => {
            let mut hasher = DefaultHasher::new();
            id.hash(&mut hasher);
            (hasher.finish() as usize) % shard_count.max(1)
        }
        None => 0,
    }
}

/// Topic-based pub/sub over a bounded, sharded worker pool.
pub struct Dispatcher {
    config: DispatcherConfig,
    senders: Vec<mpsc::Sender<Envelope>>,
    handlers: Arc<dashmap::DashMap<TopicKey, Arc<dyn Handler>>>,
    cancelled_workflows: Arc<dashmap::DashSet<uuid::Uuid>>,
    retry_tasks: AtomicUsize,
}

/// `Topic` does not implement `Hash` in a way `DashMap` needs beyond `Eq`/`Hash`,
/// which it already derives; this alias exists purely for readability at call sites.
type TopicKey = Topic;

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> (Self, Vec<mpsc::Receiver<Envelope>>) {
        let mut senders = Vec::with_capacity(config.shard_count);
        let mut receivers = Vec::with_capacity(config.shard_count);
        for _ in 0..config.shard_count {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            senders.push(tx);
            receivers.push(rx);
        }
        (
            Self {
                config,
                senders,
                handlers: Arc::new(dashmap::DashMap::new()),
                cancelled_workflows: Arc::new(dashmap::DashSet::new()),
                retry_tasks: AtomicUsize::new(0),
            },
            receivers,
        )
    }

    pub fn register(&self, topic: Topic, handler: Arc<dyn Handler>) {
        self.handlers.insert(topic, handler);
    }

    pub fn cancel_workflow(&self, workflow_id: uuid::Uuid) {
        self.cancelled_workflows.insert(workflow_id);
    }

    pub fn is_cancelled(&self, workflow_id: uuid::Uuid) -> bool {
        self.cancelled_workflows.contains(&workflow_id)
    }

    /// Submit an event for delivery. Blocks the caller (back-pressure) until the
    /// target shard has capacity, or returns `QueueFull` on a `try_send` caller.
    pub async fn emit(&self, event: BusEvent) -> Result<(), DispatchError> {
        let shard = shard_for(event.workflow_id(), self.config.shard_count);
        self.senders[shard]
            .send(Envelope { event, attempt: 1 })
            .await
            .map_err(|_| DispatchError::QueueFull)
    }

    pub fn try_emit(&self, event: BusEvent) -> Result<(), DispatchError> {
        let shard = shard_for(event.workflow_id(), self.config.shard_count);
        self.senders[shard]
            .try_send(Envelope { event, attempt: 1 })
            .map_err(|_| DispatchError::QueueFull)
    }

    fn requeue_after_backoff(self: &Arc<Self>, shard: usize, event: BusEvent, next_attempt: u32) {
        let delay = self.config.retry.delay_for_attempt(next_attempt);
        let sender = self.senders[shard].clone();
        self.retry_tasks.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender
                .send(Envelope {
                    event,
                    attempt: next_attempt,
                })
                .await;
            this.retry_tasks.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Spawn one worker task per shard. Each drains its own queue in order,
    /// giving per-workflow ordering without a global lock.
    pub fn spawn_workers(
        self: &Arc<Self>,
        receivers: Vec<mpsc::Receiver<Envelope>>,
    ) -> Vec<JoinHandle<()>> {
        receivers
            .into_iter()
            .enumerate()
            .map(|(shard, rx)| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.run_shard(shard, rx).await })
            })
            .collect()
    }

    async fn run_shard(self: Arc<Self>, shard: usize, mut rx: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            if let Some(workflow_id) = envelope.event.workflow_id() {
                if self.is_cancelled(workflow_id) {
                    info!(%workflow_id, "dropping event for cancelled workflow");
                    continue;
                }
            }

            let topic = envelope.event.topic();
            let Some(handler) = self.handlers.get(&topic).map(|h| Arc::clone(h.value())) else {
                warn!(?topic, "no handler registered for topic");
                continue;
            };

            match handler.handle(&envelope.event).await {
                Ok(()) => {}
                Err(err) if envelope.attempt < self.config.retry.max_attempts => {
                    warn!(
                        ?topic,
                        attempt = envelope.attempt,
                        error = %err,
                        "handler failed, scheduling retry"
                    );
                    self.requeue_after_backoff(shard, envelope.event, envelope.attempt + 1);
                }
                Err(err) => {
                    error!(
                        ?topic,
                        attempt = envelope.attempt,
                        error = %err,
                        "handler failed at max attempts, giving up"
                    );
                }
            }
        }
    }
}
