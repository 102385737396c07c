//! QueueOperator - facade over batching, leasing and queue administration
//!
//! The operator holds only static configuration and shared handles; it keeps
//! no per-call state, so one instance (or any clone of it) can be used from
//! many tasks at once.

use crate::core::retry::retry_async;
use crate::queue::batcher::{batch_up, Batch};
use crate::queue::broker::QueueBroker;
use crate::queue::config::OperatorConfig;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::event::Event;
use crate::queue::lease::{LeaseManager, PollingResult, RenewalOutcome};
use crate::queue::name::QueueName;
use crate::servicebus::ServiceBusBroker;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Client-side entry point to a broker-hosted queue
///
/// # Example
///
/// ```rust,no_run
/// use hivequeue::queue::api::{
///     CancellationToken, Event, InMemoryBroker, OperatorConfig, QueueName, QueueOperator,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let operator = QueueOperator::new(OperatorConfig::default(), Arc::new(InMemoryBroker::default()))?;
///
/// let topic = QueueName::from_topic_name("orders");
/// let subscription = QueueName::from_topic_and_subscription_name("orders", "billing");
/// operator.create_queue(&topic).await?;
/// operator.create_queue(&subscription).await?;
///
/// operator.push(Event::from_payload(topic.clone(), &"chashm")?).await?;
///
/// if let Some(lease) = operator.next(&subscription).await? {
///     let cancel = CancellationToken::new();
///     operator.keep_extending_lease(&lease, Duration::from_secs(10), cancel.clone())?;
///     // ... process lease.event() ...
///     cancel.cancel();
///     operator.commit(&lease).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct QueueOperator {
    config: Arc<OperatorConfig>,
    broker: Arc<dyn QueueBroker>,
    leases: LeaseManager,
}

impl QueueOperator {
    /// Create an operator over an existing broker implementation
    pub fn new(config: OperatorConfig, broker: Arc<dyn QueueBroker>) -> QueueResult<Self> {
        config.validate()?;

        let leases = LeaseManager::new(Arc::clone(&broker), config.lease_duration);
        Ok(Self {
            config: Arc::new(config),
            broker,
            leases,
        })
    }

    /// Create an operator talking to Azure Service Bus through `config.connection`
    pub fn connect(config: OperatorConfig) -> QueueResult<Self> {
        let broker = ServiceBusBroker::from_config(&config)?;
        Self::new(config, Arc::new(broker))
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Pack events into broker-legal batches without sending them
    pub fn batch_up(events: impl IntoIterator<Item = Event>) -> QueueResult<Vec<Batch>> {
        batch_up(events)
    }

    pub async fn create_queue(&self, name: &QueueName) -> QueueResult<()> {
        self.broker.create_queue(name).await
    }

    pub async fn queue_exists(&self, name: &QueueName) -> QueueResult<bool> {
        self.broker.queue_exists(name).await
    }

    pub async fn delete_queue(&self, name: &QueueName) -> QueueResult<()> {
        self.broker.delete_queue(name).await
    }

    /// Publish a single event
    pub async fn push(&self, event: Event) -> QueueResult<()> {
        self.push_batch([event]).await
    }

    /// Publish events, batching them per target queue
    ///
    /// Every event is checked against the payload ceiling before anything is
    /// sent. Batches then go out concurrently (up to `max_concurrent_sends`):
    /// order inside a batch is preserved, order across batches is not.
    /// Transient transport failures are retried per `send_retry`.
    pub async fn push_batch(&self, events: impl IntoIterator<Item = Event>) -> QueueResult<()> {
        let mut plan: Vec<(QueueName, Batch)> = Vec::new();
        for (queue, group) in group_by_queue(events) {
            for batch in batch_up(group)? {
                plan.push((queue.clone(), batch));
            }
        }

        if plan.is_empty() {
            return Ok(());
        }

        let batch_count = plan.len();
        stream::iter(plan)
            .map(|(queue, batch)| self.send_batch(queue, batch))
            .buffer_unordered(self.config.max_concurrent_sends)
            .try_collect::<Vec<()>>()
            .await?;

        log::debug!("Pushed {} batch(es)", batch_count);
        Ok(())
    }

    async fn send_batch(&self, queue: QueueName, batch: Batch) -> QueueResult<()> {
        let target = &queue;
        let events = batch.events();
        retry_async(
            "send_batch",
            &self.config.send_retry,
            QueueError::is_transient,
            || self.broker.send_batch(target, events),
        )
        .await?;

        log::debug!(
            "Sent batch of {} event(s) ({} bytes) to {}",
            batch.len(),
            batch.total_size(),
            queue
        );
        Ok(())
    }

    /// Pull one message under a fresh lease; `None` when the queue is empty
    pub async fn next(&self, queue: &QueueName) -> QueueResult<Option<PollingResult>> {
        self.leases.next(queue).await
    }

    /// Acknowledge a leased message; `LeaseLost` means there is nothing left to do
    pub async fn commit(&self, lease: &PollingResult) -> QueueResult<()> {
        self.leases.commit(lease).await
    }

    /// Return a leased message to the queue without waiting for expiry
    pub async fn abandon(&self, lease: &PollingResult) -> QueueResult<()> {
        self.leases.abandon(lease).await
    }

    /// Renew `lease` every `period` in the background until `cancel` fires
    pub fn keep_extending_lease(
        &self,
        lease: &PollingResult,
        period: Duration,
        cancel: CancellationToken,
    ) -> QueueResult<JoinHandle<RenewalOutcome>> {
        self.leases.keep_extending_lease(lease, period, cancel)
    }
}

/// Group events by target queue, keeping first-seen queue order and event order
fn group_by_queue(events: impl IntoIterator<Item = Event>) -> Vec<(QueueName, Vec<Event>)> {
    let mut groups: Vec<(QueueName, Vec<Event>)> = Vec::new();

    for event in events {
        match groups
            .iter()
            .position(|(queue, _)| queue == event.queue_name())
        {
            Some(index) => groups[index].1.push(event),
            None => groups.push((event.queue_name().clone(), vec![event])),
        }
    }

    groups
}
