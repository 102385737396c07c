//! Lease lifecycle: pull, background renewal, commit and abandon
//!
//! ```text
//! Available --next--> Locked --commit--> Committed
//!                      |  ^
//!                      |  '--renew (before expiry)
//!                      '--abandon / expiry--> Available
//! ```
//!
//! The broker is the system of record for lock state. A [`PollingResult`] only
//! carries the lock token plus a local view of the expiry, refreshed by
//! successful renewals.

use crate::core::error_handling::log_error_with_context;
use crate::queue::broker::{LockToken, QueueBroker, ReceivedMessage};
use crate::queue::config::deadline_after;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::event::Event;
use crate::queue::name::QueueName;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A received message together with the lease that grants exclusive processing
///
/// Clones share the same expiry cell, so a renewal loop running on one clone is
/// visible through all of them.
#[derive(Debug, Clone)]
pub struct PollingResult {
    event: Event,
    token: LockToken,
    expires_at: Arc<RwLock<DateTime<Utc>>>,
    delivery_count: u32,
    sequence_number: u64,
}

impl PollingResult {
    pub(crate) fn from_received(message: ReceivedMessage) -> Self {
        Self {
            event: message.event,
            token: message.lock_token,
            expires_at: Arc::new(RwLock::new(message.locked_until)),
            delivery_count: message.delivery_count,
            sequence_number: message.sequence_number,
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Queue the message was pulled from
    pub fn queue_name(&self) -> &QueueName {
        self.token.queue()
    }

    /// Last known lease expiry
    pub fn expires_at(&self) -> DateTime<Utc> {
        *self
            .expires_at
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliveries so far, this one included (1 on first delivery)
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    fn extend_to(&self, expiry: DateTime<Utc>) {
        let mut current = self
            .expires_at
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if expiry > *current {
            *current = expiry;
        }
    }
}

/// Why a renewal loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// The cancellation token fired
    Cancelled,
    /// The broker no longer recognises the lock (expired, stolen or completed)
    LeaseLost,
    /// Transport or broker failure
    Failed,
}

/// Owns the pull → renew → commit/abandon protocol against one broker
#[derive(Clone)]
pub struct LeaseManager {
    broker: Arc<dyn QueueBroker>,
    lease_duration: Duration,
}

impl LeaseManager {
    pub fn new(broker: Arc<dyn QueueBroker>, lease_duration: Duration) -> Self {
        Self {
            broker,
            lease_duration,
        }
    }

    /// Duration requested for every fresh lock and every renewal
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Pull one message under a fresh lease; `None` when the queue is empty
    pub async fn next(&self, queue: &QueueName) -> QueueResult<Option<PollingResult>> {
        let received = self.broker.receive_one(queue, self.lease_duration).await?;

        Ok(received.map(|message| {
            log::debug!(
                "Leased message {} from {} until {} (delivery {})",
                message.event.id(),
                queue,
                message.locked_until,
                message.delivery_count
            );
            PollingResult::from_received(message)
        }))
    }

    /// Keep renewing `lease` every `period` until `cancel` fires or renewal fails
    ///
    /// Runs as an independent task and returns immediately. No renewal is
    /// issued once cancellation has been observed; one already in flight is
    /// allowed to finish. Failures end the loop and are only logged: the caller
    /// finds out when a later commit reports `LeaseLost`. Dropping the returned
    /// handle detaches the task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn keep_extending_lease(
        &self,
        lease: &PollingResult,
        period: Duration,
        cancel: CancellationToken,
    ) -> QueueResult<JoinHandle<RenewalOutcome>> {
        if period.is_zero() {
            return Err(QueueError::Configuration {
                message: "Lease renewal period must be greater than zero".to_string(),
            });
        }
        // First renewal one period after start, not immediately
        let first_renewal = deadline_after(Instant::now(), period, "Lease renewal period")?;
        if period >= self.lease_duration {
            log::warn!(
                "Renewal period {:?} is not shorter than lease duration {:?}; lease {} may expire between renewals",
                period,
                self.lease_duration,
                lease.token()
            );
        }

        let broker = Arc::clone(&self.broker);
        let lease = lease.clone();
        let lease_duration = self.lease_duration;

        Ok(tokio::spawn(async move {
            run_renewal_loop(broker, lease, lease_duration, first_renewal, period, cancel).await
        }))
    }

    /// Acknowledge the message, removing it from the queue for good
    ///
    /// A `LeaseLost` error means the lease expired or was already committed;
    /// callers should treat it as a no-op.
    pub async fn commit(&self, lease: &PollingResult) -> QueueResult<()> {
        match self.broker.complete(lease.token()).await {
            Ok(()) => {
                log::debug!(
                    "Committed message {} on {}",
                    lease.event().id(),
                    lease.queue_name()
                );
                Ok(())
            }
            Err(e) => {
                log_error_with_context(&e, "Commit");
                Err(e)
            }
        }
    }

    /// Release the lease early so the message becomes available again at once
    pub async fn abandon(&self, lease: &PollingResult) -> QueueResult<()> {
        self.broker.release_lease(lease.token()).await?;
        log::debug!(
            "Abandoned message {} on {}",
            lease.event().id(),
            lease.queue_name()
        );
        Ok(())
    }
}

async fn run_renewal_loop(
    broker: Arc<dyn QueueBroker>,
    lease: PollingResult,
    lease_duration: Duration,
    first_renewal: Instant,
    period: Duration,
    cancel: CancellationToken,
) -> RenewalOutcome {
    let mut ticker = interval_at(first_renewal, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::debug!(
        "Renewal loop started for lease {} (every {:?})",
        lease.token(),
        period
    );

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break RenewalOutcome::Cancelled,
            _ = ticker.tick() => {}
        }

        // The tick and the cancellation can become ready together
        if cancel.is_cancelled() {
            break RenewalOutcome::Cancelled;
        }

        match broker.renew_lease(lease.token(), lease_duration).await {
            Ok(expiry) => {
                lease.extend_to(expiry);
                log::trace!("Renewed lease {} until {}", lease.token(), expiry);
            }
            Err(e) if e.is_lease_lost() => {
                log_error_with_context(&e, "Lease renewal");
                break RenewalOutcome::LeaseLost;
            }
            Err(e) => {
                log_error_with_context(&e, "Lease renewal");
                break RenewalOutcome::Failed;
            }
        }
    };

    match outcome {
        RenewalOutcome::Cancelled => {
            log::info!("Renewal loop for lease {} cancelled", lease.token())
        }
        _ => log::warn!(
            "Renewal loop for lease {} stopped: {:?}",
            lease.token(),
            outcome
        ),
    }

    outcome
}
