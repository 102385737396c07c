//! Broker capability interface
//!
//! The broker owns message storage and lock state. The client only ever holds
//! a [`LockToken`]: an opaque handle to one broker-side lock record that it
//! forwards back on renew/complete/release. All validity checks happen on the
//! broker side.

use crate::queue::error::QueueResult;
use crate::queue::event::Event;
use crate::queue::name::QueueName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Opaque capability granting exclusive processing of one message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken {
    queue: QueueName,
    message_id: String,
    token: String,
}

impl LockToken {
    pub fn new(queue: QueueName, message_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            queue,
            message_id: message_id.into(),
            token: token.into(),
        }
    }

    /// Queue holding the locked message
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Broker-issued lock identifier
    pub fn as_str(&self) -> &str {
        &self.token
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

/// A message handed out under a fresh lock by [`QueueBroker::receive_one`]
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub event: Event,
    pub lock_token: LockToken,
    pub locked_until: DateTime<Utc>,
    /// Broker-maintained count of deliveries, this one included
    pub delivery_count: u32,
    pub sequence_number: u64,
}

/// Operations the core requires from a message broker
///
/// Implementations must grant each lock to at most one caller at a time and
/// reject `send_batch` payloads at or above
/// [`MAX_BATCH_BYTES`](crate::queue::batcher::MAX_BATCH_BYTES).
#[async_trait]
pub trait QueueBroker: Send + Sync {
    async fn create_queue(&self, name: &QueueName) -> QueueResult<()>;

    async fn queue_exists(&self, name: &QueueName) -> QueueResult<bool>;

    /// Removes the queue and any undelivered messages
    async fn delete_queue(&self, name: &QueueName) -> QueueResult<()>;

    /// Enqueue `events` in order as one send
    async fn send_batch(&self, name: &QueueName, events: &[Event]) -> QueueResult<()>;

    /// Lock and return the next available message, `None` when the queue is empty
    async fn receive_one(
        &self,
        name: &QueueName,
        lease_duration: Duration,
    ) -> QueueResult<Option<ReceivedMessage>>;

    /// Extend the lock to `lease_duration` from now, returning the new expiry
    ///
    /// Fails with `LeaseLost` if the lock already expired or was taken over.
    async fn renew_lease(
        &self,
        token: &LockToken,
        lease_duration: Duration,
    ) -> QueueResult<DateTime<Utc>>;

    /// Permanently remove the locked message
    async fn complete(&self, token: &LockToken) -> QueueResult<()>;

    /// Give the message back to the queue before its lock expires
    async fn release_lease(&self, token: &LockToken) -> QueueResult<()>;
}
