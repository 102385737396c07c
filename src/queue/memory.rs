//! In-process broker implementing the full capability interface
//!
//! Behaves like a peek-lock broker:
//! - sending to a topic queue fans out to every subscription queue of that
//!   topic (a topic with no subscriptions drops the events)
//! - messages are handed out in sequence order under an exclusive lock
//! - expired locks are reclaimed lazily on every operation, returning the
//!   message for redelivery with its delivery count preserved
//! - a message already delivered `max_delivery_count` times is dead-lettered
//!   instead of being delivered again
//! - sends at or above the payload ceiling are rejected
//!
//! Lock expiry runs on `tokio::time::Instant`, so tests can drive it with a
//! paused clock.

use crate::queue::batcher::ensure_within_ceiling;
use crate::queue::broker::{LockToken, QueueBroker, ReceivedMessage};
use crate::queue::config::{deadline_after, OperatorConfig};
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::event::Event;
use crate::queue::name::{QueueKind, QueueName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Per-queue statistics
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueStats {
    /// Messages waiting for delivery
    pub available: usize,
    /// Messages currently under a lock
    pub locked: usize,
    /// Messages moved aside after too many deliveries
    pub dead_lettered: usize,
    /// Sum of event sizes over available and locked messages
    pub total_bytes: usize,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    event: Event,
    sequence: u64,
    delivery_count: u32,
}

#[derive(Debug)]
struct LockedMessage {
    message: StoredMessage,
    message_id: String,
    locked_until: Instant,
}

#[derive(Debug)]
struct QueueState {
    /// Next sequence number; starts at 1
    next_sequence: u64,
    /// Available messages in sequence order
    available: VecDeque<StoredMessage>,
    /// Locked messages by lock token
    locked: HashMap<String, LockedMessage>,
    dead_letters: Vec<StoredMessage>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            next_sequence: 1,
            available: VecDeque::new(),
            locked: HashMap::new(),
            dead_letters: Vec::new(),
        }
    }

    fn enqueue(&mut self, event: Event) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.available.push_back(StoredMessage {
            event,
            sequence,
            delivery_count: 0,
        });
    }

    /// Put a message back among the available ones, keeping sequence order
    fn make_available(&mut self, message: StoredMessage) {
        let position = self
            .available
            .iter()
            .position(|m| m.sequence > message.sequence)
            .unwrap_or(self.available.len());
        self.available.insert(position, message);
    }

    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .locked
            .iter()
            .filter(|(_, locked)| locked.locked_until <= now)
            .map(|(token, _)| token.clone())
            .collect();

        for token in expired {
            if let Some(locked) = self.locked.remove(&token) {
                log::debug!(
                    "Lock {} on message {} expired; message available again",
                    token,
                    locked.message_id
                );
                self.make_available(locked.message);
            }
        }
    }

    fn stats(&self) -> QueueStats {
        let available_bytes: usize = self.available.iter().map(|m| m.event.size()).sum();
        let locked_bytes: usize = self.locked.values().map(|l| l.message.event.size()).sum();

        QueueStats {
            available: self.available.len(),
            locked: self.locked.len(),
            dead_lettered: self.dead_letters.len(),
            total_bytes: available_bytes + locked_bytes,
        }
    }
}

/// In-memory peek-lock broker
#[derive(Debug)]
pub struct InMemoryBroker {
    queues: RwLock<HashMap<QueueName, QueueState>>,
    max_delivery_count: u32,
    batches_received: AtomicU64,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(10)
    }
}

impl InMemoryBroker {
    pub fn new(max_delivery_count: u32) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            max_delivery_count: max_delivery_count.max(1),
            batches_received: AtomicU64::new(0),
        }
    }

    /// Broker that dead-letters after `config.max_delivery_count` deliveries
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self::new(config.max_delivery_count)
    }

    /// Statistics for `name`, `None` if the queue does not exist
    pub fn queue_stats(&self, name: &QueueName) -> Option<QueueStats> {
        let mut queues = self.write_queues().ok()?;
        let state = queues.get_mut(name)?;
        state.reclaim_expired(Instant::now());
        Some(state.stats())
    }

    /// Events dead-lettered on `name`, oldest first
    pub fn dead_letters(&self, name: &QueueName) -> Vec<Event> {
        self.read_queues()
            .ok()
            .and_then(|queues| {
                queues
                    .get(name)
                    .map(|state| state.dead_letters.iter().map(|m| m.event.clone()).collect())
            })
            .unwrap_or_default()
    }

    /// Number of accepted `send_batch` calls since creation
    pub fn batches_received(&self) -> u64 {
        self.batches_received.load(Ordering::SeqCst)
    }

    fn read_queues(&self) -> QueueResult<RwLockReadGuard<'_, HashMap<QueueName, QueueState>>> {
        self.queues.read().map_err(|_| QueueError::OperationFailed {
            message: "In-memory broker state is poisoned".to_string(),
        })
    }

    fn write_queues(&self) -> QueueResult<RwLockWriteGuard<'_, HashMap<QueueName, QueueState>>> {
        self.queues.write().map_err(|_| QueueError::OperationFailed {
            message: "In-memory broker state is poisoned".to_string(),
        })
    }
}

fn expiry_timestamp(lease_duration: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(lease)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn holds_lock(state: &QueueState, token: &LockToken) -> bool {
    state
        .locked
        .get(token.as_str())
        .is_some_and(|locked| locked.message_id == token.message_id())
}

fn lease_lost(token: &LockToken) -> QueueError {
    QueueError::LeaseLost {
        token: token.to_string(),
    }
}

#[async_trait]
impl QueueBroker for InMemoryBroker {
    async fn create_queue(&self, name: &QueueName) -> QueueResult<()> {
        let mut queues = self.write_queues()?;

        if queues.contains_key(name) {
            return Err(QueueError::QueueAlreadyExists {
                queue: name.clone(),
            });
        }
        if name.kind() == QueueKind::Subscription && !queues.contains_key(&name.topic_queue()) {
            return Err(QueueError::QueueNotFound {
                queue: name.topic_queue(),
            });
        }

        queues.insert(name.clone(), QueueState::new());
        log::debug!("Created queue {}", name);
        Ok(())
    }

    async fn queue_exists(&self, name: &QueueName) -> QueueResult<bool> {
        Ok(self.read_queues()?.contains_key(name))
    }

    async fn delete_queue(&self, name: &QueueName) -> QueueResult<()> {
        let mut queues = self.write_queues()?;

        if queues.remove(name).is_none() {
            return Err(QueueError::QueueNotFound {
                queue: name.clone(),
            });
        }
        if name.is_topic() {
            // Subscriptions do not outlive their topic
            queues.retain(|queue, _| queue.is_topic() || queue.topic_queue() != *name);
        }

        log::debug!("Deleted queue {}", name);
        Ok(())
    }

    async fn send_batch(&self, name: &QueueName, events: &[Event]) -> QueueResult<()> {
        ensure_within_ceiling(events)?;

        let mut queues = self.write_queues()?;
        if !queues.contains_key(name) {
            return Err(QueueError::QueueNotFound {
                queue: name.clone(),
            });
        }

        match name.kind() {
            QueueKind::Topic => {
                let mut delivered_to = 0;
                for (queue, state) in queues.iter_mut() {
                    if !queue.is_topic() && queue.topic_queue() == *name {
                        for event in events {
                            state.enqueue(event.clone());
                        }
                        delivered_to += 1;
                    }
                }
                log::trace!(
                    "Fanned out {} event(s) from {} to {} subscription(s)",
                    events.len(),
                    name,
                    delivered_to
                );
            }
            QueueKind::Subscription => {
                if let Some(state) = queues.get_mut(name) {
                    for event in events {
                        state.enqueue(event.clone());
                    }
                }
            }
        }

        self.batches_received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive_one(
        &self,
        name: &QueueName,
        lease_duration: Duration,
    ) -> QueueResult<Option<ReceivedMessage>> {
        if name.is_topic() {
            return Err(QueueError::OperationFailed {
                message: format!("Cannot receive from topic queue {}; use a subscription", name),
            });
        }

        let mut queues = self.write_queues()?;
        let state = queues
            .get_mut(name)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue: name.clone(),
            })?;

        let now = Instant::now();
        state.reclaim_expired(now);
        let locked_until = deadline_after(now, lease_duration, "Lease duration")?;

        while let Some(mut message) = state.available.pop_front() {
            if message.delivery_count >= self.max_delivery_count {
                log::warn!(
                    "Message {} on {} exceeded {} deliveries; dead-lettering",
                    message.event.id(),
                    name,
                    self.max_delivery_count
                );
                state.dead_letters.push(message);
                continue;
            }

            message.delivery_count += 1;
            let token = uuid::Uuid::new_v4().to_string();
            let message_id = message.event.id().to_string();

            let received = ReceivedMessage {
                event: message.event.clone(),
                lock_token: LockToken::new(name.clone(), message_id.clone(), token.clone()),
                locked_until: expiry_timestamp(lease_duration),
                delivery_count: message.delivery_count,
                sequence_number: message.sequence,
            };

            state.locked.insert(
                token,
                LockedMessage {
                    message,
                    message_id,
                    locked_until,
                },
            );

            return Ok(Some(received));
        }

        Ok(None)
    }

    async fn renew_lease(
        &self,
        token: &LockToken,
        lease_duration: Duration,
    ) -> QueueResult<DateTime<Utc>> {
        let mut queues = self.write_queues()?;
        let state = queues
            .get_mut(token.queue())
            .ok_or_else(|| QueueError::QueueNotFound {
                queue: token.queue().clone(),
            })?;

        let now = Instant::now();
        state.reclaim_expired(now);
        let locked_until = deadline_after(now, lease_duration, "Lease duration")?;

        match state.locked.get_mut(token.as_str()) {
            Some(locked) if locked.message_id == token.message_id() => {
                locked.locked_until = locked_until;
                Ok(expiry_timestamp(lease_duration))
            }
            _ => Err(lease_lost(token)),
        }
    }

    async fn complete(&self, token: &LockToken) -> QueueResult<()> {
        let mut queues = self.write_queues()?;
        let state = queues
            .get_mut(token.queue())
            .ok_or_else(|| QueueError::QueueNotFound {
                queue: token.queue().clone(),
            })?;

        state.reclaim_expired(Instant::now());

        if !holds_lock(state, token) {
            return Err(lease_lost(token));
        }
        state.locked.remove(token.as_str());
        Ok(())
    }

    async fn release_lease(&self, token: &LockToken) -> QueueResult<()> {
        let mut queues = self.write_queues()?;
        let state = queues
            .get_mut(token.queue())
            .ok_or_else(|| QueueError::QueueNotFound {
                queue: token.queue().clone(),
            })?;

        state.reclaim_expired(Instant::now());

        if !holds_lock(state, token) {
            return Err(lease_lost(token));
        }
        if let Some(locked) = state.locked.remove(token.as_str()) {
            state.make_available(locked.message);
        }
        Ok(())
    }
}
