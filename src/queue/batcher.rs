//! Size-bounded, order-preserving batching of outgoing events
//!
//! The broker rejects any single send whose payload reaches
//! [`MAX_BATCH_BYTES`]. [`batch_up`] packs events greedily in one pass: an
//! event joins the running batch unless that would take the batch total to the
//! ceiling or beyond, in which case the running batch is closed and the event
//! opens the next one. Concatenating the output reproduces the input exactly.

use crate::queue::error::{QueueError, QueueResult};
use crate::queue::event::Event;

/// Broker hard payload ceiling per send; batch totals must stay strictly below it
pub const MAX_BATCH_BYTES: usize = 256 * 1024;

/// An ordered group of events destined for one send call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    events: Vec<Event>,
    total_size: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `event` can join without the total reaching the ceiling
    pub fn fits(&self, event: &Event) -> bool {
        self.total_size + event.size() < MAX_BATCH_BYTES
    }

    fn push(&mut self, event: Event) {
        self.total_size += event.size();
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Sum of the contained events' sizes
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Reject a send whose combined size reaches the ceiling
///
/// Brokers call this on every incoming batch; the reported event is the one
/// that pushed the running total over.
pub fn ensure_within_ceiling(events: &[Event]) -> QueueResult<()> {
    let mut total = 0;
    for event in events {
        total += event.size();
        if total >= MAX_BATCH_BYTES {
            return Err(QueueError::BatchTooLarge {
                event_id: event.id().to_string(),
                size: total,
                limit: MAX_BATCH_BYTES,
            });
        }
    }
    Ok(())
}

/// Pack `events` into broker-legal batches, preserving order
///
/// Fails with [`QueueError::BatchTooLarge`] before producing anything if an
/// event is, on its own, at or over the ceiling; no partial plan is returned.
pub fn batch_up(events: impl IntoIterator<Item = Event>) -> QueueResult<Vec<Batch>> {
    let mut batches = Vec::new();
    let mut current = Batch::new();

    for event in events {
        if event.size() >= MAX_BATCH_BYTES {
            return Err(QueueError::BatchTooLarge {
                event_id: event.id().to_string(),
                size: event.size(),
                limit: MAX_BATCH_BYTES,
            });
        }

        if !current.fits(&event) {
            batches.push(std::mem::take(&mut current));
        }
        current.push(event);
    }

    if !current.is_empty() {
        batches.push(current);
    }

    log::debug!(
        "Planned {} batch(es) for {} event(s)",
        batches.len(),
        batches.iter().map(Batch::len).sum::<usize>()
    );

    Ok(batches)
}
