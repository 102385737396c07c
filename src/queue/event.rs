//! Event Types for publishing to broker queues
//!
//! An [`Event`] is a unit of work bound for one queue: a header describing it
//! (id, timestamp, type tag, target queue, content type) and a serialized
//! body. Events are immutable once built. Their [`Event::size`] is what the
//! batcher packs against the broker's payload ceiling.

use crate::queue::error::{QueueError, QueueResult};
use crate::queue::name::QueueName;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Fixed per-event allowance for broker envelope properties
/// (message id, label, content type, timestamps, system headers).
pub const EVENT_ENVELOPE_OVERHEAD: usize = 512;

/// Content type of bodies produced by [`Event::from_payload`]
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header information carried with every event
#[derive(Debug, Clone, PartialEq)]
pub struct EventHeader {
    /// Unique id, stable across redeliveries
    pub id: String,
    /// Timestamp when the event was created
    pub timestamp: DateTime<Utc>,
    /// Application-defined type tag for routing/filtering
    pub event_type: String,
    /// Queue the event is published to
    pub queue_name: QueueName,
    /// MIME type of the body
    pub content_type: String,
}

/// A unit of work to publish
///
/// # Example
///
/// ```rust
/// use hivequeue::queue::api::{Event, QueueName};
///
/// let queue = QueueName::from_topic_name("orders");
/// let event = Event::from_payload(queue, &"chashm").unwrap();
/// assert_eq!(event.body(), "\"chashm\"");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    header: EventHeader,
    body: String,
}

impl Event {
    /// Build an event from an already serialized body
    pub fn new(
        queue_name: QueueName,
        event_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            header: EventHeader {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                event_type: event_type.into(),
                queue_name,
                content_type: JSON_CONTENT_TYPE.to_string(),
            },
            body: body.into(),
        }
    }

    /// Serialize `payload` as JSON, tagging the event with the payload's type name
    pub fn from_payload<T: Serialize + ?Sized>(
        queue_name: QueueName,
        payload: &T,
    ) -> QueueResult<Self> {
        let body = serde_json::to_string(payload)?;
        Ok(Self::new(queue_name, short_type_name::<T>(), body))
    }

    /// Reassemble an event received from a broker
    pub(crate) fn from_parts(header: EventHeader, body: String) -> Self {
        Self { header, body }
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn event_type(&self) -> &str {
        &self.header.event_type
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.header.queue_name
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.header.timestamp
    }

    pub fn content_type(&self) -> &str {
        &self.header.content_type
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serialized size in bytes: body plus the fixed envelope overhead
    pub fn size(&self) -> usize {
        self.body.len() + EVENT_ENVELOPE_OVERHEAD
    }

    /// Deserialize the JSON body into `T`
    pub fn decode<T: DeserializeOwned>(&self) -> QueueResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            let data_preview = if self.body.len() > 100 {
                let truncated_bytes = &self.body.as_bytes()[..100];
                format!("{}...", String::from_utf8_lossy(truncated_bytes))
            } else {
                self.body.clone()
            };

            QueueError::Serialization {
                message: format!(
                    "Failed to deserialize event to {}: {} | id: {}, type: '{}', queue: '{}' | data_length: {}, data_preview: '{}'",
                    std::any::type_name::<T>(),
                    e,
                    self.header.id,
                    self.header.event_type,
                    self.header.queue_name,
                    self.body.len(),
                    data_preview
                ),
            }
        })
    }
}

/// Type name with module paths stripped, generics included (`Vec<String>`)
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let mut short = String::with_capacity(full.len());
    let mut segment_start = 0;

    for (i, c) in full.char_indices() {
        if matches!(
            c,
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' | ';'
        ) {
            short.push_str(last_path_segment(&full[segment_start..i]));
            short.push(c);
            segment_start = i + c.len_utf8();
        }
    }
    short.push_str(last_path_segment(&full[segment_start..]));
    short
}

fn last_path_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}
