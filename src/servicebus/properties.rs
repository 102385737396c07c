//! Wire formats of the Service Bus REST API
//!
//! Messages travel with a `BrokerProperties` JSON header (or object, inside a
//! batch send) and custom properties as plain headers whose string values
//! are JSON-quoted. Entity descriptions are Atom XML entries.

use crate::queue::{Event, EventHeader, QueueName, QueueResult, JSON_CONTENT_TYPE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.servicebus.json";
pub(crate) const ATOM_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";
pub(crate) const BROKER_PROPERTIES_HEADER: &str = "BrokerProperties";

// Custom properties carrying the envelope fields Service Bus has no slot for
pub(crate) const EVENT_TIMESTAMP_PROPERTY: &str = "EventTimestamp";
pub(crate) const QUEUE_NAME_PROPERTY: &str = "QueueName";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct BrokerProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_time_utc: Option<String>,
}

impl BrokerProperties {
    pub(crate) fn from_header(value: &str) -> QueueResult<Self> {
        Ok(serde_json::from_str(value)?)
    }

    /// Lock expiry, `None` when missing or not RFC 1123
    pub(crate) fn locked_until(&self) -> Option<DateTime<Utc>> {
        self.locked_until_utc.as_deref().and_then(parse_http_date)
    }

    pub(crate) fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.enqueued_time_utc.as_deref().and_then(parse_http_date)
    }
}

/// One element of a batch send body
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchEntry<'a> {
    body: &'a str,
    broker_properties: BrokerProperties,
    user_properties: UserProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UserProperties {
    event_timestamp: String,
    queue_name: String,
}

/// JSON body for `POST {entity}/messages`
pub(crate) fn batch_body(events: &[Event]) -> QueueResult<Vec<u8>> {
    let entries: Vec<BatchEntry<'_>> = events
        .iter()
        .map(|event| BatchEntry {
            body: event.body(),
            broker_properties: BrokerProperties {
                message_id: Some(event.id().to_string()),
                label: Some(event.event_type().to_string()),
                content_type: Some(event.content_type().to_string()),
                ..BrokerProperties::default()
            },
            user_properties: UserProperties {
                event_timestamp: event.timestamp().to_rfc3339(),
                queue_name: event.queue_name().to_string(),
            },
        })
        .collect();

    Ok(serde_json::to_vec(&entries)?)
}

/// Custom property and content headers of a received message
#[derive(Debug, Default)]
pub(crate) struct ReceivedHeaders {
    pub content_type: Option<String>,
    pub event_timestamp: Option<String>,
    pub queue_name: Option<String>,
}

/// Rebuild the published event from a received message
///
/// Envelope fields missing from the message fall back to what the broker
/// knows: enqueue time for the timestamp and the source topic for the queue.
pub(crate) fn event_from_message(
    received_from: &QueueName,
    properties: &BrokerProperties,
    headers: &ReceivedHeaders,
    body: String,
) -> Event {
    let timestamp = headers
        .event_timestamp
        .as_deref()
        .map(custom_property_value)
        .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
        .map(|t| t.with_timezone(&Utc))
        .or_else(|| properties.enqueued_at())
        .unwrap_or_else(Utc::now);

    let queue_name = headers
        .queue_name
        .as_deref()
        .map(custom_property_value)
        .and_then(|value| value.parse::<QueueName>().ok())
        .unwrap_or_else(|| received_from.topic_queue());

    let content_type = headers
        .content_type
        .clone()
        .or_else(|| properties.content_type.clone())
        .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());

    Event::from_parts(
        EventHeader {
            id: properties.message_id.clone().unwrap_or_default(),
            timestamp,
            event_type: properties.label.clone().unwrap_or_default(),
            queue_name,
            content_type,
        },
        body,
    )
}

// Custom string properties arrive JSON-quoted: "value"
fn custom_property_value(raw: &str) -> String {
    serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string())
}

// "Wed, 11 Oct 2023 09:30:00 GMT"
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

const ATOM_HEAD: &str = r#"<?xml version="1.0" encoding="utf-8"?><entry xmlns="http://www.w3.org/2005/Atom"><content type="application/xml">"#;
const ATOM_TAIL: &str = "</content></entry>";
const DESCRIPTION_NAMESPACES: &str = r#"xmlns:i="http://www.w3.org/2001/XMLSchema-instance" xmlns="http://schemas.microsoft.com/netservices/2010/10/servicebus/connect""#;

pub(crate) fn topic_description() -> String {
    format!(
        "{}<TopicDescription {}></TopicDescription>{}",
        ATOM_HEAD, DESCRIPTION_NAMESPACES, ATOM_TAIL
    )
}

/// Subscription entity with a fixed lock duration and delivery limit
pub(crate) fn subscription_description(lock_duration: Duration, max_delivery_count: u32) -> String {
    format!(
        "{}<SubscriptionDescription {}><LockDuration>{}</LockDuration><MaxDeliveryCount>{}</MaxDeliveryCount></SubscriptionDescription>{}",
        ATOM_HEAD,
        DESCRIPTION_NAMESPACES,
        iso8601_seconds(lock_duration),
        max_delivery_count,
        ATOM_TAIL
    )
}

// Whole seconds, at least one: PT30S
fn iso8601_seconds(duration: Duration) -> String {
    format!("PT{}S", duration.as_secs().max(1))
}

/// A GET on a missing entity can answer 200 with an empty feed
pub(crate) fn is_entity_entry(body: &str) -> bool {
    body.contains("<entry")
}
