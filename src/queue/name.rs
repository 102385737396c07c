//! Canonical queue addresses for topics and subscriptions
//!
//! A topic queue is named from its topic identifier alone; a subscription
//! queue from the (topic, subscription) pair. Each identifier becomes one
//! broker-legal segment: ASCII letters, digits, `-` and `_`, starting and
//! ending with a letter or digit, at most 260 characters for a topic and 50
//! for a subscription.
//!
//! - an identifier that already obeys those rules and has no `_` is used as is
//! - anything else is escaped (every byte other than a letter, digit or `-`
//!   becomes `_` plus two lowercase hex digits) and wrapped as `x<escaped>_x`
//! - if the wrapped form is still too long it is cut and finished with `_h`
//!   and 32 hex digits of the SHA-256 of the identifier, ending in a hex digit
//!
//! The three forms are told apart by their shape (no `_`, trailing `_x`,
//! trailing hex), so distinct identifiers give distinct segments; only the
//! hashed form relies on the digest for that. Segments never contain `/`, so
//! `orders` and `orders/subscriptions/billing` can never collide.

use crate::queue::error::{QueueError, QueueResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const SUBSCRIPTIONS_SEPARATOR: &str = "/subscriptions/";

/// Longest topic segment the broker accepts
pub const MAX_TOPIC_SEGMENT: usize = 260;
/// Longest subscription segment the broker accepts
pub const MAX_SUBSCRIPTION_SEGMENT: usize = 50;

const DIGEST_HEX_CHARS: usize = 32;

/// Which side of the publish/subscribe topology a queue sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Publish-side aggregate queue
    Topic,
    /// Per-consumer-group delivery queue fed by a topic
    Subscription,
}

/// Immutable, canonical identifier of a broker queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueName {
    topic: String,
    subscription: Option<String>,
}

impl QueueName {
    /// Name the topic queue for `topic`
    pub fn from_topic_name(topic: impl AsRef<str>) -> Self {
        Self {
            topic: escape_segment(topic.as_ref(), MAX_TOPIC_SEGMENT),
            subscription: None,
        }
    }

    /// Name the subscription queue for the (`topic`, `subscription`) pair
    pub fn from_topic_and_subscription_name(
        topic: impl AsRef<str>,
        subscription: impl AsRef<str>,
    ) -> Self {
        Self {
            topic: escape_segment(topic.as_ref(), MAX_TOPIC_SEGMENT),
            subscription: Some(escape_segment(
                subscription.as_ref(),
                MAX_SUBSCRIPTION_SEGMENT,
            )),
        }
    }

    pub fn kind(&self) -> QueueKind {
        match self.subscription {
            Some(_) => QueueKind::Subscription,
            None => QueueKind::Topic,
        }
    }

    pub fn is_topic(&self) -> bool {
        self.kind() == QueueKind::Topic
    }

    /// Escaped topic segment
    pub fn topic_segment(&self) -> &str {
        &self.topic
    }

    /// Escaped subscription segment, `None` for topic queues
    pub fn subscription_segment(&self) -> Option<&str> {
        self.subscription.as_deref()
    }

    /// The topic queue this queue belongs to (itself for a topic queue)
    pub fn topic_queue(&self) -> QueueName {
        QueueName {
            topic: self.topic.clone(),
            subscription: None,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subscription {
            Some(subscription) => {
                write!(f, "{}{}{}", self.topic, SUBSCRIPTIONS_SEPARATOR, subscription)
            }
            None => write!(f, "{}", self.topic),
        }
    }
}

impl FromStr for QueueName {
    type Err = QueueError;

    /// Parse a rendered address back into a `QueueName`
    ///
    /// Only already-escaped segments are accepted; raw identifiers go through
    /// the `from_*` constructors instead.
    fn from_str(s: &str) -> QueueResult<Self> {
        let (topic, subscription) = match s.split_once(SUBSCRIPTIONS_SEPARATOR) {
            Some((topic, subscription)) => (topic, Some(subscription)),
            None => (s, None),
        };

        validate_segment(topic, MAX_TOPIC_SEGMENT, s)?;
        if let Some(subscription) = subscription {
            validate_segment(subscription, MAX_SUBSCRIPTION_SEGMENT, s)?;
        }

        Ok(Self {
            topic: topic.to_string(),
            subscription: subscription.map(str::to_string),
        })
    }
}

fn escape_segment(identifier: &str, max_len: usize) -> String {
    if is_plain(identifier, max_len) {
        return identifier.to_string();
    }

    let mut escaped = String::with_capacity(identifier.len() + 3);
    escaped.push('x');
    for byte in identifier.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{:02x}", byte));
        }
    }

    if escaped.len() + 2 <= max_len {
        escaped.push_str("_x");
        return escaped;
    }

    // Escaped output is ASCII, so truncating by bytes is safe
    let digest = Sha256::digest(identifier.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    escaped.truncate(max_len - DIGEST_HEX_CHARS - 2);
    escaped.push_str("_h");
    escaped.push_str(&hex[..DIGEST_HEX_CHARS]);
    escaped
}

fn is_plain(identifier: &str, max_len: usize) -> bool {
    let bytes = identifier.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= max_len
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        }
        _ => false,
    }
}

fn validate_segment(segment: &str, max_len: usize, address: &str) -> QueueResult<()> {
    let bytes = segment.as_bytes();
    let legal = match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= max_len
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
        }
        _ => false,
    };

    if legal {
        Ok(())
    } else {
        Err(QueueError::Configuration {
            message: format!("Invalid queue address '{}'", address),
        })
    }
}
