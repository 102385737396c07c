//! Queue Error Types

use crate::queue::name::QueueName;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: QueueName },

    #[error("Queue already exists: {queue}")]
    QueueAlreadyExists { queue: QueueName },

    #[error("Event {event_id} is {size} bytes and can never fit a batch (limit: {limit})")]
    BatchTooLarge {
        event_id: String,
        size: usize,
        limit: usize,
    },

    #[error("Lease lost: {token}")]
    LeaseLost { token: String },

    #[error("Transport failure: {message}")]
    TransportFailure { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Operation failed: {message}")]
    OperationFailed { message: String },
}

impl QueueError {
    /// True when the lease behind a renew/commit/abandon is gone.
    ///
    /// Callers treat this as an expected race (the message is either back in
    /// circulation or already removed), not as a failure of their own.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, QueueError::LeaseLost { .. })
    }

    /// Only network/broker unavailability is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::TransportFailure { .. })
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Serialization {
            message: e.to_string(),
        }
    }
}

impl crate::core::error_handling::ContextualError for QueueError {
    fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            QueueError::Configuration { .. }
                | QueueError::QueueNotFound { .. }
                | QueueError::QueueAlreadyExists { .. }
                | QueueError::BatchTooLarge { .. }
        )
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            QueueError::Configuration { message } => Some(message),
            QueueError::QueueNotFound { .. } => Some("Queue does not exist; create it first"),
            QueueError::QueueAlreadyExists { .. } => {
                Some("Queue already exists; check existence before creating")
            }
            QueueError::BatchTooLarge { .. } => {
                Some("Event exceeds the broker payload ceiling and cannot be sent")
            }
            _ => None,
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
