//! Public API for the queue system
//!
//! External modules should import from here rather than directly from internal modules.
//! See module documentation for complete usage examples and architecture details.

// Entry point
pub use crate::queue::operator::QueueOperator;
pub use crate::queue::config::{OperatorConfig, CONNECTION_ENV_VAR};

// Addressing and events
pub use crate::queue::name::{QueueKind, QueueName, MAX_SUBSCRIPTION_SEGMENT, MAX_TOPIC_SEGMENT};
pub use crate::queue::event::{Event, EventHeader, EVENT_ENVELOPE_OVERHEAD, JSON_CONTENT_TYPE};

// Batching
pub use crate::queue::batcher::{batch_up, ensure_within_ceiling, Batch, MAX_BATCH_BYTES};

// Leasing
pub use crate::queue::lease::{LeaseManager, PollingResult, RenewalOutcome};
pub use tokio_util::sync::CancellationToken;

// Brokers
pub use crate::queue::broker::{LockToken, QueueBroker, ReceivedMessage};
pub use crate::queue::memory::{InMemoryBroker, QueueStats};

// Error handling
pub use crate::queue::error::{QueueError, QueueResult};
