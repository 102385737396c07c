//! Broker-backed Work Queue Component
//!
//! A client-side work queue over a peek-lock message broker. Producers push
//! events to topic queues; consumers pull from subscription queues under a
//! time-limited lease, keep the lease alive while they work and commit when
//! done. Delivery is at-least-once: a message whose lease runs out goes back
//! into circulation.
//!
//! # Overview
//!
//! - **Queue naming**: topic and subscription identifiers are escaped into
//!   canonical, collision-free broker addresses ([`QueueName`])
//! - **Batching**: outgoing events are packed greedily, in order, below the
//!   broker payload ceiling ([`batch_up`])
//! - **Leasing**: pull, background renewal, commit and abandon
//!   ([`LeaseManager`])
//! - **Brokers**: anything implementing [`QueueBroker`]; an in-process
//!   [`InMemoryBroker`] and the Azure Service Bus REST client ship with the
//!   crate
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  push_batch   ┌──────────────┐
//! │   Producer   │──────────────▶│ topic queue  │
//! └──────────────┘  (batched)    └──────┬───────┘
//!                                       │ fan-out
//!                    ┌──────────────────┼──────────────────┐
//!                    ▼                  ▼                  ▼
//!            ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!            │ subscription │   │ subscription │   │ subscription │
//!            └──────┬───────┘   └──────┬───────┘   └──────────────┘
//!                   │ next / renew / commit
//!          ┌────────┴────────┐
//!          ▼                 ▼
//!   ┌────────────┐    ┌────────────┐   (competing consumers, one
//!   │ Consumer A │    │ Consumer B │    lease per message)
//!   └────────────┘    └────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use hivequeue::queue::api::{Event, OperatorConfig, QueueName, QueueOperator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OperatorConfig::load(None).await?;
//! let operator = QueueOperator::connect(config)?;
//!
//! let subscription = QueueName::from_topic_and_subscription_name("orders", "billing");
//! operator
//!     .push(Event::new(subscription.topic_queue(), "OrderPlaced", "{\"id\":7}"))
//!     .await?;
//!
//! while let Some(lease) = operator.next(&subscription).await? {
//!     println!("Received: {}", lease.event().body());
//!     operator.commit(&lease).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;

mod batcher;
mod broker;
mod config;
mod error;
mod event;
mod lease;
mod memory;
mod name;
mod operator;

pub use batcher::{batch_up, ensure_within_ceiling, Batch, MAX_BATCH_BYTES};
pub use broker::{LockToken, QueueBroker, ReceivedMessage};
pub use config::{OperatorConfig, CONNECTION_ENV_VAR};
pub use error::{QueueError, QueueResult};
pub use event::{Event, EventHeader, EVENT_ENVELOPE_OVERHEAD, JSON_CONTENT_TYPE};
pub use lease::{LeaseManager, PollingResult, RenewalOutcome};
pub use memory::{InMemoryBroker, QueueStats};
pub use name::{QueueKind, QueueName, MAX_SUBSCRIPTION_SEGMENT, MAX_TOPIC_SEGMENT};
pub use operator::QueueOperator;

#[cfg(test)]
mod tests;
