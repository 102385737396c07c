//! Azure Service Bus transport
//!
//! Implements [`QueueBroker`](crate::queue::QueueBroker) over the Service
//! Bus REST API: topics and subscriptions map one to one onto queue names,
//! requests are signed with shared access signatures and messages are
//! received in peek-lock mode.

mod client;
mod connection;
mod properties;
mod sas;

pub use client::ServiceBusBroker;
pub use connection::ConnectionSettings;
