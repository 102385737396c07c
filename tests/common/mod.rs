//! Common test utilities and helpers
//!
//! Fresh queue names under random identifiers, and operators over an
//! in-memory broker.

use hivequeue::queue::api::{InMemoryBroker, OperatorConfig, QueueName, QueueOperator};
use std::sync::Arc;
use std::time::Duration;

/// Lease used by every operator built here
pub const LEASE: Duration = Duration::from_secs(30);

/// Topic queue and one subscription queue for fresh random identifiers
pub fn fresh_names() -> (QueueName, QueueName) {
    let topic = uuid::Uuid::new_v4().to_string();
    let subscription = uuid::Uuid::new_v4().to_string();
    (
        QueueName::from_topic_name(&topic),
        QueueName::from_topic_and_subscription_name(&topic, &subscription),
    )
}

pub fn operator() -> (QueueOperator, Arc<InMemoryBroker>) {
    let broker = Arc::new(InMemoryBroker::default());
    let config = OperatorConfig {
        lease_duration: LEASE,
        ..OperatorConfig::default()
    };
    let operator = QueueOperator::new(config, broker.clone()).expect("default config is valid");
    (operator, broker)
}

/// Operator plus an already created topic and subscription
pub async fn operator_with_queues() -> (QueueOperator, Arc<InMemoryBroker>, QueueName, QueueName) {
    let (operator, broker) = operator();
    let (topic, subscription) = fresh_names();
    operator.create_queue(&topic).await.expect("create topic");
    operator
        .create_queue(&subscription)
        .await
        .expect("create subscription");
    (operator, broker, topic, subscription)
}
