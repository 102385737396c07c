//! Shared fixtures for the queue test suites

use crate::queue::api::{Event, InMemoryBroker, QueueBroker, QueueName, EVENT_ENVELOPE_OVERHEAD};

/// Event whose `size()` is exactly `size` bytes
pub fn event_of_size(queue: &QueueName, size: usize) -> Event {
    assert!(size >= EVENT_ENVELOPE_OVERHEAD);
    Event::new(queue.clone(), "sized", "x".repeat(size - EVENT_ENVELOPE_OVERHEAD))
}

/// Fresh topic plus one subscription under random identifiers
pub async fn topic_with_subscription(broker: &InMemoryBroker) -> (QueueName, QueueName) {
    let topic_id = uuid::Uuid::new_v4().to_string();
    let topic = QueueName::from_topic_name(&topic_id);
    let subscription = QueueName::from_topic_and_subscription_name(&topic_id, "workers");

    broker.create_queue(&topic).await.unwrap();
    broker.create_queue(&subscription).await.unwrap();
    (topic, subscription)
}
