//! Tests for the in-memory broker

#[cfg(test)]
mod tests {
    use super::super::helpers::{event_of_size, topic_with_subscription};
    use crate::queue::api::{
        Event, InMemoryBroker, OperatorConfig, QueueBroker, QueueError, QueueName, QueueStats,
        MAX_BATCH_BYTES,
    };
    use std::time::Duration;

    const LEASE: Duration = Duration::from_secs(30);

    fn events(queue: &QueueName, count: usize) -> Vec<Event> {
        (0..count)
            .map(|i| Event::new(queue.clone(), "n", i.to_string()))
            .collect()
    }

    async fn drain_bodies(broker: &InMemoryBroker, subscription: &QueueName) -> Vec<String> {
        let mut bodies = Vec::new();
        while let Some(message) = broker.receive_one(subscription, LEASE).await.unwrap() {
            bodies.push(message.event.body().to_string());
            broker.complete(&message.lock_token).await.unwrap();
        }
        bodies
    }

    #[tokio::test]
    async fn test_topic_fans_out_to_every_subscription() {
        let broker = InMemoryBroker::default();
        let topic_id = uuid::Uuid::new_v4().to_string();
        let topic = QueueName::from_topic_name(&topic_id);
        let billing = QueueName::from_topic_and_subscription_name(&topic_id, "billing");
        let audit = QueueName::from_topic_and_subscription_name(&topic_id, "audit");
        for queue in [&topic, &billing, &audit] {
            broker.create_queue(queue).await.unwrap();
        }

        broker.send_batch(&topic, &events(&topic, 3)).await.unwrap();

        for subscription in [&billing, &audit] {
            assert_eq!(drain_bodies(&broker, subscription).await, vec!["0", "1", "2"]);
        }
        assert_eq!(broker.queue_stats(&topic).unwrap().available, 0);
    }

    #[tokio::test]
    async fn test_topic_without_subscriptions_drops_events() {
        let broker = InMemoryBroker::default();
        let topic = QueueName::from_topic_name(uuid::Uuid::new_v4().to_string());
        broker.create_queue(&topic).await.unwrap();

        broker.send_batch(&topic, &events(&topic, 2)).await.unwrap();

        assert_eq!(broker.queue_stats(&topic).unwrap(), QueueStats::default());
        assert_eq!(broker.batches_received(), 1);
    }

    #[tokio::test]
    async fn test_queue_administration() {
        let broker = InMemoryBroker::default();
        let topic_id = uuid::Uuid::new_v4().to_string();
        let topic = QueueName::from_topic_name(&topic_id);
        let subscription = QueueName::from_topic_and_subscription_name(&topic_id, "workers");

        assert!(!broker.queue_exists(&topic).await.unwrap());
        assert!(matches!(
            broker.create_queue(&subscription).await,
            Err(QueueError::QueueNotFound { queue }) if queue == topic
        ));

        broker.create_queue(&topic).await.unwrap();
        broker.create_queue(&subscription).await.unwrap();
        assert!(matches!(
            broker.create_queue(&topic).await,
            Err(QueueError::QueueAlreadyExists { .. })
        ));
        assert!(broker.queue_exists(&subscription).await.unwrap());

        broker.delete_queue(&topic).await.unwrap();
        assert!(!broker.queue_exists(&topic).await.unwrap());
        assert!(!broker.queue_exists(&subscription).await.unwrap());
        assert!(matches!(
            broker.delete_queue(&topic).await,
            Err(QueueError::QueueNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_to_missing_queue_fails() {
        let broker = InMemoryBroker::default();
        let topic = QueueName::from_topic_name("never-created");

        let result = broker.send_batch(&topic, &events(&topic, 1)).await;
        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
    }

    #[tokio::test]
    async fn test_send_at_ceiling_is_rejected() {
        let broker = InMemoryBroker::default();
        let (topic, subscription) = topic_with_subscription(&broker).await;
        let batch = vec![
            event_of_size(&topic, MAX_BATCH_BYTES / 2),
            event_of_size(&topic, MAX_BATCH_BYTES / 2),
        ];

        let result = broker.send_batch(&topic, &batch).await;

        assert!(matches!(result, Err(QueueError::BatchTooLarge { .. })));
        assert_eq!(broker.batches_received(), 0);
        assert_eq!(broker.queue_stats(&subscription).unwrap().available, 0);
    }

    #[tokio::test]
    async fn test_receive_from_topic_is_rejected() {
        let broker = InMemoryBroker::default();
        let (topic, _) = topic_with_subscription(&broker).await;

        let result = broker.receive_one(&topic, LEASE).await;
        assert!(matches!(result, Err(QueueError::OperationFailed { .. })));
    }

    #[tokio::test]
    async fn test_released_message_keeps_its_place() {
        let broker = InMemoryBroker::default();
        let (topic, subscription) = topic_with_subscription(&broker).await;
        broker.send_batch(&topic, &events(&topic, 3)).await.unwrap();

        let first = broker.receive_one(&subscription, LEASE).await.unwrap().unwrap();
        let second = broker.receive_one(&subscription, LEASE).await.unwrap().unwrap();
        assert!(first.sequence_number < second.sequence_number);

        broker.release_lease(&first.lock_token).await.unwrap();
        broker.complete(&second.lock_token).await.unwrap();

        assert_eq!(drain_bodies(&broker, &subscription).await, vec!["0", "2"]);
    }

    #[tokio::test]
    async fn test_message_is_dead_lettered_after_max_deliveries() {
        let broker = InMemoryBroker::new(2);
        let (topic, subscription) = topic_with_subscription(&broker).await;
        let event = Event::new(topic.clone(), "poison", "{}");
        broker
            .send_batch(&topic, std::slice::from_ref(&event))
            .await
            .unwrap();

        for expected_count in 1..=2 {
            let message = broker.receive_one(&subscription, LEASE).await.unwrap().unwrap();
            assert_eq!(message.delivery_count, expected_count);
            broker.release_lease(&message.lock_token).await.unwrap();
        }

        assert!(broker.receive_one(&subscription, LEASE).await.unwrap().is_none());
        let dead = broker.dead_letters(&subscription);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id(), event.id());
        assert_eq!(broker.queue_stats(&subscription).unwrap().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_from_config_applies_max_delivery_count() {
        let config = OperatorConfig::from_toml_str("max-delivery-count = 1").unwrap();
        let broker = InMemoryBroker::from_config(&config);
        let (topic, subscription) = topic_with_subscription(&broker).await;
        broker.send_batch(&topic, &events(&topic, 1)).await.unwrap();

        let message = broker.receive_one(&subscription, LEASE).await.unwrap().unwrap();
        broker.release_lease(&message.lock_token).await.unwrap();

        assert!(broker.receive_one(&subscription, LEASE).await.unwrap().is_none());
        assert_eq!(broker.dead_letters(&subscription).len(), 1);
    }

    #[tokio::test]
    async fn test_stats_track_available_and_locked() {
        let broker = InMemoryBroker::default();
        let (topic, subscription) = topic_with_subscription(&broker).await;
        broker.send_batch(&topic, &events(&topic, 4)).await.unwrap();

        let _held = broker.receive_one(&subscription, LEASE).await.unwrap().unwrap();
        let stats = broker.queue_stats(&subscription).unwrap();

        assert_eq!(stats.available, 3);
        assert_eq!(stats.locked, 1);
        assert_eq!(stats.total_bytes, 4 * Event::new(topic, "n", "0").size());
        assert!(broker.queue_stats(&QueueName::from_topic_name("absent")).is_none());
    }

    #[tokio::test]
    async fn test_foreign_token_cannot_touch_lock() {
        let broker = InMemoryBroker::default();
        let (topic, subscription) = topic_with_subscription(&broker).await;
        broker.send_batch(&topic, &events(&topic, 1)).await.unwrap();
        let message = broker.receive_one(&subscription, LEASE).await.unwrap().unwrap();

        let forged = crate::queue::api::LockToken::new(
            subscription.clone(),
            "some-other-message",
            message.lock_token.as_str(),
        );

        assert!(broker.complete(&forged).await.unwrap_err().is_lease_lost());
        assert!(broker.renew_lease(&forged, LEASE).await.unwrap_err().is_lease_lost());
        broker.complete(&message.lock_token).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_reclaimed() {
        let broker = InMemoryBroker::default();
        let (topic, subscription) = topic_with_subscription(&broker).await;
        broker.send_batch(&topic, &events(&topic, 1)).await.unwrap();

        let first = broker.receive_one(&subscription, LEASE).await.unwrap().unwrap();
        tokio::time::sleep(LEASE).await;

        let second = broker.receive_one(&subscription, LEASE).await.unwrap().unwrap();
        assert_eq!(second.event.id(), first.event.id());
        assert_eq!(second.delivery_count, 2);
        assert!(broker
            .renew_lease(&first.lock_token, LEASE)
            .await
            .unwrap_err()
            .is_lease_lost());
    }
}
