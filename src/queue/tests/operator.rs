//! Tests for the QueueOperator facade

#[cfg(test)]
mod tests {
    use super::super::helpers::{event_of_size, topic_with_subscription};
    use crate::core::retry::RetryPolicy;
    use crate::queue::api::{
        Event, InMemoryBroker, LockToken, OperatorConfig, QueueBroker, QueueError, QueueName,
        QueueOperator, QueueResult, ReceivedMessage, MAX_BATCH_BYTES,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> OperatorConfig {
        OperatorConfig {
            send_retry: RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
            },
            ..OperatorConfig::default()
        }
    }

    fn operator_over(broker: Arc<InMemoryBroker>) -> QueueOperator {
        QueueOperator::new(config(), broker).unwrap()
    }

    async fn received_ids(operator: &QueueOperator, subscription: &QueueName) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(lease) = operator.next(subscription).await.unwrap() {
            ids.push(lease.event().id().to_string());
            operator.commit(&lease).await.unwrap();
        }
        ids
    }

    /// Fails the first `failures` sends with the given error kind
    struct FlakySender {
        inner: InMemoryBroker,
        failures: usize,
        transient: bool,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl QueueBroker for FlakySender {
        async fn create_queue(&self, name: &QueueName) -> QueueResult<()> {
            self.inner.create_queue(name).await
        }

        async fn queue_exists(&self, name: &QueueName) -> QueueResult<bool> {
            self.inner.queue_exists(name).await
        }

        async fn delete_queue(&self, name: &QueueName) -> QueueResult<()> {
            self.inner.delete_queue(name).await
        }

        async fn send_batch(&self, name: &QueueName, events: &[Event]) -> QueueResult<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(if self.transient {
                    QueueError::TransportFailure {
                        message: "connection reset".to_string(),
                    }
                } else {
                    QueueError::OperationFailed {
                        message: "rejected".to_string(),
                    }
                });
            }
            self.inner.send_batch(name, events).await
        }

        async fn receive_one(
            &self,
            name: &QueueName,
            lease_duration: Duration,
        ) -> QueueResult<Option<ReceivedMessage>> {
            self.inner.receive_one(name, lease_duration).await
        }

        async fn renew_lease(
            &self,
            token: &LockToken,
            lease_duration: Duration,
        ) -> QueueResult<DateTime<Utc>> {
            self.inner.renew_lease(token, lease_duration).await
        }

        async fn complete(&self, token: &LockToken) -> QueueResult<()> {
            self.inner.complete(token).await
        }

        async fn release_lease(&self, token: &LockToken) -> QueueResult<()> {
            self.inner.release_lease(token).await
        }
    }

    #[tokio::test]
    async fn test_push_then_next_then_commit() {
        let broker = Arc::new(InMemoryBroker::default());
        let (topic, subscription) = topic_with_subscription(&broker).await;
        let operator = operator_over(broker.clone());

        let event = Event::from_payload(topic.clone(), &vec![1, 2, 3]).unwrap();
        operator.push(event.clone()).await.unwrap();

        let lease = operator.next(&subscription).await.unwrap().unwrap();
        assert_eq!(lease.event(), &event);
        assert_eq!(lease.queue_name(), &subscription);
        assert_eq!(lease.event().decode::<Vec<i32>>().unwrap(), vec![1, 2, 3]);

        operator.commit(&lease).await.unwrap();
        assert!(operator.next(&subscription).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_batch_splits_and_delivers_everything() {
        let broker = Arc::new(InMemoryBroker::default());
        let (topic, subscription) = topic_with_subscription(&broker).await;
        let operator = operator_over(broker.clone());

        let events: Vec<Event> = (0..60).map(|_| event_of_size(&topic, 10 * 1024)).collect();
        let expected: HashSet<String> = events.iter().map(|e| e.id().to_string()).collect();
        let planned = QueueOperator::batch_up(events.clone()).unwrap().len();
        assert!(planned > 1);

        operator.push_batch(events).await.unwrap();

        assert_eq!(broker.batches_received(), planned as u64);
        let received: HashSet<String> = received_ids(&operator, &subscription)
            .await
            .into_iter()
            .collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_single_batch_keeps_order() {
        let broker = Arc::new(InMemoryBroker::default());
        let (topic, subscription) = topic_with_subscription(&broker).await;
        let operator = operator_over(broker.clone());

        let events: Vec<Event> = (0..20)
            .map(|i| Event::new(topic.clone(), "n", i.to_string()))
            .collect();
        let expected: Vec<String> = events.iter().map(|e| e.id().to_string()).collect();

        operator.push_batch(events).await.unwrap();
        assert_eq!(received_ids(&operator, &subscription).await, expected);
    }

    #[tokio::test]
    async fn test_push_batch_routes_per_queue() {
        let broker = Arc::new(InMemoryBroker::default());
        let (orders, orders_sub) = topic_with_subscription(&broker).await;
        let (audit, audit_sub) = topic_with_subscription(&broker).await;
        let operator = operator_over(broker.clone());

        let events = vec![
            Event::new(orders.clone(), "o", "1"),
            Event::new(audit.clone(), "a", "2"),
            Event::new(orders.clone(), "o", "3"),
        ];

        operator.push_batch(events.clone()).await.unwrap();

        assert_eq!(broker.batches_received(), 2);
        assert_eq!(
            received_ids(&operator, &orders_sub).await,
            vec![events[0].id().to_string(), events[2].id().to_string()]
        );
        assert_eq!(
            received_ids(&operator, &audit_sub).await,
            vec![events[1].id().to_string()]
        );
    }

    #[tokio::test]
    async fn test_oversized_event_sends_nothing() {
        let broker = Arc::new(InMemoryBroker::default());
        let (topic, subscription) = topic_with_subscription(&broker).await;
        let operator = operator_over(broker.clone());

        let events = vec![
            event_of_size(&topic, 1024),
            event_of_size(&topic, MAX_BATCH_BYTES + 1),
        ];

        let result = operator.push_batch(events).await;
        assert!(matches!(result, Err(QueueError::BatchTooLarge { .. })));
        assert_eq!(broker.batches_received(), 0);
        assert!(operator.next(&subscription).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_push_batch_is_a_no_op() {
        let broker = Arc::new(InMemoryBroker::default());
        let operator = operator_over(broker.clone());

        operator.push_batch(Vec::new()).await.unwrap();
        assert_eq!(broker.batches_received(), 0);
    }

    #[tokio::test]
    async fn test_transient_send_failures_are_retried() {
        let broker = Arc::new(FlakySender {
            inner: InMemoryBroker::default(),
            failures: 2,
            transient: true,
            attempts: AtomicUsize::new(0),
        });
        let (topic, subscription) = topic_with_subscription(&broker.inner).await;
        let operator = QueueOperator::new(config(), broker.clone()).unwrap();

        operator.push(Event::new(topic, "n", "1")).await.unwrap();

        assert_eq!(broker.attempts.load(Ordering::SeqCst), 3);
        assert!(operator.next(&subscription).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_permanent_send_failures_are_not_retried() {
        let broker = Arc::new(FlakySender {
            inner: InMemoryBroker::default(),
            failures: 1,
            transient: false,
            attempts: AtomicUsize::new(0),
        });
        let (topic, _) = topic_with_subscription(&broker.inner).await;
        let operator = QueueOperator::new(config(), broker.clone()).unwrap();

        let result = operator.push(Event::new(topic, "n", "1")).await;

        assert!(matches!(result, Err(QueueError::OperationFailed { .. })));
        assert_eq!(broker.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_administration_passes_through() {
        let broker = Arc::new(InMemoryBroker::default());
        let operator = operator_over(broker);
        let topic = QueueName::from_topic_name(uuid::Uuid::new_v4().to_string());

        assert!(!operator.queue_exists(&topic).await.unwrap());
        operator.create_queue(&topic).await.unwrap();
        assert!(operator.queue_exists(&topic).await.unwrap());
        operator.delete_queue(&topic).await.unwrap();
        assert!(!operator.queue_exists(&topic).await.unwrap());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = OperatorConfig {
            max_concurrent_sends: 0,
            ..OperatorConfig::default()
        };
        let result = QueueOperator::new(config, Arc::new(InMemoryBroker::default()));
        assert!(matches!(result, Err(QueueError::Configuration { .. })));
    }

    #[test]
    fn test_connect_without_connection_string_fails() {
        let result = QueueOperator::connect(OperatorConfig::default());
        assert!(matches!(result, Err(QueueError::Configuration { .. })));
    }
}
