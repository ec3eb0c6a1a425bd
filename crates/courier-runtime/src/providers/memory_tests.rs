//! Tests for the in-memory broker.

use super::*;
use crate::envelope::MessageEnvelope;

fn standard() -> QueueAttributes {
    QueueAttributes::default()
}

fn fifo() -> QueueAttributes {
    QueueAttributes {
        fifo: true,
        ..QueueAttributes::default()
    }
}

// ============================================================================
// Queue Management Tests
// ============================================================================

mod queue_management_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_queue_is_idempotent() {
        let broker = InMemoryBroker::new();

        let first = broker.create_queue("orders", &standard()).await.unwrap();
        let second = broker.create_queue("orders", &standard()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, "https://sqs.local.memory/000000000000/orders");
        assert_eq!(broker.queue_names(), vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_queue_arn() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();

        let arn = broker.get_queue_arn(&url).await.unwrap();
        assert_eq!(arn, "arn:aws:sqs:local:000000000000:orders");
    }

    /// Verify that the FIFO flag and the .fifo suffix must agree.
    #[tokio::test]
    async fn test_fifo_name_must_match_attribute() {
        let broker = InMemoryBroker::new();

        assert!(broker.create_queue("orders", &fifo()).await.is_err());
        assert!(broker.create_queue("orders.fifo", &standard()).await.is_err());
        assert!(broker.create_queue("orders.fifo", &fifo()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_queue() {
        let broker = InMemoryBroker::new();
        let result = broker.send_message("https://nowhere/q", "body", None).await;
        assert!(matches!(result, Err(BrokerError::QueueNotFound(_))));
    }

    /// Verify that a redrive policy attribute is parsed and stored.
    #[tokio::test]
    async fn test_set_redrive_policy() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();

        let mut attributes = HashMap::new();
        attributes.insert(
            ATTRIBUTE_REDRIVE_POLICY.to_string(),
            r#"{"deadLetterTargetArn":"arn:aws:sqs:local:000000000000:orders_dlq","maxReceiveCount":2}"#
                .to_string(),
        );
        broker.set_queue_attributes(&url, &attributes).await.unwrap();

        assert_eq!(
            broker.redrive_policy(&url),
            Some(RedrivePolicy {
                dead_letter_target_arn: "arn:aws:sqs:local:000000000000:orders_dlq".to_string(),
                max_receive_count: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_redrive_policy_rejected() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();

        let mut attributes = HashMap::new();
        attributes.insert(ATTRIBUTE_REDRIVE_POLICY.to_string(), "nope".to_string());

        assert!(broker.set_queue_attributes(&url, &attributes).await.is_err());
    }
}

// ============================================================================
// Message Lifecycle Tests
// ============================================================================

mod message_lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive_delete() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();

        let message_id = broker.send_message(&url, "hello", None).await.unwrap();
        let message = broker.receive_message(&url, 0).await.unwrap().unwrap();

        assert_eq!(message.message_id, message_id);
        assert_eq!(message.body, "hello");
        assert_eq!(message.receive_count, 1);

        broker
            .delete_message(&url, &message.receipt_handle)
            .await
            .unwrap();
        assert_eq!(broker.message_count(&url), 0);
    }

    #[tokio::test]
    async fn test_empty_poll_returns_none() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();

        assert_eq!(broker.receive_message(&url, 0).await.unwrap(), None);
    }

    /// Verify that a received message stays hidden until its visibility timeout lapses.
    #[tokio::test(start_paused = true)]
    async fn test_visibility_timeout_and_redelivery() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();
        broker.send_message(&url, "hello", None).await.unwrap();

        let first = broker.receive_message(&url, 0).await.unwrap().unwrap();
        assert_eq!(broker.receive_message(&url, 0).await.unwrap(), None);

        tokio::time::advance(Duration::from_secs(61)).await;

        let second = broker.receive_message(&url, 0).await.unwrap().unwrap();
        assert_eq!(second.receive_count, 2);
        assert_ne!(second.receipt_handle, first.receipt_handle);

        // The first delivery's handle is stale now
        let stale = broker.delete_message(&url, &first.receipt_handle).await;
        assert!(matches!(stale, Err(BrokerError::InvalidReceipt(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_visibility() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();
        broker.send_message(&url, "hello", None).await.unwrap();

        let message = broker.receive_message(&url, 0).await.unwrap().unwrap();
        broker
            .change_visibility(&url, &message.receipt_handle, 5)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(broker.receive_message(&url, 0).await.unwrap(), None);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(broker.receive_message(&url, 0).await.unwrap().is_some());
    }

    /// Verify that a long poll returns a message sent while it waits.
    #[tokio::test(start_paused = true)]
    async fn test_long_poll_waits_for_message() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();

        let (received, _) = tokio::join!(broker.receive_message(&url, 5), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            broker.send_message(&url, "late", None).await.unwrap();
        });

        assert_eq!(received.unwrap().unwrap().body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_expires_messages() {
        let broker = InMemoryBroker::new();
        let attributes = QueueAttributes {
            message_retention_seconds: 60,
            ..QueueAttributes::default()
        };
        let url = broker.create_queue("orders", &attributes).await.unwrap();
        broker.send_message(&url, "old", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(broker.receive_message(&url, 0).await.unwrap(), None);
        assert_eq!(broker.message_count(&url), 0);
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();

        let body = "x".repeat(MAX_MESSAGE_SIZE + 1);
        let result = broker.send_message(&url, &body, None).await;
        assert!(matches!(result, Err(BrokerError::MessageTooLarge { .. })));
    }
}

// ============================================================================
// Redrive Tests
// ============================================================================

mod redrive_tests {
    use super::*;

    /// Verify that a message reaching maxReceiveCount moves to the target queue.
    #[tokio::test]
    async fn test_message_redriven_after_max_receives() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders", &standard()).await.unwrap();
        let dlq_url = broker.create_queue("orders_dlq", &standard()).await.unwrap();
        let dlq_arn = broker.get_queue_arn(&dlq_url).await.unwrap();

        let mut attributes = HashMap::new();
        attributes.insert(
            ATTRIBUTE_REDRIVE_POLICY.to_string(),
            serde_json::to_string(&RedrivePolicy {
                dead_letter_target_arn: dlq_arn,
                max_receive_count: 2,
            })
            .unwrap(),
        );
        broker.set_queue_attributes(&url, &attributes).await.unwrap();
        broker.send_message(&url, "poison", None).await.unwrap();

        for expected_count in 1..=2 {
            let message = broker.receive_message(&url, 0).await.unwrap().unwrap();
            assert_eq!(message.receive_count, expected_count);
            broker
                .change_visibility(&url, &message.receipt_handle, 0)
                .await
                .unwrap();
        }

        assert_eq!(broker.receive_message(&url, 0).await.unwrap(), None);
        assert_eq!(broker.message_count(&url), 0);
        assert_eq!(broker.message_bodies(&dlq_url), vec!["poison".to_string()]);

        let dead = broker.receive_message(&dlq_url, 0).await.unwrap().unwrap();
        assert_eq!(dead.receive_count, 1);
    }
}

// ============================================================================
// FIFO Tests
// ============================================================================

mod fifo_tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_requires_group_id() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders.fifo", &fifo()).await.unwrap();

        assert!(broker.send_message(&url, "a", None).await.is_err());
        assert!(broker.send_message(&url, "a", Some("g1")).await.is_ok());
    }

    /// Verify that a group with a message in flight blocks its later messages.
    #[tokio::test]
    async fn test_one_in_flight_message_per_group() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("orders.fifo", &fifo()).await.unwrap();
        broker.send_message(&url, "a1", Some("a")).await.unwrap();
        broker.send_message(&url, "a2", Some("a")).await.unwrap();
        broker.send_message(&url, "b1", Some("b")).await.unwrap();

        let first = broker.receive_message(&url, 0).await.unwrap().unwrap();
        let second = broker.receive_message(&url, 0).await.unwrap().unwrap();
        assert_eq!(first.body, "a1");
        assert_eq!(first.group_id.as_deref(), Some("a"));
        assert_eq!(second.body, "b1");
        assert_eq!(broker.receive_message(&url, 0).await.unwrap(), None);

        broker
            .delete_message(&url, &first.receipt_handle)
            .await
            .unwrap();
        let third = broker.receive_message(&url, 0).await.unwrap().unwrap();
        assert_eq!(third.body, "a2");
    }
}

// ============================================================================
// Topic Tests
// ============================================================================

mod topic_tests {
    use super::*;

    /// Verify fan-out to every subscribed queue in the notification shape.
    #[tokio::test]
    async fn test_publish_fans_out_notifications() {
        let broker = InMemoryBroker::new();
        let topic_arn = broker.create_topic("order-events").await.unwrap();
        let billing = broker.create_queue("billing", &standard()).await.unwrap();
        let shipping = broker.create_queue("shipping", &standard()).await.unwrap();
        broker.subscribe_queue(&topic_arn, &billing).await.unwrap();
        broker.subscribe_queue(&topic_arn, &shipping).await.unwrap();

        let response = broker.publish(&topic_arn, r#"{"order":1}"#).await.unwrap();
        assert!(response.is_success());
        assert!(response.message_id.is_some());

        for url in [&billing, &shipping] {
            let message = broker.receive_message(url, 0).await.unwrap().unwrap();
            let notification: serde_json::Value = serde_json::from_str(&message.body).unwrap();
            assert_eq!(notification["Type"], "Notification");
            assert_eq!(notification["TopicArn"], topic_arn.as_str());
            assert_eq!(notification["Message"], r#"{"order":1}"#);

            let decoded = MessageEnvelope::decode(&message.body);
            assert_eq!(decoded.content, serde_json::json!({"order": 1}));
        }
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let broker = InMemoryBroker::new();
        let topic_arn = broker.create_topic("order-events").await.unwrap();
        let url = broker.create_queue("billing", &standard()).await.unwrap();

        let first = broker.subscribe_queue(&topic_arn, &url).await.unwrap();
        let second = broker.subscribe_queue(&topic_arn, &url).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(broker.subscriptions(&topic_arn), vec![url]);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_topic() {
        let broker = InMemoryBroker::new();
        let url = broker.create_queue("billing", &standard()).await.unwrap();

        let result = broker
            .subscribe_queue("arn:aws:sns:local:000000000000:missing", &url)
            .await;
        assert!(matches!(result, Err(BrokerError::TopicNotFound(_))));
    }

    #[tokio::test]
    async fn test_publish_to_unknown_topic_reports_not_found() {
        let broker = InMemoryBroker::new();
        let response = broker
            .publish("arn:aws:sns:local:000000000000:missing", "x")
            .await
            .unwrap();
        assert_eq!(response.status_code, 404);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_forced_publish_status() {
        let broker = InMemoryBroker::new();
        let topic_arn = broker.create_topic("order-events").await.unwrap();

        broker.set_publish_status(Some(503));
        let failed = broker.publish(&topic_arn, "x").await.unwrap();
        assert_eq!(failed.status_code, 503);

        broker.set_publish_status(None);
        assert!(broker.publish(&topic_arn, "x").await.unwrap().is_success());
    }
}
