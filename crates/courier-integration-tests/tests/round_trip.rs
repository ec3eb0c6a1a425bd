//! Integration tests for publishing and receiving without a worker.
//!
//! Tests messages sent directly to queues, topic fan-out and bodies written
//! by producers that do not use envelopes.

mod common;

use common::TestSystem;
use courier_runtime::{Broker, CorrelationContext, PublishOptions, Queue, Subscriber, Topic};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: u64,
    customer: String,
}

/// Verify that a payload sent to a queue is received with its correlation
#[tokio::test]
async fn test_queue_round_trip() {
    // Arrange
    let system = TestSystem::new();
    let queue = Queue::new("orders");
    system.queues.create_queue(&queue).await.unwrap();

    let order = OrderPlaced {
        order_id: 1,
        customer: "ada".to_string(),
    };
    let correlation = CorrelationContext::new().with_session_id("session-1");

    // Act
    let message_id = system
        .queues
        .publish_in_context(&order, &queue, None, &correlation)
        .await
        .unwrap();
    let received = system
        .queues
        .receive_message(&queue, 0)
        .await
        .unwrap()
        .expect("message should be delivered");

    // Assert
    assert_eq!(received.receipt().message_id(), message_id);
    assert_eq!(received.receipt().receive_count(), 1);
    assert_eq!(received.envelope.content_as::<OrderPlaced>().unwrap(), order);
    assert_eq!(received.envelope.correlation.request, correlation.request_id());
    assert_eq!(received.envelope.correlation.trace, correlation.trace_id());
    assert_eq!(
        received.envelope.correlation.session.as_deref(),
        Some("session-1")
    );

    let (_, receipt) = received.into_parts();
    system.queues.delete_message(&queue, receipt).await.unwrap();
    assert_eq!(system.message_count(&queue), 0);
}

/// Verify that a body written by a foreign producer is passed through as content
#[tokio::test]
async fn test_foreign_body_passes_through() {
    // Arrange
    let system = TestSystem::new();
    let queue = Queue::new("imports");
    let url = system.queues.create_queue(&queue).await.unwrap();

    system
        .broker
        .send_message(&url, r#"{"sku":"A-1","quantity":3}"#, None)
        .await
        .unwrap();
    system
        .broker
        .send_message(&url, "plain text line", None)
        .await
        .unwrap();

    // Act
    let first = system.queues.receive_message(&queue, 0).await.unwrap().unwrap();
    let second = system.queues.receive_message(&queue, 0).await.unwrap().unwrap();

    // Assert
    assert_eq!(first.envelope.content, json!({"sku": "A-1", "quantity": 3}));
    assert!(first.envelope.correlation.request.is_empty());
    assert_eq!(second.envelope.content, json!("plain text line"));
}

/// Verify that a topic publish reaches every subscribed queue
#[tokio::test]
async fn test_topic_fan_out() {
    // Arrange
    let system = TestSystem::new();
    let topic = Topic::new("order-events");
    let billing = Queue::new("billing");
    let shipping = Queue::new("shipping").with_dead_letter_queue();

    let subscriber = Subscriber::new(system.queues.clone(), system.topics.clone());
    for queue in [&billing, &shipping] {
        system.queues.create_queue(queue).await.unwrap();
        subscriber.subscribe(queue, &topic).await.unwrap();
    }

    let mut identity = HashMap::new();
    identity.insert("sub".to_string(), "user-7".to_string());

    // Act
    let response = system
        .publisher()
        .publish(
            &topic,
            &json!({"order_id": 5}),
            PublishOptions::default().with_identity(identity),
        )
        .await
        .unwrap();

    // Assert
    assert!(response.is_success());
    for queue in [&billing, &shipping] {
        let received = system
            .queues
            .receive_message(queue, 0)
            .await
            .unwrap()
            .expect("each subscriber should receive the publish");

        assert_eq!(received.envelope.content, json!({"order_id": 5}));
        assert_eq!(received.envelope.topic.as_deref(), Some("order-events"));
        assert_eq!(
            received
                .envelope
                .identity
                .as_ref()
                .and_then(|claims| claims.get("sub"))
                .map(String::as_str),
            Some("user-7")
        );
    }
    assert_eq!(system.dead_letter_count(&shipping), 0);
}

/// Verify that a raw object message arrives as bare content
#[tokio::test]
async fn test_raw_object_message() {
    // Arrange
    let system = TestSystem::new();
    let topic = Topic::new("audit");
    let queue = Queue::new("audit-log");
    system.queues.create_queue(&queue).await.unwrap();
    Subscriber::new(system.queues.clone(), system.topics.clone())
        .subscribe(&queue, &topic)
        .await
        .unwrap();

    // Act
    system
        .publisher()
        .publish(&topic, &json!({"action": "login"}), PublishOptions::default().raw())
        .await
        .unwrap();
    let received = system.queues.receive_message(&queue, 0).await.unwrap().unwrap();

    // Assert
    assert_eq!(received.envelope.content, json!({"action": "login"}));
    assert_eq!(received.envelope.topic, None);
    assert!(received.envelope.correlation.request.is_empty());
}

/// Verify that a FIFO queue releases a group one message at a time, in order
#[tokio::test]
async fn test_fifo_queue_delivers_groups_in_order() {
    // Arrange
    let system = TestSystem::new();
    let queue = Queue::new("payments").fifo();
    system.queues.create_queue(&queue).await.unwrap();

    for sequence in 0..3 {
        system
            .queues
            .publish(&json!({"sequence": sequence}), &queue, Some("customer-1"))
            .await
            .unwrap();
    }

    // Act / Assert
    for expected in 0..3 {
        let received = system.queues.receive_message(&queue, 0).await.unwrap().unwrap();
        assert_eq!(received.receipt().group_id(), Some("customer-1"));
        assert_eq!(received.envelope.content["sequence"], json!(expected));

        // A second receive while the group is in flight returns nothing
        assert!(system.queues.receive_message(&queue, 0).await.unwrap().is_none());

        let (_, receipt) = received.into_parts();
        system.queues.delete_message(&queue, receipt).await.unwrap();
    }
}
