//! Tests for queue-to-topic subscriptions.

use super::*;
use crate::config::QueueSettings;
use crate::naming::ResourceNamer;
use crate::providers::InMemoryBroker;

fn setup() -> (Arc<InMemoryBroker>, Arc<QueueService>, Arc<TopicService>) {
    let broker = Arc::new(InMemoryBroker::new());
    let queues = Arc::new(QueueService::new(
        broker.clone(),
        ResourceNamer::default(),
        QueueSettings::default(),
    ));
    let topics = Arc::new(TopicService::new(broker.clone(), ResourceNamer::default()));
    (broker, queues, topics)
}

/// Verify that subscribing creates a missing topic and binds the queue.
#[tokio::test]
async fn test_subscribe_creates_topic() {
    let (broker, queues, topics) = setup();
    let queue = Queue::new("billing");
    let topic = Topic::new("order-events");
    let queue_url = queues.create_queue(&queue).await.unwrap();

    let subscriber = Subscriber::new(queues, topics.clone());
    subscriber.subscribe(&queue, &topic).await.unwrap();

    assert!(topics.is_registered(&topic));
    let topic_arn = topics.topic_arn(&topic).unwrap();
    assert_eq!(broker.subscriptions(&topic_arn), vec![queue_url]);
}

#[tokio::test]
async fn test_subscribe_twice_is_harmless() {
    let (broker, queues, topics) = setup();
    let queue = Queue::new("billing");
    let topic = Topic::new("order-events");
    queues.create_queue(&queue).await.unwrap();

    let subscriber = Subscriber::new(queues, topics.clone());
    let first = subscriber.subscribe(&queue, &topic).await.unwrap();
    let second = subscriber.subscribe(&queue, &topic).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        broker.subscriptions(&topics.topic_arn(&topic).unwrap()).len(),
        1
    );
}

#[tokio::test]
async fn test_subscribe_unknown_queue() {
    let (_broker, queues, topics) = setup();
    let subscriber = Subscriber::new(queues, topics);

    let result = subscriber
        .subscribe(&Queue::new("missing"), &Topic::new("order-events"))
        .await;

    assert!(matches!(result, Err(CourierError::UnknownQueue { .. })));
}
