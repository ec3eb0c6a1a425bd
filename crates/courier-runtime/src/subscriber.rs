//! Binding queues to topics.

use crate::error::CourierError;
use crate::message::{Queue, Topic};
use crate::queue_service::QueueService;
use crate::topic_service::TopicService;
use std::sync::Arc;
use tracing::info;

/// Subscribes queues to topics
///
/// Holds no state of its own; subscribing the same pair twice is harmless.
#[derive(Clone)]
pub struct Subscriber {
    queues: Arc<QueueService>,
    topics: Arc<TopicService>,
}

impl Subscriber {
    pub fn new(queues: Arc<QueueService>, topics: Arc<TopicService>) -> Self {
        Self { queues, topics }
    }

    /// Subscribe `queue` to `topic`, creating the topic if needed.
    ///
    /// The queue must already have been created through the queue service.
    /// Returns the subscription ARN.
    pub async fn subscribe(&self, queue: &Queue, topic: &Topic) -> Result<String, CourierError> {
        let queue_url = self.queues.queue_url(queue)?;

        if !self.topics.is_registered(topic) {
            self.topics.create_topic(topic).await?;
        }
        let topic_arn = self.topics.topic_arn(topic)?;

        let subscription_arn = self
            .topics
            .broker()
            .subscribe_queue(&topic_arn, &queue_url)
            .await?;

        info!(
            queue = %queue.name,
            topic = %topic.name,
            subscription_arn = %subscription_arn,
            "Queue subscribed to topic"
        );

        Ok(subscription_arn)
    }
}

#[cfg(test)]
#[path = "subscriber_tests.rs"]
mod tests;
