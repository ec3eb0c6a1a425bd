//! Topic creation and raw publishing.

use crate::broker::{Broker, PublishResponse};
use crate::config::RuntimeConfig;
use crate::error::CourierError;
use crate::message::Topic;
use crate::naming::ResourceNamer;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Topic operations against a broker, with a per-process ARN cache
pub struct TopicService {
    broker: Arc<dyn Broker>,
    namer: ResourceNamer,
    arns: DashMap<String, String>,
}

impl TopicService {
    /// Create new topic service
    pub fn new(broker: Arc<dyn Broker>, namer: ResourceNamer) -> Self {
        Self {
            broker,
            namer,
            arns: DashMap::new(),
        }
    }

    /// Create service from runtime configuration
    pub fn from_config(broker: Arc<dyn Broker>, config: &RuntimeConfig) -> Self {
        Self::new(broker, ResourceNamer::new(config.naming.prefix.clone()))
    }

    /// Broker used by this service
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Create a topic and register its ARN; idempotent per logical name
    pub async fn create_topic(&self, topic: &Topic) -> Result<String, CourierError> {
        if let Ok(arn) = self.topic_arn(topic) {
            return Ok(arn);
        }

        let broker_name = self.namer.safe_name(&topic.name, false);
        let created = self.broker.create_topic(&broker_name).await?;
        let arn = self
            .arns
            .entry(topic.name.clone())
            .or_insert(created)
            .value()
            .clone();

        info!(topic = %topic.name, arn = %arn, "Topic registered");
        Ok(arn)
    }

    /// Cached ARN of a topic created in this process
    pub fn topic_arn(&self, topic: &Topic) -> Result<String, CourierError> {
        self.arns
            .get(&topic.name)
            .map(|r| r.value().clone())
            .ok_or_else(|| CourierError::UnknownTopic {
                topic_name: topic.name.clone(),
            })
    }

    /// Check whether the topic was created in this process
    pub fn is_registered(&self, topic: &Topic) -> bool {
        self.arns.contains_key(&topic.name)
    }

    /// Publish a serialized body and report the broker's response unclassified
    pub async fn publish_raw(
        &self,
        topic: &Topic,
        body: &str,
    ) -> Result<PublishResponse, CourierError> {
        let arn = self.topic_arn(topic)?;
        let response = self.broker.publish(&arn, body).await?;
        debug!(
            topic = %topic.name,
            status_code = response.status_code,
            "Topic publish completed"
        );
        Ok(response)
    }
}

#[cfg(test)]
#[path = "topic_service_tests.rs"]
mod tests;
