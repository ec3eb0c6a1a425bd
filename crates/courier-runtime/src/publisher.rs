//! Publishing structured messages to topics.
//!
//! The publisher is the only component that classifies broker status codes:
//! any non-2xx publish response becomes [`CourierError::PublishFailed`].

use crate::broker::PublishResponse;
use crate::correlation::CorrelationContext;
use crate::envelope::MessageEnvelope;
use crate::error::CourierError;
use crate::message::Topic;
use crate::topic_service::TopicService;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Per-call publish options
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Identity claims carried in the envelope
    pub identity: Option<HashMap<String, String>>,

    /// Publish the payload JSON as-is, without an envelope
    pub use_raw_object_message: bool,

    /// Caller's correlation context; a fresh one is created when absent
    pub correlation: Option<CorrelationContext>,
}

impl PublishOptions {
    pub fn with_identity(mut self, identity: HashMap<String, String>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn raw(mut self) -> Self {
        self.use_raw_object_message = true;
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationContext) -> Self {
        self.correlation = Some(correlation);
        self
    }
}

/// Publishes payloads to topics
///
/// # Examples
///
/// ```rust
/// use courier_runtime::providers::InMemoryBroker;
/// use courier_runtime::{PublishOptions, Publisher, ResourceNamer, Topic, TopicService};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let topics = Arc::new(TopicService::new(
///     Arc::new(InMemoryBroker::new()),
///     ResourceNamer::default(),
/// ));
/// let publisher = Publisher::new(topics);
///
/// let response = publisher
///     .publish(&Topic::new("order-events"), &json!({"order": 1}), PublishOptions::default())
///     .await
///     .unwrap();
/// assert!(response.is_success());
/// # });
/// ```
#[derive(Clone)]
pub struct Publisher {
    topics: Arc<TopicService>,
}

impl Publisher {
    pub fn new(topics: Arc<TopicService>) -> Self {
        Self { topics }
    }

    /// Publish a payload to a topic, creating the topic if needed.
    ///
    /// Unless `use_raw_object_message` is set, the payload is wrapped in an
    /// envelope carrying the correlation header, the topic name and the
    /// identity claims.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::PublishFailed`] when the broker answers with a
    /// non-2xx status; the error carries the status, response metadata and the
    /// serialized payload.
    pub async fn publish<T>(
        &self,
        topic: &Topic,
        payload: &T,
        options: PublishOptions,
    ) -> Result<PublishResponse, CourierError>
    where
        T: Serialize + ?Sized + Sync,
    {
        if !self.topics.is_registered(topic) {
            self.topics.create_topic(topic).await?;
        }

        let correlation = options.correlation.unwrap_or_default();
        let body = if options.use_raw_object_message {
            serde_json::to_string(payload)?
        } else {
            let mut envelope =
                MessageEnvelope::new(serde_json::to_value(payload)?, correlation.to_wire())
                    .with_topic(topic.name.clone());
            envelope.identity = options.identity;
            serde_json::to_string(&envelope)?
        };

        let response = self.topics.publish_raw(topic, &body).await?;

        if !response.is_success() {
            error!(
                topic = %topic.name,
                status_code = response.status_code,
                request_id = %correlation.request_id(),
                "Publish rejected by broker"
            );
            return Err(CourierError::PublishFailed {
                topic: topic.name.clone(),
                status_code: response.status_code,
                metadata: format_metadata(&response.metadata()),
                payload: body,
            });
        }

        info!(
            topic = %topic.name,
            message_id = response.message_id.as_deref().unwrap_or_default(),
            request_id = %correlation.request_id(),
            "Message published"
        );
        Ok(response)
    }
}

fn format_metadata(metadata: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = metadata
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    pairs.sort();
    pairs.join(", ")
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;
