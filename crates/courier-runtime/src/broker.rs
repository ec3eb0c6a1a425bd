//! Broker abstraction for the managed queue and topic service.
//!
//! Every service in this crate talks to the broker through [`Broker`]. Two
//! providers implement it: [`AwsBroker`](crate::providers::AwsBroker)
//! speaks the SQS/SNS query protocol, and
//! [`InMemoryBroker`](crate::providers::InMemoryBroker) models the same
//! semantics in process for tests and local development.

use crate::error::BrokerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Attribute carrying the redrive policy JSON
pub const ATTRIBUTE_REDRIVE_POLICY: &str = "RedrivePolicy";

/// Attribute carrying the access policy JSON
pub const ATTRIBUTE_POLICY: &str = "Policy";

/// Attributes applied when a queue is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    pub visibility_timeout_seconds: u32,
    pub message_retention_seconds: u32,
    pub fifo: bool,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: 60,
            message_retention_seconds: 1_209_600,
            fifo: false,
        }
    }
}

/// Dead letter routing for a source queue
///
/// Serialized as `{"deadLetterTargetArn": "...", "maxReceiveCount": 3}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

/// A message as delivered by the broker, before envelope decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub receive_count: u32,
    pub group_id: Option<String>,
}

/// Raw outcome of a topic publish.
///
/// The broker's status code is reported rather than turned into an error;
/// the publisher decides what counts as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResponse {
    pub status_code: u16,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
}

impl PublishResponse {
    /// Check for a 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Response metadata as key/value pairs
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("StatusCode".to_string(), self.status_code.to_string());
        if let Some(id) = &self.message_id {
            metadata.insert("MessageId".to_string(), id.clone());
        }
        if let Some(id) = &self.request_id {
            metadata.insert("RequestId".to_string(), id.clone());
        }
        metadata
    }
}

/// Broker implementation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
    Aws,
    InMemory,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::InMemory => write!(f, "in-memory"),
        }
    }
}

/// Client contract for the managed queue/topic service.
///
/// Queue operations address queues by URL, topic operations by ARN, matching
/// the broker's own addressing. Implementations never retry internally.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create a queue (or return the existing one) and report its URL
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<String, BrokerError>;

    /// Resolve the ARN of a queue
    async fn get_queue_arn(&self, queue_url: &str) -> Result<String, BrokerError>;

    /// Set queue attributes such as `RedrivePolicy` or `Policy`
    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), BrokerError>;

    /// Send one message and return the broker's message id
    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        group_id: Option<&str>,
    ) -> Result<String, BrokerError>;

    /// Long-poll for at most one message
    async fn receive_message(
        &self,
        queue_url: &str,
        wait_time_seconds: u32,
    ) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Delete a received message
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str)
        -> Result<(), BrokerError>;

    /// Change how long a received message stays invisible
    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        timeout_seconds: u32,
    ) -> Result<(), BrokerError>;

    /// Create a topic (or return the existing one) and report its ARN
    async fn create_topic(&self, name: &str) -> Result<String, BrokerError>;

    /// Subscribe a queue to a topic and return the subscription ARN
    async fn subscribe_queue(
        &self,
        topic_arn: &str,
        queue_url: &str,
    ) -> Result<String, BrokerError>;

    /// Publish a body to a topic
    async fn publish(&self, topic_arn: &str, body: &str) -> Result<PublishResponse, BrokerError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}
