//! Queue management and message operations.
//!
//! [`QueueService`] creates queues (and their dead letter queues), caches the
//! broker URL and ARN of every queue it created, and performs the message
//! operations the worker needs. Queues are addressed by their logical
//! [`Queue`] definition; only queues created through this service are known.
//!
//! Broker failures are returned to the caller and never retried here.

use crate::broker::{Broker, RedrivePolicy, ATTRIBUTE_REDRIVE_POLICY};
use crate::config::{QueueSettings, RuntimeConfig};
use crate::correlation::CorrelationContext;
use crate::envelope::MessageEnvelope;
use crate::error::{CourierError, ValidationError};
use crate::message::{Queue, Receipt, ReceivedMessage, RetryPolicy};
use crate::naming::ResourceNamer;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Group id used when a message without one is dead-lettered to a FIFO queue
const DEFAULT_DEAD_LETTER_GROUP: &str = "dead-letter";

/// Queue operations against a broker, with per-process URL/ARN caches
///
/// # Examples
///
/// ```rust
/// use courier_runtime::providers::InMemoryBroker;
/// use courier_runtime::{Queue, QueueService, QueueSettings, ResourceNamer};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let service = QueueService::new(
///     Arc::new(InMemoryBroker::new()),
///     ResourceNamer::default(),
///     QueueSettings::default(),
/// );
///
/// let orders = Queue::new("orders").with_dead_letter_queue();
/// let url = service.create_queue(&orders).await.unwrap();
/// assert_eq!(service.queue_url(&orders).unwrap(), url);
/// # });
/// ```
pub struct QueueService {
    broker: Arc<dyn Broker>,
    namer: ResourceNamer,
    settings: QueueSettings,
    urls: DashMap<String, String>,
    arns: DashMap<String, String>,
}

impl QueueService {
    /// Create service with explicit naming and queue settings
    pub fn new(broker: Arc<dyn Broker>, namer: ResourceNamer, settings: QueueSettings) -> Self {
        Self {
            broker,
            namer,
            settings,
            urls: DashMap::new(),
            arns: DashMap::new(),
        }
    }

    /// Create service from runtime configuration
    pub fn from_config(broker: Arc<dyn Broker>, config: &RuntimeConfig) -> Self {
        Self::new(
            broker,
            ResourceNamer::new(config.naming.prefix.clone()),
            config.queue.clone(),
        )
    }

    /// Broker used by this service
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Namer used to derive broker names
    pub fn namer(&self) -> &ResourceNamer {
        &self.namer
    }

    // ========================================================================
    // Queue Management
    // ========================================================================

    /// Create a queue, and its dead letter queue when enabled, returning the URL.
    ///
    /// Idempotent per logical name: a queue already registered in this
    /// process is not created again. For DLQ-enabled queues the redrive
    /// policy is (re)applied on every call.
    pub async fn create_queue(&self, queue: &Queue) -> Result<String, CourierError> {
        let url = self.register(queue).await?;

        if queue.enable_dlq {
            let dead_letter_queue = queue.dead_letter_queue();
            self.register(&dead_letter_queue).await?;
            let dead_letter_arn = self.queue_arn(&dead_letter_queue)?;

            let policy = RedrivePolicy {
                dead_letter_target_arn: dead_letter_arn,
                // The broker accepts 1..=1000
                max_receive_count: queue.retry_policy.max_retries.clamp(1, 1000),
            };

            let mut attributes = HashMap::new();
            attributes.insert(
                ATTRIBUTE_REDRIVE_POLICY.to_string(),
                serde_json::to_string(&policy)?,
            );
            self.broker.set_queue_attributes(&url, &attributes).await?;

            debug!(
                queue = %queue.name,
                dead_letter_queue = %dead_letter_queue.name,
                max_receive_count = policy.max_receive_count,
                "Applied redrive policy"
            );
        }

        Ok(url)
    }

    /// Create a single queue and register its URL and ARN
    async fn register(&self, queue: &Queue) -> Result<String, CourierError> {
        let cached_url = self.urls.get(&queue.name).map(|r| r.value().clone());
        let url = match cached_url {
            Some(url) => url,
            None => {
                let broker_name = self.namer.safe_name(&queue.name, queue.fifo);
                let created = self
                    .broker
                    .create_queue(&broker_name, &self.settings.attributes(queue.fifo))
                    .await?;

                // Concurrent creators agree on the first registered URL
                let url = self
                    .urls
                    .entry(queue.name.clone())
                    .or_insert(created)
                    .value()
                    .clone();

                info!(
                    queue = %queue.name,
                    broker_name = %broker_name,
                    url = %url,
                    "Queue registered"
                );
                url
            }
        };

        if !self.arns.contains_key(&queue.name) {
            let arn = self.broker.get_queue_arn(&url).await?;
            self.arns.entry(queue.name.clone()).or_insert(arn);
        }

        Ok(url)
    }

    /// Cached URL of a queue created in this process
    pub fn queue_url(&self, queue: &Queue) -> Result<String, CourierError> {
        self.url_by_name(&queue.name)
    }

    /// Cached ARN of a queue created in this process
    pub fn queue_arn(&self, queue: &Queue) -> Result<String, CourierError> {
        self.arns
            .get(&queue.name)
            .map(|r| r.value().clone())
            .ok_or_else(|| CourierError::UnknownQueue {
                queue_name: queue.name.clone(),
            })
    }

    fn url_by_name(&self, name: &str) -> Result<String, CourierError> {
        self.urls
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| CourierError::UnknownQueue {
                queue_name: name.to_string(),
            })
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Send a payload with a fresh correlation context
    ///
    /// FIFO queues require `fifo_group_id`.
    pub async fn publish<T>(
        &self,
        payload: &T,
        queue: &Queue,
        fifo_group_id: Option<&str>,
    ) -> Result<String, CourierError>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.publish_in_context(payload, queue, fifo_group_id, &CorrelationContext::new())
            .await
    }

    /// Send a payload carrying the caller's correlation context
    pub async fn publish_in_context<T>(
        &self,
        payload: &T,
        queue: &Queue,
        fifo_group_id: Option<&str>,
        correlation: &CorrelationContext,
    ) -> Result<String, CourierError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let group_id = group_for(queue, fifo_group_id)?;
        let url = self.queue_url(queue)?;

        let envelope = MessageEnvelope::new(serde_json::to_value(payload)?, correlation.to_wire());
        let body = envelope.encode()?;

        let message_id = self.broker.send_message(&url, &body, group_id).await?;
        debug!(
            queue = %queue.name,
            message_id = %message_id,
            request_id = %correlation.request_id(),
            "Message sent"
        );

        Ok(message_id)
    }

    /// Long-poll for at most one message.
    ///
    /// Bodies that are not envelopes are passed through as the payload.
    pub async fn receive_message(
        &self,
        queue: &Queue,
        wait_time_seconds: u32,
    ) -> Result<Option<ReceivedMessage>, CourierError> {
        let url = self.queue_url(queue)?;

        let message = match self.broker.receive_message(&url, wait_time_seconds).await? {
            Some(message) => message,
            None => return Ok(None),
        };

        let envelope = MessageEnvelope::decode(&message.body);
        let receipt = Receipt::from(message);
        debug!(
            queue = %queue.name,
            message_id = %receipt.message_id(),
            receive_count = receipt.receive_count(),
            "Message received"
        );

        Ok(Some(ReceivedMessage::new(envelope, receipt)))
    }

    /// Delete a received message, consuming its receipt
    pub async fn delete_message(
        &self,
        queue: &Queue,
        receipt: Receipt,
    ) -> Result<(), CourierError> {
        let url = self.queue_url(queue)?;
        self.broker.delete_message(&url, receipt.handle()).await?;
        debug!(queue = %queue.name, message_id = %receipt.message_id(), "Message deleted");
        Ok(())
    }

    /// Hide a received message for `timeout_seconds`, consuming its receipt.
    ///
    /// The timeout is clamped to the broker maximum of 43200 seconds.
    pub async fn change_visibility(
        &self,
        queue: &Queue,
        receipt: Receipt,
        timeout_seconds: u32,
    ) -> Result<(), CourierError> {
        let url = self.queue_url(queue)?;
        let max = u32::try_from(RetryPolicy::MAX_DELAY.as_secs()).unwrap_or(u32::MAX);
        let timeout_seconds = timeout_seconds.min(max);

        self.broker
            .change_visibility(&url, receipt.handle(), timeout_seconds)
            .await?;
        debug!(
            queue = %queue.name,
            message_id = %receipt.message_id(),
            timeout_seconds = timeout_seconds,
            "Message visibility changed"
        );
        Ok(())
    }

    /// Forward a received message to the queue's dead letter queue.
    ///
    /// The original message is left in place; callers delete it afterwards.
    pub async fn send_to_dlq(
        &self,
        message: &ReceivedMessage,
        queue: &Queue,
    ) -> Result<String, CourierError> {
        let dead_letter_name = queue.dead_letter_name();
        let url = self.url_by_name(&dead_letter_name)?;

        let group_id = match message.receipt().group_id() {
            Some(group) => Some(group),
            None if queue.fifo => Some(DEFAULT_DEAD_LETTER_GROUP),
            None => None,
        };

        let body = message.envelope.encode()?;
        let message_id = self.broker.send_message(&url, &body, group_id).await?;

        info!(
            queue = %queue.name,
            dead_letter_queue = %dead_letter_name,
            original_message_id = %message.receipt().message_id(),
            message_id = %message_id,
            "Message forwarded to dead letter queue"
        );

        Ok(message_id)
    }
}

/// Group id to send with, validating FIFO requirements
fn group_for<'a>(
    queue: &Queue,
    fifo_group_id: Option<&'a str>,
) -> Result<Option<&'a str>, CourierError> {
    if !queue.fifo {
        return Ok(None);
    }

    match fifo_group_id {
        Some(group) if !group.trim().is_empty() => Ok(Some(group)),
        _ => Err(ValidationError::Required {
            field: "fifo_group_id".to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
#[path = "queue_service_tests.rs"]
mod tests;
