//! In-memory broker for testing and development.
//!
//! Models the parts of the managed service the runtime depends on:
//! - Visibility timeouts with a fresh receipt handle per delivery
//! - Approximate receive counts
//! - Redrive policies moving messages to a dead letter queue once their
//!   receive count reaches `maxReceiveCount`
//! - FIFO queues: group id required, one in-flight message per group
//! - Message retention
//! - Topic fan-out to subscribed queues in the notification shape
//!
//! Time is measured with `tokio::time`, so tests can pause and advance the
//! clock.

use crate::broker::{
    Broker, BrokerMessage, ProviderType, PublishResponse, QueueAttributes, RedrivePolicy,
    ATTRIBUTE_REDRIVE_POLICY,
};
use crate::config::MAX_WAIT_TIME_SECONDS;
use crate::error::BrokerError;
use crate::providers::aws::MAX_MESSAGE_SIZE;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Account id used in generated URLs and ARNs
pub const ACCOUNT_ID: &str = "000000000000";

const REGION: &str = "local";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// All queues and topics of one broker instance
#[derive(Default)]
struct QueueStorage {
    /// Keyed by queue URL
    queues: HashMap<String, InMemoryQueue>,
    /// Keyed by topic ARN
    topics: HashMap<String, InMemoryTopic>,
    forced_publish_status: Option<u16>,
}

impl QueueStorage {
    fn queue_mut(&mut self, queue_url: &str) -> Result<&mut InMemoryQueue, BrokerError> {
        self.queues
            .get_mut(queue_url)
            .ok_or_else(|| BrokerError::QueueNotFound(queue_url.to_string()))
    }

    /// Deliver the next available message, moving redriven messages first
    fn receive(
        &mut self,
        queue_url: &str,
        now: Instant,
    ) -> Result<Option<BrokerMessage>, BrokerError> {
        let queue = self.queue_mut(queue_url)?;
        queue.expire(now);

        let busy_groups = queue.in_flight_groups(now);
        let max_receive_count = queue.redrive.as_ref().map(|r| r.max_receive_count);
        let visibility =
            Duration::from_secs(u64::from(queue.attributes.visibility_timeout_seconds));

        let mut redriven = Vec::new();
        let mut delivered = None;
        let mut index = 0;

        while index < queue.messages.len() {
            let (available, exhausted) = {
                let message = &queue.messages[index];
                let group_busy = message
                    .group_id
                    .as_ref()
                    .is_some_and(|group| busy_groups.contains(group));
                let exhausted =
                    max_receive_count.is_some_and(|max| message.receive_count >= max);
                (message.available_at <= now && !group_busy, exhausted)
            };

            if !available {
                index += 1;
                continue;
            }

            if exhausted {
                if let Some(message) = queue.messages.remove(index) {
                    redriven.push(message);
                }
                continue;
            }

            let handle = Uuid::new_v4().to_string();
            let message = &mut queue.messages[index];
            message.receive_count += 1;
            message.available_at = now + visibility;
            message.receipt_handle = Some(handle.clone());

            delivered = Some(BrokerMessage {
                message_id: message.message_id.clone(),
                receipt_handle: handle,
                body: message.body.clone(),
                receive_count: message.receive_count,
                group_id: message.group_id.clone(),
            });
            break;
        }

        let target_arn = queue.redrive.as_ref().map(|r| r.dead_letter_target_arn.clone());
        if !redriven.is_empty() {
            self.redrive(queue_url, target_arn, redriven, now);
        }

        Ok(delivered)
    }

    fn redrive(
        &mut self,
        source_url: &str,
        target_arn: Option<String>,
        messages: Vec<StoredMessage>,
        now: Instant,
    ) {
        let target = target_arn
            .as_deref()
            .and_then(|arn| self.queues.values_mut().find(|q| q.arn == arn));

        match target {
            Some(dead_letter_queue) => {
                for message in messages {
                    debug!(
                        queue_url = %source_url,
                        message_id = %message.message_id,
                        receive_count = message.receive_count,
                        "Redriving message to dead letter queue"
                    );
                    dead_letter_queue.messages.push_back(message.redriven(now));
                }
            }
            None => {
                warn!(
                    queue_url = %source_url,
                    count = messages.len(),
                    "Dead letter target missing; dropping redriven messages"
                );
            }
        }
    }
}

/// State of a single queue
struct InMemoryQueue {
    name: String,
    arn: String,
    attributes: QueueAttributes,
    extra_attributes: HashMap<String, String>,
    redrive: Option<RedrivePolicy>,
    messages: VecDeque<StoredMessage>,
}

impl InMemoryQueue {
    fn new(name: &str, attributes: &QueueAttributes) -> Self {
        Self {
            name: name.to_string(),
            arn: format!("arn:aws:sqs:{}:{}:{}", REGION, ACCOUNT_ID, name),
            attributes: attributes.clone(),
            extra_attributes: HashMap::new(),
            redrive: None,
            messages: VecDeque::new(),
        }
    }

    /// Drop messages older than the retention period
    fn expire(&mut self, now: Instant) {
        let retention = Duration::from_secs(u64::from(self.attributes.message_retention_seconds));
        self.messages
            .retain(|message| now.duration_since(message.sent_at) < retention);
    }

    /// Groups with a message currently invisible after delivery
    fn in_flight_groups(&self, now: Instant) -> HashSet<String> {
        if !self.attributes.fifo {
            return HashSet::new();
        }

        self.messages
            .iter()
            .filter(|m| m.receipt_handle.is_some() && m.available_at > now)
            .filter_map(|m| m.group_id.clone())
            .collect()
    }

    fn position_of(&self, receipt_handle: &str) -> Result<usize, BrokerError> {
        self.messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| BrokerError::InvalidReceipt(receipt_handle.to_string()))
    }

    fn push(&mut self, body: String, group_id: Option<String>, now: Instant) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.messages.push_back(StoredMessage {
            message_id: message_id.clone(),
            body,
            group_id,
            receive_count: 0,
            sent_at: now,
            available_at: now,
            receipt_handle: None,
        });
        message_id
    }
}

/// A message stored in a queue
#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    group_id: Option<String>,
    receive_count: u32,
    sent_at: Instant,
    available_at: Instant,
    /// Handle of the latest delivery; older handles are stale
    receipt_handle: Option<String>,
}

impl StoredMessage {
    /// Copy placed in a dead letter queue; keeps id, body and group
    fn redriven(self, now: Instant) -> Self {
        Self {
            receive_count: 0,
            available_at: now,
            receipt_handle: None,
            ..self
        }
    }
}

struct InMemoryTopic {
    name: String,
    subscriptions: Vec<Subscription>,
}

struct Subscription {
    arn: String,
    queue_url: String,
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// In-process broker with queue and topic semantics
///
/// Cloning shares the underlying storage.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, QueueStorage> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, QueueStorage> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// URL the broker assigns to a queue name
    pub fn queue_url_for(name: &str) -> String {
        format!("https://sqs.{}.memory/{}/{}", REGION, ACCOUNT_ID, name)
    }

    /// Make every subsequent publish report `status_code`; `None` restores success
    pub fn set_publish_status(&self, status_code: Option<u16>) {
        self.write().forced_publish_status = status_code;
    }

    /// Number of messages in a queue, in flight or not
    pub fn message_count(&self, queue_url: &str) -> usize {
        self.read()
            .queues
            .get(queue_url)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Bodies of every message in a queue, oldest first
    pub fn message_bodies(&self, queue_url: &str) -> Vec<String> {
        self.read()
            .queues
            .get(queue_url)
            .map(|q| q.messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Redrive policy currently set on a queue
    pub fn redrive_policy(&self, queue_url: &str) -> Option<RedrivePolicy> {
        self.read()
            .queues
            .get(queue_url)
            .and_then(|q| q.redrive.clone())
    }

    /// Attributes of a queue as created
    pub fn queue_attributes(&self, queue_url: &str) -> Option<QueueAttributes> {
        self.read()
            .queues
            .get(queue_url)
            .map(|q| q.attributes.clone())
    }

    /// Raw attribute set through `set_queue_attributes`
    pub fn queue_attribute(&self, queue_url: &str, name: &str) -> Option<String> {
        self.read()
            .queues
            .get(queue_url)
            .and_then(|q| q.extra_attributes.get(name).cloned())
    }

    /// Queue URLs subscribed to a topic
    pub fn subscriptions(&self, topic_arn: &str) -> Vec<String> {
        self.read()
            .topics
            .get(topic_arn)
            .map(|t| t.subscriptions.iter().map(|s| s.queue_url.clone()).collect())
            .unwrap_or_default()
    }

    /// Names of every queue, sorted
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().queues.values().map(|q| q.name.clone()).collect();
        names.sort();
        names
    }
}

fn notification(topic_arn: &str, message_id: &str, body: &str) -> String {
    serde_json::json!({
        "Type": "Notification",
        "MessageId": message_id,
        "TopicArn": topic_arn,
        "Message": body,
        "Timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
    .to_string()
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<String, BrokerError> {
        if attributes.fifo != name.ends_with(".fifo") {
            return Err(BrokerError::Service {
                code: "InvalidParameterValue".to_string(),
                message: format!(
                    "Queue '{}': FIFO queues, and only FIFO queues, must end in .fifo",
                    name
                ),
            });
        }

        let url = Self::queue_url_for(name);
        self.write()
            .queues
            .entry(url.clone())
            .or_insert_with(|| InMemoryQueue::new(name, attributes));

        Ok(url)
    }

    async fn get_queue_arn(&self, queue_url: &str) -> Result<String, BrokerError> {
        Ok(self.write().queue_mut(queue_url)?.arn.clone())
    }

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), BrokerError> {
        let mut storage = self.write();
        let queue = storage.queue_mut(queue_url)?;

        for (name, value) in attributes {
            match name.as_str() {
                ATTRIBUTE_REDRIVE_POLICY => {
                    let policy: RedrivePolicy =
                        serde_json::from_str(value).map_err(|e| BrokerError::Service {
                            code: "InvalidAttributeValue".to_string(),
                            message: format!("Invalid RedrivePolicy: {}", e),
                        })?;
                    queue.redrive = Some(policy);
                }
                "VisibilityTimeout" => {
                    queue.attributes.visibility_timeout_seconds =
                        value.parse().map_err(|_| BrokerError::Service {
                            code: "InvalidAttributeValue".to_string(),
                            message: format!("Invalid VisibilityTimeout: {}", value),
                        })?;
                }
                _ => {}
            }
            queue.extra_attributes.insert(name.clone(), value.clone());
        }

        Ok(())
    }

    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        group_id: Option<&str>,
    ) -> Result<String, BrokerError> {
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(BrokerError::MessageTooLarge {
                size: body.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        let mut storage = self.write();
        let queue = storage.queue_mut(queue_url)?;
        if queue.attributes.fifo && group_id.is_none() {
            return Err(BrokerError::Service {
                code: "MissingParameter".to_string(),
                message: "MessageGroupId is required for FIFO queues".to_string(),
            });
        }

        Ok(queue.push(
            body.to_string(),
            group_id.map(str::to_string),
            Instant::now(),
        ))
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        wait_time_seconds: u32,
    ) -> Result<Option<BrokerMessage>, BrokerError> {
        let wait = Duration::from_secs(u64::from(wait_time_seconds.min(MAX_WAIT_TIME_SECONDS)));
        let deadline = Instant::now() + wait;

        loop {
            let now = Instant::now();
            let received = self.write().receive(queue_url, now)?;
            if received.is_some() {
                return Ok(received);
            }
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        let mut storage = self.write();
        let queue = storage.queue_mut(queue_url)?;
        let index = queue.position_of(receipt_handle)?;
        queue.messages.remove(index);
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        timeout_seconds: u32,
    ) -> Result<(), BrokerError> {
        let mut storage = self.write();
        let queue = storage.queue_mut(queue_url)?;
        let index = queue.position_of(receipt_handle)?;
        queue.messages[index].available_at =
            Instant::now() + Duration::from_secs(u64::from(timeout_seconds));
        Ok(())
    }

    async fn create_topic(&self, name: &str) -> Result<String, BrokerError> {
        let arn = format!("arn:aws:sns:{}:{}:{}", REGION, ACCOUNT_ID, name);
        self.write()
            .topics
            .entry(arn.clone())
            .or_insert_with(|| InMemoryTopic {
                name: name.to_string(),
                subscriptions: Vec::new(),
            });
        Ok(arn)
    }

    async fn subscribe_queue(
        &self,
        topic_arn: &str,
        queue_url: &str,
    ) -> Result<String, BrokerError> {
        let mut storage = self.write();
        if !storage.queues.contains_key(queue_url) {
            return Err(BrokerError::QueueNotFound(queue_url.to_string()));
        }

        let topic = storage
            .topics
            .get_mut(topic_arn)
            .ok_or_else(|| BrokerError::TopicNotFound(topic_arn.to_string()))?;

        if let Some(existing) = topic.subscriptions.iter().find(|s| s.queue_url == queue_url) {
            return Ok(existing.arn.clone());
        }

        let arn = format!("{}:{}", topic_arn, Uuid::new_v4());
        topic.subscriptions.push(Subscription {
            arn: arn.clone(),
            queue_url: queue_url.to_string(),
        });
        Ok(arn)
    }

    async fn publish(&self, topic_arn: &str, body: &str) -> Result<PublishResponse, BrokerError> {
        let mut storage = self.write();
        let request_id = Some(Uuid::new_v4().to_string());

        if let Some(status_code) = storage.forced_publish_status {
            return Ok(PublishResponse {
                status_code,
                message_id: None,
                request_id,
            });
        }

        let (topic_name, queue_urls) = match storage.topics.get(topic_arn) {
            Some(topic) => (
                topic.name.clone(),
                topic
                    .subscriptions
                    .iter()
                    .map(|s| s.queue_url.clone())
                    .collect::<Vec<_>>(),
            ),
            None => {
                return Ok(PublishResponse {
                    status_code: 404,
                    message_id: None,
                    request_id,
                })
            }
        };

        let message_id = Uuid::new_v4().to_string();
        let delivery = notification(topic_arn, &message_id, body);
        let now = Instant::now();

        for queue_url in queue_urls {
            match storage.queues.get_mut(&queue_url) {
                Some(queue) => {
                    let group_id = queue.attributes.fifo.then(|| topic_name.clone());
                    queue.push(delivery.clone(), group_id, now);
                }
                None => warn!(queue_url = %queue_url, "Subscribed queue no longer exists"),
            }
        }

        Ok(PublishResponse {
            status_code: 200,
            message_id: Some(message_id),
            request_id,
        })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
