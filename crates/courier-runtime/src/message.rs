//! Queue, topic, retry policy and received-message types.

use crate::broker::BrokerMessage;
use crate::envelope::MessageEnvelope;
use std::time::Duration;

// ============================================================================
// Resources
// ============================================================================

/// Suffix appended to a queue's logical name to name its dead letter queue
pub const DEAD_LETTER_SUFFIX: &str = "_dlq";

/// A logical queue and its retry behaviour
///
/// Identity is the logical name; the broker name is derived from it by the
/// [`ResourceNamer`](crate::naming::ResourceNamer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    pub name: String,
    pub fifo: bool,
    pub enable_dlq: bool,
    pub retry_policy: RetryPolicy,
}

impl Queue {
    /// Create standard queue without a dead letter queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fifo: false,
            enable_dlq: false,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Mark queue as FIFO
    pub fn fifo(mut self) -> Self {
        self.fifo = true;
        self
    }

    /// Enable the companion dead letter queue
    pub fn with_dead_letter_queue(mut self) -> Self {
        self.enable_dlq = true;
        self
    }

    /// Set retry policy
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Logical name of the dead letter queue
    pub fn dead_letter_name(&self) -> String {
        format!("{}{}", self.name, DEAD_LETTER_SUFFIX)
    }

    /// Dead letter queue definition (same FIFO flag, no DLQ of its own)
    pub fn dead_letter_queue(&self) -> Queue {
        Queue {
            name: self.dead_letter_name(),
            fifo: self.fifo,
            enable_dlq: false,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// A logical publish/subscribe topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub name: String,
}

impl Topic {
    /// Create topic with logical name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Retry budget and redelivery delay for a queue
///
/// # Examples
///
/// ```rust
/// use courier_runtime::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(2, Duration::from_secs(5), true);
/// assert_eq!(policy.delay_for(0), Duration::from_secs(5));
/// assert_eq!(policy.delay_for(1), Duration::from_secs(10));
/// assert!(policy.is_exhausted(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed before the message is dead-lettered
    pub max_retries: u32,

    /// Base redelivery delay
    pub delay: Duration,

    /// Multiply the delay by the attempt number
    pub backoff: bool,
}

impl RetryPolicy {
    /// Largest visibility timeout the broker accepts (12 hours)
    pub const MAX_DELAY: Duration = Duration::from_secs(43_200);

    /// Create new retry policy
    pub fn new(max_retries: u32, delay: Duration, backoff: bool) -> Self {
        Self {
            max_retries,
            delay,
            backoff,
        }
    }

    /// Redelivery delay after `attempts` previous retries.
    ///
    /// With backoff the delay is `delay × (attempts + 1)`. The result is
    /// clamped to [`RetryPolicy::MAX_DELAY`].
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let delay = if self.backoff {
            self.delay
                .checked_mul(attempts.saturating_add(1))
                .unwrap_or(Self::MAX_DELAY)
        } else {
            self.delay
        };

        delay.min(Self::MAX_DELAY)
    }

    /// Check whether the retry budget is spent
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(30),
            backoff: false,
        }
    }
}

// ============================================================================
// Received Messages
// ============================================================================

/// Broker delivery token for one received message.
///
/// Not `Clone`: a receipt is consumed by exactly one delete,
/// visibility change or dead-letter forward.
#[derive(Debug, PartialEq, Eq)]
pub struct Receipt {
    handle: String,
    message_id: String,
    receive_count: u32,
    group_id: Option<String>,
    body: String,
}

impl Receipt {
    /// Create receipt from raw parts
    pub fn new(
        handle: String,
        message_id: String,
        receive_count: u32,
        group_id: Option<String>,
        body: String,
    ) -> Self {
        Self {
            handle,
            message_id,
            receive_count,
            group_id,
            body,
        }
    }

    /// Opaque broker handle
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Broker-assigned message id
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Server-reported delivery count (1 on first delivery)
    pub fn receive_count(&self) -> u32 {
        self.receive_count
    }

    /// Retries already spent on this message
    pub fn retry_attempts(&self) -> u32 {
        self.receive_count.saturating_sub(1)
    }

    /// FIFO message group, if any
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// Raw message body as delivered
    pub fn body(&self) -> &str {
        &self.body
    }
}

impl From<BrokerMessage> for Receipt {
    fn from(message: BrokerMessage) -> Self {
        Self {
            handle: message.receipt_handle,
            message_id: message.message_id,
            receive_count: message.receive_count,
            group_id: message.group_id,
            body: message.body,
        }
    }
}

/// A message received from a queue: decoded envelope plus its receipt
#[derive(Debug)]
pub struct ReceivedMessage {
    pub envelope: MessageEnvelope,
    receipt: Receipt,
}

impl ReceivedMessage {
    /// Pair an envelope with its receipt
    pub fn new(envelope: MessageEnvelope, receipt: Receipt) -> Self {
        Self { envelope, receipt }
    }

    /// Borrow receipt
    pub fn receipt(&self) -> &Receipt {
        &self.receipt
    }

    /// Retries already spent on this message
    pub fn retry_attempts(&self) -> u32 {
        self.receipt.retry_attempts()
    }

    /// Split into envelope and receipt for finalization
    pub fn into_parts(self) -> (MessageEnvelope, Receipt) {
        (self.envelope, self.receipt)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
