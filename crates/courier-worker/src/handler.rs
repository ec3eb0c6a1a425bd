//! Extension points populated by application code.
//!
//! A received message flows through every [`Middleware`] in registration
//! order, then through each [`MessageHandler`] whose `can_process` accepts it.
//! Errors raised by handlers are reported to every [`ErrorHandler`].

use async_trait::async_trait;
use courier_runtime::{CorrelationContext, MessageEnvelope};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Message Arguments
// ============================================================================

/// Per-message state shared by middleware and handlers.
///
/// The envelope is read-only; middleware and handlers communicate through
/// `properties` and the abort/fail flags.
#[derive(Debug)]
pub struct MessageArgs {
    queue_name: String,
    message_id: String,
    receive_count: u32,
    envelope: MessageEnvelope,
    raw_body: String,
    correlation: CorrelationContext,

    /// Free-form values attached by middleware for later stages
    pub properties: HashMap<String, Value>,

    aborted: Option<String>,
    failed: Option<String>,
}

impl MessageArgs {
    pub fn new(
        queue_name: impl Into<String>,
        message_id: impl Into<String>,
        receive_count: u32,
        envelope: MessageEnvelope,
        correlation: CorrelationContext,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_id: message_id.into(),
            receive_count,
            envelope,
            raw_body: String::new(),
            correlation,
            properties: HashMap::new(),
            aborted: None,
            failed: None,
        }
    }

    /// Attach the message body exactly as the broker delivered it
    pub fn with_raw_body(mut self, raw_body: impl Into<String>) -> Self {
        self.raw_body = raw_body.into();
        self
    }

    /// Logical name of the queue the message came from
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

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

    pub fn envelope(&self) -> &MessageEnvelope {
        &self.envelope
    }

    /// Body as delivered by the broker, before envelope decoding
    pub fn raw_body(&self) -> &str {
        &self.raw_body
    }

    /// Deserialize the payload into a concrete type
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        self.envelope.content_as()
    }

    /// Topic the message was published to, if it came through a topic
    pub fn topic(&self) -> Option<&str> {
        self.envelope.topic.as_deref()
    }

    /// Correlation context of this unit of work
    pub fn correlation(&self) -> &CorrelationContext {
        &self.correlation
    }

    /// Skip dispatch and schedule a retry
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = Some(reason.into());
    }

    /// Reject the message.
    ///
    /// From a handler the message is dead-lettered without further retries.
    /// From middleware, dispatch is skipped and the message is retried like a
    /// handler error.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failed = Some(reason.into());
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failed.as_deref()
    }

    pub(crate) fn into_envelope(self) -> MessageEnvelope {
        self.envelope
    }
}

// ============================================================================
// Extension Traits
// ============================================================================

/// Application logic for messages of a particular shape
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use courier_worker::{MessageArgs, MessageHandler};
///
/// struct OrderPlacedHandler;
///
/// #[async_trait]
/// impl MessageHandler for OrderPlacedHandler {
///     fn can_process(&self, args: &MessageArgs) -> bool {
///         args.envelope().content.get("order_id").is_some()
///     }
///
///     async fn process_message(&self, args: &mut MessageArgs) -> anyhow::Result<()> {
///         let order_id: u64 = serde_json::from_value(args.envelope().content["order_id"].clone())?;
///         if order_id == 0 {
///             args.fail("order id 0 is never valid");
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Name used in spans and logs
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Whether this handler wants the message
    fn can_process(&self, args: &MessageArgs) -> bool;

    /// Process the message.
    ///
    /// Returning an error schedules a retry. Call [`MessageArgs::fail`] to
    /// dead-letter the message instead.
    async fn process_message(&self, args: &mut MessageArgs) -> anyhow::Result<()>;
}

/// Observer for handler failures
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn on_error(&self, args: &MessageArgs, error: &anyhow::Error);
}

/// Pre-dispatch stage run for every message
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Inspect or annotate the message before handler dispatch.
    ///
    /// An error escapes the message iteration and leaves the message for
    /// redelivery after its visibility timeout.
    async fn invoke(&self, args: &mut MessageArgs) -> anyhow::Result<()>;
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
