//! Message envelope and its wire format.
//!
//! Messages travel as an outer document `{"Message": "<inner json>"}`, the
//! same shape a topic notification has when it is fanned out to a queue. The
//! inner document carries the payload and the sender's correlation header:
//!
//! ```json
//! {
//!   "Content": { "order": 42 },
//!   "Correlation": { "Request": "...", "Session": null, "Trace": "...", "Span": "..." },
//!   "Topic": "orders",
//!   "Identity": { "sub": "user-1" }
//! }
//! ```
//!
//! Decoding never fails. A body that is not an outer document is passed
//! through as the payload, and so is an outer `Message` that is not an inner
//! envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Correlation header as it appears on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Correlation {
    #[serde(default)]
    pub request: String,

    #[serde(default)]
    pub session: Option<String>,

    #[serde(default)]
    pub trace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

/// Payload plus correlation context, as produced by a publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageEnvelope {
    pub content: Value,

    #[serde(default)]
    pub correlation: Correlation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<HashMap<String, String>>,
}

impl MessageEnvelope {
    /// Create envelope for content with a correlation header
    pub fn new(content: Value, correlation: Correlation) -> Self {
        Self {
            content,
            correlation,
            topic: None,
            identity: None,
        }
    }

    /// Record originating topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Attach identity claims
    pub fn with_identity(mut self, identity: HashMap<String, String>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Envelope whose payload is raw text that could not be decoded.
    ///
    /// Text that is valid JSON keeps its structure, with numbers and key
    /// order exactly as written; anything else becomes a JSON string.
    pub fn passthrough(text: &str) -> Self {
        let content =
            serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.to_string()));
        Self::new(content, Correlation::default())
    }

    /// Deserialize the payload into a concrete type
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.content)
    }

    /// Encode as outer/inner wire document
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let inner = serde_json::to_string(self)?;
        wrap(inner)
    }

    /// Decode a message body, falling back to passthrough on any parse failure
    pub fn decode(body: &str) -> Self {
        let outer: OuterEnvelope = match serde_json::from_str(body) {
            Ok(outer) => outer,
            Err(e) => {
                debug!(error = %e, "Message body is not an envelope; passing raw body through");
                return Self::passthrough(body);
            }
        };

        match decode_inner(&outer.message) {
            Some(envelope) => envelope,
            None => {
                debug!("Outer message carries no inner envelope; passing message through");
                Self::passthrough(&outer.message)
            }
        }
    }
}

/// Outer document; topic notifications carry extra fields which are ignored
#[derive(Debug, Serialize, Deserialize)]
struct OuterEnvelope {
    #[serde(rename = "Message")]
    message: String,
}

/// Wrap an already serialized inner document in the outer document
pub fn wrap(inner: String) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OuterEnvelope { message: inner })
}

fn decode_inner(text: &str) -> Option<MessageEnvelope> {
    let value: Value = serde_json::from_str(text).ok()?;
    if !value.as_object()?.contains_key("Content") {
        return None;
    }
    serde_json::from_value(value).ok()
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
