//! Error types for queue and topic operations.

use thiserror::Error;

/// Error type for every queue, topic and publish operation
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Unknown queue: {queue_name} (create it before use)")]
    UnknownQueue { queue_name: String },

    #[error("Unknown topic: {topic_name} (create it before use)")]
    UnknownTopic { topic_name: String },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error(
        "Publish to topic '{topic}' failed with status {status_code} ({metadata}); payload: {payload}"
    )]
    PublishFailed {
        topic: String,
        status_code: u16,
        metadata: String,
        payload: String,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CourierError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UnknownQueue { .. } => false,
            Self::UnknownTopic { .. } => false,
            Self::Broker(e) => e.is_transient(),
            Self::PublishFailed { status_code, .. } => *status_code >= 500,
            Self::Serialization(_) => false,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }
}

/// Errors reported by a broker provider
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Service error: {code} - {message}")]
    Service { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Malformed broker response: {0}")]
    MalformedResponse(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl BrokerError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::Network(_) => true,
            Self::Service { .. } => true, // Most service errors are transient
            Self::QueueNotFound(_) => false,
            Self::TopicNotFound(_) => false,
            Self::InvalidReceipt(_) => false,
            Self::MessageTooLarge { .. } => false,
            Self::MalformedResponse(_) => false,
            Self::Configuration(_) => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
