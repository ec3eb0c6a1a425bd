//! # Courier Runtime
//!
//! Queue and topic messaging over a pluggable broker, with an HTTP broker for
//! SQS/SNS-compatible services and an in-memory broker for tests.
//!
//! This library provides:
//! - Queue creation with optional dead letter queues and redrive policies
//! - Topic creation, queue subscriptions and fan-out publishing
//! - A two-level message envelope carrying correlation context
//! - FIFO queues with message groups
//! - Environment-driven configuration
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all messaging operations
//! - [`message`] - Queue and topic descriptors, receipts and retry policies
//! - [`envelope`] - Wire envelope and its encoding
//! - [`correlation`] - Correlation context propagated between messages
//! - [`broker`] - The broker abstraction implemented by [`providers`]
//! - [`queue_service`], [`topic_service`], [`subscriber`], [`publisher`] -
//!   Operations built on a broker
//! - [`config`] - Runtime configuration

// Module declarations
pub mod broker;
pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod message;
pub mod naming;
pub mod providers;
pub mod publisher;
pub mod queue_service;
pub mod subscriber;
pub mod topic_service;

// Re-export commonly used types at crate root for convenience
pub use broker::{
    Broker, BrokerMessage, ProviderType, PublishResponse, QueueAttributes, RedrivePolicy,
};
pub use config::{
    AwsSettings, NamingSettings, QueueSettings, RuntimeConfig, UnmatchedPolicy, WorkerSettings,
};
pub use correlation::CorrelationContext;
pub use envelope::{Correlation, MessageEnvelope};
pub use error::{BrokerError, ConfigurationError, CourierError, ValidationError};
pub use message::{Queue, Receipt, ReceivedMessage, RetryPolicy, Topic};
pub use naming::{safe_name, ResourceNamer};
pub use publisher::{PublishOptions, Publisher};
pub use queue_service::QueueService;
pub use subscriber::Subscriber;
pub use topic_service::TopicService;
