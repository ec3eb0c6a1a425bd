//! Runtime configuration.
//!
//! Configuration is read from an optional YAML file followed by environment
//! variables prefixed `COURIER__`, with `__` separating nested keys:
//!
//! ```text
//! COURIER__QUEUE__VISIBILITY_TIMEOUT_SECONDS=120
//! COURIER__WORKER__THREADS=4
//! COURIER__NAMING__PREFIX=staging_
//! COURIER__AWS__ENDPOINT_URL=http://localhost:4566
//! ```
//!
//! Every field carries a serde default, so an unconfigured environment yields
//! a valid configuration.

use crate::broker::QueueAttributes;
use crate::error::ConfigurationError;
use crate::message::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "COURIER";

/// Separator between nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

/// Longest long-poll the broker supports
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub naming: NamingSettings,

    #[serde(default)]
    pub aws: AwsSettings,
}

impl RuntimeConfig {
    /// Load from `COURIER__*` environment variables and validate
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::load(None)
    }

    /// Load from an optional YAML file, then environment variables, and validate.
    ///
    /// Environment values override file values.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(
                config::File::with_name(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let settings = builder.add_source(environment()).build()?;
        Self::from_settings(settings)
    }

    /// Load from an explicit environment source.
    ///
    /// Lets callers supply variables without touching the process environment.
    pub fn from_environment(source: config::Environment) -> Result<Self, ConfigurationError> {
        let settings = config::Config::builder().add_source(source).build()?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self, ConfigurationError> {
        let config: RuntimeConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate ranges the broker enforces
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let max_visibility = RetryPolicy::MAX_DELAY.as_secs();
        if u64::from(self.queue.visibility_timeout_seconds) > max_visibility {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "queue.visibility_timeout_seconds must be at most {}, got {}",
                    max_visibility, self.queue.visibility_timeout_seconds
                ),
            });
        }

        if !(60..=1_209_600).contains(&self.queue.message_retention_seconds) {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "queue.message_retention_seconds must be between 60 and 1209600, got {}",
                    self.queue.message_retention_seconds
                ),
            });
        }

        if self.worker.threads == 0 {
            return Err(ConfigurationError::Invalid {
                message: "worker.threads must be at least 1".to_string(),
            });
        }

        if self.worker.wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "worker.wait_time_seconds must be at most {}, got {}",
                    MAX_WAIT_TIME_SECONDS, self.worker.wait_time_seconds
                ),
            });
        }

        if self.aws.region.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "aws.region".to_string(),
            });
        }

        if self.aws.access_key_id.is_some() != self.aws.secret_access_key.is_some() {
            return Err(ConfigurationError::Invalid {
                message: "aws.access_key_id and aws.secret_access_key must be set together"
                    .to_string(),
            });
        }

        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

/// Attributes applied to every created queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub visibility_timeout_seconds: u32,
    pub message_retention_seconds: u32,
}

impl QueueSettings {
    /// Queue creation attributes for a standard or FIFO queue
    pub fn attributes(&self, fifo: bool) -> QueueAttributes {
        QueueAttributes {
            visibility_timeout_seconds: self.visibility_timeout_seconds,
            message_retention_seconds: self.message_retention_seconds,
            fifo,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: 60,
            message_retention_seconds: 1_209_600, // 14 days
        }
    }
}

/// Consumer pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Number of concurrent consume loops
    pub threads: usize,

    /// Long-poll wait per receive
    pub wait_time_seconds: u32,

    /// What happens to messages no handler accepts
    pub unmatched_policy: UnmatchedPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            threads: 1,
            wait_time_seconds: MAX_WAIT_TIME_SECONDS,
            unmatched_policy: UnmatchedPolicy::default(),
        }
    }
}

/// Disposition of a message for which no handler's `can_process` matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Leave the message for redelivery after its visibility timeout
    #[default]
    Retain,

    /// Delete the message
    Delete,

    /// Forward to the dead letter queue (when enabled), then delete
    DeadLetter,
}

impl fmt::Display for UnmatchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain => write!(f, "retain"),
            Self::Delete => write!(f, "delete"),
            Self::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

/// Resource naming settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingSettings {
    /// Environment prefix prepended to every queue and topic name
    pub prefix: Option<String>,
}

/// Broker endpoint and credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    pub region: String,

    /// Override for the service endpoint, e.g. a LocalStack URL
    pub endpoint_url: Option<String>,

    pub access_key_id: Option<String>,

    pub secret_access_key: Option<String>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
