//! # Courier CLI
//!
//! Operator commands for Courier queues and topics:
//! - Creating queues (with dead letter queues) and topics
//! - Subscribing queues to topics
//! - Publishing to topics and sending to queues
//! - Running a logging consumer against a queue
//!
//! Configuration comes from an optional YAML file and `COURIER__*`
//! environment variables.

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use courier_runtime::providers::{AwsBroker, InMemoryBroker};
use courier_runtime::{
    Broker, BrokerError, ConfigurationError, CourierError, PublishOptions, Publisher, Queue,
    QueueService, RetryPolicy, RuntimeConfig, Subscriber, Topic, TopicService,
};
use courier_worker::{MessageArgs, MessageHandler, QueueWorker, WorkerError};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

/// Courier - queue and topic messaging
#[derive(Debug, Parser)]
#[command(name = "courier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage queues and topics, publish messages and run consumers")]
pub struct Cli {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "COURIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Broker provider
    #[arg(long, value_enum, default_value = "aws", env = "COURIER_PROVIDER")]
    pub provider: ProviderKind,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Broker providers selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// SQS/SNS-compatible HTTP endpoint
    Aws,
    /// Process-local broker; state is lost on exit
    Memory,
}

/// Queue definition shared by queue-related commands
#[derive(Debug, Clone, clap::Args)]
pub struct QueueArgs {
    /// Logical queue name
    pub queue: String,

    /// FIFO queue
    #[arg(long)]
    pub fifo: bool,

    /// Create a companion dead letter queue
    #[arg(long)]
    pub dlq: bool,

    /// Retries before a message is dead-lettered
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Base retry delay in seconds
    #[arg(long, default_value = "30")]
    pub retry_delay: u64,

    /// Multiply the retry delay by the attempt number
    #[arg(long)]
    pub backoff: bool,
}

impl QueueArgs {
    pub fn to_queue(&self) -> Queue {
        let mut queue = Queue::new(self.queue.clone()).with_retry_policy(RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_delay),
            self.backoff,
        ));
        if self.fifo {
            queue = queue.fifo();
        }
        if self.dlq {
            queue = queue.with_dead_letter_queue();
        }
        queue
    }
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a queue, and its dead letter queue when requested
    CreateQueue {
        #[command(flatten)]
        queue: QueueArgs,
    },

    /// Create a topic
    CreateTopic {
        /// Logical topic name
        topic: String,
    },

    /// Subscribe a queue to a topic, creating both if needed
    Subscribe {
        #[command(flatten)]
        queue: QueueArgs,

        /// Logical topic name
        #[arg(long)]
        topic: String,
    },

    /// Publish a JSON payload to a topic
    Publish {
        /// Logical topic name
        topic: String,

        /// JSON payload
        payload: String,

        /// Publish the payload without an envelope
        #[arg(long)]
        raw: bool,

        /// Identity claim as key=value; may be repeated
        #[arg(long = "identity", value_name = "KEY=VALUE")]
        identity: Vec<String>,
    },

    /// Send a JSON payload directly to a queue
    Send {
        #[command(flatten)]
        queue: QueueArgs,

        /// JSON payload
        payload: String,

        /// Message group for FIFO queues
        #[arg(long)]
        group: Option<String>,
    },

    /// Log every message arriving on a queue
    Consume {
        #[command(flatten)]
        queue: QueueArgs,

        /// Topic to subscribe the queue to; may be repeated
        #[arg(long = "topic")]
        topics: Vec<String>,

        /// Number of consume loops; overrides configuration
        #[arg(long)]
        threads: Option<usize>,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
    },
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("{0}")]
    Runtime(#[from] CourierError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Broker(_) => 2,
            Self::Runtime(_) => 3,
            Self::Worker(_) => 4,
            Self::InvalidArgument { .. } => 5,
            Self::Io(_) => 6,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli);

    let config = load_configuration(cli.config.as_ref())?;
    let broker = create_broker(cli.provider, &config)?;

    let output = execute_command(cli.command, &config, broker).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// Initialize logging; `RUST_LOG` takes precedence over `--log-level`
fn initialize_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "courier_runtime={level},courier_worker={level},courier_cli={level}",
            level = cli.log_level
        ))
    });

    let json = cli.json_logs;
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init();
}

/// Load configuration from an optional file and the environment
pub fn load_configuration(config_path: Option<&PathBuf>) -> Result<RuntimeConfig, CliError> {
    let path = match config_path {
        Some(path) => Some(path.to_str().ok_or_else(|| CliError::InvalidArgument {
            arg: "config".to_string(),
            message: format!("path is not valid UTF-8: {}", path.display()),
        })?),
        None => None,
    };

    Ok(RuntimeConfig::load(path)?)
}

/// Create the broker for the selected provider
pub fn create_broker(
    provider: ProviderKind,
    config: &RuntimeConfig,
) -> Result<Arc<dyn Broker>, CliError> {
    let broker: Arc<dyn Broker> = match provider {
        ProviderKind::Aws => Arc::new(AwsBroker::new(&config.aws)?),
        ProviderKind::Memory => Arc::new(InMemoryBroker::new()),
    };
    Ok(broker)
}

/// Execute one command and return its output text
pub async fn execute_command(
    command: Commands,
    config: &RuntimeConfig,
    broker: Arc<dyn Broker>,
) -> Result<String, CliError> {
    let queues = Arc::new(QueueService::from_config(broker.clone(), config));
    let topics = Arc::new(TopicService::from_config(broker.clone(), config));

    match command {
        Commands::CreateQueue { queue } => {
            let url = queues.create_queue(&queue.to_queue()).await?;
            Ok(url)
        }
        Commands::CreateTopic { topic } => {
            let arn = topics.create_topic(&Topic::new(topic)).await?;
            Ok(arn)
        }
        Commands::Subscribe { queue, topic } => {
            let queue = queue.to_queue();
            queues.create_queue(&queue).await?;
            let subscription = Subscriber::new(queues, topics)
                .subscribe(&queue, &Topic::new(topic))
                .await?;
            Ok(subscription)
        }
        Commands::Publish {
            topic,
            payload,
            raw,
            identity,
        } => {
            let payload = parse_payload(&payload)?;
            let mut options = PublishOptions::default();
            if raw {
                options = options.raw();
            }
            if !identity.is_empty() {
                options = options.with_identity(parse_identity(&identity)?);
            }

            let response = Publisher::new(topics)
                .publish(&Topic::new(topic), &payload, options)
                .await?;
            Ok(response.message_id.unwrap_or_default())
        }
        Commands::Send {
            queue,
            payload,
            group,
        } => {
            let payload = parse_payload(&payload)?;
            let queue = queue.to_queue();
            queues.create_queue(&queue).await?;
            let message_id = queues.publish(&payload, &queue, group.as_deref()).await?;
            Ok(message_id)
        }
        Commands::Consume {
            queue,
            topics: topic_names,
            threads,
            duration,
        } => {
            let mut settings = config.worker.clone();
            if let Some(threads) = threads {
                settings.threads = threads.max(1);
            }

            let mut worker = QueueWorker::new(queues, topics, settings);
            worker.register_queue(queue.to_queue())?;
            for topic in topic_names {
                worker.register_topic(Topic::new(topic))?;
            }
            worker.register_message_handler(LoggingHandler)?;

            worker.start().await?;
            wait_for_shutdown(duration.map(Duration::from_secs)).await?;
            worker.stop().await?;
            Ok(String::new())
        }
    }
}

async fn wait_for_shutdown(duration: Option<Duration>) -> Result<(), CliError> {
    match duration {
        Some(duration) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = tokio::time::sleep(duration) => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }
    info!("Shutting down consumer");
    Ok(())
}

/// Parse a JSON payload argument
pub fn parse_payload(payload: &str) -> Result<Value, CliError> {
    serde_json::from_str(payload).map_err(|e| CliError::InvalidArgument {
        arg: "payload".to_string(),
        message: e.to_string(),
    })
}

/// Parse repeated `key=value` identity claims
pub fn parse_identity(claims: &[String]) -> Result<HashMap<String, String>, CliError> {
    claims
        .iter()
        .map(|claim| match claim.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(CliError::InvalidArgument {
                arg: "identity".to_string(),
                message: format!("expected KEY=VALUE, got '{}'", claim),
            }),
        })
        .collect()
}

// ============================================================================
// Logging Consumer
// ============================================================================

/// Handler that logs every message it receives
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    fn can_process(&self, _args: &MessageArgs) -> bool {
        true
    }

    async fn process_message(&self, args: &mut MessageArgs) -> anyhow::Result<()> {
        info!(
            queue = %args.queue_name(),
            message_id = %args.message_id(),
            topic = args.topic(),
            retry_attempts = args.retry_attempts(),
            content = %args.envelope().content,
            "Message received"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
