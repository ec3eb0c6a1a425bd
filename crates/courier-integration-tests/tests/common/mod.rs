//! Common test utilities for courier integration tests
//!
//! This module provides:
//! - A `TestSystem` wiring services and workers to one in-memory broker
//! - Recording, flaky and rejecting message handlers
//! - Polling helpers for asynchronous assertions

use async_trait::async_trait;
use courier_runtime::providers::InMemoryBroker;
use courier_runtime::{Publisher, Queue, QueueService, RuntimeConfig, TopicService};
use courier_worker::{MessageArgs, MessageHandler, QueueWorker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Route worker logs to the test output
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("courier_runtime=debug,courier_worker=debug")
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Test System
// ============================================================================

/// Services and workers sharing one in-memory broker
#[allow(dead_code)]
pub struct TestSystem {
    pub broker: Arc<InMemoryBroker>,
    pub config: RuntimeConfig,
    pub queues: Arc<QueueService>,
    pub topics: Arc<TopicService>,
}

#[allow(dead_code)]
impl TestSystem {
    pub fn new() -> Self {
        Self::with_config(test_config(1))
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        init_tracing();
        let broker = Arc::new(InMemoryBroker::new());
        let queues = Arc::new(QueueService::from_config(broker.clone(), &config));
        let topics = Arc::new(TopicService::from_config(broker.clone(), &config));
        Self {
            broker,
            config,
            queues,
            topics,
        }
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.topics.clone())
    }

    /// Worker sharing this system's services
    pub fn worker(&self, threads: usize) -> QueueWorker {
        let mut settings = self.config.worker.clone();
        settings.threads = threads;
        QueueWorker::new(self.queues.clone(), self.topics.clone(), settings)
    }

    /// Messages currently stored for a queue, visible or not
    pub fn message_count(&self, queue: &Queue) -> usize {
        self.queues
            .queue_url(queue)
            .map(|url| self.broker.message_count(&url))
            .unwrap_or(0)
    }

    /// Messages currently stored in a queue's dead letter queue
    pub fn dead_letter_count(&self, queue: &Queue) -> usize {
        self.message_count(&queue.dead_letter_queue())
    }
}

/// Configuration with short polls so workers stop quickly
#[allow(dead_code)]
pub fn test_config(threads: usize) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.worker.threads = threads;
    config.worker.wait_time_seconds = 1;
    config
}

// ============================================================================
// Handlers
// ============================================================================

/// Key identifying a test message: `order_id` from the payload
#[allow(dead_code)]
pub fn order_id(args: &MessageArgs) -> Option<u64> {
    args.envelope().content.get("order_id")?.as_u64()
}

/// One recorded delivery
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Delivery {
    pub order_id: u64,
    pub group: Option<String>,
    pub receive_count: u32,
    pub parent_request_id: Option<String>,
    pub trace_id: String,
    pub topic: Option<String>,
}

/// Records every delivery and succeeds
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct RecordingHandler {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    /// Deliveries per order id
    pub fn counts_by_order(&self) -> HashMap<u64, usize> {
        let mut counts = HashMap::new();
        for delivery in self.deliveries.lock().unwrap().iter() {
            *counts.entry(delivery.order_id).or_default() += 1;
        }
        counts
    }

    fn record(&self, args: &MessageArgs) {
        let Some(order_id) = order_id(args) else {
            return;
        };
        self.deliveries.lock().unwrap().push(Delivery {
            order_id,
            group: args
                .envelope()
                .content
                .get("group")
                .and_then(|g| g.as_str())
                .map(str::to_string),
            receive_count: args.receive_count(),
            parent_request_id: args.correlation().parent_request_id().map(str::to_string),
            trace_id: args.correlation().trace_id().to_string(),
            topic: args.topic().map(str::to_string),
        });
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    fn can_process(&self, args: &MessageArgs) -> bool {
        order_id(args).is_some()
    }

    async fn process_message(&self, args: &mut MessageArgs) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.record(args);
        Ok(())
    }
}

/// Fails the first `failures` deliveries of each order, then succeeds
#[derive(Clone)]
#[allow(dead_code)]
pub struct FlakyHandler {
    failures: u32,
    attempts: Arc<Mutex<HashMap<u64, u32>>>,
}

#[allow(dead_code)]
impl FlakyHandler {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn attempts(&self, order_id: u64) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&order_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageHandler for FlakyHandler {
    fn can_process(&self, args: &MessageArgs) -> bool {
        order_id(args).is_some()
    }

    async fn process_message(&self, args: &mut MessageArgs) -> anyhow::Result<()> {
        let order_id = order_id(args).unwrap_or_default();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let attempt = attempts.entry(order_id).or_default();
            *attempt += 1;
            *attempt
        };

        if attempt <= self.failures {
            anyhow::bail!("order {} failed on attempt {}", order_id, attempt);
        }
        Ok(())
    }
}

/// Rejects every message as a business failure
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct RejectingHandler {
    calls: Arc<Mutex<u32>>,
}

#[allow(dead_code)]
impl RejectingHandler {
    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl MessageHandler for RejectingHandler {
    fn can_process(&self, _args: &MessageArgs) -> bool {
        true
    }

    async fn process_message(&self, args: &mut MessageArgs) -> anyhow::Result<()> {
        *self.calls.lock().unwrap() += 1;
        args.fail("order rejected");
        Ok(())
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Poll `condition` until it holds, failing the test after `timeout`
#[allow(dead_code)]
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached within {:?}", timeout);
}
