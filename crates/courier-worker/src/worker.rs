//! # Queue Worker
//!
//! Owns a fixed pool of consume loops against one queue.
//!
//! ```text
//! Idle --start--> Running (N consume loops) --stop--> Idle
//! ```
//!
//! Registrations are collected while idle and frozen behind an `Arc` when the
//! worker starts. Every loop polls the same queue; the broker arbitrates which
//! loop gets which message.

use crate::error::WorkerError;
use crate::handler::{ErrorHandler, MessageHandler, Middleware};
use crate::health::WorkerState;
use crate::pipeline::{panic_message, Pipeline};
use crate::registry::HandlerRegistry;
use courier_runtime::{
    Broker, Queue, QueueService, RuntimeConfig, Subscriber, Topic, TopicService, WorkerSettings,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Pause after an iteration fails before polling again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Concurrent consumer for one queue
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use courier_runtime::providers::InMemoryBroker;
/// use courier_runtime::{Queue, RuntimeConfig};
/// use courier_worker::{MessageArgs, MessageHandler, QueueWorker, WorkerState};
/// use std::sync::Arc;
///
/// struct LogHandler;
///
/// #[async_trait]
/// impl MessageHandler for LogHandler {
///     fn can_process(&self, _args: &MessageArgs) -> bool {
///         true
///     }
///
///     async fn process_message(&self, args: &mut MessageArgs) -> anyhow::Result<()> {
///         tracing::info!(content = %args.envelope().content, "Received");
///         Ok(())
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let mut config = RuntimeConfig::default();
/// config.worker.wait_time_seconds = 0;
///
/// let mut worker = QueueWorker::from_config(Arc::new(InMemoryBroker::new()), &config);
/// worker.register_queue(Queue::new("orders")).unwrap();
/// worker.register_message_handler(LogHandler).unwrap();
///
/// worker.start().await.unwrap();
/// assert_eq!(worker.current_state(), WorkerState::Healthy);
///
/// worker.stop().await.unwrap();
/// assert_eq!(worker.current_state(), WorkerState::Idle);
/// # });
/// ```
pub struct QueueWorker {
    queues: Arc<QueueService>,
    subscriber: Subscriber,
    settings: WorkerSettings,
    registry: Arc<HandlerRegistry>,
    active: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl QueueWorker {
    pub fn new(
        queues: Arc<QueueService>,
        topics: Arc<TopicService>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            subscriber: Subscriber::new(queues.clone(), topics),
            queues,
            settings,
            registry: Arc::new(HandlerRegistry::new()),
            active: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    /// Create worker with services built from runtime configuration
    pub fn from_config(broker: Arc<dyn Broker>, config: &RuntimeConfig) -> Self {
        let queues = Arc::new(QueueService::from_config(broker.clone(), config));
        let topics = Arc::new(TopicService::from_config(broker, config));
        Self::new(queues, topics, config.worker.clone())
    }

    /// Queue service shared with the consume loops
    pub fn queue_service(&self) -> &Arc<QueueService> {
        &self.queues
    }

    // ========================================================================
    // Registration
    // ========================================================================

    fn registry_mut(&mut self) -> Result<&mut HandlerRegistry, WorkerError> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }
        Arc::get_mut(&mut self.registry).ok_or(WorkerError::AlreadyRunning)
    }

    /// Set the queue this worker consumes
    pub fn register_queue(&mut self, queue: Queue) -> Result<(), WorkerError> {
        self.registry_mut()?.register_queue(queue);
        Ok(())
    }

    /// Subscribe the queue to `topic` when the worker starts
    pub fn register_topic(&mut self, topic: Topic) -> Result<bool, WorkerError> {
        Ok(self.registry_mut()?.register_topic(topic))
    }

    pub fn register_middleware<M: Middleware>(&mut self, middleware: M) -> Result<bool, WorkerError> {
        Ok(self.registry_mut()?.register_middleware(middleware))
    }

    pub fn register_message_handler<H: MessageHandler>(
        &mut self,
        handler: H,
    ) -> Result<bool, WorkerError> {
        Ok(self.registry_mut()?.register_message_handler(handler))
    }

    pub fn register_error_handler<E: ErrorHandler>(
        &mut self,
        handler: E,
    ) -> Result<bool, WorkerError> {
        Ok(self.registry_mut()?.register_error_handler(handler))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Create the queue, subscribe it to every registered topic and launch
    /// the consume loops.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::AlreadyRunning`] if started twice
    /// - [`WorkerError::NoQueueRegistered`] without a registered queue
    /// - [`WorkerError::Runtime`] if queue creation or a subscription fails
    pub async fn start(&mut self) -> Result<(), WorkerError> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }

        let queue = self
            .registry
            .queue()
            .cloned()
            .ok_or(WorkerError::NoQueueRegistered)?;

        self.queues.create_queue(&queue).await?;
        for topic in self.registry.topics() {
            self.subscriber.subscribe(&queue, topic).await?;
        }

        let threads = self.settings.threads.max(1);
        let wait_time_seconds = self.settings.wait_time_seconds;
        let pipeline = Arc::new(Pipeline::new(
            self.queues.clone(),
            self.registry.clone(),
            queue,
            self.settings.unmatched_policy,
        ));

        self.active.store(true, Ordering::SeqCst);
        for index in 0..threads {
            self.tasks.push(tokio::spawn(consume_loop(
                index,
                pipeline.clone(),
                self.active.clone(),
                wait_time_seconds,
            )));
        }

        info!(
            queue = %pipeline.queue().name,
            threads = threads,
            wait_time_seconds = wait_time_seconds,
            unmatched_policy = %self.settings.unmatched_policy,
            "Queue worker started"
        );
        Ok(())
    }

    /// Signal every consume loop to finish and wait for all of them.
    ///
    /// Loops finish their current iteration first, so this can take up to
    /// one long-poll wait plus the processing time of in-flight messages.
    pub async fn stop(&mut self) -> Result<(), WorkerError> {
        self.active.store(false, Ordering::SeqCst);

        let mut failure = None;
        for (index, task) in self.tasks.drain(..).enumerate() {
            if let Err(e) = task.await {
                error!(consumer = index, error = %e, "Consumer task ended abnormally");
                failure.get_or_insert(WorkerError::TaskFailed {
                    index,
                    message: e.to_string(),
                });
            }
        }

        info!("Queue worker stopped");
        failure.map_or(Ok(()), Err)
    }

    /// Liveness of the worker
    pub fn current_state(&self) -> WorkerState {
        if !self.is_running() {
            WorkerState::Idle
        } else if !self.tasks.is_empty() && self.tasks.iter().all(|t| !t.is_finished()) {
            WorkerState::Healthy
        } else {
            WorkerState::Unhealthy
        }
    }

    #[cfg(test)]
    fn abort_consumer(&self, index: usize) {
        if let Some(task) = self.tasks.get(index) {
            task.abort();
        }
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

async fn consume_loop(
    index: usize,
    pipeline: Arc<Pipeline>,
    active: Arc<AtomicBool>,
    wait_time_seconds: u32,
) {
    debug!(queue = %pipeline.queue().name, consumer = index, "Consumer started");

    while active.load(Ordering::SeqCst) {
        let iteration = AssertUnwindSafe(pipeline.run_once(wait_time_seconds))
            .catch_unwind()
            .await;

        match iteration {
            Ok(Ok(Some(_))) => {}
            Ok(Ok(None)) => tokio::task::yield_now().await,
            Ok(Err(e)) => {
                error!(
                    queue = %pipeline.queue().name,
                    consumer = index,
                    error = %format!("{:#}", e),
                    "Unhandled error in message iteration"
                );
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
            Err(panic) => {
                error!(
                    queue = %pipeline.queue().name,
                    consumer = index,
                    panic = %panic_message(panic.as_ref()),
                    "Message iteration panicked"
                );
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }

    debug!(queue = %pipeline.queue().name, consumer = index, "Consumer stopped");
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
