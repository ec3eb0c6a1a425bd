//! # Message Pipeline
//!
//! One consume-loop iteration: receive a message, run middleware, dispatch to
//! handlers, classify the outcome and settle the message with the broker.
//!
//! | Outcome     | Settlement                                                  |
//! |-------------|-------------------------------------------------------------|
//! | `Completed` | delete                                                      |
//! | `Aborted`   | retry: extend visibility, or dead-letter once exhausted     |
//! | `Errored`   | retry: extend visibility, or dead-letter once exhausted     |
//! | `Failed`    | dead-letter, then delete                                    |
//!
//! Middleware that aborts or fails a message skips dispatch; the message is
//! `Aborted` or `Errored` respectively and follows the retry path. Only a
//! handler calling [`MessageArgs::fail`] produces `Failed`.
//! | `Unmatched` | per [`UnmatchedPolicy`]                                     |
//!
//! Dead-lettering on a queue without a dead letter queue drops the message
//! with a warning.

use crate::handler::{MessageArgs, MessageHandler};
use crate::registry::HandlerRegistry;
use courier_runtime::{
    CorrelationContext, CourierError, Queue, QueueService, Receipt, ReceivedMessage,
    UnmatchedPolicy,
};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

// ============================================================================
// Outcomes
// ============================================================================

/// Classification of one processed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Every matching handler succeeded
    Completed,

    /// No handler accepted the message
    Unmatched,

    /// Aborted by middleware or a handler
    Aborted,

    /// Rejected by a handler
    Failed,

    /// A handler returned an error or panicked, or middleware failed the message
    Errored,
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Unmatched => write!(f, "unmatched"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed => write!(f, "failed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Message processing for one queue, shared by every consume loop
pub struct Pipeline {
    queues: Arc<QueueService>,
    registry: Arc<HandlerRegistry>,
    queue: Queue,
    unmatched_policy: UnmatchedPolicy,
}

impl Pipeline {
    pub fn new(
        queues: Arc<QueueService>,
        registry: Arc<HandlerRegistry>,
        queue: Queue,
        unmatched_policy: UnmatchedPolicy,
    ) -> Self {
        Self {
            queues,
            registry,
            queue,
            unmatched_policy,
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Receive and process at most one message.
    ///
    /// Returns `None` on an empty poll. Broker and middleware errors are
    /// returned to the consume loop; the message involved is left for
    /// redelivery.
    pub async fn run_once(&self, wait_time_seconds: u32) -> anyhow::Result<Option<MessageOutcome>> {
        let mut correlation = CorrelationContext::new();

        let Some(message) = self
            .queues
            .receive_message(&self.queue, wait_time_seconds)
            .await?
        else {
            return Ok(None);
        };

        let (envelope, receipt) = message.into_parts();
        correlation.inherit(&envelope.correlation);

        let span = info_span!(
            "message",
            queue = %self.queue.name,
            message_id = %receipt.message_id(),
            receive_count = receipt.receive_count(),
            request_id = %correlation.request_id(),
            parent_request_id = correlation.parent_request_id(),
            session_id = correlation.session_id(),
            trace_id = %correlation.trace_id(),
            origin_span = correlation.origin_span(),
        );

        let mut args = MessageArgs::new(
            self.queue.name.clone(),
            receipt.message_id(),
            receipt.receive_count(),
            envelope,
            correlation,
        )
        .with_raw_body(receipt.body());

        async move {
            self.run_middleware(&mut args).await?;
            let outcome = self.process_message(&mut args).await;
            self.finalize_message(outcome, args, receipt).await?;
            Ok(Some(outcome))
        }
        .instrument(span)
        .await
    }

    async fn run_middleware(&self, args: &mut MessageArgs) -> anyhow::Result<()> {
        for middleware in self.registry.middleware() {
            middleware.invoke(args).await.map_err(|e| {
                e.context(format!("middleware {} failed", middleware.name()))
            })?;
        }
        Ok(())
    }

    /// Dispatch to matching handlers and classify the result.
    ///
    /// Handler errors and panics are reported to every error handler and
    /// never escape.
    pub async fn process_message(&self, args: &mut MessageArgs) -> MessageOutcome {
        // Flags set by middleware skip dispatch and take the retry path
        if args.is_failed() {
            warn!(
                reason = args.failure_reason(),
                "Message failed before dispatch; scheduling retry"
            );
            return MessageOutcome::Errored;
        }
        if args.is_aborted() {
            debug!(reason = args.abort_reason(), "Message aborted before dispatch");
            return MessageOutcome::Aborted;
        }

        let handlers = match self.select_handlers(args) {
            Ok(handlers) => handlers,
            Err(error) => {
                self.report_error(args, error).await;
                return MessageOutcome::Errored;
            }
        };

        if handlers.is_empty() {
            warn!(
                queue = %self.queue.name,
                message_id = %args.message_id(),
                "No handler can process message"
            );
            return MessageOutcome::Unmatched;
        }

        for handler in handlers {
            let span = info_span!("handler", handler = handler.name());
            let result = AssertUnwindSafe(handler.process_message(args))
                .catch_unwind()
                .instrument(span)
                .await;

            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error.context(format!("handler {} failed", handler.name())),
                Err(panic) => anyhow::anyhow!(
                    "handler {} panicked: {}",
                    handler.name(),
                    panic_message(panic.as_ref())
                ),
            };

            self.report_error(args, error).await;
            return MessageOutcome::Errored;
        }

        if args.is_failed() {
            MessageOutcome::Failed
        } else if args.is_aborted() {
            MessageOutcome::Aborted
        } else {
            MessageOutcome::Completed
        }
    }

    fn select_handlers(&self, args: &MessageArgs) -> anyhow::Result<Vec<Arc<dyn MessageHandler>>> {
        std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.registry
                .handlers()
                .iter()
                .filter(|handler| handler.can_process(args))
                .cloned()
                .collect()
        }))
        .map_err(|panic| {
            anyhow::anyhow!(
                "handler selection panicked: {}",
                panic_message(panic.as_ref())
            )
        })
    }

    async fn report_error(&self, args: &MessageArgs, error: anyhow::Error) {
        error!(
            queue = %self.queue.name,
            message_id = %args.message_id(),
            error = %format!("{:#}", error),
            "Message processing failed"
        );

        let error = &error;
        let notifications = self.registry.error_handlers().iter().map(|handler| {
            AssertUnwindSafe(handler.on_error(args, error)).catch_unwind()
        });

        for result in join_all(notifications).await {
            if let Err(panic) = result {
                error!(
                    panic = %panic_message(panic.as_ref()),
                    "Error handler panicked"
                );
            }
        }
    }

    /// Settle a processed message with the broker, consuming its receipt
    pub async fn finalize_message(
        &self,
        outcome: MessageOutcome,
        args: MessageArgs,
        receipt: Receipt,
    ) -> Result<(), CourierError> {
        match outcome {
            MessageOutcome::Completed => self.queues.delete_message(&self.queue, receipt).await,
            MessageOutcome::Aborted | MessageOutcome::Errored => {
                self.retry_or_dead_letter(outcome, args, receipt).await
            }
            MessageOutcome::Failed => {
                let reason = args.failure_reason().unwrap_or("rejected").to_string();
                self.dead_letter(args, receipt, &reason).await
            }
            MessageOutcome::Unmatched => match self.unmatched_policy {
                UnmatchedPolicy::Retain => {
                    debug!(
                        message_id = %receipt.message_id(),
                        "Unmatched message left for redelivery"
                    );
                    Ok(())
                }
                UnmatchedPolicy::Delete => {
                    warn!(
                        message_id = %receipt.message_id(),
                        "Dropping unmatched message"
                    );
                    self.queues.delete_message(&self.queue, receipt).await
                }
                UnmatchedPolicy::DeadLetter => {
                    self.dead_letter(args, receipt, "no handler can process message")
                        .await
                }
            },
        }
    }

    async fn retry_or_dead_letter(
        &self,
        outcome: MessageOutcome,
        args: MessageArgs,
        receipt: Receipt,
    ) -> Result<(), CourierError> {
        let policy = self.queue.retry_policy;
        let attempts = receipt.retry_attempts();

        if policy.is_exhausted(attempts) {
            let reason = format!("{} after {} retries", outcome, attempts);
            return self.dead_letter(args, receipt, &reason).await;
        }

        let delay = policy.delay_for(attempts);
        info!(
            message_id = %receipt.message_id(),
            outcome = %outcome,
            retry_attempts = attempts,
            max_retries = policy.max_retries,
            delay_seconds = delay.as_secs(),
            "Scheduling message retry"
        );

        let timeout_seconds = u32::try_from(delay.as_secs()).unwrap_or(u32::MAX);
        self.queues
            .change_visibility(&self.queue, receipt, timeout_seconds)
            .await
    }

    async fn dead_letter(
        &self,
        args: MessageArgs,
        receipt: Receipt,
        reason: &str,
    ) -> Result<(), CourierError> {
        if !self.queue.enable_dlq {
            warn!(
                message_id = %receipt.message_id(),
                reason = %reason,
                "Queue has no dead letter queue; dropping message"
            );
            return self.queues.delete_message(&self.queue, receipt).await;
        }

        let message = ReceivedMessage::new(args.into_envelope(), receipt);
        self.queues.send_to_dlq(&message, &self.queue).await?;

        let (_, receipt) = message.into_parts();
        warn!(
            message_id = %receipt.message_id(),
            reason = %reason,
            "Message dead-lettered"
        );
        self.queues.delete_message(&self.queue, receipt).await
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
