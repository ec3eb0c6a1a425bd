//! Registration of queues, topics, middleware and handlers.

use crate::handler::{ErrorHandler, MessageHandler, Middleware};
use courier_runtime::{Queue, Topic};
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Everything a worker dispatches to.
///
/// Built up before the worker starts, then frozen behind an `Arc` and only
/// read by the consume loops. Registering a second instance of the same
/// concrete type is a no-op.
#[derive(Default)]
pub struct HandlerRegistry {
    queue: Option<Queue>,
    topics: Vec<Topic>,
    middleware: Vec<Arc<dyn Middleware>>,
    handlers: Vec<Arc<dyn MessageHandler>>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
    middleware_types: HashSet<TypeId>,
    handler_types: HashSet<TypeId>,
    error_handler_types: HashSet<TypeId>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue to consume; a later registration replaces it
    pub fn register_queue(&mut self, queue: Queue) {
        if let Some(previous) = &self.queue {
            debug!(previous = %previous.name, queue = %queue.name, "Replacing registered queue");
        }
        self.queue = Some(queue);
    }

    /// Add a topic to subscribe the queue to; returns `false` if already present
    pub fn register_topic(&mut self, topic: Topic) -> bool {
        if self.topics.contains(&topic) {
            return false;
        }
        self.topics.push(topic);
        true
    }

    /// Append middleware; returns `false` if its type is already registered
    pub fn register_middleware<M: Middleware>(&mut self, middleware: M) -> bool {
        if !self.middleware_types.insert(TypeId::of::<M>()) {
            debug!(middleware = std::any::type_name::<M>(), "Middleware already registered");
            return false;
        }
        self.middleware.push(Arc::new(middleware));
        true
    }

    /// Append a handler; returns `false` if its type is already registered
    pub fn register_message_handler<H: MessageHandler>(&mut self, handler: H) -> bool {
        if !self.handler_types.insert(TypeId::of::<H>()) {
            debug!(handler = std::any::type_name::<H>(), "Message handler already registered");
            return false;
        }
        self.handlers.push(Arc::new(handler));
        true
    }

    /// Append an error handler; returns `false` if its type is already registered
    pub fn register_error_handler<E: ErrorHandler>(&mut self, handler: E) -> bool {
        if !self.error_handler_types.insert(TypeId::of::<E>()) {
            debug!(handler = std::any::type_name::<E>(), "Error handler already registered");
            return false;
        }
        self.error_handlers.push(Arc::new(handler));
        true
    }

    pub fn queue(&self) -> Option<&Queue> {
        self.queue.as_ref()
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    pub fn handlers(&self) -> &[Arc<dyn MessageHandler>] {
        &self.handlers
    }

    pub fn error_handlers(&self) -> &[Arc<dyn ErrorHandler>] {
        &self.error_handlers
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
