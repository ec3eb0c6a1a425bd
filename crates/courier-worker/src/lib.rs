//! # Courier Worker
//!
//! Concurrent queue consumer built on `courier-runtime`.
//!
//! A [`QueueWorker`] runs a fixed pool of consume loops against one queue.
//! Each received message goes through the registered [`Middleware`], then to
//! every [`MessageHandler`] that accepts it. The outcome decides whether the
//! message is deleted, retried with a longer visibility timeout, or moved to
//! the dead letter queue.
//!
//! ## Module Organization
//!
//! - [`handler`] - Extension traits and per-message arguments
//! - [`registry`] - Handler and middleware registration
//! - [`pipeline`] - Outcome determination and message settlement
//! - [`worker`] - Worker lifecycle and consume loops
//! - [`health`] - Liveness state

pub mod error;
pub mod handler;
pub mod health;
pub mod pipeline;
pub mod registry;
pub mod worker;

pub use error::WorkerError;
pub use handler::{ErrorHandler, MessageArgs, MessageHandler, Middleware};
pub use health::WorkerState;
pub use pipeline::{MessageOutcome, Pipeline};
pub use registry::HandlerRegistry;
pub use worker::QueueWorker;
