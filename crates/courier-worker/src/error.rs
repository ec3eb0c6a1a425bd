//! Worker lifecycle errors.

use courier_runtime::CourierError;
use thiserror::Error;

/// Errors raised while configuring, starting or stopping a worker
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No queue registered; call register_queue before start")]
    NoQueueRegistered,

    #[error("Worker is running; stop it before changing registrations or starting again")]
    AlreadyRunning,

    #[error("Consumer task {index} did not shut down cleanly: {message}")]
    TaskFailed { index: usize, message: String },

    #[error(transparent)]
    Runtime(#[from] CourierError),
}
