//! Worker liveness reporting.

use std::fmt;

/// Liveness of a queue worker, for external probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started, or stopped
    Idle,

    /// Running, with every consumer task alive
    Healthy,

    /// Running, but at least one consumer task has exited
    Unhealthy,
}

impl WorkerState {
    /// Whether a liveness probe should pass
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
