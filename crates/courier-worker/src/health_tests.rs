//! Tests for worker liveness reporting.

use super::*;

/// Verify that only an unhealthy worker fails a liveness probe
#[test]
fn test_liveness_by_state() {
    assert!(WorkerState::Idle.is_live());
    assert!(WorkerState::Healthy.is_live());
    assert!(!WorkerState::Unhealthy.is_live());
}

#[test]
fn test_state_display() {
    assert_eq!(WorkerState::Idle.to_string(), "idle");
    assert_eq!(WorkerState::Healthy.to_string(), "healthy");
    assert_eq!(WorkerState::Unhealthy.to_string(), "unhealthy");
}
