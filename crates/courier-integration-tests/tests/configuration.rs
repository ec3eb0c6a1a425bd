//! Integration tests for configuration loading.
//!
//! Tests that file and environment configuration reach the services and
//! workers built from it.

mod common;

use common::{wait_until, RecordingHandler, TestSystem};
use courier_runtime::{Queue, RuntimeConfig, UnmatchedPolicy};
use serde_json::json;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;

const VARIABLES: [&str; 4] = [
    "COURIER__WORKER__THREADS",
    "COURIER__WORKER__WAIT_TIME_SECONDS",
    "COURIER__WORKER__UNMATCHED_POLICY",
    "COURIER__NAMING__PREFIX",
];

/// Removes the test's variables on drop so a failing test cannot leak them
struct EnvGuard;

impl EnvGuard {
    fn set(vars: &[(&str, &str)]) -> Self {
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        EnvGuard
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in VARIABLES {
            std::env::remove_var(key);
        }
    }
}

/// Verify that environment variables configure the worker pool
#[test]
#[serial]
fn test_environment_configures_worker() {
    let _guard = EnvGuard::set(&[
        ("COURIER__WORKER__THREADS", "6"),
        ("COURIER__WORKER__WAIT_TIME_SECONDS", "2"),
        ("COURIER__WORKER__UNMATCHED_POLICY", "delete"),
    ]);

    let config = RuntimeConfig::from_env().unwrap();

    assert_eq!(config.worker.threads, 6);
    assert_eq!(config.worker.wait_time_seconds, 2);
    assert_eq!(config.worker.unmatched_policy, UnmatchedPolicy::Delete);
    assert_eq!(config.aws.region, "us-east-1");
}

/// Verify that environment values override the configuration file
#[test]
#[serial]
fn test_environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "worker:\n  threads: 2\n  wait_time_seconds: 5\nnaming:\n  prefix: file_"
    )
    .unwrap();
    let _guard = EnvGuard::set(&[("COURIER__NAMING__PREFIX", "env_")]);

    let config = RuntimeConfig::load(file.path().to_str()).unwrap();

    assert_eq!(config.worker.threads, 2);
    assert_eq!(config.worker.wait_time_seconds, 5);
    assert_eq!(config.naming.prefix.as_deref(), Some("env_"));
}

/// Verify that invalid environment values stop configuration loading
#[test]
#[serial]
fn test_invalid_environment_rejected() {
    let _guard = EnvGuard::set(&[("COURIER__WORKER__WAIT_TIME_SECONDS", "90")]);

    let result = RuntimeConfig::from_env();

    assert!(result.is_err());
}

/// Verify that the naming prefix is applied to broker queue names
#[tokio::test]
#[serial]
async fn test_prefix_applies_to_created_queues() {
    let mut config = common::test_config(1);
    config.naming.prefix = Some("staging_".to_string());
    let system = TestSystem::with_config(config);

    system
        .queues
        .create_queue(&Queue::new("orders").with_dead_letter_queue())
        .await
        .unwrap();

    assert_eq!(
        system.broker.queue_names(),
        vec!["staging_orders", "staging_orders_dlq"]
    );
}

/// Verify that a worker built from loaded configuration consumes messages
#[tokio::test(start_paused = true)]
#[serial]
async fn test_worker_from_loaded_configuration() {
    let _guard = EnvGuard::set(&[
        ("COURIER__WORKER__THREADS", "2"),
        ("COURIER__WORKER__WAIT_TIME_SECONDS", "1"),
    ]);
    let config = RuntimeConfig::from_env().unwrap();
    let system = TestSystem::with_config(config);
    let queue = Queue::new("orders");
    system.queues.create_queue(&queue).await.unwrap();

    let handler = RecordingHandler::default();
    let mut worker = system.worker(system.config.worker.threads);
    worker.register_queue(queue.clone()).unwrap();
    worker.register_message_handler(handler.clone()).unwrap();
    system
        .queues
        .publish(&json!({"order_id": 8}), &queue, None)
        .await
        .unwrap();

    worker.start().await.unwrap();
    wait_until(Duration::from_secs(60), || handler.count() == 1).await;
    worker.stop().await.unwrap();

    assert_eq!(system.message_count(&queue), 0);
}
