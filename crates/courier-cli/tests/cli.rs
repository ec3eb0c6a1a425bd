//! Binary-level tests for the courier command.

use assert_cmd::Command;
use predicates::prelude::*;

fn courier() -> Command {
    let mut cmd = Command::cargo_bin("courier").unwrap();
    cmd.env_remove("COURIER_CONFIG").env_remove("COURIER_PROVIDER");
    cmd
}

#[test]
fn test_help_lists_commands() {
    courier()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create-queue"))
        .stdout(predicate::str::contains("consume"));
}

#[test]
fn test_memory_create_queue_prints_url() {
    courier()
        .args(["--provider", "memory", "create-queue", "orders"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/orders"));
}

#[test]
fn test_invalid_payload_exit_code() {
    courier()
        .args(["--provider", "memory", "publish", "order-events", "{not json"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Invalid argument"));
}

#[test]
fn test_invalid_configuration_exit_code() {
    courier()
        .env("COURIER__WORKER__THREADS", "0")
        .args(["--provider", "memory", "create-topic", "order-events"])
        .assert()
        .code(1);
}
