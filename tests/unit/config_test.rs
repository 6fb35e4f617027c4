//! Tests for configuration validation

use prometheus_task_dispatch::config::WorkerPoolConfig;
use std::time::Duration;

#[test]
fn test_pool_config_validation() {
    let valid = WorkerPoolConfig::new()
        .with_worker_count(4)
        .with_max_queue_depth(64);
    assert!(valid.validate().is_ok());
    assert_eq!(valid.shutdown_timeout(), Duration::from_millis(2_000));
}

#[test]
fn test_pool_config_invalid_worker_count() {
    let invalid = WorkerPoolConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_queue_depth() {
    let invalid = WorkerPoolConfig::new().with_max_queue_depth(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_stack_size() {
    let invalid = WorkerPoolConfig::new().with_thread_stack_size(1024);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_from_json_partial() {
    let cfg = WorkerPoolConfig::from_json_str(r#"{"worker_count": 3, "thread_name_prefix": "io"}"#)
        .unwrap();
    assert_eq!(cfg.worker_count, 3);
    assert_eq!(cfg.thread_name_prefix, "io");
    assert_eq!(cfg.max_queue_depth, WorkerPoolConfig::default().max_queue_depth);
}

#[test]
fn test_pool_config_from_json_rejects_invalid() {
    let err = WorkerPoolConfig::from_json_str(r#"{"worker_count": 0}"#).unwrap_err();
    assert!(err.contains("worker_count"));

    let err = WorkerPoolConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_pool_config_serde_roundtrip() {
    let cfg = WorkerPoolConfig::new().with_worker_count(2);
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(WorkerPoolConfig::from_json_str(&json).unwrap(), cfg);
}
