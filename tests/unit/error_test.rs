//! Tests for error types

use prometheus_task_dispatch::core::DispatchError;

#[test]
fn test_invalid_argument_error() {
    let err = DispatchError::invalid("iterations must be positive");
    assert_eq!(
        format!("{}", err),
        "invalid argument: iterations must be positive"
    );
}

#[test]
fn test_shutdown_error() {
    let err = DispatchError::Shutdown;
    assert_eq!(format!("{}", err), "dispatcher has been shut down");
}

#[test]
fn test_notifications_full_error() {
    let err = DispatchError::NotificationsFull(1000);
    assert_eq!(
        format!("{}", err),
        "group notification queue is full (max 1000)"
    );
}

#[test]
fn test_deadlock_error_names_dispatcher() {
    let err = DispatchError::Deadlock("io".to_string());
    assert!(format!("{}", err).contains("`io`"));
}

#[test]
fn test_unavailable_classification() {
    assert!(DispatchError::ExecutorUnavailable.is_unavailable());
    assert!(DispatchError::EventLoopUnavailable.is_unavailable());
    assert!(DispatchError::Shutdown.is_unavailable());
    assert!(DispatchError::QueueFull.is_unavailable());
    assert!(!DispatchError::Timeout.is_unavailable());
    assert!(!DispatchError::Revoked.is_unavailable());
}

#[test]
fn test_error_into_anyhow() {
    fn fails() -> anyhow::Result<()> {
        Err(DispatchError::Timeout.into())
    }
    let err = fails().unwrap_err();
    assert_eq!(err.to_string(), "operation timed out");
    assert_eq!(
        err.downcast_ref::<DispatchError>(),
        Some(&DispatchError::Timeout)
    );
}
