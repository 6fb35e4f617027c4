//! Tests for shared value types

use prometheus_task_dispatch::util::TaskPriority;

#[test]
fn test_priority_ordering() {
    assert!(TaskPriority::High > TaskPriority::Default);
    assert!(TaskPriority::Default > TaskPriority::Low);
    assert_eq!(TaskPriority::default(), TaskPriority::Default);
}

#[test]
fn test_priority_serialization() {
    assert_eq!(serde_json::to_string(&TaskPriority::High).unwrap(), "\"high\"");
    let parsed: TaskPriority = serde_json::from_str("\"low\"").unwrap();
    assert_eq!(parsed, TaskPriority::Low);
}

#[test]
fn test_priority_display() {
    assert_eq!(TaskPriority::Default.to_string(), "default");
}
