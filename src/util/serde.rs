//! Serializable value types shared across dispatchers, pools and telemetry.

use serde::{Deserialize, Serialize};

/// Monotonic task sequence number. Used for tracing, never for scheduling order.
pub type TaskId = u64;

/// Scheduling priority of a task or dispatcher.
///
/// Ordering follows urgency: `High > Default > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Background work.
    Low,
    /// Regular work.
    #[default]
    Default,
    /// Latency-sensitive work.
    High,
}

impl TaskPriority {
    /// Every priority level, highest first.
    pub const ALL: [Self; 3] = [Self::High, Self::Default, Self::Low];

    /// Slot index used by per-priority caches (`High = 0`).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Default => 1,
            Self::Low => 2,
        }
    }

    /// Lower-case label used in generated names and log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Default => "default",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::High > TaskPriority::Default);
        assert!(TaskPriority::Default > TaskPriority::Low);
        assert_eq!(TaskPriority::default(), TaskPriority::Default);
    }

    #[test]
    fn test_priority_index_is_unique() {
        let mut seen = [false; 3];
        for p in TaskPriority::ALL {
            assert!(!seen[p.index()]);
            seen[p.index()] = true;
        }
    }

    #[test]
    fn test_priority_serde() {
        let json = serde_json::to_string(&TaskPriority::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: TaskPriority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(back, TaskPriority::Low);
    }
}
