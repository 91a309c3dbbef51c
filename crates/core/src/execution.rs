//! Execution runtime state
//!
//! An [`Execution`] is one live (or most-recently-live) run attempt of an
//! application. Execution ids are unique per attempt and never reused across
//! restarts; the live state mirrors, but may transiently disagree with, the
//! owning application's declared status during transition windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Live state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Running,
    Paused,
    Stopped,
    Error,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Running => "running",
            ExecutionState::Paused => "paused",
            ExecutionState::Stopped => "stopped",
            ExecutionState::Error => "error",
        }
    }

    /// Terminal states cannot transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Stopped | ExecutionState::Error)
    }
}

impl FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionState::Running),
            "paused" => Ok(ExecutionState::Paused),
            "stopped" => Ok(ExecutionState::Stopped),
            "error" => Ok(ExecutionState::Error),
            other => Err(format!("unknown execution state: {}", other)),
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exit outcome of a terminated execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitInfo {
    /// Process exit code, if one was observed
    pub code: Option<i32>,
    /// Whether termination escalated to a forceful kill
    #[serde(default)]
    pub forced: bool,
    /// Human-readable termination reason
    #[serde(default)]
    pub reason: String,
}

impl ExitInfo {
    /// Whether the execution ended cleanly.
    pub fn is_success(&self) -> bool {
        self.code == Some(0) && !self.forced
    }
}

/// Last-observed resource usage of a live execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// CPU usage as a percentage of one core
    pub cpu_percent: f64,
    /// Resident memory in bytes
    pub memory_bytes: u64,
}

/// One run attempt of an application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    /// Unique id for this attempt
    pub id: String,
    /// Owning application id
    pub app_id: String,
    /// Opaque container reference returned by the orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// Container process id, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    /// Live state
    pub state: ExecutionState,
    /// Last observed resource usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceUsage>,
    /// Last successful health poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Exit outcome, populated only on termination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitInfo>,
    /// When the attempt started
    pub started_at: DateTime<Utc>,
    /// When the attempt terminated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Create a new running execution for an application.
    pub fn new(app_id: &str) -> Self {
        Self {
            id: allocate_execution_id(app_id),
            app_id: app_id.to_string(),
            container_id: None,
            pid: None,
            state: ExecutionState::Running,
            resources: None,
            last_heartbeat: None,
            exit: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Allocate a fresh execution id.
///
/// Ids embed the owning application id, a millisecond timestamp, and a
/// random suffix so attempts stay unique across controller restarts.
pub fn allocate_execution_id(app_id: &str) -> String {
    format!(
        "{}-{}-{:06x}",
        app_id,
        Utc::now().timestamp_millis(),
        fastrand::u32(..) & 0xff_ffff
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_ids_are_unique_per_attempt() {
        let a = allocate_execution_id("demo");
        let b = allocate_execution_id("demo");
        assert_ne!(a, b);
        assert!(a.starts_with("demo-"));
    }

    #[test]
    fn test_exit_info_success() {
        assert!(ExitInfo {
            code: Some(0),
            forced: false,
            reason: String::new()
        }
        .is_success());
        assert!(!ExitInfo {
            code: Some(1),
            forced: false,
            reason: String::new()
        }
        .is_success());
        assert!(!ExitInfo {
            code: Some(0),
            forced: true,
            reason: "grace timeout".to_string()
        }
        .is_success());
    }

    #[test]
    fn test_state_round_trip_and_terminal() {
        for state in [
            ExecutionState::Running,
            ExecutionState::Paused,
            ExecutionState::Stopped,
            ExecutionState::Error,
        ] {
            assert_eq!(state.as_str().parse::<ExecutionState>().unwrap(), state);
        }
        assert!(ExecutionState::Stopped.is_terminal());
        assert!(ExecutionState::Error.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
        assert!(!ExecutionState::Paused.is_terminal());
    }
}
