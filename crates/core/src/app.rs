//! Application model and lifecycle state machine
//!
//! An [`Application`] is a declared, installable unit of user code: an
//! interpreted script, a native binary, or a container image. Its `status`
//! is the *declared* lifecycle state and only ever moves along the edges of
//! the state machine encoded in [`AppStatus::allows`]; every other requested
//! transition fails with an invalid-transition error rather than silently
//! succeeding, because callers drive UI state from the response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Namespace marker accepted in front of application ids (`app:<id>`).
pub const APP_ID_NAMESPACE: &str = "app:";

/// Resolve an id alias to its canonical form.
///
/// Callers may refer to an application by its bare id or by the prefixed
/// `app:<id>` variant; both resolve to the same application.
pub fn canonical_app_id(id: &str) -> &str {
    id.strip_prefix(APP_ID_NAMESPACE).unwrap_or(id)
}

/// Validate a caller-supplied application id.
///
/// Ids are stable once created, so the accepted alphabet is restricted to
/// characters that are safe in file names, container names, and URLs.
pub fn validate_app_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Execution strategy for an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    /// Script run by a language runtime inside the container
    InterpretedScript,
    /// Prebuilt binary mounted into the container
    NativeBinary,
    /// Complete container image supplied by the user
    ContainerImage,
}

impl AppKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppKind::InterpretedScript => "interpreted-script",
            AppKind::NativeBinary => "native-binary",
            AppKind::ContainerImage => "container-image",
        }
    }
}

impl FromStr for AppKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "interpreted-script" => Ok(AppKind::InterpretedScript),
            "native-binary" => Ok(AppKind::NativeBinary),
            "container-image" => Ok(AppKind::ContainerImage),
            other => Err(format!("unknown application kind: {}", other)),
        }
    }
}

impl std::fmt::Display for AppKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle operations accepted by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleOp {
    Deploy,
    Start,
    Stop,
    Pause,
    Resume,
    Restart,
    Uninstall,
}

impl LifecycleOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOp::Deploy => "deploy",
            LifecycleOp::Start => "start",
            LifecycleOp::Stop => "stop",
            LifecycleOp::Pause => "pause",
            LifecycleOp::Resume => "resume",
            LifecycleOp::Restart => "restart",
            LifecycleOp::Uninstall => "uninstall",
        }
    }
}

impl std::fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declared lifecycle state of an application.
///
/// `installing`, `starting`, `stopping`, and `uninstalling` are transition
/// windows the controller passes through while driving the orchestrator;
/// `error` is entered on any unrecoverable failure and is only left by an
/// explicit redeploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Installing,
    Installed,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Uninstalling,
    Error,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Installing => "installing",
            AppStatus::Installed => "installed",
            AppStatus::Starting => "starting",
            AppStatus::Running => "running",
            AppStatus::Paused => "paused",
            AppStatus::Stopping => "stopping",
            AppStatus::Stopped => "stopped",
            AppStatus::Uninstalling => "uninstalling",
            AppStatus::Error => "error",
        }
    }

    /// Whether `op` is a valid edge out of this state.
    ///
    /// This is the transition table of the lifecycle state machine; the
    /// controller consults it before doing anything else and rejects every
    /// operation it does not allow. `Deploy` only appears here for the
    /// explicit error-retry path: redeploying over an application in any
    /// other state is a conflict handled at creation time.
    pub fn allows(&self, op: LifecycleOp) -> bool {
        match op {
            LifecycleOp::Deploy => matches!(self, AppStatus::Error),
            LifecycleOp::Start => matches!(self, AppStatus::Installed | AppStatus::Stopped),
            LifecycleOp::Stop => matches!(self, AppStatus::Running | AppStatus::Paused),
            LifecycleOp::Pause => matches!(self, AppStatus::Running),
            LifecycleOp::Resume => matches!(self, AppStatus::Paused),
            LifecycleOp::Restart => matches!(
                self,
                AppStatus::Running | AppStatus::Paused | AppStatus::Stopped | AppStatus::Installed
            ),
            LifecycleOp::Uninstall => !matches!(
                self,
                AppStatus::Starting | AppStatus::Stopping | AppStatus::Uninstalling
            ),
        }
    }

    /// Whether an execution may be live in this state.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            AppStatus::Starting | AppStatus::Running | AppStatus::Paused | AppStatus::Stopping
        )
    }
}

impl FromStr for AppStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "installing" => Ok(AppStatus::Installing),
            "installed" => Ok(AppStatus::Installed),
            "starting" => Ok(AppStatus::Starting),
            "running" => Ok(AppStatus::Running),
            "paused" => Ok(AppStatus::Paused),
            "stopping" => Ok(AppStatus::Stopping),
            "stopped" => Ok(AppStatus::Stopped),
            "uninstalling" => Ok(AppStatus::Uninstalling),
            "error" => Ok(AppStatus::Error),
            other => Err(format!("unknown application status: {}", other)),
        }
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Installation outcome of one declared dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Pending,
    Installed,
    Failed,
}

impl DependencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyStatus::Pending => "pending",
            DependencyStatus::Installed => "installed",
            DependencyStatus::Failed => "failed",
        }
    }
}

impl FromStr for DependencyStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DependencyStatus::Pending),
            "installed" => Ok(DependencyStatus::Installed),
            "failed" => Ok(DependencyStatus::Failed),
            other => Err(format!("unknown dependency status: {}", other)),
        }
    }
}

/// One declared dependency: (ecosystem, name, version constraint), plus its
/// resolution outcome. Installation itself is delegated to the container's
/// package manager and only tracked here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Package ecosystem the dependency belongs to (e.g. `pip`, `npm`)
    pub ecosystem: String,
    /// Package name
    pub name: String,
    /// Version constraint as understood by the ecosystem's installer
    #[serde(default)]
    pub constraint: String,
    /// Install status
    #[serde(default = "Dependency::default_status")]
    pub status: DependencyStatus,
}

impl Dependency {
    fn default_status() -> DependencyStatus {
        DependencyStatus::Pending
    }

    /// Installer-facing requirement string (`name` plus constraint).
    pub fn requirement(&self) -> String {
        if self.constraint.is_empty() {
            self.name.clone()
        } else {
            format!("{}{}", self.name, self.constraint)
        }
    }
}

/// The executable payload of an application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppPayload {
    /// Inline source code (interpreted scripts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    /// Binary path or image reference (native binaries and container images)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Entry point: script file name, binary name, or image command
    #[serde(default)]
    pub entry_point: String,
    /// Arguments passed to the entry point
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables injected into the execution
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// A declared, installable unit of user code
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Stable unique id; immutable once created
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Semantic version string
    pub version: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Execution strategy
    pub kind: AppKind,
    /// Script language (selects the runtime image for interpreted scripts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Executable payload
    pub payload: AppPayload,
    /// Declared dependencies, in declaration order
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Declared external signal paths; opaque to the engine, passed through
    /// to the signal-access collaborator
    #[serde(default)]
    pub signals: Vec<String>,
    /// Declared lifecycle state
    pub status: AppStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Timestamp of the most recent successful start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<DateTime<Utc>>,
    /// Cumulative runtime across all executions, in seconds
    #[serde(default)]
    pub total_runtime_secs: i64,
}

impl Application {
    /// Uptime of the current run, if the application is live.
    pub fn current_uptime_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.status.is_live() {
            self.last_started_at
                .map(|started| (now - started).num_seconds().max(0))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [AppStatus; 9] = [
        AppStatus::Installing,
        AppStatus::Installed,
        AppStatus::Starting,
        AppStatus::Running,
        AppStatus::Paused,
        AppStatus::Stopping,
        AppStatus::Stopped,
        AppStatus::Uninstalling,
        AppStatus::Error,
    ];

    #[test]
    fn test_canonical_app_id_strips_namespace() {
        assert_eq!(canonical_app_id("speed-display"), "speed-display");
        assert_eq!(canonical_app_id("app:speed-display"), "speed-display");
        // Only the namespace marker is stripped, nothing else.
        assert_eq!(canonical_app_id("apple"), "apple");
    }

    #[test]
    fn test_validate_app_id() {
        assert!(validate_app_id("speed-display"));
        assert!(validate_app_id("my_app.v2"));
        assert!(!validate_app_id(""));
        assert!(!validate_app_id("has space"));
        assert!(!validate_app_id("slash/y"));
    }

    #[test]
    fn test_start_requires_installed_or_stopped() {
        for status in ALL_STATUSES {
            let expected = matches!(status, AppStatus::Installed | AppStatus::Stopped);
            assert_eq!(status.allows(LifecycleOp::Start), expected, "{}", status);
        }
    }

    #[test]
    fn test_stop_requires_running_or_paused() {
        for status in ALL_STATUSES {
            let expected = matches!(status, AppStatus::Running | AppStatus::Paused);
            assert_eq!(status.allows(LifecycleOp::Stop), expected, "{}", status);
        }
    }

    #[test]
    fn test_pause_resume_are_strict() {
        for status in ALL_STATUSES {
            assert_eq!(
                status.allows(LifecycleOp::Pause),
                matches!(status, AppStatus::Running),
                "{}",
                status
            );
            assert_eq!(
                status.allows(LifecycleOp::Resume),
                matches!(status, AppStatus::Paused),
                "{}",
                status
            );
        }
        // In particular, pausing a paused app is rejected, not a no-op.
        assert!(!AppStatus::Paused.allows(LifecycleOp::Pause));
        assert!(!AppStatus::Running.allows(LifecycleOp::Resume));
    }

    #[test]
    fn test_uninstall_excluded_during_transitions() {
        assert!(!AppStatus::Starting.allows(LifecycleOp::Uninstall));
        assert!(!AppStatus::Stopping.allows(LifecycleOp::Uninstall));
        assert!(!AppStatus::Uninstalling.allows(LifecycleOp::Uninstall));
        assert!(AppStatus::Running.allows(LifecycleOp::Uninstall));
        assert!(AppStatus::Error.allows(LifecycleOp::Uninstall));
        assert!(AppStatus::Installed.allows(LifecycleOp::Uninstall));
    }

    #[test]
    fn test_redeploy_only_from_error() {
        for status in ALL_STATUSES {
            assert_eq!(
                status.allows(LifecycleOp::Deploy),
                matches!(status, AppStatus::Error),
                "{}",
                status
            );
        }
    }

    #[test]
    fn test_restart_domain() {
        for status in ALL_STATUSES {
            let expected = matches!(
                status,
                AppStatus::Running | AppStatus::Paused | AppStatus::Stopped | AppStatus::Installed
            );
            assert_eq!(status.allows(LifecycleOp::Restart), expected, "{}", status);
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in ALL_STATUSES {
            assert_eq!(status.as_str().parse::<AppStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<AppStatus>().is_err());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            AppKind::InterpretedScript,
            AppKind::NativeBinary,
            AppKind::ContainerImage,
        ] {
            assert_eq!(kind.as_str().parse::<AppKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_dependency_requirement() {
        let dep = Dependency {
            ecosystem: "pip".to_string(),
            name: "numpy".to_string(),
            constraint: ">=1.26".to_string(),
            status: DependencyStatus::Pending,
        };
        assert_eq!(dep.requirement(), "numpy>=1.26");

        let unconstrained = Dependency {
            ecosystem: "pip".to_string(),
            name: "requests".to_string(),
            constraint: String::new(),
            status: DependencyStatus::Pending,
        };
        assert_eq!(unconstrained.requirement(), "requests");
    }

    #[test]
    fn test_uptime_only_while_live() {
        let now = Utc::now();
        let mut app = Application {
            id: "a".to_string(),
            name: "a".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            kind: AppKind::InterpretedScript,
            language: Some("python".to_string()),
            payload: AppPayload::default(),
            dependencies: vec![],
            signals: vec![],
            status: AppStatus::Running,
            created_at: now,
            updated_at: now,
            last_started_at: Some(now - chrono::Duration::seconds(42)),
            total_runtime_secs: 0,
        };
        assert_eq!(app.current_uptime_secs(now), Some(42));

        app.status = AppStatus::Stopped;
        assert_eq!(app.current_uptime_secs(now), None);
    }
}
