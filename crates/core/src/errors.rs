//! Error types and handling
//!
//! The error taxonomy follows the engine's component boundaries: lifecycle
//! validation, container orchestration, the durable registry, and the console
//! subsystem each get their own error enum, all wrapped in [`EngineError`] for
//! unified handling. Validation errors never mutate state; orchestrator errors
//! carry enough context (raw installer output, underlying reason) for callers
//! to act without consulting server logs.

use thiserror::Error;

/// Lifecycle validation errors: bad requests, unknown ids, and transitions
/// that are not edges of the state machine. These are reported immediately
/// and never retried.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The requested transition is not valid from the application's current state
    #[error("invalid transition: cannot {operation} application '{app_id}' while {current}")]
    InvalidTransition {
        app_id: String,
        operation: String,
        current: String,
    },

    /// No application with the given id exists
    #[error("unknown application: {app_id}")]
    UnknownApplication { app_id: String },

    /// An application with the given id already exists and is not retryable
    #[error("application '{app_id}' already exists (status {status}); only applications in 'error' may be redeployed")]
    AlreadyExists { app_id: String, status: String },

    /// No live execution exists for the application
    #[error("application '{app_id}' has no live execution")]
    NoLiveExecution { app_id: String },

    /// Request shape was invalid
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Container orchestrator errors.
///
/// `PreparationFailed` carries the raw installer/build output so a failed
/// dependency install can be inspected by the caller; the application is left
/// in `error`, not silently reverted.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Environment materialization failed (image pull, payload copy, dependency install)
    #[error("preparation failed: {reason}")]
    PreparationFailed { reason: String, output: String },

    /// Container failed to start
    #[error("start failed: {reason}")]
    StartFailed { reason: String },

    /// Stop request failed before exit info could be collected
    #[error("stop failed: {reason}")]
    StopFailed { reason: String },

    /// The underlying runtime cannot pause/resume this execution
    #[error("pause/resume not supported for this execution: {reason}")]
    UnsupportedPause { reason: String },

    /// Input forwarding is not available for this execution
    #[error("input not available: {reason}")]
    InputUnavailable { reason: String },

    /// Referenced container no longer exists
    #[error("container not found: {handle}")]
    ContainerNotFound { handle: String },

    /// A poll or command exceeded its deadline
    #[error("orchestrator operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The container runtime is not installed or not reachable at all
    #[error("container runtime unavailable: {reason}")]
    Unavailable { reason: String },

    /// Generic runtime CLI failure
    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// Durable registry (SQLite) errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure during schema setup
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Registry file I/O failure
    #[error("registry I/O error")]
    Io(#[from] std::io::Error),
}

/// Console buffer and broadcaster errors
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// No console exists for the given execution id
    #[error("unknown execution: {execution_id}")]
    UnknownExecution { execution_id: String },

    /// The execution has no input stream attached (not running, or the
    /// runtime offers no stdin capability)
    #[error("cannot forward input to execution '{execution_id}': {reason}")]
    InputRejected {
        execution_id: String,
        reason: String,
    },

    /// Durable log file I/O failure
    #[error("console log I/O error")]
    Io(#[from] std::io::Error),

    /// Durable log entry could not be encoded or decoded
    #[error("console log entry codec error")]
    Codec(#[from] serde_json::Error),
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Lifecycle validation errors
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Container orchestrator errors
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Durable registry errors
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Console subsystem errors
    #[error("console error: {0}")]
    Console(#[from] ConsoleError),

    /// Engine configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the error is worth retrying with backoff.
    ///
    /// Only transient orchestrator failures qualify; validation and registry
    /// errors are terminal for the operation that produced them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Orchestrator(
                OrchestratorError::Timeout { .. } | OrchestratorError::Runtime(_)
            )
        )
    }
}

/// Convenience type alias for Results with EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_lifecycle_error_display() {
        let error = LifecycleError::InvalidTransition {
            app_id: "speed-display".to_string(),
            operation: "resume".to_string(),
            current: "stopped".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "invalid transition: cannot resume application 'speed-display' while stopped"
        );

        let error = LifecycleError::UnknownApplication {
            app_id: "ghost".to_string(),
        };
        assert_eq!(format!("{}", error), "unknown application: ghost");
    }

    #[test]
    fn test_preparation_failure_keeps_installer_output() {
        let error = OrchestratorError::PreparationFailed {
            reason: "dependency install failed".to_string(),
            output: "ERROR: No matching distribution found for numpy==99".to_string(),
        };
        assert!(format!("{}", error).contains("dependency install failed"));
        if let OrchestratorError::PreparationFailed { output, .. } = error {
            assert!(output.contains("No matching distribution"));
        }
    }

    #[test]
    fn test_engine_error_from_domain_errors() {
        let lifecycle = LifecycleError::UnknownApplication {
            app_id: "x".to_string(),
        };
        assert!(matches!(
            EngineError::from(lifecycle),
            EngineError::Lifecycle(_)
        ));

        let orchestrator = OrchestratorError::StartFailed {
            reason: "boom".to_string(),
        };
        assert!(matches!(
            EngineError::from(orchestrator),
            EngineError::Orchestrator(_)
        ));

        let console = ConsoleError::UnknownExecution {
            execution_id: "e1".to_string(),
        };
        assert!(matches!(EngineError::from(console), EngineError::Console(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::from(OrchestratorError::Timeout { timeout_secs: 5 }).is_transient());
        assert!(EngineError::from(OrchestratorError::Runtime("hiccup".into())).is_transient());
        assert!(!EngineError::from(LifecycleError::UnknownApplication {
            app_id: "x".to_string()
        })
        .is_transient());
        assert!(!EngineError::from(OrchestratorError::UnsupportedPause {
            reason: "bare binary".to_string()
        })
        .is_transient());
    }

    #[test]
    fn test_error_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing log");
        let console_error = ConsoleError::Io(io_error);
        let engine_error = EngineError::Console(console_error);

        assert!(engine_error.source().is_some());
        if let Some(source) = engine_error.source() {
            assert!(source.source().is_some());
        }
    }
}
