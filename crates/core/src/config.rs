//! Engine configuration
//!
//! Runtime tunables for the lifecycle engine: storage locations, console
//! buffer bounds, stop grace period, reconciliation cadence, and the
//! per-language runtime images used for interpreted scripts. Loaded from a
//! TOML file with serde defaults so a missing or partial file still yields a
//! working configuration.

use crate::errors::{EngineError, Result};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Console buffer bounds and behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Maximum number of entries retained per execution buffer
    pub max_entries: usize,
    /// Maximum total content bytes retained per execution buffer
    pub max_bytes: usize,
    /// Coalesce partial writes so each entry is one logical output line
    pub line_buffered: bool,
    /// Retention window for durable log files and log rows, in hours
    pub retention_hours: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_bytes: 256 * 1024,
            line_buffered: true,
            retention_hours: 72,
        }
    }
}

/// Reconciliation and health-poll tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Seconds between reconciliation passes over live executions
    pub poll_interval_secs: u64,
    /// Per-inspect deadline; a poll slower than this counts as a failure
    pub inspect_timeout_secs: u64,
    /// Consecutive failed polls before an execution is marked `error`
    pub max_consecutive_failures: u32,
    /// Optional hard cap on execution runtime; the reconciler force-stops
    /// executions that exceed it (0 disables the reaper)
    pub max_execution_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            inspect_timeout_secs: 5,
            max_consecutive_failures: 3,
            max_execution_secs: 0,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for engine state (payload dirs, logs, database)
    pub data_dir: PathBuf,
    /// Grace period handed to the orchestrator on stop before the kill
    /// escalates, in seconds
    pub stop_grace_secs: u64,
    /// Default memory ceiling per execution, in megabytes (0 = unlimited)
    pub memory_limit_mb: u64,
    /// Default CPU share per execution (fractional CPUs, 0.0 = unlimited)
    pub cpu_limit: f64,
    /// Container images per script language (e.g. `python` -> `python:3.11-slim`)
    pub runtime_images: HashMap<String, String>,
    /// Image native binaries run in
    pub binary_image: String,
    /// Console buffer bounds
    pub console: ConsoleConfig,
    /// Reconciliation cadence
    pub reconcile: ReconcileConfig,
    /// Retry policy for transient orchestrator failures
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut runtime_images = HashMap::new();
        runtime_images.insert("python".to_string(), "python:3.11-slim".to_string());
        runtime_images.insert("node".to_string(), "node:20-slim".to_string());

        Self {
            data_dir: default_data_dir(),
            stop_grace_secs: 10,
            memory_limit_mb: 256,
            cpu_limit: 1.0,
            runtime_images,
            binary_image: "debian:bookworm-slim".to_string(),
            console: ConsoleConfig::default(),
            reconcile: ReconcileConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file. Missing keys fall back to
    /// defaults; a missing file is an error (use [`EngineConfig::default`]
    /// when no file is expected).
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = toml::from_str(&raw).map_err(|e| {
            EngineError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Basic sanity checks on limits and cadences.
    pub fn validate(&self) -> Result<()> {
        if self.console.max_entries == 0 || self.console.max_bytes == 0 {
            return Err(EngineError::Config(
                "console.max_entries and console.max_bytes must be positive".to_string(),
            ));
        }
        if self.reconcile.poll_interval_secs == 0 {
            return Err(EngineError::Config(
                "reconcile.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.reconcile.max_consecutive_failures == 0 {
            return Err(EngineError::Config(
                "reconcile.max_consecutive_failures must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding materialized application payloads.
    pub fn apps_dir(&self) -> PathBuf {
        self.data_dir.join("apps")
    }

    /// Directory holding durable console log mirrors.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// SQLite database file backing the registry.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("bosun.db")
    }

    /// Stop grace period as a [`Duration`].
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Image to run scripts of the given language in, if configured.
    pub fn image_for_language(&self, language: &str) -> Option<&str> {
        self.runtime_images
            .get(&language.to_ascii_lowercase())
            .map(String::as_str)
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BOSUN_DATA_DIR") {
        return PathBuf::from(dir);
    }
    directories_next::ProjectDirs::from("io", "bosun-project", "bosun")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".bosun"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.image_for_language("python"), Some("python:3.11-slim"));
        assert_eq!(config.image_for_language("PYTHON"), Some("python:3.11-slim"));
        assert_eq!(config.image_for_language("cobol"), None);
        assert!(config.database_path().ends_with("bosun.db"));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bosun.toml");
        std::fs::write(
            &path,
            r#"
stop_grace_secs = 3

[console]
max_entries = 10
"#,
        )
        .unwrap();

        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.stop_grace_secs, 3);
        assert_eq!(config.console.max_entries, 10);
        // Unspecified keys keep their defaults.
        assert_eq!(config.console.retention_hours, 72);
        assert_eq!(config.reconcile.max_consecutive_failures, 3);
    }

    #[test]
    fn test_zero_bounds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bosun.toml");
        std::fs::write(&path, "[console]\nmax_entries = 0\n").unwrap();
        assert!(EngineConfig::from_toml_file(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = EngineConfig::from_toml_file(Path::new("/nonexistent/bosun.toml")).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
