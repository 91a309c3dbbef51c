//! Lifecycle controller
//!
//! The controller ties the registry, orchestrator, and console hub together:
//! it validates every requested transition against the state machine, drives
//! the orchestrator, and is the only component that writes an application's
//! persisted status. Operations against one application are serialized by a
//! per-application mutex held for the whole transition; operations against
//! different applications proceed in parallel.
//!
//! One drain task runs per live execution, forwarding the orchestrator's
//! output stream into the console hub and the logs table, and finalizing the
//! execution when the stream closes (process exit). A reconciler pass polls
//! live executions with a bounded `inspect`, escalating to `error` only
//! after a configurable number of consecutive failures.

use crate::app::{
    canonical_app_id, validate_app_id, AppKind, AppPayload, AppStatus, Application, Dependency,
    DependencyStatus, LifecycleOp,
};
use crate::config::EngineConfig;
use crate::console::{ConsoleHub, LogEntry, LogLevel};
use crate::errors::{EngineError, LifecycleError, OrchestratorError, Result};
use crate::execution::{Execution, ExecutionState, ExitInfo};
use crate::orchestrator::{
    ContainerHandle, ContainerState, DependencyRequest, ExecutionSpec, Orchestrator, OutputStream,
    StreamKind,
};
use crate::registry::Registry;
use crate::retry::retry_async;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Deploy request accepted by the controller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// Stable application id (bare or `app:`-prefixed)
    pub app_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Execution strategy; defaults to interpreted-script
    #[serde(default)]
    pub kind: Option<AppKind>,
    /// Script language (selects the runtime image)
    #[serde(default)]
    pub language: Option<String>,
    /// Inline source code (interpreted scripts)
    #[serde(default)]
    pub code: Option<String>,
    /// Binary path or image reference (native binaries / container images)
    #[serde(default)]
    pub binary_ref: Option<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Declared signal paths, passed through opaquely
    #[serde(default)]
    pub signals: Vec<String>,
}

/// Outcome of a deploy
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub app_id: String,
    /// Console id capturing the install output
    pub execution_id: String,
    pub status: AppStatus,
}

/// Outcome of a start/stop/pause/resume/restart
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub app_id: String,
    pub state: AppStatus,
    /// Live execution id, when one exists after the transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

/// Status report for one application
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub app_id: String,
    pub status: AppStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub total_runtime_secs: i64,
}

/// Row in a `listApplications` reply
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSummary {
    pub app_id: String,
    pub name: String,
    pub status: AppStatus,
    #[serde(rename = "type")]
    pub kind: AppKind,
    pub version: String,
    pub deploy_time: DateTime<Utc>,
}

/// Live-engine snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub live_executions: Vec<LiveExecutionInfo>,
    pub console_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveExecutionInfo {
    pub app_id: String,
    pub execution_id: String,
    pub container_id: String,
    pub started_at: DateTime<Utc>,
    pub subscriber_count: usize,
}

/// Result of startup recovery
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Executions re-adopted because their container is still live
    pub adopted: usize,
    /// Executions finalized because their container exited or vanished
    pub finalized: usize,
}

struct LiveExecution {
    execution_id: String,
    handle: ContainerHandle,
    started_at: DateTime<Utc>,
    poll_failures: u32,
    drain: Option<JoinHandle<()>>,
}

/// The lifecycle controller
pub struct LifecycleController {
    config: EngineConfig,
    registry: Registry,
    orchestrator: Arc<dyn Orchestrator>,
    console: Arc<ConsoleHub>,
    live: Mutex<HashMap<String, LiveExecution>>,
    app_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Weak self-handle so `&self` methods can hand an owned reference to
    /// spawned drain and reconciler tasks.
    self_ref: OnceCell<Weak<LifecycleController>>,
}

impl LifecycleController {
    /// Open the registry and console hub under the configured data dir and
    /// build a controller around the given orchestrator.
    pub async fn new(
        config: EngineConfig,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(config.apps_dir())
            .map_err(|e| EngineError::Config(format!("cannot create data dir: {}", e)))?;
        let registry = Registry::open(config.database_path()).await?;
        let console = Arc::new(ConsoleHub::new(config.console.clone(), config.logs_dir())?);
        Ok(Self::with_parts(config, registry, orchestrator, console))
    }

    /// Build a controller from preconstructed parts (used by tests).
    pub fn with_parts(
        config: EngineConfig,
        registry: Registry,
        orchestrator: Arc<dyn Orchestrator>,
        console: Arc<ConsoleHub>,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            config,
            registry,
            orchestrator,
            console,
            live: Mutex::new(HashMap::new()),
            app_locks: Mutex::new(HashMap::new()),
            self_ref: OnceCell::new(),
        });
        let _ = controller.self_ref.set(Arc::downgrade(&controller));
        controller
    }

    /// Owned handle to this controller, for spawned tasks. `None` only while
    /// the controller is being torn down.
    fn self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    /// The console hub (subscription entry point for the transport layer).
    pub fn console(&self) -> &Arc<ConsoleHub> {
        &self.console
    }

    /// The backing registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Acquire the per-application serialization lock.
    async fn lock_app(&self, app_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.app_locks.lock().unwrap();
            Arc::clone(
                locks
                    .entry(app_id.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        mutex.lock_owned().await
    }

    /// Load an application or fail with a validation error.
    async fn load_app(&self, app_id: &str) -> Result<Application> {
        self.registry
            .get_application(app_id)
            .await?
            .ok_or_else(|| {
                LifecycleError::UnknownApplication {
                    app_id: app_id.to_string(),
                }
                .into()
            })
    }

    fn ensure_allowed(app: &Application, op: LifecycleOp) -> Result<()> {
        if app.status.allows(op) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                app_id: app.id.clone(),
                operation: op.as_str().to_string(),
                current: app.status.as_str().to_string(),
            }
            .into())
        }
    }

    /// Append an entry to both the console hub and the logs table.
    async fn emit(&self, app_id: &str, entry: LogEntry) {
        if let Err(e) = self.console.append(entry.clone()) {
            debug!(%app_id, error = %e, "console append skipped");
        }
        if let Err(e) = self.registry.append_log(app_id, &entry).await {
            warn!(%app_id, error = %e, "failed to persist log entry");
        }
    }

    fn interpreter_for(language: Option<&str>) -> Vec<String> {
        match language.map(|l| l.to_ascii_lowercase()).as_deref() {
            // Unbuffered so console streaming is live.
            Some("python") => vec!["python".to_string(), "-u".to_string()],
            Some("node") => vec!["node".to_string()],
            _ => Vec::new(),
        }
    }

    /// Build the orchestrator spec for one execution of an application.
    fn build_spec(&self, app: &Application, execution_id: &str) -> Result<ExecutionSpec> {
        let image = match app.kind {
            AppKind::InterpretedScript => {
                let language = app.language.as_deref().unwrap_or("python");
                self.config
                    .image_for_language(language)
                    .ok_or_else(|| LifecycleError::InvalidRequest {
                        message: format!("no runtime image configured for language '{}'", language),
                    })?
                    .to_string()
            }
            AppKind::NativeBinary => self.config.binary_image.clone(),
            AppKind::ContainerImage => {
                app.payload
                    .artifact
                    .clone()
                    .ok_or_else(|| LifecycleError::InvalidRequest {
                        message: "container-image application has no image reference".to_string(),
                    })?
            }
        };

        Ok(ExecutionSpec {
            execution_id: execution_id.to_string(),
            app_id: app.id.clone(),
            kind: app.kind,
            image,
            source_code: app.payload.source_code.clone(),
            artifact: app.payload.artifact.clone(),
            entry_point: app.payload.entry_point.clone(),
            interpreter: Self::interpreter_for(app.language.as_deref()),
            args: app.payload.args.clone(),
            env: app.payload.env.clone(),
            working_dir: app.payload.working_dir.clone(),
            dependencies: app
                .dependencies
                .iter()
                .map(|d| DependencyRequest {
                    ecosystem: d.ecosystem.clone(),
                    requirement: d.requirement(),
                })
                .collect(),
            memory_limit_mb: self.config.memory_limit_mb,
            cpu_limit: self.config.cpu_limit,
        })
    }

    // ------------------------------------------------------------------
    // deploy
    // ------------------------------------------------------------------

    /// Deploy a new application: persist it, then resolve its declared
    /// dependencies by running a staging preparation. A dependency or image
    /// failure leaves the application in `error` with the raw installer
    /// output captured, so the caller can inspect and redeploy.
    #[instrument(skip_all, fields(app_id = %request.app_id))]
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome> {
        let app_id = canonical_app_id(&request.app_id).to_string();
        if !validate_app_id(&app_id) {
            return Err(LifecycleError::InvalidRequest {
                message: format!("invalid application id '{}'", request.app_id),
            }
            .into());
        }

        let app = Self::application_from_request(&app_id, request)?;

        let _guard = self.lock_app(&app_id).await;

        if let Some(existing) = self.registry.get_application(&app_id).await? {
            if !existing.status.allows(LifecycleOp::Deploy) {
                return Err(LifecycleError::AlreadyExists {
                    app_id: app_id.clone(),
                    status: existing.status.as_str().to_string(),
                }
                .into());
            }
            // Explicit retry out of `error`: replace the previous record.
            self.registry.delete_application(&app_id).await?;
        }

        self.registry.insert_application(&app).await?;

        let install_id = crate::execution::allocate_execution_id(&app_id);
        self.console.register(&install_id)?;
        self.emit(
            &app_id,
            LogEntry::system(&install_id, "deploy accepted, preparing environment", LogLevel::Info),
        )
        .await;

        let spec = self.build_spec(&app, &install_id)?;
        if !spec.dependencies.is_empty() {
            self.emit(
                &app_id,
                LogEntry::system(
                    &install_id,
                    format!("resolving {} declared dependencies", spec.dependencies.len()),
                    LogLevel::Info,
                ),
            )
            .await;
        }

        match self.orchestrator.prepare(&spec).await {
            Ok(handle) => {
                // The staging container validated the environment; the
                // payload and installed dependencies persist on disk.
                if let Err(e) = self.orchestrator.remove(&handle).await {
                    warn!(%app_id, error = %e, "failed to remove staging container");
                }
                self.registry
                    .set_all_dependency_statuses(&app_id, DependencyStatus::Installed)
                    .await?;
                self.registry
                    .update_status(&app_id, AppStatus::Installed)
                    .await?;
                self.emit(
                    &app_id,
                    LogEntry::system(&install_id, "install complete", LogLevel::Info),
                )
                .await;
                info!(%app_id, "application installed");
                Ok(DeployOutcome {
                    app_id,
                    execution_id: install_id,
                    status: AppStatus::Installed,
                })
            }
            Err(e) => {
                self.fail_install(&app_id, &install_id, &e).await;
                Err(e)
            }
        }
    }

    /// Record an install failure: dependency records, status, console.
    async fn fail_install(&self, app_id: &str, install_id: &str, error: &EngineError) {
        if let EngineError::Orchestrator(OrchestratorError::PreparationFailed {
            reason,
            output,
        }) = error
        {
            for line in output.lines().filter(|l| !l.trim().is_empty()) {
                self.emit(app_id, LogEntry::system(install_id, line, LogLevel::Error))
                    .await;
            }
            self.emit(
                app_id,
                LogEntry::system(install_id, reason.clone(), LogLevel::Error),
            )
            .await;
            if reason.contains("dependency") {
                if let Err(e) = self
                    .registry
                    .set_all_dependency_statuses(app_id, DependencyStatus::Failed)
                    .await
                {
                    warn!(%app_id, error = %e, "failed to mark dependencies failed");
                }
            }
        } else {
            self.emit(
                app_id,
                LogEntry::system(install_id, error.to_string(), LogLevel::Error),
            )
            .await;
        }

        if let Err(e) = self.registry.update_status(app_id, AppStatus::Error).await {
            warn!(%app_id, error = %e, "failed to persist error status");
        }
    }

    fn application_from_request(app_id: &str, request: DeployRequest) -> Result<Application> {
        let kind = request.kind.unwrap_or(AppKind::InterpretedScript);

        let entry_point = match (&request.entry_point, kind) {
            (Some(entry), _) => entry.clone(),
            (None, AppKind::InterpretedScript) => {
                match request.language.as_deref().map(str::to_ascii_lowercase).as_deref() {
                    Some("node") => "main.js".to_string(),
                    _ => "main.py".to_string(),
                }
            }
            (None, _) => String::new(),
        };

        match kind {
            AppKind::InterpretedScript if request.code.is_none() => {
                return Err(LifecycleError::InvalidRequest {
                    message: "interpreted-script deploy requires inline code".to_string(),
                }
                .into())
            }
            AppKind::NativeBinary => {
                let artifact =
                    request
                        .binary_ref
                        .as_deref()
                        .ok_or_else(|| LifecycleError::InvalidRequest {
                            message: "native-binary deploy requires a binary reference".to_string(),
                        })?;
                if !std::path::Path::new(artifact).exists() {
                    return Err(LifecycleError::InvalidRequest {
                        message: format!("binary '{}' not found", artifact),
                    }
                    .into());
                }
            }
            AppKind::ContainerImage if request.binary_ref.is_none() => {
                return Err(LifecycleError::InvalidRequest {
                    message: "container-image deploy requires an image reference".to_string(),
                }
                .into())
            }
            _ => {}
        }

        let mut dependencies = request.dependencies;
        for dep in &mut dependencies {
            dep.status = DependencyStatus::Pending;
        }

        let entry_for_binary = match kind {
            AppKind::NativeBinary if entry_point.is_empty() => request
                .binary_ref
                .as_deref()
                .and_then(|p| std::path::Path::new(p).file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("app")
                .to_string(),
            _ => entry_point,
        };

        let now = Utc::now();
        Ok(Application {
            id: app_id.to_string(),
            name: request.name.unwrap_or_else(|| app_id.to_string()),
            version: request.version.unwrap_or_else(|| "0.1.0".to_string()),
            description: request.description.unwrap_or_default(),
            kind,
            language: request.language,
            payload: AppPayload {
                source_code: request.code,
                artifact: request.binary_ref,
                entry_point: entry_for_binary,
                args: request.args,
                env: request.env,
                working_dir: request.working_dir,
            },
            dependencies,
            signals: request.signals,
            status: AppStatus::Installing,
            created_at: now,
            updated_at: now,
            last_started_at: None,
            total_runtime_secs: 0,
        })
    }

    // ------------------------------------------------------------------
    // start / stop / pause / resume / restart / uninstall
    // ------------------------------------------------------------------

    /// Start an installed or stopped application with a fresh execution.
    #[instrument(skip(self))]
    pub async fn start(&self, app_id: &str) -> Result<TransitionOutcome> {
        let app_id = canonical_app_id(app_id).to_string();
        let _guard = self.lock_app(&app_id).await;
        let app = self.load_app(&app_id).await?;
        Self::ensure_allowed(&app, LifecycleOp::Start)?;
        let execution = self.start_locked(&app).await?;
        Ok(TransitionOutcome {
            app_id,
            state: AppStatus::Running,
            execution_id: Some(execution),
        })
    }

    /// Stop a running or paused application, recording exit info.
    #[instrument(skip(self))]
    pub async fn stop(&self, app_id: &str) -> Result<TransitionOutcome> {
        let app_id = canonical_app_id(app_id).to_string();
        let _guard = self.lock_app(&app_id).await;
        let app = self.load_app(&app_id).await?;
        Self::ensure_allowed(&app, LifecycleOp::Stop)?;
        self.stop_locked(&app).await?;
        Ok(TransitionOutcome {
            app_id,
            state: AppStatus::Stopped,
            execution_id: None,
        })
    }

    /// Pause a running application. The output drain stays open; the same
    /// execution resumes later.
    #[instrument(skip(self))]
    pub async fn pause(&self, app_id: &str) -> Result<TransitionOutcome> {
        let app_id = canonical_app_id(app_id).to_string();
        let _guard = self.lock_app(&app_id).await;
        let app = self.load_app(&app_id).await?;
        Self::ensure_allowed(&app, LifecycleOp::Pause)?;

        let (execution_id, handle) = self.live_handle(&app_id).await?;
        self.orchestrator.pause(&handle).await?;
        self.registry
            .update_execution_state(&execution_id, ExecutionState::Paused)
            .await?;
        self.registry.update_status(&app_id, AppStatus::Paused).await?;
        self.emit(&app_id, LogEntry::status(&execution_id, "paused")).await;

        Ok(TransitionOutcome {
            app_id,
            state: AppStatus::Paused,
            execution_id: Some(execution_id),
        })
    }

    /// Resume a paused application; keeps the same execution id (no new
    /// container is created).
    #[instrument(skip(self))]
    pub async fn resume(&self, app_id: &str) -> Result<TransitionOutcome> {
        let app_id = canonical_app_id(app_id).to_string();
        let _guard = self.lock_app(&app_id).await;
        let app = self.load_app(&app_id).await?;
        Self::ensure_allowed(&app, LifecycleOp::Resume)?;

        let (execution_id, handle) = self.live_handle(&app_id).await?;
        self.orchestrator.resume(&handle).await?;
        self.registry
            .update_execution_state(&execution_id, ExecutionState::Running)
            .await?;
        self.registry.update_status(&app_id, AppStatus::Running).await?;
        self.emit(&app_id, LogEntry::status(&execution_id, "resumed")).await;

        Ok(TransitionOutcome {
            app_id,
            state: AppStatus::Running,
            execution_id: Some(execution_id),
        })
    }

    /// Restart: stop if live, then start with a fresh execution id.
    #[instrument(skip(self))]
    pub async fn restart(&self, app_id: &str) -> Result<TransitionOutcome> {
        let app_id = canonical_app_id(app_id).to_string();
        let _guard = self.lock_app(&app_id).await;
        let app = self.load_app(&app_id).await?;
        Self::ensure_allowed(&app, LifecycleOp::Restart)?;

        if matches!(app.status, AppStatus::Running | AppStatus::Paused) {
            self.stop_locked(&app).await?;
        }
        let app = self.load_app(&app_id).await?;
        let execution = self.start_locked(&app).await?;
        Ok(TransitionOutcome {
            app_id,
            state: AppStatus::Running,
            execution_id: Some(execution),
        })
    }

    /// Uninstall: stop if live, remove the container, delete the registry
    /// record (executions, logs, and dependencies cascade) and the payload.
    #[instrument(skip(self))]
    pub async fn uninstall(&self, app_id: &str) -> Result<()> {
        let app_id = canonical_app_id(app_id).to_string();
        let _guard = self.lock_app(&app_id).await;
        let app = self.load_app(&app_id).await?;
        Self::ensure_allowed(&app, LifecycleOp::Uninstall)?;

        self.registry
            .update_status(&app_id, AppStatus::Uninstalling)
            .await?;

        if matches!(app.status, AppStatus::Running | AppStatus::Paused) {
            if let Err(e) = self.stop_locked(&app).await {
                warn!(%app_id, error = %e, "stop during uninstall failed, continuing");
            }
        }

        // Remove console mirrors for every historical execution (install
        // consoles included) before the registry rows cascade away.
        if let Ok(execution_ids) = self.registry.execution_ids_for_application(&app_id).await {
            for execution_id in execution_ids {
                let _ = self.console.remove(&execution_id);
            }
        }

        self.registry.delete_application(&app_id).await?;

        let payload_dir = self.config.apps_dir().join(&app_id);
        if payload_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&payload_dir) {
                warn!(%app_id, error = %e, "failed to remove payload directory");
            }
        }

        self.app_locks.lock().unwrap().remove(&app_id);
        info!(%app_id, "application uninstalled");
        Ok(())
    }

    /// The live execution's id and container handle, or a validation error.
    async fn live_handle(&self, app_id: &str) -> Result<(String, ContainerHandle)> {
        if let Some(live) = self.live.lock().unwrap().get(app_id) {
            return Ok((live.execution_id.clone(), live.handle.clone()));
        }
        // Fall back to the registry (e.g. after recovery without re-adoption).
        let execution = self.registry.active_execution(app_id).await?.ok_or_else(|| {
            LifecycleError::NoLiveExecution {
                app_id: app_id.to_string(),
            }
        })?;
        let container_id =
            execution
                .container_id
                .clone()
                .ok_or_else(|| LifecycleError::NoLiveExecution {
                    app_id: app_id.to_string(),
                })?;
        Ok((execution.id, ContainerHandle::new(container_id)))
    }

    /// Start the application under an already-held lock. Returns the new
    /// execution id.
    async fn start_locked(&self, app: &Application) -> Result<String> {
        let app_id = app.id.clone();
        self.registry.update_status(&app_id, AppStatus::Starting).await?;

        let mut execution = Execution::new(&app_id);
        let execution_id = execution.id.clone();
        self.console.register(&execution_id)?;
        self.emit(&app_id, LogEntry::status(&execution_id, "starting")).await;

        let spec = match self.build_spec(app, &execution_id) {
            Ok(spec) => spec,
            Err(e) => {
                self.fail_start(&app_id, &execution_id, &e, None).await;
                return Err(e);
            }
        };

        let handle = match retry_async(
            &self.config.retry,
            || self.orchestrator.prepare(&spec),
            EngineError::is_transient,
        )
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.fail_start(&app_id, &execution_id, &e, None).await;
                return Err(e);
            }
        };
        execution.container_id = Some(handle.id.clone());

        let process = match retry_async(
            &self.config.retry,
            || self.orchestrator.start(&handle),
            EngineError::is_transient,
        )
        .await
        {
            Ok(process) => process,
            Err(e) => {
                self.fail_start(&app_id, &execution_id, &e, Some(&handle)).await;
                return Err(e);
            }
        };
        execution.pid = process.pid;

        self.registry.insert_execution(&execution).await?;
        self.registry.mark_started(&app_id, execution.started_at).await?;
        if !app.dependencies.is_empty() {
            self.registry
                .set_all_dependency_statuses(&app_id, DependencyStatus::Installed)
                .await?;
        }

        let drain = match self.orchestrator.attach_output(&handle, None).await {
            Ok(stream) => self.spawn_drain(&app_id, &execution_id, &handle, stream),
            Err(e) => {
                warn!(%app_id, error = %e, "output attach failed; relying on reconciler");
                None
            }
        };

        match self.orchestrator.attach_input(&handle).await {
            Ok(input) => {
                let _ = self.console.set_input(&execution_id, Some(input));
            }
            Err(e) => debug!(%app_id, reason = %e, "no input stream for execution"),
        }

        self.live.lock().unwrap().insert(
            app_id.clone(),
            LiveExecution {
                execution_id: execution_id.clone(),
                handle,
                started_at: execution.started_at,
                poll_failures: 0,
                drain,
            },
        );

        self.emit(&app_id, LogEntry::status(&execution_id, "running")).await;
        info!(%app_id, %execution_id, "application started");
        Ok(execution_id)
    }

    /// Record a failed start attempt and clean up the half-built container.
    async fn fail_start(
        &self,
        app_id: &str,
        execution_id: &str,
        error: &EngineError,
        handle: Option<&ContainerHandle>,
    ) {
        self.fail_install(app_id, execution_id, error).await;
        if let Some(handle) = handle {
            if let Err(e) = self.orchestrator.remove(handle).await {
                warn!(%app_id, error = %e, "failed to remove container after start failure");
            }
        }
    }

    /// Stop the application's live execution under an already-held lock.
    async fn stop_locked(&self, app: &Application) -> Result<()> {
        let app_id = app.id.clone();
        let (execution_id, handle) = self.live_handle(&app_id).await?;

        self.registry.update_status(&app_id, AppStatus::Stopping).await?;
        self.emit(&app_id, LogEntry::status(&execution_id, "stopping")).await;

        match self.orchestrator.stop(&handle, self.config.stop_grace()).await {
            Ok(exit) => {
                self.finalize_locked(
                    &app_id,
                    &execution_id,
                    &handle,
                    ExecutionState::Stopped,
                    AppStatus::Stopped,
                    &exit,
                )
                .await?;
                Ok(())
            }
            // The container is already gone; record what we know and land
            // in `stopped` rather than stranding the app in `stopping`.
            Err(EngineError::Orchestrator(OrchestratorError::ContainerNotFound { .. })) => {
                let exit = ExitInfo {
                    code: None,
                    forced: false,
                    reason: "container already removed".to_string(),
                };
                self.finalize_locked(
                    &app_id,
                    &execution_id,
                    &handle,
                    ExecutionState::Stopped,
                    AppStatus::Stopped,
                    &exit,
                )
                .await?;
                Ok(())
            }
            Err(e) => {
                let exit = ExitInfo {
                    code: None,
                    forced: false,
                    reason: format!("stop failed: {}", e),
                };
                let _ = self
                    .finalize_locked(
                        &app_id,
                        &execution_id,
                        &handle,
                        ExecutionState::Error,
                        AppStatus::Error,
                        &exit,
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Shared termination bookkeeping: finalize the execution row, follow
    /// the application status, accumulate runtime, emit the exit entry, and
    /// remove the container and live-table entry.
    async fn finalize_locked(
        &self,
        app_id: &str,
        execution_id: &str,
        handle: &ContainerHandle,
        state: ExecutionState,
        app_status: AppStatus,
        exit: &ExitInfo,
    ) -> Result<()> {
        let finished_at = Utc::now();
        self.registry
            .finalize_execution(execution_id, state, exit, finished_at)
            .await?;
        self.registry.update_status(app_id, app_status).await?;

        if let Ok(Some(execution)) = self.registry.get_execution(execution_id).await {
            let secs = (finished_at - execution.started_at).num_seconds();
            let _ = self.registry.add_runtime(app_id, secs).await;
        }

        let _ = self.console.set_input(execution_id, None);

        let summary = match exit.code {
            Some(code) if exit.forced => format!("force-killed (exit code {})", code),
            Some(code) => format!("exited with code {}", code),
            None => "exited".to_string(),
        };
        self.emit(app_id, LogEntry::status(execution_id, summary)).await;

        if let Err(e) = self.orchestrator.remove(handle).await {
            warn!(%app_id, error = %e, "failed to remove container");
        }

        if let Some(entry) = self.live.lock().unwrap().remove(app_id) {
            if let Some(drain) = entry.drain {
                // Detached, not aborted: the drain exits on its own when the
                // output stream closes and may still flush tail output.
                drop(drain);
            }
        }
        info!(%app_id, %execution_id, status = %app_status, "execution finalized");
        Ok(())
    }

    // ------------------------------------------------------------------
    // output drain
    // ------------------------------------------------------------------

    fn spawn_drain(
        &self,
        app_id: &str,
        execution_id: &str,
        handle: &ContainerHandle,
        stream: OutputStream,
    ) -> Option<JoinHandle<()>> {
        let controller = self.self_arc()?;
        let app_id = app_id.to_string();
        let execution_id = execution_id.to_string();
        let handle = handle.clone();
        Some(tokio::spawn(async move {
            controller
                .drain_output(&app_id, &execution_id, &handle, stream)
                .await;
        }))
    }

    /// Forward the orchestrator's output stream into the console hub and
    /// the logs table until the stream closes, then finalize the execution
    /// if nothing else already has.
    async fn drain_output(
        &self,
        app_id: &str,
        execution_id: &str,
        handle: &ContainerHandle,
        mut stream: OutputStream,
    ) {
        use crate::console::LineAssembler;

        let line_buffered = self.console.line_buffered();
        let mut stdout_lines = LineAssembler::new();
        let mut stderr_lines = LineAssembler::new();

        while let Some(chunk) = stream.next().await {
            let assembler = match chunk.stream {
                StreamKind::Stdout => &mut stdout_lines,
                StreamKind::Stderr => &mut stderr_lines,
            };
            if line_buffered {
                for line in assembler.feed(&chunk.bytes) {
                    self.emit_output(app_id, execution_id, chunk.stream, line).await;
                }
            } else {
                let text = String::from_utf8_lossy(&chunk.bytes).into_owned();
                self.emit_output(app_id, execution_id, chunk.stream, text).await;
            }
        }

        for (kind, assembler) in [
            (StreamKind::Stdout, &mut stdout_lines),
            (StreamKind::Stderr, &mut stderr_lines),
        ] {
            if let Some(tail) = assembler.finish() {
                self.emit_output(app_id, execution_id, kind, tail).await;
            }
        }

        debug!(%app_id, %execution_id, "output stream closed");
        self.handle_stream_closed(app_id, execution_id, handle).await;
    }

    async fn emit_output(
        &self,
        app_id: &str,
        execution_id: &str,
        stream: StreamKind,
        content: String,
    ) {
        let entry = match stream {
            StreamKind::Stdout => LogEntry::stdout(execution_id, content),
            StreamKind::Stderr => LogEntry::stderr(execution_id, content),
        };
        self.emit(app_id, entry).await;
    }

    /// The output stream closing means the process exited (or an explicit
    /// stop/uninstall already finalized the execution, in which case there
    /// is nothing left to do).
    async fn handle_stream_closed(
        &self,
        app_id: &str,
        execution_id: &str,
        handle: &ContainerHandle,
    ) {
        let _guard = self.lock_app(app_id).await;

        let execution = match self.registry.get_execution(execution_id).await {
            Ok(Some(execution)) => execution,
            _ => return,
        };
        if execution.state.is_terminal() {
            return;
        }

        // Unexpected exit: collect the exit code from the runtime.
        let exit = match tokio::time::timeout(
            Duration::from_secs(self.config.reconcile.inspect_timeout_secs),
            self.orchestrator.inspect(handle),
        )
        .await
        {
            Ok(Ok(status)) => match status.state {
                ContainerState::Exited { code } => ExitInfo {
                    code,
                    forced: false,
                    reason: "process exited".to_string(),
                },
                // Stream closed but the container still reports live; treat
                // as an error rather than guessing.
                _ => ExitInfo {
                    code: None,
                    forced: false,
                    reason: "output stream closed unexpectedly".to_string(),
                },
            },
            _ => ExitInfo {
                code: None,
                forced: false,
                reason: "container state unavailable after exit".to_string(),
            },
        };

        let (state, app_status) = match exit.code {
            Some(0) => (ExecutionState::Stopped, AppStatus::Stopped),
            _ => (ExecutionState::Error, AppStatus::Error),
        };

        if let Err(e) = self
            .finalize_locked(app_id, execution_id, handle, state, app_status, &exit)
            .await
        {
            warn!(%app_id, %execution_id, error = %e, "failed to finalize crashed execution");
        }
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    /// Applications, optionally filtered by status, as list summaries.
    pub async fn list_applications(&self, status: Option<AppStatus>) -> Result<Vec<AppSummary>> {
        let apps = self.registry.list_applications(status).await?;
        Ok(apps
            .into_iter()
            .map(|app| AppSummary {
                app_id: app.id,
                name: app.name,
                status: app.status,
                kind: app.kind,
                version: app.version,
                deploy_time: app.created_at,
            })
            .collect())
    }

    /// Status report for one application.
    pub async fn get_status(&self, app_id: &str) -> Result<StatusReport> {
        let app_id = canonical_app_id(app_id).to_string();
        let app = self.load_app(&app_id).await?;
        let exit_code = self
            .registry
            .latest_execution(&app_id)
            .await?
            .and_then(|e| e.exit.and_then(|x| x.code));
        Ok(StatusReport {
            app_id: app.id.clone(),
            status: app.status,
            uptime_secs: app.current_uptime_secs(Utc::now()),
            exit_code,
            total_runtime_secs: app.total_runtime_secs,
        })
    }

    /// Dependency records for one application.
    pub async fn list_dependencies(&self, app_id: &str) -> Result<Vec<Dependency>> {
        let app_id = canonical_app_id(app_id).to_string();
        // Surface unknown ids as validation errors, not empty lists.
        self.load_app(&app_id).await?;
        self.registry.dependencies(&app_id).await
    }

    /// Snapshot of live executions and console state.
    pub fn runtime_info(&self) -> RuntimeInfo {
        let live = self.live.lock().unwrap();
        let executions = live
            .iter()
            .map(|(app_id, entry)| LiveExecutionInfo {
                app_id: app_id.clone(),
                execution_id: entry.execution_id.clone(),
                container_id: entry.handle.id.clone(),
                started_at: entry.started_at,
                subscriber_count: self.console.subscriber_count(&entry.execution_id),
            })
            .collect();
        RuntimeInfo {
            live_executions: executions,
            console_count: self.console.console_count(),
        }
    }

    /// Subscribe to an execution's console output. Consoles for executions
    /// from before a restart are rebuilt from their durable mirror.
    pub fn subscribe_output(
        &self,
        execution_id: &str,
        catch_up: bool,
    ) -> Result<(u64, mpsc::Receiver<Arc<LogEntry>>)> {
        if !self.console.contains(execution_id)
            && self.console.log_file_path(execution_id).exists()
        {
            self.console.restore(execution_id)?;
        }
        self.console.subscribe(execution_id, catch_up)
    }

    /// Remove a subscriber from an execution's fan-out.
    pub fn unsubscribe_output(&self, execution_id: &str, subscriber_id: u64) -> Result<bool> {
        self.console.unsubscribe(execution_id, subscriber_id)
    }

    /// Forward input bytes to an execution's stdin.
    pub async fn send_input(&self, execution_id: &str, bytes: Vec<u8>) -> Result<()> {
        self.console.send_input(execution_id, bytes).await
    }

    // ------------------------------------------------------------------
    // reconciliation and recovery
    // ------------------------------------------------------------------

    /// One reconciliation pass over the live executions: bounded inspect
    /// polls, heartbeat updates, crash finalization, failure escalation,
    /// and the optional max-runtime reaper.
    pub async fn reconcile_once(&self) -> Result<()> {
        let snapshot: Vec<(String, String, ContainerHandle, DateTime<Utc>)> = {
            let live = self.live.lock().unwrap();
            live.iter()
                .map(|(app_id, e)| {
                    (
                        app_id.clone(),
                        e.execution_id.clone(),
                        e.handle.clone(),
                        e.started_at,
                    )
                })
                .collect()
        };

        let now = Utc::now();
        for (app_id, execution_id, handle, started_at) in snapshot {
            let poll = tokio::time::timeout(
                Duration::from_secs(self.config.reconcile.inspect_timeout_secs),
                self.orchestrator.inspect(&handle),
            )
            .await;

            match poll {
                Ok(Ok(status)) => {
                    self.reset_poll_failures(&app_id);
                    let _ = self
                        .registry
                        .record_heartbeat(&execution_id, status.resources, now)
                        .await;

                    if let ContainerState::Exited { code } = status.state {
                        let exit = ExitInfo {
                            code,
                            forced: false,
                            reason: "process exited".to_string(),
                        };
                        let (state, app_status) = match code {
                            Some(0) => (ExecutionState::Stopped, AppStatus::Stopped),
                            _ => (ExecutionState::Error, AppStatus::Error),
                        };
                        let _guard = self.lock_app(&app_id).await;
                        if let Ok(Some(execution)) =
                            self.registry.get_execution(&execution_id).await
                        {
                            if !execution.state.is_terminal() {
                                let _ = self
                                    .finalize_locked(
                                        &app_id,
                                        &execution_id,
                                        &handle,
                                        state,
                                        app_status,
                                        &exit,
                                    )
                                    .await;
                            }
                        }
                        continue;
                    }

                    // Reaper: stop executions that exceeded the runtime cap.
                    let cap = self.config.reconcile.max_execution_secs;
                    if cap > 0 && (now - started_at).num_seconds() as u64 > cap {
                        warn!(%app_id, %execution_id, "maximum runtime exceeded, stopping");
                        self.emit(
                            &app_id,
                            LogEntry::system(
                                &execution_id,
                                format!("maximum runtime of {}s exceeded, stopping", cap),
                                LogLevel::Warn,
                            ),
                        )
                        .await;
                        let _guard = self.lock_app(&app_id).await;
                        if let Ok(app) = self.load_app(&app_id).await {
                            if app.status.allows(LifecycleOp::Stop) {
                                let _ = self.stop_locked(&app).await;
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    debug!(%app_id, error = %e, "inspect failed");
                    self.bump_poll_failures(&app_id, &execution_id, &handle).await;
                }
                Err(_) => {
                    debug!(%app_id, "inspect timed out");
                    self.bump_poll_failures(&app_id, &execution_id, &handle).await;
                }
            }
        }

        Ok(())
    }

    fn reset_poll_failures(&self, app_id: &str) {
        if let Some(entry) = self.live.lock().unwrap().get_mut(app_id) {
            entry.poll_failures = 0;
        }
    }

    /// Count one failed poll; escalate to `error` after the configured
    /// number of consecutive failures (a single timeout is "unknown", not
    /// an error, to avoid flapping on transient hiccups).
    async fn bump_poll_failures(
        &self,
        app_id: &str,
        execution_id: &str,
        handle: &ContainerHandle,
    ) {
        let failures = {
            let mut live = self.live.lock().unwrap();
            match live.get_mut(app_id) {
                Some(entry) => {
                    entry.poll_failures += 1;
                    entry.poll_failures
                }
                None => return,
            }
        };

        if failures < self.config.reconcile.max_consecutive_failures {
            return;
        }

        warn!(%app_id, failures, "health polling failed repeatedly, marking error");
        let exit = ExitInfo {
            code: None,
            forced: false,
            reason: format!("health polling failed {} consecutive times", failures),
        };
        let _guard = self.lock_app(app_id).await;
        if let Ok(Some(execution)) = self.registry.get_execution(execution_id).await {
            if !execution.state.is_terminal() {
                let _ = self
                    .finalize_locked(
                        app_id,
                        execution_id,
                        handle,
                        ExecutionState::Error,
                        AppStatus::Error,
                        &exit,
                    )
                    .await;
            }
        }
    }

    /// Run reconciliation and retention pruning on the configured cadence
    /// until the returned task is aborted.
    pub fn run_reconciler(&self) -> JoinHandle<()> {
        let controller = self.self_arc();
        tokio::spawn(async move {
            let controller = match controller {
                Some(controller) => controller,
                None => return,
            };
            let interval = Duration::from_secs(controller.config.reconcile.poll_interval_secs);
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = controller.reconcile_once().await {
                    warn!(error = %e, "reconciliation pass failed");
                }
                let cutoff = Utc::now()
                    - chrono::Duration::hours(controller.config.console.retention_hours as i64);
                if let Err(e) = controller.registry.prune_logs(cutoff).await {
                    warn!(error = %e, "log pruning failed");
                }
                if let Err(e) = controller.console.prune_files(Utc::now()) {
                    warn!(error = %e, "log file pruning failed");
                }
            }
        })
    }

    /// Reconcile persisted live executions against the orchestrator after a
    /// controller restart: re-adopt containers that are still alive
    /// (rebuilding their console from the durable mirror and re-attaching
    /// the output drain), finalize the rest.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for execution in self.registry.live_executions().await? {
            let app_id = execution.app_id.clone();
            let _guard = self.lock_app(&app_id).await;

            let handle = match &execution.container_id {
                Some(id) => ContainerHandle::new(id.clone()),
                None => {
                    let exit = ExitInfo {
                        code: None,
                        forced: false,
                        reason: "container lost across restart".to_string(),
                    };
                    let _ = self.console.restore(&execution.id);
                    let _ = self
                        .finalize_locked(
                            &app_id,
                            &execution.id,
                            &ContainerHandle::new(""),
                            ExecutionState::Error,
                            AppStatus::Error,
                            &exit,
                        )
                        .await;
                    report.finalized += 1;
                    continue;
                }
            };

            match self.orchestrator.inspect(&handle).await {
                Ok(status) if !status.state.is_terminal() => {
                    // Still live: rebuild the console window and re-attach.
                    let _ = self.console.restore(&execution.id);
                    let since = self.console.last_entry_at(&execution.id);
                    let drain = match self.orchestrator.attach_output(&handle, since).await {
                        Ok(stream) => self.spawn_drain(&app_id, &execution.id, &handle, stream),
                        Err(e) => {
                            warn!(%app_id, error = %e, "re-attach failed during recovery");
                            None
                        }
                    };
                    if status.state == ContainerState::Running {
                        if let Ok(input) = self.orchestrator.attach_input(&handle).await {
                            let _ = self.console.set_input(&execution.id, Some(input));
                        }
                    }

                    let app_status = match status.state {
                        ContainerState::Paused => AppStatus::Paused,
                        _ => AppStatus::Running,
                    };
                    self.registry.update_status(&app_id, app_status).await?;

                    self.live.lock().unwrap().insert(
                        app_id.clone(),
                        LiveExecution {
                            execution_id: execution.id.clone(),
                            handle,
                            started_at: execution.started_at,
                            poll_failures: 0,
                            drain,
                        },
                    );
                    info!(%app_id, execution_id = %execution.id, "execution re-adopted");
                    report.adopted += 1;
                }
                Ok(status) => {
                    let code = match status.state {
                        ContainerState::Exited { code } => code,
                        _ => None,
                    };
                    let exit = ExitInfo {
                        code,
                        forced: false,
                        reason: "process exited while controller was down".to_string(),
                    };
                    let (state, app_status) = match code {
                        Some(0) => (ExecutionState::Stopped, AppStatus::Stopped),
                        _ => (ExecutionState::Error, AppStatus::Error),
                    };
                    let _ = self.console.restore(&execution.id);
                    let _ = self
                        .finalize_locked(&app_id, &execution.id, &handle, state, app_status, &exit)
                        .await;
                    report.finalized += 1;
                }
                Err(_) => {
                    let exit = ExitInfo {
                        code: None,
                        forced: false,
                        reason: "container missing after restart".to_string(),
                    };
                    let _ = self.console.restore(&execution.id);
                    let _ = self
                        .finalize_locked(
                            &app_id,
                            &execution.id,
                            &handle,
                            ExecutionState::Error,
                            AppStatus::Error,
                            &exit,
                        )
                        .await;
                    report.finalized += 1;
                }
            }
        }

        info!(
            adopted = report.adopted,
            finalized = report.finalized,
            "recovery complete"
        );
        Ok(report)
    }
}
