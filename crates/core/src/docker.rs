//! Docker CLI orchestrator adapter
//!
//! Production [`Orchestrator`] implementation driving the `docker` binary.
//! Preparation materializes the payload under the engine's data directory,
//! pulls the image, runs dependency installation in a throwaway container
//! (raw installer output is attached to failures), and creates the target
//! container with resource limits and an open stdin. Output attachment runs
//! `docker logs -f`, whose stdout/stderr mirror the container's streams and
//! terminate when the process exits.

use crate::app::AppKind;
use crate::errors::{OrchestratorError, Result};
use crate::execution::{ExitInfo, ResourceUsage};
use crate::orchestrator::{
    ContainerHandle, ContainerState, ContainerStatus, ExecutionSpec, InputStream, Orchestrator,
    OutputChunk, OutputStream, ProcessInfo, StreamKind,
};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Deadline for the best-effort `docker stats` resource snapshot.
const STATS_TIMEOUT: Duration = Duration::from_secs(3);

/// Docker CLI orchestrator
#[derive(Debug, Clone)]
pub struct DockerOrchestrator {
    runtime_path: String,
    apps_dir: PathBuf,
}

impl DockerOrchestrator {
    /// Create an adapter materializing payloads under `apps_dir`.
    pub fn new(apps_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_path: "docker".to_string(),
            apps_dir: apps_dir.into(),
        }
    }

    /// Use a custom runtime binary (e.g. an absolute docker path or podman).
    pub fn with_runtime_path(mut self, path: impl Into<String>) -> Self {
        self.runtime_path = path.into();
        self
    }

    /// Check the runtime binary responds at all.
    pub async fn check_available(&self) -> Result<()> {
        let output = Command::new(&self.runtime_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| OrchestratorError::Unavailable {
                reason: format!("{} not found: {}", self.runtime_path, e),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(OrchestratorError::Unavailable {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into())
        }
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output> {
        debug!("docker {}", args.join(" "));
        Command::new(&self.runtime_path)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                OrchestratorError::Unavailable {
                    reason: format!("failed to invoke {}: {}", self.runtime_path, e),
                }
                .into()
            })
    }

    /// Run a docker command, mapping failures onto the error taxonomy.
    async fn run_checked(&self, args: &[String]) -> Result<String> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(map_cli_error(&stderr).into())
        }
    }

    fn payload_dir(&self, spec: &ExecutionSpec) -> PathBuf {
        self.apps_dir.join(&spec.app_id)
    }

    fn container_name(spec: &ExecutionSpec) -> String {
        format!("bosun-{}", spec.execution_id)
    }

    /// Write the payload files the container will mount.
    fn materialize_payload(&self, spec: &ExecutionSpec) -> Result<()> {
        if spec.kind != AppKind::InterpretedScript {
            return Ok(());
        }

        let dir = self.payload_dir(spec);
        std::fs::create_dir_all(&dir).map_err(|e| OrchestratorError::PreparationFailed {
            reason: format!("failed to create payload directory: {}", e),
            output: String::new(),
        })?;

        let source = spec
            .source_code
            .as_deref()
            .ok_or_else(|| OrchestratorError::PreparationFailed {
                reason: "interpreted-script application has no source code".to_string(),
                output: String::new(),
            })?;

        std::fs::write(dir.join(&spec.entry_point), source).map_err(|e| {
            OrchestratorError::PreparationFailed {
                reason: format!("failed to write payload: {}", e),
                output: String::new(),
            }
        })?;
        Ok(())
    }

    /// Install declared dependencies inside a throwaway container sharing
    /// the payload mount. Installed packages land under the payload dir so
    /// the target container sees them without a custom image.
    async fn install_dependencies(&self, spec: &ExecutionSpec) -> Result<()> {
        if spec.dependencies.is_empty() {
            return Ok(());
        }

        let dir = self.payload_dir(spec);
        std::fs::create_dir_all(&dir).map_err(|e| OrchestratorError::PreparationFailed {
            reason: format!("failed to create payload directory: {}", e),
            output: String::new(),
        })?;
        let mount = format!("{}:/app", dir.display());

        for (ecosystem, requirements) in group_requirements(spec) {
            let install_args = match install_command(&ecosystem, &requirements) {
                Some(args) => args,
                None => {
                    return Err(OrchestratorError::PreparationFailed {
                        reason: format!("unsupported dependency ecosystem '{}'", ecosystem),
                        output: String::new(),
                    }
                    .into())
                }
            };

            let mut args = vec![
                "run".to_string(),
                "--rm".to_string(),
                "-v".to_string(),
                mount.clone(),
                "-w".to_string(),
                "/app".to_string(),
                spec.image.clone(),
            ];
            args.extend(install_args);

            let output = self.run(&args).await?;
            if !output.status.success() {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                return Err(OrchestratorError::PreparationFailed {
                    reason: format!("{} dependency install failed", ecosystem),
                    output: combined,
                }
                .into());
            }
        }
        Ok(())
    }

    fn build_create_args(&self, spec: &ExecutionSpec) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            Self::container_name(spec),
            "-i".to_string(),
            "--label".to_string(),
            format!("bosun.app={}", spec.app_id),
            "--label".to_string(),
            format!("bosun.execution={}", spec.execution_id),
        ];

        if spec.memory_limit_mb > 0 {
            args.push("--memory".to_string());
            args.push(format!("{}m", spec.memory_limit_mb));
        }
        if spec.cpu_limit > 0.0 {
            args.push("--cpus".to_string());
            args.push(format!("{}", spec.cpu_limit));
        }

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        match spec.kind {
            AppKind::InterpretedScript => {
                let dir = self.payload_dir(spec);
                args.push("-v".to_string());
                args.push(format!("{}:/app", dir.display()));
                args.push("-w".to_string());
                args.push(
                    spec.working_dir
                        .clone()
                        .unwrap_or_else(|| "/app".to_string()),
                );
                // Packages installed with --target during preparation.
                args.push("-e".to_string());
                args.push("PYTHONPATH=/app/.deps".to_string());
                args.push("-e".to_string());
                args.push("NODE_PATH=/app/node_modules".to_string());
                args.push(spec.image.clone());
                args.extend(spec.interpreter.iter().cloned());
                args.push(spec.entry_point.clone());
                args.extend(spec.args.iter().cloned());
            }
            AppKind::NativeBinary => {
                if let Some(artifact) = &spec.artifact {
                    args.push("-v".to_string());
                    args.push(format!("{}:/app/{}:ro", artifact, spec.entry_point));
                }
                if let Some(workdir) = &spec.working_dir {
                    args.push("-w".to_string());
                    args.push(workdir.clone());
                }
                args.push(spec.image.clone());
                args.push(format!("/app/{}", spec.entry_point));
                args.extend(spec.args.iter().cloned());
            }
            AppKind::ContainerImage => {
                if let Some(workdir) = &spec.working_dir {
                    args.push("-w".to_string());
                    args.push(workdir.clone());
                }
                args.push(spec.image.clone());
                if !spec.entry_point.is_empty() {
                    args.push(spec.entry_point.clone());
                    args.extend(spec.args.iter().cloned());
                }
            }
        }

        args
    }
}

/// Group dependency requirement strings by ecosystem, preserving order.
fn group_requirements(spec: &ExecutionSpec) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for dep in &spec.dependencies {
        match grouped.iter_mut().find(|(eco, _)| *eco == dep.ecosystem) {
            Some((_, reqs)) => reqs.push(dep.requirement.clone()),
            None => grouped.push((dep.ecosystem.clone(), vec![dep.requirement.clone()])),
        }
    }
    grouped
}

/// Installer invocation for one ecosystem, or `None` if unsupported.
fn install_command(ecosystem: &str, requirements: &[String]) -> Option<Vec<String>> {
    match ecosystem {
        "pip" | "python" => {
            let mut args = vec![
                "pip".to_string(),
                "install".to_string(),
                "--no-cache-dir".to_string(),
                "--target".to_string(),
                "/app/.deps".to_string(),
            ];
            args.extend(requirements.iter().cloned());
            Some(args)
        }
        "npm" | "node" => {
            let mut args = vec![
                "npm".to_string(),
                "install".to_string(),
                "--prefix".to_string(),
                "/app".to_string(),
            ];
            args.extend(requirements.iter().cloned());
            Some(args)
        }
        _ => None,
    }
}

/// Map docker CLI stderr onto the orchestrator error taxonomy.
fn map_cli_error(stderr: &str) -> OrchestratorError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such container") || lower.contains("no such object") {
        OrchestratorError::ContainerNotFound {
            handle: stderr.to_string(),
        }
    } else if lower.contains("cannot connect to the docker daemon")
        || lower.contains("daemon is not running")
    {
        OrchestratorError::Unavailable {
            reason: stderr.to_string(),
        }
    } else if lower.contains("cannot pause") || lower.contains("not supported") {
        OrchestratorError::UnsupportedPause {
            reason: stderr.to_string(),
        }
    } else {
        OrchestratorError::Runtime(stderr.to_string())
    }
}

/// Map a `docker inspect` State JSON object onto [`ContainerState`].
fn map_inspect_state(state: &serde_json::Value) -> ContainerState {
    let status = state.get("Status").and_then(|s| s.as_str()).unwrap_or("");
    match status {
        "running" => ContainerState::Running,
        "paused" => ContainerState::Paused,
        "created" => ContainerState::Created,
        _ => ContainerState::Exited {
            code: state
                .get("ExitCode")
                .and_then(|c| c.as_i64())
                .map(|c| c as i32),
        },
    }
}

/// Parse a `docker stats` percentage like `"12.34%"`.
fn parse_percent(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('%').parse().ok()
}

/// Parse the used side of a `docker stats` MemUsage like `"10.5MiB / 1.9GiB"`.
fn parse_mem_bytes(raw: &str) -> Option<u64> {
    let used = raw.split('/').next()?.trim();
    let split_at = used.find(|c: char| c.is_ascii_alphabetic())?;
    let (value, unit) = used.split_at(split_at);
    let value: f64 = value.trim().parse().ok()?;
    let multiplier: f64 = match unit.trim() {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "kB" | "KB" => 1000.0,
        "MB" => 1e6,
        "GB" => 1e9,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

#[async_trait::async_trait]
impl Orchestrator for DockerOrchestrator {
    fn runtime_name(&self) -> &'static str {
        "docker"
    }

    #[instrument(skip_all, fields(execution_id = %spec.execution_id))]
    async fn prepare(&self, spec: &ExecutionSpec) -> Result<ContainerHandle> {
        self.materialize_payload(spec)?;

        // Pull the image up front so a pull failure is a preparation
        // failure with the puller's output, not a late create failure.
        let pull = self
            .run(&["pull".to_string(), spec.image.clone()])
            .await?;
        if !pull.status.success() {
            let mut combined = String::from_utf8_lossy(&pull.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&pull.stderr));
            return Err(OrchestratorError::PreparationFailed {
                reason: format!("image pull failed for {}", spec.image),
                output: combined,
            }
            .into());
        }

        self.install_dependencies(spec).await?;

        let args = self.build_create_args(spec);
        let container_id = self.run_checked(&args).await.map_err(|e| match e {
            crate::errors::EngineError::Orchestrator(OrchestratorError::Runtime(msg)) => {
                OrchestratorError::PreparationFailed {
                    reason: "container create failed".to_string(),
                    output: msg,
                }
                .into()
            }
            other => other,
        })?;

        Ok(ContainerHandle::new(container_id))
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<ProcessInfo> {
        self.run_checked(&["start".to_string(), handle.id.clone()])
            .await
            .map_err(|e| match e {
                crate::errors::EngineError::Orchestrator(OrchestratorError::Runtime(msg)) => {
                    OrchestratorError::StartFailed { reason: msg }.into()
                }
                other => other,
            })?;

        let pid = self
            .run_checked(&[
                "inspect".to_string(),
                "-f".to_string(),
                "{{.State.Pid}}".to_string(),
                handle.id.clone(),
            ])
            .await
            .ok()
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|pid| *pid > 0);

        Ok(ProcessInfo {
            container_id: handle.id.clone(),
            pid,
        })
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<ExitInfo> {
        let started = std::time::Instant::now();
        self.run_checked(&[
            "stop".to_string(),
            "-t".to_string(),
            grace.as_secs().to_string(),
            handle.id.clone(),
        ])
        .await
        .map_err(|e| match e {
            crate::errors::EngineError::Orchestrator(OrchestratorError::Runtime(msg)) => {
                OrchestratorError::StopFailed { reason: msg }.into()
            }
            other => other,
        })?;

        let code = self
            .run_checked(&[
                "inspect".to_string(),
                "-f".to_string(),
                "{{.State.ExitCode}}".to_string(),
                handle.id.clone(),
            ])
            .await
            .ok()
            .and_then(|raw| raw.parse::<i32>().ok());

        // SIGKILL exit (137) after the grace window means the process
        // ignored graceful termination.
        let forced = code == Some(137) && started.elapsed() >= grace;
        Ok(ExitInfo {
            code,
            forced,
            reason: if forced {
                "killed after grace timeout".to_string()
            } else {
                "stopped".to_string()
            },
        })
    }

    async fn pause(&self, handle: &ContainerHandle) -> Result<()> {
        self.run_checked(&["pause".to_string(), handle.id.clone()])
            .await?;
        Ok(())
    }

    async fn resume(&self, handle: &ContainerHandle) -> Result<()> {
        self.run_checked(&["unpause".to_string(), handle.id.clone()])
            .await?;
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        match self
            .run_checked(&["rm".to_string(), "-f".to_string(), handle.id.clone()])
            .await
        {
            Ok(_) => Ok(()),
            // Removing an already-removed container is a no-op.
            Err(crate::errors::EngineError::Orchestrator(
                OrchestratorError::ContainerNotFound { .. },
            )) => Ok(()),
            Err(other) => Err(other),
        }
    }

    async fn attach_output(
        &self,
        handle: &ContainerHandle,
        since: Option<DateTime<Utc>>,
    ) -> Result<OutputStream> {
        let mut args = vec!["logs".to_string(), "-f".to_string()];
        if let Some(since) = since {
            args.push("--since".to_string());
            args.push(since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        args.push(handle.id.clone());

        let mut child = Command::new(&self.runtime_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OrchestratorError::Unavailable {
                reason: format!("failed to spawn {} logs: {}", self.runtime_path, e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| OrchestratorError::Runtime(
            "log follower has no stdout".to_string(),
        ))?;
        let stderr = child.stderr.take().ok_or_else(|| OrchestratorError::Runtime(
            "log follower has no stderr".to_string(),
        ))?;

        let (tx, stream) = OutputStream::channel();
        let tx_err = tx.clone();

        // `docker logs -f` keeps container stdout on its stdout and stderr
        // on its stderr, and exits when the container's process does, so
        // both pumps terminate on process exit and the channel closes.
        tokio::spawn(pump_chunks(stdout, StreamKind::Stdout, tx));
        tokio::spawn(pump_chunks(stderr, StreamKind::Stderr, tx_err));
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(stream)
    }

    async fn attach_input(&self, handle: &ContainerHandle) -> Result<InputStream> {
        let status = self.inspect(handle).await?;
        if status.state != ContainerState::Running {
            return Err(OrchestratorError::InputUnavailable {
                reason: "process is not running".to_string(),
            }
            .into());
        }

        let mut child = Command::new(&self.runtime_path)
            .args([
                "attach",
                "--no-stdout",
                "--no-stderr",
                handle.id.as_str(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| OrchestratorError::InputUnavailable {
                reason: format!("failed to attach stdin: {}", e),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            OrchestratorError::InputUnavailable {
                reason: "attach produced no stdin".to_string(),
            }
        })?;

        let (input, mut rx) = InputStream::channel(16);
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if stdin.write_all(&bytes).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
            drop(stdin);
            let _ = child.wait().await;
        });

        Ok(input)
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus> {
        let raw = self
            .run_checked(&[
                "inspect".to_string(),
                "-f".to_string(),
                "{{json .State}}".to_string(),
                handle.id.clone(),
            ])
            .await?;

        let state_json: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| OrchestratorError::Runtime(format!("bad inspect output: {}", e)))?;
        let state = map_inspect_state(&state_json);

        // Resource snapshot is best effort; a slow or failed stats call must
        // not fail the health poll.
        let resources = if state == ContainerState::Running {
            match tokio::time::timeout(
                STATS_TIMEOUT,
                self.run_checked(&[
                    "stats".to_string(),
                    "--no-stream".to_string(),
                    "--format".to_string(),
                    "{{json .}}".to_string(),
                    handle.id.clone(),
                ]),
            )
            .await
            {
                Ok(Ok(raw)) => serde_json::from_str::<serde_json::Value>(&raw)
                    .ok()
                    .and_then(|stats| {
                        let cpu = stats.get("CPUPerc").and_then(|v| v.as_str())?;
                        let mem = stats.get("MemUsage").and_then(|v| v.as_str())?;
                        Some(ResourceUsage {
                            cpu_percent: parse_percent(cpu)?,
                            memory_bytes: parse_mem_bytes(mem)?,
                        })
                    }),
                Ok(Err(e)) => {
                    warn!(handle = %handle.id, error = %e, "stats poll failed");
                    None
                }
                Err(_) => {
                    warn!(handle = %handle.id, "stats poll timed out");
                    None
                }
            }
        } else {
            None
        };

        Ok(ContainerStatus { state, resources })
    }
}

/// Forward raw reads from one process stream into the chunk channel until
/// EOF. Reading never blocks past process exit because the pipe closes.
async fn pump_chunks<R>(mut reader: R, stream: StreamKind, tx: tokio::sync::mpsc::Sender<OutputChunk>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = OutputChunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn script_spec() -> ExecutionSpec {
        let mut env = HashMap::new();
        env.insert("MODE".to_string(), "demo".to_string());
        ExecutionSpec {
            execution_id: "speed-1700000000000-abc123".to_string(),
            app_id: "speed".to_string(),
            kind: AppKind::InterpretedScript,
            image: "python:3.11-slim".to_string(),
            source_code: Some("print('hi')".to_string()),
            artifact: None,
            entry_point: "main.py".to_string(),
            interpreter: vec!["python".to_string(), "-u".to_string()],
            args: vec!["--fast".to_string()],
            env,
            working_dir: None,
            dependencies: vec![],
            memory_limit_mb: 128,
            cpu_limit: 0.5,
        }
    }

    #[test]
    fn test_create_args_for_interpreted_script() {
        let orch = DockerOrchestrator::new("/data/apps");
        let args = orch.build_create_args(&script_spec());

        assert_eq!(args[0], "create");
        assert!(args.contains(&"--name".to_string()));
        assert!(args.contains(&"bosun-speed-1700000000000-abc123".to_string()));
        assert!(args.contains(&"--memory".to_string()));
        assert!(args.contains(&"128m".to_string()));
        assert!(args.contains(&"--cpus".to_string()));
        assert!(args.contains(&"0.5".to_string()));
        assert!(args.contains(&"-e".to_string()));
        assert!(args.contains(&"MODE=demo".to_string()));
        assert!(args.contains(&"/data/apps/speed:/app".to_string()));

        // Command tail: interpreter, unbuffered flag, entry point, args.
        let image_pos = args.iter().position(|a| a == "python:3.11-slim").unwrap();
        assert_eq!(
            &args[image_pos + 1..],
            &["python", "-u", "main.py", "--fast"]
        );
    }

    #[test]
    fn test_create_args_for_native_binary() {
        let orch = DockerOrchestrator::new("/data/apps");
        let mut spec = script_spec();
        spec.kind = AppKind::NativeBinary;
        spec.source_code = None;
        spec.artifact = Some("/home/dev/output/speedapp".to_string());
        spec.entry_point = "speedapp".to_string();
        spec.interpreter = vec![];
        spec.args = vec![];

        let args = orch.build_create_args(&spec);
        assert!(args.contains(&"/home/dev/output/speedapp:/app/speedapp:ro".to_string()));
        let image_pos = args.iter().position(|a| a == "python:3.11-slim").unwrap();
        assert_eq!(&args[image_pos + 1..], &["/app/speedapp"]);
    }

    #[test]
    fn test_create_args_for_container_image_default_command() {
        let orch = DockerOrchestrator::new("/data/apps");
        let mut spec = script_spec();
        spec.kind = AppKind::ContainerImage;
        spec.image = "ghcr.io/acme/app:2".to_string();
        spec.entry_point = String::new();
        spec.interpreter = vec![];
        spec.args = vec![];

        let args = orch.build_create_args(&spec);
        // Image default command: image ref is the final argument.
        assert_eq!(args.last().unwrap(), "ghcr.io/acme/app:2");
    }

    #[test]
    fn test_install_commands() {
        let pip = install_command("pip", &["numpy>=1.26".to_string()]).unwrap();
        assert_eq!(pip[0], "pip");
        assert!(pip.contains(&"--target".to_string()));
        assert!(pip.contains(&"numpy>=1.26".to_string()));

        let npm = install_command("npm", &["left-pad".to_string()]).unwrap();
        assert_eq!(npm[0], "npm");

        assert!(install_command("cargo", &[]).is_none());
    }

    #[test]
    fn test_group_requirements_preserves_order() {
        let mut spec = script_spec();
        spec.dependencies = vec![
            crate::orchestrator::DependencyRequest {
                ecosystem: "pip".to_string(),
                requirement: "numpy".to_string(),
            },
            crate::orchestrator::DependencyRequest {
                ecosystem: "npm".to_string(),
                requirement: "left-pad".to_string(),
            },
            crate::orchestrator::DependencyRequest {
                ecosystem: "pip".to_string(),
                requirement: "requests".to_string(),
            },
        ];

        let grouped = group_requirements(&spec);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "pip");
        assert_eq!(grouped[0].1, vec!["numpy", "requests"]);
        assert_eq!(grouped[1].0, "npm");
    }

    #[test]
    fn test_cli_error_mapping() {
        assert!(matches!(
            map_cli_error("Error: No such container: bosun-x"),
            OrchestratorError::ContainerNotFound { .. }
        ));
        assert!(matches!(
            map_cli_error("Cannot connect to the Docker daemon at unix:///var/run/docker.sock"),
            OrchestratorError::Unavailable { .. }
        ));
        assert!(matches!(
            map_cli_error("Error response from daemon: Cannot pause container"),
            OrchestratorError::UnsupportedPause { .. }
        ));
        assert!(matches!(
            map_cli_error("some other failure"),
            OrchestratorError::Runtime(_)
        ));
    }

    #[test]
    fn test_inspect_state_mapping() {
        let running: serde_json::Value =
            serde_json::json!({"Status": "running", "ExitCode": 0});
        assert_eq!(map_inspect_state(&running), ContainerState::Running);

        let paused: serde_json::Value = serde_json::json!({"Status": "paused"});
        assert_eq!(map_inspect_state(&paused), ContainerState::Paused);

        let exited: serde_json::Value =
            serde_json::json!({"Status": "exited", "ExitCode": 137});
        assert_eq!(
            map_inspect_state(&exited),
            ContainerState::Exited { code: Some(137) }
        );
    }

    #[test]
    fn test_stats_parsers() {
        assert_eq!(parse_percent("12.34%"), Some(12.34));
        assert_eq!(parse_percent("0.00%"), Some(0.0));
        assert_eq!(parse_percent("oops"), None);

        assert_eq!(parse_mem_bytes("10MiB / 1.9GiB"), Some(10 * 1024 * 1024));
        assert_eq!(parse_mem_bytes("512KiB / 1GiB"), Some(512 * 1024));
        assert_eq!(parse_mem_bytes("2GB / 8GB"), Some(2_000_000_000));
        assert_eq!(parse_mem_bytes("750B / 1GiB"), Some(750));
        assert_eq!(parse_mem_bytes("garbage"), None);
    }
}
