//! Container orchestrator contract
//!
//! The lifecycle controller drives containers exclusively through the
//! [`Orchestrator`] trait so the engine never embeds runtime-specific calls
//! in business logic. The Docker CLI adapter in [`crate::docker`] is the
//! production implementation; [`mock::MockOrchestrator`] provides a scripted
//! implementation for tests.
//!
//! Output and input are modeled as explicit channels: `attach_output` yields
//! a stream of byte chunks (stdout and stderr distinguishable) that
//! terminates when the process exits, and `attach_input` yields a sender
//! that forwards bytes to the process's stdin while it is running.

use crate::app::AppKind;
use crate::errors::{OrchestratorError, Result};
use crate::execution::{ExitInfo, ResourceUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Channel capacity for output streams; drains consume continuously, so this
/// only needs to absorb short bursts.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// One dependency the orchestrator must install while preparing an
/// execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRequest {
    /// Package ecosystem (`pip`, `npm`)
    pub ecosystem: String,
    /// Installer requirement string (name plus version constraint)
    pub requirement: String,
}

/// Everything the orchestrator needs to materialize and run one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSpec {
    /// Execution id; used to derive container and payload names
    pub execution_id: String,
    /// Owning application id
    pub app_id: String,
    /// Execution strategy
    pub kind: AppKind,
    /// Container image to run in (for container-image apps, the payload itself)
    pub image: String,
    /// Inline source code to materialize (interpreted scripts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    /// Binary path on the host (native binaries)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Entry point: script file, binary name, or image command
    pub entry_point: String,
    /// Interpreter prefix for the entry point (e.g. `["python", "-u"]` for
    /// unbuffered scripts); empty when the entry point runs directly
    #[serde(default)]
    pub interpreter: Vec<String>,
    /// Arguments for the entry point
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables injected into the container
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Dependencies to install during preparation
    #[serde(default)]
    pub dependencies: Vec<DependencyRequest>,
    /// Memory ceiling in megabytes (0 = unlimited); enforced by the runtime
    #[serde(default)]
    pub memory_limit_mb: u64,
    /// CPU share in fractional CPUs (0.0 = unlimited); enforced by the runtime
    #[serde(default)]
    pub cpu_limit: f64,
}

/// Opaque reference to a prepared execution environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Runtime container id
    pub id: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Process information returned by a successful start
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    /// Container id (may differ from the handle for runtimes that rename)
    pub container_id: String,
    /// Host pid of the container's init process, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
}

/// Point-in-time container state as reported by `inspect`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum ContainerState {
    /// Created but not started
    Created,
    /// Process is running
    Running,
    /// Process is frozen
    Paused,
    /// Process has terminated
    Exited {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },
}

impl ContainerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerState::Exited { .. })
    }
}

/// Inspect result: live state plus a best-effort resource snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub state: ContainerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceUsage>,
}

/// Which process stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One raw chunk read from the process output
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub bytes: Vec<u8>,
}

/// Live output stream of an execution; ends when the process exits.
pub struct OutputStream {
    rx: mpsc::Receiver<OutputChunk>,
}

impl OutputStream {
    /// Create a paired sender/stream.
    pub fn channel() -> (mpsc::Sender<OutputChunk>, OutputStream) {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        (tx, OutputStream { rx })
    }

    /// Next chunk, or `None` once the stream has closed.
    pub async fn next(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }
}

/// Writable stdin of an execution.
///
/// Sends fail with [`OrchestratorError::InputUnavailable`] once the process
/// has exited and the pump on the far side is gone.
#[derive(Clone)]
pub struct InputStream {
    tx: mpsc::Sender<Vec<u8>>,
}

impl InputStream {
    /// Create a paired input stream/receiver.
    pub fn channel(capacity: usize) -> (InputStream, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (InputStream { tx }, rx)
    }

    /// Forward bytes to the process's stdin.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        self.tx
            .send(bytes)
            .await
            .map_err(|_| OrchestratorError::InputUnavailable {
                reason: "process input closed".to_string(),
            })?;
        Ok(())
    }
}

/// Container orchestrator contract consumed by the lifecycle controller.
///
/// Operations are idempotent with respect to their target state where the
/// underlying runtime allows it; `remove` in particular is a no-op on an
/// already-removed handle.
#[async_trait::async_trait]
pub trait Orchestrator: Send + Sync {
    /// Name of the backing runtime (e.g. "docker", "mock").
    fn runtime_name(&self) -> &'static str;

    /// Materialize an execution environment: pull the image, copy the
    /// payload, install declared dependencies, and create the container.
    /// Fails with [`OrchestratorError::PreparationFailed`] carrying the raw
    /// installer output.
    async fn prepare(&self, spec: &ExecutionSpec) -> Result<ContainerHandle>;

    /// Begin execution of a prepared environment.
    async fn start(&self, handle: &ContainerHandle) -> Result<ProcessInfo>;

    /// Request graceful termination, escalating to a forceful kill once
    /// `grace` elapses. Always eventually returns exit info.
    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<ExitInfo>;

    /// Suspend the process without losing state. Surfaces
    /// [`OrchestratorError::UnsupportedPause`] when the runtime cannot.
    async fn pause(&self, handle: &ContainerHandle) -> Result<()>;

    /// Continue a paused process.
    async fn resume(&self, handle: &ContainerHandle) -> Result<()>;

    /// Delete the container and its ephemeral filesystem. Safe to call on an
    /// already-removed handle.
    async fn remove(&self, handle: &ContainerHandle) -> Result<()>;

    /// Attach to the live output stream. When `since` is given, replay only
    /// output after that instant (used when re-adopting executions after a
    /// controller restart). The stream terminates when the process exits.
    async fn attach_output(
        &self,
        handle: &ContainerHandle,
        since: Option<DateTime<Utc>>,
    ) -> Result<OutputStream>;

    /// Attach to the process's stdin. Fails with
    /// [`OrchestratorError::InputUnavailable`] when the runtime offers no
    /// input capability or the process is not running.
    async fn attach_input(&self, handle: &ContainerHandle) -> Result<InputStream>;

    /// Point-in-time state poll, used for health reporting and for
    /// reconciling runtime state after a controller restart.
    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus>;
}

pub mod mock {
    //! Scripted orchestrator for tests
    //!
    //! Simulates container behavior without a runtime: tests seed prepared
    //! containers, push output lines, flip states, and script failures
    //! (preparation failure with installer output, unsupported pause,
    //! graceful-stop escalation, inspect outages).

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct MockContainer {
        state: ContainerState,
        /// Simulates a process that ignores SIGTERM; stop then reports a
        /// forced kill after the grace period.
        ignores_term: bool,
        /// Exit code reported on graceful stop
        exit_code: i32,
    }

    /// Scripted failure modes
    #[derive(Debug, Default)]
    struct MockScript {
        prepare_failure: Option<(String, String)>,
        start_failure: Option<String>,
        pause_unsupported: bool,
        inspect_outage: bool,
        input_unavailable: bool,
    }

    #[derive(Default)]
    struct MockState {
        containers: HashMap<String, MockContainer>,
        output_senders: HashMap<String, mpsc::Sender<OutputChunk>>,
        input_log: HashMap<String, Vec<Vec<u8>>>,
        calls: Vec<String>,
        next_id: u64,
    }

    /// Mock orchestrator implementation
    pub struct MockOrchestrator {
        script: Mutex<MockScript>,
        state: Arc<Mutex<MockState>>,
    }

    impl Default for MockOrchestrator {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockOrchestrator {
        pub fn new() -> Self {
            Self {
                script: Mutex::new(MockScript::default()),
                state: Arc::new(Mutex::new(MockState::default())),
            }
        }

        /// Script the next `prepare` to fail with the given reason and raw
        /// installer output.
        pub fn fail_prepare(&self, reason: &str, output: &str) {
            self.script.lock().unwrap().prepare_failure =
                Some((reason.to_string(), output.to_string()));
        }

        /// Script every `start` to fail.
        pub fn fail_start(&self, reason: &str) {
            self.script.lock().unwrap().start_failure = Some(reason.to_string());
        }

        /// Script `pause`/`resume` to be unsupported.
        pub fn set_pause_unsupported(&self, unsupported: bool) {
            self.script.lock().unwrap().pause_unsupported = unsupported;
        }

        /// Script `inspect` to fail (simulates an unreachable runtime).
        pub fn set_inspect_outage(&self, outage: bool) {
            self.script.lock().unwrap().inspect_outage = outage;
        }

        /// Script `attach_input` to report no input capability.
        pub fn set_input_unavailable(&self, unavailable: bool) {
            self.script.lock().unwrap().input_unavailable = unavailable;
        }

        /// Make the container behind `handle` ignore graceful termination.
        pub fn set_ignores_term(&self, handle: &ContainerHandle) {
            if let Some(c) = self.state.lock().unwrap().containers.get_mut(&handle.id) {
                c.ignores_term = true;
            }
        }

        /// Set the exit code reported when the container stops gracefully.
        pub fn set_exit_code(&self, handle: &ContainerHandle, code: i32) {
            if let Some(c) = self.state.lock().unwrap().containers.get_mut(&handle.id) {
                c.exit_code = code;
            }
        }

        /// Push one output line into the container's attached stream.
        pub async fn push_output(&self, handle: &ContainerHandle, stream: StreamKind, text: &str) {
            let sender = self
                .state
                .lock()
                .unwrap()
                .output_senders
                .get(&handle.id)
                .cloned();
            if let Some(tx) = sender {
                let _ = tx
                    .send(OutputChunk {
                        stream,
                        bytes: text.as_bytes().to_vec(),
                    })
                    .await;
            }
        }

        /// Simulate the process exiting on its own with `code`. Closes the
        /// output stream and flips the container state.
        pub fn terminate(&self, handle: &ContainerHandle, code: i32) {
            let mut state = self.state.lock().unwrap();
            if let Some(c) = state.containers.get_mut(&handle.id) {
                c.state = ContainerState::Exited { code: Some(code) };
            }
            state.output_senders.remove(&handle.id);
        }

        /// Bytes forwarded to the container's stdin so far.
        pub fn input_received(&self, handle: &ContainerHandle) -> Vec<Vec<u8>> {
            self.state
                .lock()
                .unwrap()
                .input_log
                .get(&handle.id)
                .cloned()
                .unwrap_or_default()
        }

        /// Ordered list of operations invoked on this orchestrator.
        pub fn call_history(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        /// Number of containers currently known to the mock.
        pub fn container_count(&self) -> usize {
            self.state.lock().unwrap().containers.len()
        }

        fn record(&self, call: String) {
            self.state.lock().unwrap().calls.push(call);
        }
    }

    #[async_trait::async_trait]
    impl Orchestrator for MockOrchestrator {
        fn runtime_name(&self) -> &'static str {
            "mock"
        }

        async fn prepare(&self, spec: &ExecutionSpec) -> Result<ContainerHandle> {
            self.record(format!("prepare:{}", spec.execution_id));

            if let Some((reason, output)) = self.script.lock().unwrap().prepare_failure.take() {
                return Err(OrchestratorError::PreparationFailed { reason, output }.into());
            }

            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("mock-{}-{}", spec.execution_id, state.next_id);
            state.containers.insert(
                id.clone(),
                MockContainer {
                    state: ContainerState::Created,
                    ignores_term: false,
                    exit_code: 0,
                },
            );
            Ok(ContainerHandle::new(id))
        }

        async fn start(&self, handle: &ContainerHandle) -> Result<ProcessInfo> {
            self.record(format!("start:{}", handle.id));

            if let Some(reason) = self.script.lock().unwrap().start_failure.clone() {
                return Err(OrchestratorError::StartFailed { reason }.into());
            }

            let mut state = self.state.lock().unwrap();
            match state.containers.get_mut(&handle.id) {
                Some(c) => {
                    c.state = ContainerState::Running;
                    Ok(ProcessInfo {
                        container_id: handle.id.clone(),
                        pid: Some(4242),
                    })
                }
                None => Err(OrchestratorError::ContainerNotFound {
                    handle: handle.id.clone(),
                }
                .into()),
            }
        }

        async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<ExitInfo> {
            self.record(format!("stop:{}", handle.id));

            let ignores_term = {
                let state = self.state.lock().unwrap();
                match state.containers.get(&handle.id) {
                    Some(c) => c.ignores_term,
                    None => {
                        return Err(OrchestratorError::ContainerNotFound {
                            handle: handle.id.clone(),
                        }
                        .into())
                    }
                }
            };

            let exit = if ignores_term {
                // The process ignored SIGTERM; simulate the grace period
                // elapsing before the forced kill (capped to keep tests fast).
                tokio::time::sleep(grace.min(Duration::from_millis(50))).await;
                ExitInfo {
                    code: Some(137),
                    forced: true,
                    reason: "killed after grace timeout".to_string(),
                }
            } else {
                let state = self.state.lock().unwrap();
                let code = state.containers.get(&handle.id).map(|c| c.exit_code);
                ExitInfo {
                    code,
                    forced: false,
                    reason: "stopped".to_string(),
                }
            };

            let mut state = self.state.lock().unwrap();
            if let Some(c) = state.containers.get_mut(&handle.id) {
                c.state = ContainerState::Exited { code: exit.code };
            }
            state.output_senders.remove(&handle.id);
            Ok(exit)
        }

        async fn pause(&self, handle: &ContainerHandle) -> Result<()> {
            self.record(format!("pause:{}", handle.id));

            if self.script.lock().unwrap().pause_unsupported {
                return Err(OrchestratorError::UnsupportedPause {
                    reason: "runtime has no freezer support".to_string(),
                }
                .into());
            }

            let mut state = self.state.lock().unwrap();
            match state.containers.get_mut(&handle.id) {
                Some(c) if c.state == ContainerState::Running => {
                    c.state = ContainerState::Paused;
                    Ok(())
                }
                Some(_) => Err(OrchestratorError::Runtime(
                    "container is not running".to_string(),
                )
                .into()),
                None => Err(OrchestratorError::ContainerNotFound {
                    handle: handle.id.clone(),
                }
                .into()),
            }
        }

        async fn resume(&self, handle: &ContainerHandle) -> Result<()> {
            self.record(format!("resume:{}", handle.id));

            if self.script.lock().unwrap().pause_unsupported {
                return Err(OrchestratorError::UnsupportedPause {
                    reason: "runtime has no freezer support".to_string(),
                }
                .into());
            }

            let mut state = self.state.lock().unwrap();
            match state.containers.get_mut(&handle.id) {
                Some(c) if c.state == ContainerState::Paused => {
                    c.state = ContainerState::Running;
                    Ok(())
                }
                Some(_) => Err(OrchestratorError::Runtime(
                    "container is not paused".to_string(),
                )
                .into()),
                None => Err(OrchestratorError::ContainerNotFound {
                    handle: handle.id.clone(),
                }
                .into()),
            }
        }

        async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
            self.record(format!("remove:{}", handle.id));

            // Idempotent: removing an unknown handle is a no-op.
            let mut state = self.state.lock().unwrap();
            state.containers.remove(&handle.id);
            state.output_senders.remove(&handle.id);
            Ok(())
        }

        async fn attach_output(
            &self,
            handle: &ContainerHandle,
            _since: Option<DateTime<Utc>>,
        ) -> Result<OutputStream> {
            self.record(format!("attach_output:{}", handle.id));

            let mut state = self.state.lock().unwrap();
            if !state.containers.contains_key(&handle.id) {
                return Err(OrchestratorError::ContainerNotFound {
                    handle: handle.id.clone(),
                }
                .into());
            }
            let (tx, stream) = OutputStream::channel();
            state.output_senders.insert(handle.id.clone(), tx);
            Ok(stream)
        }

        async fn attach_input(&self, handle: &ContainerHandle) -> Result<InputStream> {
            self.record(format!("attach_input:{}", handle.id));

            if self.script.lock().unwrap().input_unavailable {
                return Err(OrchestratorError::InputUnavailable {
                    reason: "runtime offers no stdin for this execution".to_string(),
                }
                .into());
            }

            {
                let state = self.state.lock().unwrap();
                match state.containers.get(&handle.id) {
                    Some(c) if c.state == ContainerState::Running => {}
                    Some(_) => {
                        return Err(OrchestratorError::InputUnavailable {
                            reason: "process is not running".to_string(),
                        }
                        .into())
                    }
                    None => {
                        return Err(OrchestratorError::ContainerNotFound {
                            handle: handle.id.clone(),
                        }
                        .into())
                    }
                }
            }

            let (input, mut rx) = InputStream::channel(16);
            let shared = Arc::clone(&self.state);
            let id = handle.id.clone();
            tokio::spawn(async move {
                while let Some(bytes) = rx.recv().await {
                    shared
                        .lock()
                        .unwrap()
                        .input_log
                        .entry(id.clone())
                        .or_default()
                        .push(bytes);
                }
            });
            Ok(input)
        }

        async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus> {
            self.record(format!("inspect:{}", handle.id));

            if self.script.lock().unwrap().inspect_outage {
                return Err(OrchestratorError::Timeout { timeout_secs: 0 }.into());
            }

            let state = self.state.lock().unwrap();
            match state.containers.get(&handle.id) {
                Some(c) => Ok(ContainerStatus {
                    state: c.state,
                    resources: Some(ResourceUsage {
                        cpu_percent: 1.5,
                        memory_bytes: 8 * 1024 * 1024,
                    }),
                }),
                None => Err(OrchestratorError::ContainerNotFound {
                    handle: handle.id.clone(),
                }
                .into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockOrchestrator;
    use super::*;
    use crate::errors::EngineError;

    fn spec(execution_id: &str) -> ExecutionSpec {
        ExecutionSpec {
            execution_id: execution_id.to_string(),
            app_id: "demo".to_string(),
            kind: AppKind::InterpretedScript,
            image: "python:3.11-slim".to_string(),
            source_code: Some("print('hi')".to_string()),
            artifact: None,
            entry_point: "main.py".to_string(),
            interpreter: vec!["python".to_string(), "-u".to_string()],
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
            dependencies: vec![],
            memory_limit_mb: 0,
            cpu_limit: 0.0,
        }
    }

    #[tokio::test]
    async fn test_mock_lifecycle_round_trip() {
        let orch = MockOrchestrator::new();
        let handle = orch.prepare(&spec("e1")).await.unwrap();
        let info = orch.start(&handle).await.unwrap();
        assert_eq!(info.container_id, handle.id);

        let status = orch.inspect(&handle).await.unwrap();
        assert_eq!(status.state, ContainerState::Running);

        let exit = orch.stop(&handle, Duration::from_secs(1)).await.unwrap();
        assert_eq!(exit.code, Some(0));
        assert!(!exit.forced);

        orch.remove(&handle).await.unwrap();
        // Idempotent remove.
        orch.remove(&handle).await.unwrap();
        assert_eq!(orch.container_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_stop_escalates_when_term_ignored() {
        let orch = MockOrchestrator::new();
        let handle = orch.prepare(&spec("e2")).await.unwrap();
        orch.start(&handle).await.unwrap();
        orch.set_ignores_term(&handle);

        let exit = orch.stop(&handle, Duration::from_secs(1)).await.unwrap();
        assert!(exit.forced);
        assert_eq!(exit.code, Some(137));
    }

    #[tokio::test]
    async fn test_mock_output_stream_terminates_on_exit() {
        let orch = MockOrchestrator::new();
        let handle = orch.prepare(&spec("e3")).await.unwrap();
        orch.start(&handle).await.unwrap();

        let mut stream = orch.attach_output(&handle, None).await.unwrap();
        orch.push_output(&handle, StreamKind::Stdout, "hello\n").await;

        let chunk = stream.next().await.unwrap();
        assert_eq!(chunk.stream, StreamKind::Stdout);
        assert_eq!(chunk.bytes, b"hello\n");

        orch.terminate(&handle, 0);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_pause_unsupported_is_surfaced() {
        let orch = MockOrchestrator::new();
        let handle = orch.prepare(&spec("e4")).await.unwrap();
        orch.start(&handle).await.unwrap();
        orch.set_pause_unsupported(true);

        let err = orch.pause(&handle).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Orchestrator(OrchestratorError::UnsupportedPause { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_input_recorded_only_while_running() {
        let orch = MockOrchestrator::new();
        let handle = orch.prepare(&spec("e5")).await.unwrap();

        // Not running yet: input is rejected.
        assert!(orch.attach_input(&handle).await.is_err());

        orch.start(&handle).await.unwrap();
        let input = orch.attach_input(&handle).await.unwrap();
        input.send(b"ping\n".to_vec()).await.unwrap();

        // Give the pump task a tick to record.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(orch.input_received(&handle), vec![b"ping\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_mock_prepare_failure_carries_installer_output() {
        let orch = MockOrchestrator::new();
        orch.fail_prepare("pip install failed", "ERROR: no matching distribution");

        let err = orch.prepare(&spec("e6")).await.unwrap_err();
        match err {
            EngineError::Orchestrator(OrchestratorError::PreparationFailed {
                output, ..
            }) => {
                assert!(output.contains("no matching distribution"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
