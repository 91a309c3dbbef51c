//! Shared helpers for integration tests

use bosun_core::app::AppStatus;
use bosun_core::config::{ConsoleConfig, EngineConfig, ReconcileConfig};
use bosun_core::console::ConsoleHub;
use bosun_core::controller::{DeployRequest, LifecycleController};
use bosun_core::orchestrator::mock::MockOrchestrator;
use bosun_core::registry::Registry;
use bosun_core::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Engine configuration tuned for fast tests.
pub fn test_config(data_dir: &std::path::Path) -> EngineConfig {
    EngineConfig {
        data_dir: data_dir.to_path_buf(),
        stop_grace_secs: 1,
        console: ConsoleConfig {
            max_entries: 100,
            max_bytes: 64 * 1024,
            line_buffered: true,
            retention_hours: 24,
        },
        reconcile: ReconcileConfig {
            poll_interval_secs: 1,
            inspect_timeout_secs: 1,
            max_consecutive_failures: 2,
            max_execution_secs: 0,
        },
        retry: RetryConfig {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..EngineConfig::default()
    }
}

pub struct TestEngine {
    pub controller: Arc<LifecycleController>,
    pub orchestrator: Arc<MockOrchestrator>,
    pub registry: Registry,
    pub console: Arc<ConsoleHub>,
    pub data_dir: TempDir,
}

/// Build a controller over an in-memory registry, a temp console dir, and
/// the scripted mock orchestrator.
pub async fn test_engine() -> TestEngine {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(data_dir.path());
    let registry = Registry::open_in_memory().await.expect("registry");
    let console =
        Arc::new(ConsoleHub::new(config.console.clone(), config.logs_dir()).expect("console hub"));
    let orchestrator = Arc::new(MockOrchestrator::new());

    let controller = LifecycleController::with_parts(
        config,
        registry.clone(),
        orchestrator.clone() as Arc<dyn bosun_core::orchestrator::Orchestrator>,
        console.clone(),
    );

    TestEngine {
        controller,
        orchestrator,
        registry,
        console,
        data_dir,
    }
}

/// Build a second controller over the same data directory, registry, and
/// orchestrator — simulates an engine restart in the same environment.
pub async fn rebuild_engine(
    data_dir: &std::path::Path,
    registry: Registry,
    orchestrator: Arc<MockOrchestrator>,
) -> (Arc<LifecycleController>, Arc<ConsoleHub>) {
    let config = test_config(data_dir);
    let console =
        Arc::new(ConsoleHub::new(config.console.clone(), config.logs_dir()).expect("console hub"));
    let controller = LifecycleController::with_parts(
        config,
        registry,
        orchestrator as Arc<dyn bosun_core::orchestrator::Orchestrator>,
        console.clone(),
    );
    (controller, console)
}

/// A minimal python script deploy request.
pub fn script_request(app_id: &str) -> DeployRequest {
    DeployRequest {
        app_id: app_id.to_string(),
        language: Some("python".to_string()),
        code: Some("print('one line')".to_string()),
        ..DeployRequest::default()
    }
}

/// Poll the controller until the application reaches `status` or the
/// deadline passes.
pub async fn wait_for_status(
    engine: &TestEngine,
    app_id: &str,
    status: AppStatus,
    deadline: Duration,
) {
    let start = std::time::Instant::now();
    loop {
        let report = engine
            .controller
            .get_status(app_id)
            .await
            .expect("status query");
        if report.status == status {
            return;
        }
        if start.elapsed() > deadline {
            panic!(
                "application '{}' never reached {:?} (currently {:?})",
                app_id, status, report.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
