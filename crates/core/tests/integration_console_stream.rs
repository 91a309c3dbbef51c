//! Console streaming integration tests
//!
//! Drives the controller's output drain with the mock orchestrator and
//! verifies line coalescing, subscriber ordering across the catch-up/live
//! boundary, durable reconstruction after an engine restart, and input
//! forwarding.

mod common;

use bosun_core::app::AppStatus;
use bosun_core::console::LogStreamKind;
use bosun_core::errors::{ConsoleError, EngineError};
use bosun_core::orchestrator::{ContainerHandle, StreamKind};
use common::{rebuild_engine, script_request, test_engine, wait_for_status};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

async fn started_app(engine: &common::TestEngine, app_id: &str) -> (String, ContainerHandle) {
    engine.controller.deploy(script_request(app_id)).await.unwrap();
    let outcome = engine.controller.start(app_id).await.unwrap();
    let execution_id = outcome.execution_id.unwrap();
    let live = engine.registry.active_execution(app_id).await.unwrap().unwrap();
    (execution_id, ContainerHandle::new(live.container_id.unwrap()))
}

/// Wait until the execution's console window holds at least `count` entries
/// of the given stream kind.
async fn wait_for_entries(
    engine: &common::TestEngine,
    execution_id: &str,
    stream: LogStreamKind,
    count: usize,
) -> Vec<String> {
    let start = std::time::Instant::now();
    loop {
        let snapshot = engine.console.snapshot(execution_id).unwrap();
        let matching: Vec<String> = snapshot
            .iter()
            .filter(|e| e.stream == stream)
            .map(|e| e.content.clone())
            .collect();
        if matching.len() >= count {
            return matching;
        }
        if start.elapsed() > WAIT {
            panic!(
                "expected {} {:?} entries for '{}', saw {:?}",
                count, stream, execution_id, matching
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_drain_coalesces_partial_chunks_into_lines() {
    let engine = test_engine().await;
    let (execution_id, handle) = started_app(&engine, "chunky").await;

    // OS-level chunks that split lines arbitrarily.
    engine.orchestrator.push_output(&handle, StreamKind::Stdout, "hel").await;
    engine.orchestrator.push_output(&handle, StreamKind::Stdout, "lo\nwor").await;
    engine.orchestrator.push_output(&handle, StreamKind::Stderr, "warning: x\n").await;

    let stdout = wait_for_entries(&engine, &execution_id, LogStreamKind::Stdout, 1).await;
    assert_eq!(stdout, vec!["hello"]);

    let stderr = wait_for_entries(&engine, &execution_id, LogStreamKind::Stderr, 1).await;
    assert_eq!(stderr, vec!["warning: x"]);

    // The trailing partial line is flushed when the stream closes.
    engine.orchestrator.terminate(&handle, 0);
    wait_for_status(&engine, "chunky", AppStatus::Stopped, WAIT).await;
    let stdout = wait_for_entries(&engine, &execution_id, LogStreamKind::Stdout, 2).await;
    assert_eq!(stdout, vec!["hello", "wor"]);
}

#[tokio::test]
async fn test_subscriber_sees_catch_up_then_live_in_order() {
    let engine = test_engine().await;
    let (execution_id, handle) = started_app(&engine, "ordered").await;

    engine.orchestrator.push_output(&handle, StreamKind::Stdout, "a\nb\n").await;
    wait_for_entries(&engine, &execution_id, LogStreamKind::Stdout, 2).await;

    let (_id, mut rx) = engine
        .controller
        .subscribe_output(&execution_id, true)
        .unwrap();

    engine.orchestrator.push_output(&handle, StreamKind::Stdout, "c\n").await;

    // Catch-up first ("starting"/"running" status entries then a, b),
    // followed by the live entry c, with no reordering or duplication.
    let mut stdout_seen = Vec::new();
    while stdout_seen.len() < 3 {
        let entry = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for entry")
            .expect("stream closed early");
        if entry.stream == LogStreamKind::Stdout {
            stdout_seen.push(entry.content.clone());
        }
    }
    assert_eq!(stdout_seen, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_output_captured_with_zero_subscribers_for_late_catch_up() {
    let engine = test_engine().await;
    let (execution_id, handle) = started_app(&engine, "unwatched").await;

    engine.orchestrator.push_output(&handle, StreamKind::Stdout, "quietly logged\n").await;
    wait_for_entries(&engine, &execution_id, LogStreamKind::Stdout, 1).await;
    assert_eq!(engine.console.subscriber_count(&execution_id), 0);

    // A late subscriber still catches up on everything buffered.
    let (_id, mut rx) = engine
        .controller
        .subscribe_output(&execution_id, true)
        .unwrap();
    let mut found = false;
    while let Ok(Some(entry)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        if entry.content == "quietly logged" {
            found = true;
            break;
        }
    }
    assert!(found);
}

#[tokio::test]
async fn test_console_rebuilt_from_disk_after_engine_restart() {
    let engine = test_engine().await;
    let (execution_id, handle) = started_app(&engine, "durable").await;

    engine.orchestrator.push_output(&handle, StreamKind::Stdout, "before restart\n").await;
    wait_for_entries(&engine, &execution_id, LogStreamKind::Stdout, 1).await;
    engine.orchestrator.terminate(&handle, 0);
    wait_for_status(&engine, "durable", AppStatus::Stopped, WAIT).await;

    // A fresh controller over the same data dir knows nothing in memory;
    // subscribing rebuilds the window from the durable mirror.
    let (controller, console) = rebuild_engine(
        engine.data_dir.path(),
        engine.registry.clone(),
        engine.orchestrator.clone(),
    )
    .await;
    assert!(!console.contains(&execution_id));

    let (_id, mut rx) = controller.subscribe_output(&execution_id, true).unwrap();
    let mut contents = Vec::new();
    while let Ok(Some(entry)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        if entry.stream == LogStreamKind::Stdout {
            contents.push(entry.content.clone());
        }
    }
    assert_eq!(contents, vec!["before restart"]);
}

#[tokio::test]
async fn test_input_forwarded_to_running_execution() {
    let engine = test_engine().await;
    let (execution_id, handle) = started_app(&engine, "interactive").await;

    engine
        .controller
        .send_input(&execution_id, b"ping\n".to_vec())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        engine.orchestrator.input_received(&handle),
        vec![b"ping\n".to_vec()]
    );
}

#[tokio::test]
async fn test_input_rejected_after_execution_stops() {
    let engine = test_engine().await;
    let (execution_id, _handle) = started_app(&engine, "closed").await;

    engine.controller.stop("closed").await.unwrap();
    wait_for_status(&engine, "closed", AppStatus::Stopped, WAIT).await;

    let err = engine
        .controller
        .send_input(&execution_id, b"too late\n".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Console(ConsoleError::InputRejected { .. })
    ));
}

#[tokio::test]
async fn test_input_unavailable_runtime_is_an_explicit_failure() {
    let engine = test_engine().await;
    engine.orchestrator.set_input_unavailable(true);
    let (execution_id, _handle) = started_app(&engine, "no-stdin").await;

    // attach_input failed at start, so the console has no input stream.
    let err = engine
        .controller
        .send_input(&execution_id, b"hello\n".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Console(ConsoleError::InputRejected { .. })
    ));
}

#[tokio::test]
async fn test_unsubscribe_detaches_only_that_observer() {
    let engine = test_engine().await;
    let (execution_id, handle) = started_app(&engine, "multi").await;

    let (first, mut rx1) = engine
        .controller
        .subscribe_output(&execution_id, false)
        .unwrap();
    let (_second, mut rx2) = engine
        .controller
        .subscribe_output(&execution_id, false)
        .unwrap();
    assert_eq!(engine.console.subscriber_count(&execution_id), 2);

    assert!(engine
        .controller
        .unsubscribe_output(&execution_id, first)
        .unwrap());

    engine.orchestrator.push_output(&handle, StreamKind::Stdout, "still flowing\n").await;

    let entry = tokio::time::timeout(WAIT, rx2.recv())
        .await
        .expect("subscriber 2 should still receive")
        .unwrap();
    assert_eq!(entry.content, "still flowing");
    assert!(rx1.try_recv().is_err());
}
