// ABOUTME: Integration tests for running cells end to end against a scripted provider
// ABOUTME: Covers dataset access, lock conflicts, timeouts, infrastructure failures, panics and output externalization

mod common;

use cellar_notebook::{CellKind, CellStatus, NotebookStorage, OutputKind};
use cellar_sandbox::{EventSink, ExecutionStatus, NotebookEvent, Runtime, RuntimeError};
use common::{drain_events, harness, harness_with, register_csv, test_config, FakeProvider};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_dataset_row_count_scenario() {
    let h = harness().await;
    register_csv(&h, "proj_1", "sales.csv", 120).await;

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "len(pd.read_csv(\"sales.csv\"))", None)
        .await
        .unwrap();

    let mut rx = h.sink.subscribe();
    let outcome = h.runtime.run(&cell.id, "proj_1").await.unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.cell.status, CellStatus::Success);
    assert_eq!(outcome.cell.execution_count, 1);
    assert_eq!(outcome.cell.outputs.len(), 1);
    assert_eq!(outcome.cell.outputs[0].kind, OutputKind::Text);
    assert_eq!(outcome.cell.outputs[0].content, "120");
    assert!(outcome.cell.duration_ms.is_some());

    // Lock released once the run returns
    let lock = h
        .storage
        .get_cell_lock(&cell.id, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(!lock.locked);

    assert_eq!(
        drain_events(&mut rx),
        vec!["cell_locked", "cell_executing", "cell_executed", "cell_unlocked"]
    );

    // All three dataset conventions were materialized
    let sandbox = h.runtime.sandboxes().get("proj_1").await.unwrap();
    for relative in ["sales.csv", "datasets/sales.csv"] {
        assert!(sandbox.workspace_path.join(relative).exists());
    }
    assert_eq!(sandbox.datasets.len(), 3);
}

#[tokio::test]
async fn test_concurrent_run_is_rejected_with_holder() {
    let h = harness().await;
    h.provider.set_run_delay(Duration::from_millis(400));

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "print(\"hi\")", None)
        .await
        .unwrap();

    let runtime = h.runtime.clone();
    let cell_id = cell.id.clone();
    let first = tokio::spawn(async move { runtime.run_as(&cell_id, "proj_1", "human").await });

    // Wait until the first run holds the lock
    let mut locked = false;
    for _ in 0..100 {
        let lock = h
            .storage
            .get_cell_lock(&cell.id, Duration::from_secs(60))
            .await
            .unwrap();
        if lock.locked {
            locked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(locked);

    let err = h.runtime.run_as(&cell.id, "proj_1", "agent").await.unwrap_err();
    match err {
        RuntimeError::Conflict { cell_id, holder, since } => {
            assert_eq!(cell_id, cell.id);
            assert_eq!(holder, "human");
            assert!(since.is_some());
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.cell.outputs[0].content, "hi\n");

    // Only the winning run executed and counted
    assert_eq!(h.provider.run_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.storage.get_cell(&cell.id).await.unwrap().execution_count, 1);
}

#[tokio::test]
async fn test_timeout_marks_error_and_releases_lock() {
    let h = harness_with(|config| config.exec_timeout = Duration::from_millis(300)).await;

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "import time\ntime.sleep(600)", None)
        .await
        .unwrap();

    let outcome = h.runtime.run(&cell.id, "proj_1").await.unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Timeout);
    assert_eq!(outcome.cell.status, CellStatus::Error);
    assert_eq!(outcome.cell.execution_count, 1);
    let last = outcome.cell.outputs.last().unwrap();
    assert_eq!(last.kind, OutputKind::Error);
    assert_eq!(last.content, "Execution timed out after 0.3 seconds");

    assert!(!h
        .storage
        .get_cell_lock(&cell.id, Duration::from_secs(60))
        .await
        .unwrap()
        .locked);

    // The sandbox survives a timed-out run
    let again = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "print(\"after\")", None)
        .await
        .unwrap();
    let outcome = h.runtime.run(&again.id, "proj_1").await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_code_error_is_persisted_not_returned() {
    let h = harness().await;
    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "1/0", None)
        .await
        .unwrap();

    let outcome = h.runtime.run(&cell.id, "proj_1").await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Error);
    assert_eq!(outcome.cell.status, CellStatus::Error);
    assert!(outcome.cell.outputs[0].content.contains("ZeroDivisionError"));
}

#[tokio::test]
async fn test_markdown_cells_are_not_executed() {
    let h = harness().await;
    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Markdown, "# Notes", None)
        .await
        .unwrap();

    let err = h.runtime.run(&cell.id, "proj_1").await.unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidRequest(_)));

    let stored = h.storage.get_cell(&cell.id).await.unwrap();
    assert_eq!(stored.execution_count, 0);
    assert!(stored.locked_by.is_none());
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_cell_is_not_found() {
    let h = harness().await;
    let err = h.runtime.run("cell_missing", "proj_1").await.unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound(_)));
}

#[tokio::test]
async fn test_creation_failure_then_retry() {
    let h = harness().await;
    h.provider.fail_next_creates(1);

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "print(\"ok\")", None)
        .await
        .unwrap();

    let mut rx = h.sink.subscribe();
    let err = h.runtime.run(&cell.id, "proj_1").await.unwrap_err();
    assert!(matches!(err, RuntimeError::SandboxUnavailable(_)));

    let failed = h.storage.get_cell(&cell.id).await.unwrap();
    assert_eq!(failed.status, CellStatus::Error);
    assert_eq!(failed.execution_count, 1);
    assert_eq!(failed.outputs.len(), 1);
    assert_eq!(failed.outputs[0].kind, OutputKind::Error);
    assert!(failed.locked_by.is_none());
    assert!(h.runtime.sandboxes().get("proj_1").await.is_none());
    assert_eq!(
        drain_events(&mut rx),
        vec!["cell_locked", "cell_executing", "cell_executed", "cell_unlocked"]
    );

    let outcome = h.runtime.run(&cell.id, "proj_1").await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.cell.execution_count, 2);
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unavailable_backend_fails_fast() {
    let h = harness().await;
    h.provider.set_unavailable(true);

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "print(\"ok\")", None)
        .await
        .unwrap();

    let err = h.runtime.run(&cell.id, "proj_1").await.unwrap_err();
    assert!(matches!(err, RuntimeError::SandboxUnavailable(_)));
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_large_output_is_externalized() {
    let h = harness_with(|config| config.output_inline_max_bytes = 1024).await;

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "\"x\" * 5000", None)
        .await
        .unwrap();

    let outcome = h.runtime.run(&cell.id, "proj_1").await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert!(outcome.cell.outputs.is_empty());
    assert_eq!(outcome.cell.output_refs.len(), 1);

    let output_ref = &outcome.cell.output_refs[0];
    assert_eq!(output_ref.byte_size, 5000);
    assert_eq!(output_ref.kind, OutputKind::Text);

    let stored = h.runtime.outputs().read_output(&output_ref.storage_key).await.unwrap();
    assert_eq!(stored.len(), 5000);
}

#[tokio::test]
async fn test_parallel_runs_of_different_cells() {
    let h = harness().await;
    h.provider.set_run_delay(Duration::from_millis(100));

    let mut ids = Vec::new();
    for i in 0..4 {
        let cell = h
            .storage
            .create_cell(&h.notebook.id, CellKind::Code, &format!("print(\"{}\")", i), None)
            .await
            .unwrap();
        ids.push(cell.id);
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let runtime = h.runtime.clone();
        handles.push(tokio::spawn(async move { runtime.run(&id, "proj_1").await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().status, ExecutionStatus::Success);
    }

    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 1);
    for id in ids {
        assert_eq!(h.storage.get_cell(&id).await.unwrap().execution_count, 1);
    }
}

#[tokio::test]
async fn test_editor_respects_run_lock() {
    let h = harness().await;
    h.provider.set_run_delay(Duration::from_millis(300));

    let editor = h.runtime.editor();
    let first = editor
        .create_cell(&h.notebook.id, CellKind::Code, "print(\"a\")", None)
        .await
        .unwrap();
    let second = editor
        .create_cell(&h.notebook.id, CellKind::Markdown, "notes", Some(0))
        .await
        .unwrap();
    assert_eq!(second.position, 0);
    assert_eq!(h.storage.get_cell(&first.id).await.unwrap().position, 1);

    let runtime = h.runtime.clone();
    let cell_id = first.id.clone();
    let run = tokio::spawn(async move { runtime.run_as(&cell_id, "proj_1", "agent").await });

    let mut locked = false;
    for _ in 0..100 {
        let lock = h
            .storage
            .get_cell_lock(&first.id, Duration::from_secs(60))
            .await
            .unwrap();
        if lock.locked {
            locked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(locked);

    let err = editor
        .update_content(&first.id, "print(\"b\")", "human")
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Conflict { ref holder, .. } if holder == "agent"));
    assert_eq!(h.storage.get_cell(&first.id).await.unwrap().content, "print(\"a\")");

    run.await.unwrap().unwrap();

    let updated = editor
        .update_content(&first.id, "print(\"c\")", "human")
        .await
        .unwrap();
    assert_eq!(updated.content, "print(\"c\")");
    assert!(updated.locked_by.is_none());

    let mut rx = h.sink.subscribe();
    let deleted = editor.delete_cell(&second.id, "human").await.unwrap();
    assert_eq!(deleted.id, second.id);
    assert_eq!(h.storage.get_cell(&first.id).await.unwrap().position, 0);
    assert_eq!(drain_events(&mut rx), vec!["cell_deleted", "cell_updated"]);
}

#[tokio::test]
async fn test_long_run_keeps_its_lock_past_the_staleness_window() {
    let h = harness_with(|config| config.lock_stale_after = Duration::from_secs(1)).await;
    h.provider.set_run_delay(Duration::from_millis(2500));

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "print(\"slow\")", None)
        .await
        .unwrap();

    let runtime = h.runtime.clone();
    let cell_id = cell.id.clone();
    let first = tokio::spawn(async move { runtime.run_as(&cell_id, "proj_1", "human").await });

    let mut locked = false;
    for _ in 0..100 {
        let lock = h
            .storage
            .get_cell_lock(&cell.id, Duration::from_secs(1))
            .await
            .unwrap();
        if lock.locked {
            locked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(locked);

    // Older than the staleness window, but the run is still going
    tokio::time::sleep(Duration::from_millis(1300)).await;
    let err = h.runtime.run_as(&cell.id, "proj_1", "agent").await.unwrap_err();
    assert!(matches!(err, RuntimeError::Conflict { ref holder, .. } if holder == "human"));

    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(h.provider.run_calls.load(Ordering::SeqCst), 1);

    let stored = h.storage.get_cell(&cell.id).await.unwrap();
    assert_eq!(stored.execution_count, 1);
    assert!(stored.locked_by.is_none());
}

#[tokio::test]
async fn test_exec_failure_is_persisted_and_returned() {
    let h = harness().await;
    h.provider.fail_execs(true);

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "print(\"ok\")", None)
        .await
        .unwrap();

    let mut rx = h.sink.subscribe();
    let err = h.runtime.run(&cell.id, "proj_1").await.unwrap_err();
    assert!(matches!(err, RuntimeError::SandboxUnavailable(_)));

    let stored = h.storage.get_cell(&cell.id).await.unwrap();
    assert_eq!(stored.status, CellStatus::Error);
    assert_eq!(stored.execution_count, 1);
    assert_eq!(stored.outputs.len(), 1);
    assert_eq!(stored.outputs[0].kind, OutputKind::Error);
    assert!(stored.outputs[0].content.contains("exec refused"));
    assert!(stored.locked_by.is_none());
    assert_eq!(
        drain_events(&mut rx),
        vec!["cell_locked", "cell_executing", "cell_executed", "cell_unlocked"]
    );
}

#[tokio::test]
async fn test_panicking_run_releases_lock_and_counts_once() {
    let h = harness().await;
    h.provider.panic_on_run(true);

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "print(\"boom\")", None)
        .await
        .unwrap();

    let mut rx = h.sink.subscribe();
    let runtime = h.runtime.clone();
    let cell_id = cell.id.clone();
    let joined = tokio::spawn(async move { runtime.run(&cell_id, "proj_1").await }).await;
    assert!(joined.unwrap_err().is_panic());

    let stored = h.storage.get_cell(&cell.id).await.unwrap();
    assert_eq!(stored.status, CellStatus::Error);
    assert_eq!(stored.execution_count, 1);
    assert_eq!(stored.outputs[0].content, "Execution aborted by an internal error");
    assert!(stored.locked_by.is_none());
    assert_eq!(
        drain_events(&mut rx),
        vec!["cell_locked", "cell_executing", "cell_executed", "cell_unlocked"]
    );

    h.provider.panic_on_run(false);
    let outcome = h.runtime.run(&cell.id, "proj_1").await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.cell.execution_count, 2);
}

/// Subscriber that blows up on the first successful `cell_executed`
#[derive(Default)]
struct FailingSubscriber {
    fired: AtomicBool,
    seen: Mutex<Vec<String>>,
}

impl EventSink for FailingSubscriber {
    fn notify(&self, _notebook_id: &str, event: NotebookEvent) {
        if let NotebookEvent::CellExecuted { cell } = &event {
            if cell.status == CellStatus::Success && !self.fired.swap(true, Ordering::SeqCst) {
                panic!("subscriber failed");
            }
        }
        self.seen.lock().unwrap().push(event.event_type().to_string());
    }
}

#[tokio::test]
async fn test_panic_after_recording_does_not_count_twice() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(NotebookStorage::in_memory().await.unwrap());
    let notebook = storage.create_notebook("proj_1", "Sales").await.unwrap();
    let subscriber = Arc::new(FailingSubscriber::default());
    let runtime = Arc::new(Runtime::new(
        test_config(dir.path()),
        storage.clone(),
        FakeProvider::new(),
        subscriber.clone(),
    ));

    let cell = storage
        .create_cell(&notebook.id, CellKind::Code, "print(\"ok\")", None)
        .await
        .unwrap();

    let cell_id = cell.id.clone();
    let joined = tokio::spawn(async move { runtime.run(&cell_id, "proj_1").await }).await;
    assert!(joined.unwrap_err().is_panic());

    let stored = storage.get_cell(&cell.id).await.unwrap();
    assert_eq!(stored.execution_count, 1);
    assert_eq!(stored.status, CellStatus::Success);
    assert!(stored.locked_by.is_none());
    assert_eq!(
        *subscriber.seen.lock().unwrap(),
        vec!["cell_locked", "cell_executing", "cell_unlocked"]
    );
}

#[tokio::test]
async fn test_rerun_and_delete_remove_stale_blobs() {
    let h = harness_with(|config| config.output_inline_max_bytes = 1024).await;

    let cell = h
        .storage
        .create_cell(&h.notebook.id, CellKind::Code, "\"x\" * 5000", None)
        .await
        .unwrap();

    let first = h.runtime.run(&cell.id, "proj_1").await.unwrap();
    let first_blob = h
        .runtime
        .outputs()
        .get_output_path(&first.cell.output_refs[0].storage_key)
        .unwrap();
    assert!(first_blob.exists());

    let second = h.runtime.run(&cell.id, "proj_1").await.unwrap();
    let second_blob = h
        .runtime
        .outputs()
        .get_output_path(&second.cell.output_refs[0].storage_key)
        .unwrap();
    assert!(!first_blob.exists());
    assert!(second_blob.exists());

    h.runtime.editor().delete_cell(&cell.id, "human").await.unwrap();
    assert!(!second_blob.exists());
}
