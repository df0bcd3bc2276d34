// ABOUTME: Shared fixtures for sandbox integration tests
// ABOUTME: An in-process provider that emulates the runner against the real host workspace

#![allow(dead_code)]

use async_trait::async_trait;
use cellar_notebook::{Notebook, NotebookStorage};
use cellar_sandbox::providers::{
    ContainerSpec, ContainerSummary, ExecOutput, ExecRequest, ProviderError, SandboxProvider,
};
use cellar_sandbox::{BroadcastSink, EventEnvelope, Runtime, RuntimeConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub workspace: PathBuf,
}

/// Provider double that runs "cells" by pattern-matching their source.
///
/// Recognized cell shapes:
/// - `len(pd.read_csv("<file>"))` counts data rows of a workspace file
/// - `print("<text>")` writes to stdout
/// - `"x" * <n>` evaluates to an n-byte string
/// - anything containing `time.sleep` runs until coreutils `timeout` kills it
/// - anything containing `raise` or `1/0` fails with a traceback
#[derive(Default)]
pub struct FakeProvider {
    containers: Mutex<HashMap<String, FakeContainer>>,
    packages: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    unavailable: AtomicBool,
    failing_creates: AtomicUsize,
    failing_removes: AtomicBool,
    failing_execs: AtomicBool,
    panicking_runs: AtomicBool,
    run_delay_ms: AtomicUsize,
    pip_delay_ms: AtomicUsize,
    pip_in_flight: AtomicUsize,
    pub max_pip_in_flight: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    pub run_calls: AtomicUsize,
    pub kill_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_next_creates(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.failing_removes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_execs(&self, fail: bool) {
        self.failing_execs.store(fail, Ordering::SeqCst);
    }

    /// Make cell runs panic inside the provider call
    pub fn panic_on_run(&self, panic: bool) {
        self.panicking_runs.store(panic, Ordering::SeqCst);
    }

    pub fn set_run_delay(&self, delay: Duration) {
        self.run_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_pip_delay(&self, delay: Duration) {
        self.pip_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Register a managed container this process never created
    pub fn seed_container(&self, name: &str, project_id: &str) -> String {
        let id = format!("ctr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                project_id: project_id.to_string(),
                workspace: PathBuf::from("/nonexistent"),
            },
        );
        id
    }

    pub fn container_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.containers.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn workspace_of(&self, container_id: &str) -> Option<PathBuf> {
        self.containers
            .lock()
            .unwrap()
            .get(container_id)
            .map(|c| c.workspace.clone())
    }

    async fn run_cell(&self, workspace: &Path, request: &ExecRequest) -> ExecOutput {
        self.run_calls.fetch_add(1, Ordering::SeqCst);

        let limit: f64 = request.cmd[3].parse().unwrap();
        let limit = Duration::from_secs_f64(limit);
        let run_id = request.cmd[7].clone();
        let runs = workspace.join(".cellar/runs");
        let code = std::fs::read_to_string(runs.join(format!("{}.py", run_id))).unwrap();

        let delay = Duration::from_millis(self.run_delay_ms.load(Ordering::SeqCst) as u64);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if code.contains("time.sleep") {
            let deadline = request.deadline.unwrap_or(limit);
            if deadline < limit {
                tokio::time::sleep(deadline).await;
                return ExecOutput {
                    exit_code: None,
                    timed_out: true,
                    ..Default::default()
                };
            }
            // coreutils fires just after the limit
            tokio::time::sleep(limit + Duration::from_millis(10)).await;
            return ExecOutput {
                exit_code: Some(137),
                ..Default::default()
            };
        }

        let mut stdout = String::new();
        let (status, error, outputs) = if code.contains("raise") || code.contains("1/0") {
            (
                "error",
                Some("ZeroDivisionError: division by zero".to_string()),
                vec![serde_json::json!({
                    "kind": "error",
                    "content": "Traceback (most recent call last):\n  File \"<cell>\", line 1\nZeroDivisionError: division by zero\n",
                    "mime_type": "text/plain"
                })],
            )
        } else if let Some(file) = between(&code, "read_csv(\"", "\"") {
            let data = std::fs::read_to_string(workspace.join(file)).unwrap_or_default();
            let rows = data.lines().filter(|l| !l.trim().is_empty()).count().saturating_sub(1);
            (
                "ok",
                None,
                vec![serde_json::json!({"kind": "text", "content": rows.to_string(), "mime_type": "text/plain"})],
            )
        } else if let Some(count) = between(&code, "\"x\" * ", "\n").or_else(|| code.split("\"x\" * ").nth(1)) {
            let n: usize = count.trim().parse().unwrap();
            (
                "ok",
                None,
                vec![serde_json::json!({"kind": "text", "content": "x".repeat(n), "mime_type": "text/plain"})],
            )
        } else {
            if let Some(text) = between(&code, "print(\"", "\")") {
                stdout = format!("{}\n", text);
            }
            ("ok", None, Vec::new())
        };

        let document = serde_json::json!({"status": status, "error": error, "outputs": outputs});
        std::fs::write(runs.join(format!("{}.json", run_id)), document.to_string()).unwrap();

        ExecOutput {
            exit_code: Some(0),
            stdout,
            ..Default::default()
        }
    }

    async fn run_pip(&self, request: &ExecRequest) -> ExecOutput {
        let action = request.cmd[3].as_str();
        let package = request.cmd.last().cloned().unwrap_or_default();

        match action {
            "list" => {
                let packages = self.packages.lock().unwrap().clone();
                let listed: Vec<serde_json::Value> = packages
                    .iter()
                    .map(|p| serde_json::json!({"name": p, "version": "1.0.0"}))
                    .collect();
                ExecOutput {
                    exit_code: Some(0),
                    stdout: serde_json::to_string(&listed).unwrap(),
                    ..Default::default()
                }
            }
            "install" | "uninstall" => {
                let now = self.pip_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_pip_in_flight.fetch_max(now, Ordering::SeqCst);
                let delay = self.pip_delay_ms.load(Ordering::SeqCst) as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;

                {
                    let mut packages = self.packages.lock().unwrap();
                    if action == "install" {
                        packages.push(package.clone());
                    } else {
                        packages.retain(|p| p != &package);
                    }
                }

                self.pip_in_flight.fetch_sub(1, Ordering::SeqCst);
                ExecOutput {
                    exit_code: Some(0),
                    stdout: format!("Successfully {}ed {}\n", action, package),
                    ..Default::default()
                }
            }
            _ => ExecOutput {
                exit_code: Some(2),
                stderr: "unknown pip command".to_string(),
                ..Default::default()
            },
        }
    }
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(&text[from..from + len])
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    async fn is_available(&self) -> Result<bool, ProviderError> {
        Ok(!self.unavailable.load(Ordering::SeqCst))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ProviderError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a window to pile up
        tokio::time::sleep(Duration::from_millis(20)).await;

        let remaining = self.failing_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_creates.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::ContainerError("image pull failed".to_string()));
        }

        let mut containers = self.containers.lock().unwrap();
        if containers.values().any(|c| c.name == spec.name) {
            return Err(ProviderError::ContainerError(format!(
                "name {} already in use",
                spec.name
            )));
        }

        let id = format!("ctr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: spec.name.clone(),
                project_id: spec.project_id.clone(),
                workspace: spec.workspace.clone(),
            },
        );
        Ok(id)
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), ProviderError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_removes.load(Ordering::SeqCst) {
            return Err(ProviderError::ContainerError("daemon busy".to_string()));
        }
        self.containers
            .lock()
            .unwrap()
            .retain(|id, c| id != container_id && c.name != container_id);
        Ok(())
    }

    async fn list_managed_containers(&self) -> Result<Vec<ContainerSummary>, ProviderError> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                project_id: Some(c.project_id.clone()),
                state: "running".to_string(),
                created: None,
            })
            .collect())
    }

    async fn exec(&self, container_id: &str, request: ExecRequest) -> Result<ExecOutput, ProviderError> {
        if self.panicking_runs.load(Ordering::SeqCst) && request.cmd.first().map(String::as_str) == Some("timeout") {
            panic!("runner crashed");
        }
        if self.failing_execs.load(Ordering::SeqCst) {
            return Err(ProviderError::ExecError("exec refused".to_string()));
        }
        let workspace = self
            .workspace_of(container_id)
            .ok_or_else(|| ProviderError::ContainerError(format!("no such container {}", container_id)))?;

        match request.cmd.first().map(String::as_str) {
            Some("timeout") => Ok(self.run_cell(&workspace, &request).await),
            Some("sh") => {
                self.kill_calls.fetch_add(1, Ordering::SeqCst);
                Ok(ExecOutput {
                    exit_code: Some(0),
                    ..Default::default()
                })
            }
            Some("python3") if request.cmd.get(2).map(String::as_str) == Some("pip") => {
                Ok(self.run_pip(&request).await)
            }
            Some("python3") if request.cmd.get(2).map(String::as_str) == Some("complete") => {
                Ok(ExecOutput {
                    exit_code: Some(0),
                    stdout: r#"[{"label":"print","kind":"function","detail":"def print"}]"#.to_string(),
                    ..Default::default()
                })
            }
            _ => Ok(ExecOutput {
                exit_code: Some(127),
                stderr: "command not found".to_string(),
                ..Default::default()
            }),
        }
    }
}

pub struct Harness {
    pub runtime: Arc<Runtime>,
    pub provider: Arc<FakeProvider>,
    pub storage: Arc<NotebookStorage>,
    pub sink: Arc<BroadcastSink>,
    pub notebook: Notebook,
    pub dir: TempDir,
}

pub fn test_config(dir: &Path) -> RuntimeConfig {
    RuntimeConfig {
        workspace_root: dir.join("workspaces"),
        output_dir: dir.join("outputs"),
        exec_timeout: Duration::from_secs(5),
        idle_timeout: None,
        ..RuntimeConfig::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(adjust: impl FnOnce(&mut RuntimeConfig)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    adjust(&mut config);

    let storage = Arc::new(NotebookStorage::in_memory().await.unwrap());
    let notebook = storage.create_notebook("proj_1", "Sales").await.unwrap();
    let provider = FakeProvider::new();
    let sink = Arc::new(BroadcastSink::new(1024));

    let runtime = Arc::new(Runtime::new(
        config,
        storage.clone(),
        provider.clone(),
        sink.clone(),
    ));

    Harness {
        runtime,
        provider,
        storage,
        sink,
        notebook,
        dir,
    }
}

/// Write a CSV with `rows` data rows and register it for `project_id`
pub async fn register_csv(h: &Harness, project_id: &str, filename: &str, rows: usize) {
    let source = h.dir.path().join(format!("upload-{}", filename));
    let mut content = String::from("region,amount\n");
    for i in 0..rows {
        content.push_str(&format!("r{},{}\n", i % 4, i * 10));
    }
    std::fs::write(&source, content).unwrap();
    h.storage
        .register_dataset(project_id, filename, &source)
        .await
        .unwrap();
}

/// Drain whatever events are currently buffered
pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<(String, EventEnvelope)>) -> Vec<String> {
    let mut types = Vec::new();
    while let Ok((_, envelope)) = rx.try_recv() {
        types.push(envelope.event.event_type().to_string());
    }
    types
}
