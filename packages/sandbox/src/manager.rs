// ABOUTME: Sandbox lifecycle manager keyed by project identity
// ABOUTME: Lazy per-project creation, cell execution with enforced limits, packages, orphan and idle cleanup

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::providers::{ContainerSpec, ExecOutput, ExecRequest, SandboxProvider};
use crate::runner::{self, RunDocument, RunStatus};
use crate::sandbox::{
    Completion, ExecuteOptions, ExecutionResult, ExecutionStatus, PackageInfo, PackageOutcome,
    Sandbox,
};
use crate::workspace;
use cellar_notebook::{CellOutput, Dataset};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Extra time the host waits past the in-container timeout before killing a run
const KILL_GRACE: Duration = Duration::from_secs(5);
const PACKAGE_TIMEOUT: Duration = Duration::from_secs(300);
const AUX_TIMEOUT: Duration = Duration::from_secs(15);

/// Live registration of one sandbox
struct SandboxEntry {
    project_id: String,
    container_id: String,
    container_name: String,
    workspace_path: PathBuf,
    created_at: DateTime<Utc>,
    last_used_ms: AtomicI64,
    active_runs: AtomicUsize,
    mounted: RwLock<Vec<PathBuf>>,
    /// Serializes pip mutations; cells may run concurrently with them
    package_lock: Mutex<()>,
}

impl SandboxEntry {
    fn touch(&self) {
        self.last_used_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let idle_ms = now.timestamp_millis() - self.last_used_ms.load(Ordering::Relaxed);
        Duration::from_millis(idle_ms.max(0) as u64)
    }

    async fn snapshot(&self) -> Sandbox {
        Sandbox {
            project_id: self.project_id.clone(),
            container_id: self.container_id.clone(),
            container_name: self.container_name.clone(),
            workspace_path: self.workspace_path.clone(),
            datasets: self.mounted.read().await.clone(),
            created_at: self.created_at,
            last_used_at: DateTime::from_timestamp_millis(self.last_used_ms.load(Ordering::Relaxed))
                .unwrap_or(self.created_at),
            alive: true,
        }
    }
}

/// Decrements the in-flight run counter when a run ends, however it ends
struct RunGuard<'a>(&'a SandboxEntry);

impl<'a> RunGuard<'a> {
    fn new(entry: &'a SandboxEntry) -> Self {
        entry.active_runs.fetch_add(1, Ordering::SeqCst);
        entry.touch();
        Self(entry)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.active_runs.fetch_sub(1, Ordering::SeqCst);
        self.0.touch();
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanReport {
    pub found: usize,
    pub removed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    pub destroyed: usize,
    pub errors: Vec<String>,
}

pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    config: RuntimeConfig,
    sandboxes: DashMap<String, Arc<SandboxEntry>>,
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SandboxManager {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: RuntimeConfig) -> Self {
        Self {
            provider,
            config,
            sandboxes: DashMap::new(),
            creation_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Snapshot of the live sandbox for a project, if any
    pub async fn get(&self, project_id: &str) -> Option<Sandbox> {
        let entry = self.lookup(project_id)?;
        Some(entry.snapshot().await)
    }

    pub async fn list(&self) -> Vec<Sandbox> {
        let entries: Vec<Arc<SandboxEntry>> =
            self.sandboxes.iter().map(|e| Arc::clone(e.value())).collect();
        let mut sandboxes = Vec::with_capacity(entries.len());
        for entry in entries {
            sandboxes.push(entry.snapshot().await);
        }
        sandboxes
    }

    fn lookup(&self, project_id: &str) -> Option<Arc<SandboxEntry>> {
        self.sandboxes
            .get(project_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn creation_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.creation_locks
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Resolve the registry entry behind a descriptor, rejecting descriptors
    /// whose sandbox has since been destroyed or replaced.
    fn resolve(&self, sandbox: &Sandbox) -> Result<Arc<SandboxEntry>> {
        match self.lookup(&sandbox.project_id) {
            Some(entry) if entry.container_id == sandbox.container_id => Ok(entry),
            Some(_) => Err(RuntimeError::SandboxUnavailable(format!(
                "sandbox for project {} was replaced",
                sandbox.project_id
            ))),
            None => Err(RuntimeError::SandboxUnavailable(format!(
                "no live sandbox for project {}",
                sandbox.project_id
            ))),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Return the project's live sandbox, creating it if needed, and sync
    /// `datasets` into its workspace.
    pub async fn ensure(&self, project_id: &str, datasets: &[Dataset]) -> Result<Sandbox> {
        let entry = match self.lookup(project_id) {
            Some(entry) => entry,
            None => {
                let lock = self.creation_lock(project_id);
                let _guard = lock.lock().await;

                match self.lookup(project_id) {
                    Some(entry) => entry,
                    None => {
                        let entry = Arc::new(self.create_sandbox(project_id).await?);
                        self.sandboxes
                            .insert(project_id.to_string(), Arc::clone(&entry));
                        entry
                    }
                }
            }
        };

        let report = workspace::sync_datasets(&entry.workspace_path, datasets).await?;
        if !report.skipped.is_empty() {
            warn!(
                "Project {}: {} dataset(s) could not be synced",
                project_id,
                report.skipped.len()
            );
        }
        *entry.mounted.write().await = report.synced;
        entry.touch();

        Ok(entry.snapshot().await)
    }

    async fn create_sandbox(&self, project_id: &str) -> Result<SandboxEntry> {
        let unavailable =
            |what: &str, e: &dyn std::fmt::Display| RuntimeError::SandboxUnavailable(format!("{}: {}", what, e));

        match self.provider.is_available().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(RuntimeError::SandboxUnavailable(
                    "sandbox backend is not available".to_string(),
                ))
            }
            Err(e) => return Err(unavailable("sandbox backend check failed", &e)),
        }

        let safe_id = sanitize_project_id(project_id);
        let workspace = self.config.workspace_root.join(&safe_id);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| unavailable("failed to create workspace", &e))?;
        let workspace = tokio::fs::canonicalize(&workspace)
            .await
            .map_err(|e| unavailable("failed to resolve workspace", &e))?;
        runner::install(&workspace)
            .await
            .map_err(|e| unavailable("failed to install runner", &e))?;

        let container_name = format!("cellar-sbx-{}", safe_id);

        // A container left by a previous host process would hold the name
        if let Err(e) = self.provider.remove_container(&container_name).await {
            debug!("No stale container {} removed: {}", container_name, e);
        }

        let mut labels = HashMap::new();
        labels.insert("cellar.workspace".to_string(), safe_id.clone());

        let spec = ContainerSpec {
            name: container_name.clone(),
            image: self.config.image.clone(),
            project_id: project_id.to_string(),
            workspace: workspace.clone(),
            limits: self.config.limits.clone(),
            labels,
        };

        let container_id = match self.provider.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to create sandbox for project {}: {}", project_id, e);
                if let Err(remove_err) = self.provider.remove_container(&container_name).await {
                    warn!(
                        "Failed to clean up container {}: {}",
                        container_name, remove_err
                    );
                }
                return Err(unavailable("failed to create container", &e));
            }
        };

        info!(
            "Created sandbox {} ({}) for project {}",
            container_name, container_id, project_id
        );

        let now = Utc::now();
        Ok(SandboxEntry {
            project_id: project_id.to_string(),
            container_id,
            container_name,
            workspace_path: workspace,
            created_at: now,
            last_used_ms: AtomicI64::new(now.timestamp_millis()),
            active_runs: AtomicUsize::new(0),
            mounted: RwLock::new(Vec::new()),
            package_lock: Mutex::new(()),
        })
    }

    /// Tear down one project's sandbox. Returns whether one existed.
    pub async fn destroy(&self, project_id: &str) -> Result<bool> {
        let lock = self.creation_lock(project_id);
        let _guard = lock.lock().await;

        let Some((_, entry)) = self.sandboxes.remove(project_id) else {
            self.forget_creation_lock(project_id, &lock);
            return Ok(false);
        };

        let removed = self.provider.remove_container(&entry.container_id).await;
        self.forget_creation_lock(project_id, &lock);
        removed.map_err(|e| {
            RuntimeError::SandboxUnavailable(format!(
                "failed to remove container {}: {}",
                entry.container_name, e
            ))
        })?;

        info!("Destroyed sandbox {} for project {}", entry.container_name, project_id);
        Ok(true)
    }

    /// Drop the creation lock of a torn-down project unless another caller
    /// is already waiting on it. `held` is the caller's own handle.
    fn forget_creation_lock(&self, project_id: &str, held: &Arc<Mutex<()>>) {
        self.creation_locks
            .remove_if(project_id, |_, lock| Arc::ptr_eq(lock, held) && Arc::strong_count(lock) <= 2);
    }

    pub fn creation_lock_count(&self) -> usize {
        self.creation_locks.len()
    }

    /// Destroy every live sandbox, continuing past individual failures.
    pub async fn destroy_all(&self) -> TeardownReport {
        let project_ids: Vec<String> = self.sandboxes.iter().map(|e| e.key().clone()).collect();
        let mut report = TeardownReport::default();

        for project_id in project_ids {
            match self.destroy(&project_id).await {
                Ok(true) => report.destroyed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to tear down sandbox for project {}: {}", project_id, e);
                    report.errors.push(format!("{}: {}", project_id, e));
                }
            }
        }

        info!(
            "Teardown complete: destroyed {} sandbox(es), {} failure(s)",
            report.destroyed,
            report.errors.len()
        );
        report
    }

    /// Remove managed containers that no live registration owns.
    pub async fn reclaim_orphans(&self) -> Result<OrphanReport> {
        let containers = self
            .provider
            .list_managed_containers()
            .await
            .map_err(|e| RuntimeError::SandboxUnavailable(e.to_string()))?;

        let active: HashSet<String> = self
            .sandboxes
            .iter()
            .map(|e| e.value().container_id.clone())
            .collect();

        let mut report = OrphanReport::default();
        for container in containers {
            if active.contains(&container.id) {
                continue;
            }

            report.found += 1;
            warn!(
                "Found orphaned container: {} (name: {}, project: {})",
                container.id,
                container.name,
                container.project_id.as_deref().unwrap_or("unknown")
            );

            match self.provider.remove_container(&container.id).await {
                Ok(()) => {
                    info!("Removed orphaned container: {}", container.id);
                    report.removed += 1;
                }
                Err(e) => {
                    let message =
                        format!("Failed to remove orphaned container {}: {}", container.id, e);
                    warn!("{}", message);
                    report.errors.push(message);
                }
            }
        }

        info!(
            "Orphan reclamation complete: found {}, removed {} (failed: {})",
            report.found,
            report.removed,
            report.errors.len()
        );
        Ok(report)
    }

    /// Destroy sandboxes unused for longer than `max_idle`. Sandboxes with a
    /// run in flight are kept. Returns the reaped project ids.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = Utc::now();
        let idle: Vec<String> = self
            .sandboxes
            .iter()
            .filter(|e| {
                e.value().active_runs.load(Ordering::SeqCst) == 0
                    && e.value().idle_for(now) > max_idle
            })
            .map(|e| e.key().clone())
            .collect();

        let mut reaped = Vec::new();
        for project_id in idle {
            match self.destroy(&project_id).await {
                Ok(true) => {
                    info!("Reaped idle sandbox for project {}", project_id);
                    reaped.push(project_id);
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to reap sandbox for project {}: {}", project_id, e),
            }
        }
        reaped
    }

    pub fn start_idle_reaper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = manager.reap_idle(max_idle).await;
                if !reaped.is_empty() {
                    debug!("Idle reaper removed {} sandbox(es)", reaped.len());
                }
            }
        })
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    /// Run `code` in the sandbox. Code errors and timeouts are reported in
    /// the result; only infrastructure failures are errors.
    pub async fn execute(
        &self,
        sandbox: &Sandbox,
        code: &str,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let entry = self.resolve(sandbox)?;
        let _run = RunGuard::new(&entry);

        let timeout = options.timeout.unwrap_or(self.config.exec_timeout);
        let run_id = runner::new_run_id();
        runner::stage_code(&entry.workspace_path, &run_id, code).await?;

        let request = ExecRequest::new(runner::run_command(&run_id, timeout))
            .with_deadline(timeout + KILL_GRACE)
            .with_env(options.env)
            .with_max_output(self.config.max_stream_bytes);

        debug!("Starting run {} in sandbox {}", run_id, entry.container_name);
        let started = Instant::now();
        let exec = self.provider.exec(&entry.container_id, request).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let exec = match exec {
            Ok(exec) => exec,
            Err(e) => {
                runner::cleanup(&entry.workspace_path, &run_id).await;
                return Err(RuntimeError::SandboxUnavailable(format!(
                    "exec failed in {}: {}",
                    entry.container_name, e
                )));
            }
        };

        if exec.timed_out {
            self.kill_run(&entry, &run_id).await;
        }

        let document = runner::read_result(&entry.workspace_path, &run_id).await;
        runner::cleanup(&entry.workspace_path, &run_id).await;

        let result = build_result(exec, document, timeout, duration_ms);
        debug!(
            "Run {} finished with status {} in {}ms",
            run_id,
            result.status.as_str(),
            result.duration_ms
        );
        Ok(result)
    }

    async fn kill_run(&self, entry: &SandboxEntry, run_id: &str) {
        warn!("Run {} outlived its deadline, killing it", run_id);
        let request = ExecRequest::new(runner::kill_command(run_id)).with_deadline(AUX_TIMEOUT);
        if let Err(e) = self.provider.exec(&entry.container_id, request).await {
            warn!("Failed to kill run {}: {}", run_id, e);
        }
    }

    // ========================================================================
    // PACKAGES & COMPLETIONS
    // ========================================================================

    pub async fn install_package(&self, sandbox: &Sandbox, package: &str) -> Result<PackageOutcome> {
        validate_package_spec(package)?;
        self.pip_mutation(
            sandbox,
            package,
            vec![
                "python3", "-m", "pip", "install", "--no-cache-dir",
                "--disable-pip-version-check", package,
            ],
        )
        .await
    }

    pub async fn uninstall_package(&self, sandbox: &Sandbox, package: &str) -> Result<PackageOutcome> {
        validate_package_spec(package)?;
        self.pip_mutation(
            sandbox,
            package,
            vec![
                "python3", "-m", "pip", "uninstall", "-y",
                "--disable-pip-version-check", package,
            ],
        )
        .await
    }

    async fn pip_mutation(
        &self,
        sandbox: &Sandbox,
        package: &str,
        cmd: Vec<&str>,
    ) -> Result<PackageOutcome> {
        let entry = self.resolve(sandbox)?;
        let _packages = entry.package_lock.lock().await;
        let _run = RunGuard::new(&entry);

        let request = ExecRequest::new(cmd.into_iter().map(String::from).collect())
            .with_deadline(PACKAGE_TIMEOUT)
            .with_max_output(self.config.max_stream_bytes);

        let output = self
            .provider
            .exec(&entry.container_id, request)
            .await
            .map_err(|e| RuntimeError::SandboxUnavailable(e.to_string()))?;

        let success = !output.timed_out && output.exit_code == Some(0);
        if success {
            info!("pip {} succeeded in {}", package, entry.container_name);
        } else {
            warn!(
                "pip {} failed in {} (exit: {:?}, timed out: {})",
                package, entry.container_name, output.exit_code, output.timed_out
            );
        }

        Ok(PackageOutcome {
            package: package.to_string(),
            success,
            output: join_streams(&output.stdout, &output.stderr),
        })
    }

    pub async fn list_packages(&self, sandbox: &Sandbox) -> Result<Vec<PackageInfo>> {
        let entry = self.resolve(sandbox)?;
        let _run = RunGuard::new(&entry);

        let cmd = ["python3", "-m", "pip", "list", "--format=json", "--disable-pip-version-check"];
        let request = ExecRequest::new(cmd.into_iter().map(String::from).collect())
            .with_deadline(AUX_TIMEOUT)
            .with_max_output(self.config.max_stream_bytes);

        let output = self
            .provider
            .exec(&entry.container_id, request)
            .await
            .map_err(|e| RuntimeError::SandboxUnavailable(e.to_string()))?;

        if output.timed_out || output.exit_code != Some(0) {
            return Err(RuntimeError::SandboxUnavailable(format!(
                "pip list failed: {}",
                output.stderr.trim()
            )));
        }

        Ok(serde_json::from_str(output.stdout.trim())?)
    }

    /// Completions at `line` (1-based) and `column` (0-based). Best-effort:
    /// any failure yields an empty list.
    pub async fn get_completions(
        &self,
        sandbox: &Sandbox,
        code: &str,
        line: u32,
        column: u32,
    ) -> Vec<Completion> {
        match self.try_completions(sandbox, code, line, column).await {
            Ok(completions) => completions,
            Err(e) => {
                debug!("Completions unavailable for {}: {}", sandbox.project_id, e);
                Vec::new()
            }
        }
    }

    async fn try_completions(
        &self,
        sandbox: &Sandbox,
        code: &str,
        line: u32,
        column: u32,
    ) -> Result<Vec<Completion>> {
        let entry = self.resolve(sandbox)?;
        let _run = RunGuard::new(&entry);

        let request_id = runner::new_run_id();
        let container_file =
            runner::stage_completion_source(&entry.workspace_path, &request_id, code).await?;

        let request = ExecRequest::new(runner::complete_command(&container_file, line, column))
            .with_deadline(AUX_TIMEOUT)
            .with_max_output(self.config.max_stream_bytes);
        let output = self.provider.exec(&entry.container_id, request).await;
        runner::cleanup(&entry.workspace_path, &request_id).await;

        let output = output.map_err(|e| RuntimeError::SandboxUnavailable(e.to_string()))?;
        if output.timed_out || output.exit_code != Some(0) {
            return Err(RuntimeError::SandboxUnavailable(format!(
                "completion helper failed: {}",
                output.stderr.trim()
            )));
        }

        Ok(serde_json::from_str(output.stdout.trim())?)
    }
}

/// Fold the raw exec output and the runner's result document into one result.
fn build_result(
    exec: ExecOutput,
    document: Option<RunDocument>,
    timeout: Duration,
    duration_ms: i64,
) -> ExecutionResult {
    // `timeout -s KILL` exits 137 on expiry; 124 when it could signal normally.
    // An OOM kill also exits 137 but well before the deadline.
    let killed_at_deadline = document.is_none()
        && match exec.exit_code {
            Some(124) => true,
            Some(137) => duration_ms as u128 >= timeout.as_millis(),
            _ => false,
        };
    let timed_out = exec.timed_out || killed_at_deadline;

    let mut outputs = Vec::new();
    if !exec.stdout.is_empty() {
        let mut text = exec.stdout.clone();
        if exec.truncated {
            text.push_str("\n[output truncated]");
        }
        outputs.push(CellOutput::text(text));
    }

    if timed_out {
        let message = format!("Execution timed out after {} seconds", format_secs(timeout));
        outputs.push(CellOutput::error(message.clone()));
        return ExecutionResult {
            status: ExecutionStatus::Timeout,
            stdout: exec.stdout,
            stderr: exec.stderr,
            outputs,
            duration_ms,
            error: Some(message),
        };
    }

    let (status, error) = match document {
        Some(document) => {
            outputs.extend(document.outputs);
            match document.status {
                RunStatus::Ok => (ExecutionStatus::Success, None),
                RunStatus::Error => (ExecutionStatus::Error, document.error),
            }
        }
        None => {
            let message = match exec.exit_code {
                Some(137) => "Execution was killed, likely by the sandbox memory limit".to_string(),
                Some(code) => format!("Runner exited with code {} without a result", code),
                None => "Runner exited without a result".to_string(),
            };
            let detail = if exec.stderr.trim().is_empty() {
                message.clone()
            } else {
                format!("{}\n{}", message, exec.stderr.trim_end())
            };
            outputs.push(CellOutput::error(detail));
            (ExecutionStatus::Error, Some(message))
        }
    };

    ExecutionResult {
        status,
        stdout: exec.stdout,
        stderr: exec.stderr,
        outputs,
        duration_ms,
        error,
    }
}

fn format_secs(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.1}", duration.as_secs_f64())
    }
}

fn join_streams(stdout: &str, stderr: &str) -> String {
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
        (false, true) => stdout.trim_end().to_string(),
        (true, false) => stderr.trim_end().to_string(),
        (true, true) => String::new(),
    }
}

/// Reject anything that is not a plain pip requirement such as
/// `pandas`, `scikit-learn==1.4.2` or `requests[socks]>=2`.
pub fn validate_package_spec(package: &str) -> Result<()> {
    let valid = !package.is_empty()
        && package.len() <= 200
        && package
            .chars()
            .next()
            .map(|c| c.is_ascii_alphanumeric())
            .unwrap_or(false)
        && package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.[],=<>!~".contains(c));

    if valid {
        Ok(())
    } else {
        Err(RuntimeError::InvalidRequest(format!(
            "invalid package name: {:?}",
            package
        )))
    }
}

/// Reduce a project id to a container-name and directory-safe token. Ids
/// that had to be altered get a hash suffix so distinct ids stay distinct.
pub fn sanitize_project_id(project_id: &str) -> String {
    let cleaned: String = project_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(48)
        .collect();

    if cleaned == project_id && !cleaned.is_empty() {
        return cleaned;
    }

    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    let digest = hasher.finalize();
    let suffix: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
    let prefix = if cleaned.is_empty() { "project" } else { cleaned.as_str() };
    format!("{}-{}", prefix, suffix)
}
