// ABOUTME: Runtime facade wiring storage, sandboxes, orchestration and events together
// ABOUTME: Entry points for host startup/shutdown and for per-project sandbox operations

use cellar_notebook::{DatasetLocator, NotebookStorage, OutputStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::classifier::OutputClassifier;
use crate::config::RuntimeConfig;
use crate::editor::CellEditor;
use crate::error::Result;
use crate::events::EventSink;
use crate::manager::{validate_package_spec, OrphanReport, SandboxManager, TeardownReport};
use crate::orchestrator::{ExecutionOrchestrator, RunOutcome};
use crate::providers::SandboxProvider;
use crate::sandbox::{Completion, PackageInfo, PackageOutcome, Sandbox};

pub struct Runtime {
    config: RuntimeConfig,
    datasets: Arc<dyn DatasetLocator>,
    outputs: Arc<OutputStore>,
    sandboxes: Arc<SandboxManager>,
    orchestrator: ExecutionOrchestrator,
    editor: CellEditor,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        storage: Arc<NotebookStorage>,
        provider: Arc<dyn SandboxProvider>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let datasets: Arc<dyn DatasetLocator> = storage.clone();
        let outputs = Arc::new(OutputStore::new(config.output_dir.clone()));
        let sandboxes = Arc::new(SandboxManager::new(provider, config.clone()));

        let orchestrator = ExecutionOrchestrator::new(
            storage.clone(),
            datasets.clone(),
            sandboxes.clone(),
            OutputClassifier::new(outputs.clone(), config.output_inline_max_bytes),
            events.clone(),
        );
        let editor = CellEditor::new(storage, outputs.clone(), events, config.lock_stale_after);

        Self {
            config,
            datasets,
            outputs,
            sandboxes,
            orchestrator,
            editor,
            reaper: Mutex::new(None),
        }
    }

    pub fn outputs(&self) -> &Arc<OutputStore> {
        &self.outputs
    }

    pub fn sandboxes(&self) -> &Arc<SandboxManager> {
        &self.sandboxes
    }

    pub fn editor(&self) -> &CellEditor {
        &self.editor
    }

    /// Host startup: remove containers left by a previous process and start
    /// the idle reaper when idle reaping is enabled.
    pub async fn initialize_runtime(&self) -> Result<OrphanReport> {
        let report = self.sandboxes.reclaim_orphans().await?;

        if let Some(max_idle) = self.config.idle_timeout {
            let interval = (max_idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
            let mut reaper = self.reaper.lock().await;
            if reaper.is_none() {
                info!(
                    "Starting idle reaper (idle limit {:?}, checking every {:?})",
                    max_idle, interval
                );
                *reaper = Some(self.sandboxes.start_idle_reaper(interval, max_idle));
            }
        }

        Ok(report)
    }

    /// Host shutdown: stop the reaper and destroy every live sandbox.
    pub async fn teardown_all(&self) -> TeardownReport {
        if let Some(handle) = self.reaper.lock().await.take() {
            handle.abort();
        }
        self.sandboxes.destroy_all().await
    }

    pub async fn ensure_sandbox(&self, project_id: &str) -> Result<Sandbox> {
        let datasets = self.datasets.list_datasets(project_id).await?;
        self.sandboxes.ensure(project_id, &datasets).await
    }

    pub async fn run(&self, cell_id: &str, project_id: &str) -> Result<RunOutcome> {
        self.orchestrator.run(cell_id, project_id).await
    }

    pub async fn run_as(&self, cell_id: &str, project_id: &str, holder: &str) -> Result<RunOutcome> {
        self.orchestrator.run_as(cell_id, project_id, holder).await
    }

    pub async fn install_package(&self, project_id: &str, package: &str) -> Result<PackageOutcome> {
        validate_package_spec(package)?;
        let sandbox = self.ensure_sandbox(project_id).await?;
        self.sandboxes.install_package(&sandbox, package).await
    }

    pub async fn uninstall_package(&self, project_id: &str, package: &str) -> Result<PackageOutcome> {
        validate_package_spec(package)?;
        let sandbox = self.ensure_sandbox(project_id).await?;
        self.sandboxes.uninstall_package(&sandbox, package).await
    }

    pub async fn list_packages(&self, project_id: &str) -> Result<Vec<PackageInfo>> {
        let sandbox = self.ensure_sandbox(project_id).await?;
        self.sandboxes.list_packages(&sandbox).await
    }

    /// Best-effort: an unavailable sandbox yields no completions
    pub async fn get_completions(
        &self,
        project_id: &str,
        code: &str,
        line: u32,
        column: u32,
    ) -> Vec<Completion> {
        match self.ensure_sandbox(project_id).await {
            Ok(sandbox) => {
                self.sandboxes
                    .get_completions(&sandbox, code, line, column)
                    .await
            }
            Err(e) => {
                tracing::debug!("No completions for project {}: {}", project_id, e);
                Vec::new()
            }
        }
    }
}
