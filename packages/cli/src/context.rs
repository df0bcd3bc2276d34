// ABOUTME: Builds the runtime the commands operate on
// ABOUTME: SQLite store, Docker provider and an event sink that writes to the log

use anyhow::{Context, Result};
use cellar_notebook::NotebookStorage;
use cellar_sandbox::{
    DockerProvider, EventSink, NotebookEvent, Runtime, RuntimeConfig, SandboxProvider,
};
use std::sync::Arc;
use tracing::debug;

/// Logs every notebook event at debug level
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, notebook_id: &str, event: NotebookEvent) {
        debug!("notebook {}: {}", notebook_id, event.event_type());
    }
}

pub struct AppContext {
    pub config: RuntimeConfig,
    pub storage: Arc<NotebookStorage>,
    pub runtime: Runtime,
}

impl AppContext {
    /// Open the store only. Enough for commands that never touch a sandbox.
    pub async fn storage_only(config: &RuntimeConfig) -> Result<Arc<NotebookStorage>> {
        let storage = NotebookStorage::connect(&config.database_url)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_url))?;
        Ok(Arc::new(storage))
    }

    pub async fn open(config: RuntimeConfig) -> Result<Self> {
        let storage = Self::storage_only(&config).await?;
        let provider: Arc<dyn SandboxProvider> =
            Arc::new(DockerProvider::new().context("Failed to connect to Docker")?);
        Ok(Self::with_provider(config, storage, provider))
    }

    pub fn with_provider(
        config: RuntimeConfig,
        storage: Arc<NotebookStorage>,
        provider: Arc<dyn SandboxProvider>,
    ) -> Self {
        let runtime = Runtime::new(config.clone(), storage.clone(), provider, Arc::new(TracingSink));
        Self {
            config,
            storage,
            runtime,
        }
    }
}
