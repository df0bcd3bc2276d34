// ABOUTME: Provider trait for sandbox isolation backends
// ABOUTME: Container create/remove/list plus deadline-bounded exec with capped output capture

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::SandboxLimits;

pub mod docker;

pub use docker::DockerProvider;

/// Label marking containers owned by this runtime
pub const MANAGED_LABEL: &str = "cellar.managed";
/// Label carrying the owning project identity
pub const PROJECT_LABEL: &str = "cellar.project_id";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Exec error: {0}")]
    ExecError(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Everything needed to create one sandbox container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub project_id: String,
    /// Host directory bind-mounted read-write at `/workspace`
    pub workspace: PathBuf,
    pub limits: SandboxLimits,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub project_id: Option<String>,
    pub state: String,
    pub created: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    /// Host-side deadline; `None` waits for the process to exit
    pub deadline: Option<Duration>,
    /// Per-stream capture cap
    pub max_output_bytes: usize,
}

impl ExecRequest {
    pub fn new(cmd: Vec<String>) -> Self {
        Self {
            cmd,
            working_dir: Some("/workspace".to_string()),
            env: HashMap::new(),
            deadline: None,
            max_output_bytes: 1024 * 1024,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// `None` when the process was still running at the deadline
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub truncated: bool,
}

/// Byte buffer that stops growing at `limit` and remembers that it did.
#[derive(Debug)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if bytes.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Isolation backend for sandboxes
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Check whether the backend is reachable
    async fn is_available(&self) -> Result<bool>;

    /// Create and start a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Force-remove a container. Removing an absent container succeeds.
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// All containers carrying [`MANAGED_LABEL`], running or not
    async fn list_managed_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Run a command inside a container, enforcing the request deadline
    async fn exec(&self, container_id: &str, request: ExecRequest) -> Result<ExecOutput>;
}
