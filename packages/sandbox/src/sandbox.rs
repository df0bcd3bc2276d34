// ABOUTME: Sandbox descriptor and execution result types
// ABOUTME: Values handed out by the lifecycle manager; the manager owns the live registry

use cellar_notebook::CellOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Snapshot of one project's live sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    pub project_id: String,
    pub container_id: String,
    pub container_name: String,
    /// Host directory mounted at `/workspace`
    pub workspace_path: PathBuf,
    /// Dataset files currently materialized in the workspace
    pub datasets: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub outputs: Vec<CellOutput>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Overrides the configured execution timeout
    pub timeout: Option<Duration>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub label: String,
    pub kind: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

/// Outcome of a pip install/uninstall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageOutcome {
    pub package: String,
    pub success: bool,
    pub output: String,
}
