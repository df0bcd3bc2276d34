// ABOUTME: Host side of the in-sandbox Python runner
// ABOUTME: Installs the script, stages cell code, builds exec commands and reads result documents

use cellar_notebook::CellOutput;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const RUNNER_SCRIPT: &str = include_str!("runner.py");

const CONTAINER_RUNNER: &str = "/workspace/.cellar/runner.py";
const CONTAINER_RUNS_DIR: &str = "/workspace/.cellar/runs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
}

/// Result document written by the runner after a cell finishes
#[derive(Debug, Clone, Deserialize)]
pub struct RunDocument {
    pub status: RunStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: Vec<CellOutput>,
}

pub fn cellar_dir(workspace: &Path) -> PathBuf {
    workspace.join(".cellar")
}

pub fn runs_dir(workspace: &Path) -> PathBuf {
    cellar_dir(workspace).join("runs")
}

pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string().replace('-', "")
}

/// Write the runner script into a workspace, replacing any older copy.
pub async fn install(workspace: &Path) -> std::io::Result<()> {
    let runs = runs_dir(workspace);
    tokio::fs::create_dir_all(&runs).await?;
    tokio::fs::write(cellar_dir(workspace).join("runner.py"), RUNNER_SCRIPT).await?;

    // Containers run with every capability dropped, so root inside cannot
    // bypass host permissions on the bind mount.
    open_permissions(workspace).await?;
    open_permissions(&cellar_dir(workspace)).await?;
    open_permissions(&runs).await?;
    Ok(())
}

#[cfg(unix)]
pub async fn open_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)).await
}

#[cfg(not(unix))]
pub async fn open_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

pub async fn stage_code(workspace: &Path, run_id: &str, code: &str) -> std::io::Result<()> {
    let path = runs_dir(workspace).join(format!("{}.py", run_id));
    tokio::fs::write(path, code).await
}

pub async fn stage_completion_source(
    workspace: &Path,
    request_id: &str,
    code: &str,
) -> std::io::Result<String> {
    let name = format!("{}.complete.py", request_id);
    tokio::fs::write(runs_dir(workspace).join(&name), code).await?;
    Ok(format!("{}/{}", CONTAINER_RUNS_DIR, name))
}

/// Command executing one staged run, killed by coreutils `timeout` at the limit.
pub fn run_command(run_id: &str, timeout: Duration) -> Vec<String> {
    vec![
        "timeout".to_string(),
        "-s".to_string(),
        "KILL".to_string(),
        timeout.as_secs_f64().to_string(),
        "python3".to_string(),
        CONTAINER_RUNNER.to_string(),
        "run".to_string(),
        run_id.to_string(),
    ]
}

/// Command killing the whole process group of a run that outlived the host deadline.
pub fn kill_command(run_id: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "kill -9 -- -$(cat {dir}/{id}.pid) 2>/dev/null; true",
            dir = CONTAINER_RUNS_DIR,
            id = run_id
        ),
    ]
}

pub fn complete_command(container_file: &str, line: u32, column: u32) -> Vec<String> {
    vec![
        "python3".to_string(),
        CONTAINER_RUNNER.to_string(),
        "complete".to_string(),
        container_file.to_string(),
        line.to_string(),
        column.to_string(),
    ]
}

/// Read the result document of a run. `None` when the runner never wrote one
/// (killed, crashed) or wrote something unreadable.
pub async fn read_result(workspace: &Path, run_id: &str) -> Option<RunDocument> {
    let path = runs_dir(workspace).join(format!("{}.json", run_id));
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!("No result document for run {}: {}", run_id, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(document) => Some(document),
        Err(e) => {
            warn!("Malformed result document for run {}: {}", run_id, e);
            None
        }
    }
}

/// Remove every file belonging to a run
pub async fn cleanup(workspace: &Path, run_id: &str) {
    let runs = runs_dir(workspace);
    for suffix in ["py", "json", "json.tmp", "pid", "complete.py"] {
        let path = runs.join(format!("{}.{}", run_id, suffix));
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}
