// ABOUTME: Materializes project datasets inside a sandbox workspace
// ABOUTME: Each dataset lands at three paths so any conventional relative path resolves

use cellar_notebook::Dataset;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Host paths written, three per synced dataset
    pub synced: Vec<PathBuf>,
    /// Dataset ids that could not be synced
    pub skipped: Vec<String>,
}

/// Workspace-relative destinations for one dataset:
/// `datasets/{filename}`, `datasets/{id}/{filename}` and `{filename}`.
pub fn destinations(dataset: &Dataset) -> Option<[PathBuf; 3]> {
    let filename = safe_filename(&dataset.filename)?;
    let id_dir = safe_component(&dataset.id);

    Some([
        Path::new("datasets").join(&filename),
        Path::new("datasets").join(id_dir).join(&filename),
        PathBuf::from(&filename),
    ])
}

/// Copy every dataset into the workspace.
///
/// Best-effort per dataset: a missing or unreadable source is logged and
/// reported as skipped. Re-running replaces existing copies.
pub async fn sync_datasets(workspace: &Path, datasets: &[Dataset]) -> std::io::Result<SyncReport> {
    tokio::fs::create_dir_all(workspace.join("datasets")).await?;

    let mut report = SyncReport::default();
    for dataset in datasets {
        let Some(targets) = destinations(dataset) else {
            warn!(
                "Skipping dataset {} with unusable filename {:?}",
                dataset.id, dataset.filename
            );
            report.skipped.push(dataset.id.clone());
            continue;
        };

        if !tokio::fs::try_exists(&dataset.source_path).await.unwrap_or(false) {
            warn!(
                "Dataset {} source {} is missing, skipping",
                dataset.id,
                dataset.source_path.display()
            );
            report.skipped.push(dataset.id.clone());
            continue;
        }

        let mut written = Vec::with_capacity(targets.len());
        let mut failed = false;
        for relative in targets.iter() {
            let target = workspace.join(relative);
            match copy_replacing(&dataset.source_path, &target).await {
                Ok(()) => written.push(target),
                Err(e) => {
                    warn!(
                        "Failed to copy dataset {} to {}: {}",
                        dataset.id,
                        target.display(),
                        e
                    );
                    failed = true;
                    break;
                }
            }
        }

        if failed {
            report.skipped.push(dataset.id.clone());
        } else {
            debug!("Synced dataset {} ({})", dataset.id, dataset.filename);
        }
        report.synced.extend(written);
    }

    Ok(report)
}

async fn copy_replacing(source: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    // Unique per copy so concurrent syncs of one workspace never share a temp file
    let partial = target.with_file_name(format!(".{}.{}.partial", file_name, Uuid::new_v4().simple()));

    tokio::fs::copy(source, &partial).await?;
    if let Err(e) = tokio::fs::rename(&partial, target).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    Ok(())
}

fn safe_filename(filename: &str) -> Option<String> {
    let name = Path::new(filename.trim()).file_name()?.to_string_lossy().to_string();
    if name.is_empty() || name == "." || name == ".." || name.starts_with(".cellar") {
        return None;
    }
    Some(name)
}

fn safe_component(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
