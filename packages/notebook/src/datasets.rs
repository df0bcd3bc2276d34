// ABOUTME: Project dataset registry
// ABOUTME: Exposes the lookup the sandbox runtime uses to mount project data

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::{new_id, parse_timestamp, NotebookStorage};
use crate::types::Dataset;

/// Source of the datasets attached to a project
#[async_trait]
pub trait DatasetLocator: Send + Sync {
    async fn list_datasets(&self, project_id: &str) -> Result<Vec<Dataset>>;
}

impl NotebookStorage {
    pub async fn register_dataset(
        &self,
        project_id: &str,
        filename: &str,
        source_path: &Path,
    ) -> Result<Dataset> {
        let now = Utc::now();
        let dataset = Dataset {
            id: new_id("ds"),
            project_id: project_id.to_string(),
            filename: filename.to_string(),
            source_path: source_path.to_path_buf(),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO datasets (id, project_id, filename, source_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&dataset.id)
        .bind(&dataset.project_id)
        .bind(&dataset.filename)
        .bind(dataset.source_path.to_string_lossy().to_string())
        .bind(now.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(dataset)
    }
}

#[async_trait]
impl DatasetLocator for NotebookStorage {
    async fn list_datasets(&self, project_id: &str) -> Result<Vec<Dataset>> {
        let rows = sqlx::query(
            "SELECT id, project_id, filename, source_path, created_at FROM datasets
             WHERE project_id = ?1 ORDER BY created_at ASC, id ASC",
        )
        .bind(project_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let source_path: String = row.get("source_path");
                Ok(Dataset {
                    id: row.get("id"),
                    project_id: row.get("project_id"),
                    filename: row.get("filename"),
                    source_path: PathBuf::from(source_path),
                    created_at: parse_timestamp(row.get("created_at"))?,
                })
            })
            .collect()
    }
}
