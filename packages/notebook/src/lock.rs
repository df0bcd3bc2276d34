// ABOUTME: Cooperative per-cell locks stored on the cell row
// ABOUTME: Acquisition is a single conditional UPDATE so concurrent callers race inside SQLite

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::storage::{millis_to_datetime, NotebookStorage};
use crate::types::LockStatus;

impl NotebookStorage {
    /// Try to take the lock on a cell for `holder`.
    ///
    /// Succeeds when the cell is unlocked or the existing lock is older than
    /// `stale_after`. A live lock is never re-entered, even by the same holder.
    /// Returns `Ok(false)` on contention and `NotFound` for an unknown cell.
    pub async fn lock_cell(&self, cell_id: &str, holder: &str, stale_after: Duration) -> Result<bool> {
        self.lock_cell_at(cell_id, holder, stale_after, Utc::now()).await
    }

    pub async fn lock_cell_at(
        &self,
        cell_id: &str,
        holder: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_ms = now.timestamp_millis();
        let cutoff_ms = now_ms - stale_after.as_millis() as i64;

        let result = sqlx::query(
            r#"
            UPDATE cells
            SET locked_by = ?1, locked_at = ?2
            WHERE id = ?3
              AND (locked_by IS NULL OR locked_at IS NULL OR locked_at <= ?4)
            "#,
        )
        .bind(holder)
        .bind(now_ms)
        .bind(cell_id)
        .bind(cutoff_ms)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 1 {
            debug!("Cell {} locked by {}", cell_id, holder);
            return Ok(true);
        }

        self.ensure_cell_exists(cell_id).await?;
        Ok(false)
    }

    /// Push `locked_at` forward on a lock `holder` still owns.
    ///
    /// Returns `Ok(false)` when the lock has been released or taken over.
    pub async fn refresh_cell_lock(&self, cell_id: &str, holder: &str) -> Result<bool> {
        self.refresh_cell_lock_at(cell_id, holder, Utc::now()).await
    }

    pub async fn refresh_cell_lock_at(&self, cell_id: &str, holder: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE cells SET locked_at = ?1 WHERE id = ?2 AND locked_by = ?3")
            .bind(now.timestamp_millis())
            .bind(cell_id)
            .bind(holder)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        self.ensure_cell_exists(cell_id).await?;
        Ok(false)
    }

    /// Clear the lock unconditionally. Releasing an unlocked cell is a no-op.
    pub async fn unlock_cell(&self, cell_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE cells SET locked_by = NULL, locked_at = NULL WHERE id = ?1")
            .bind(cell_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("cell {}", cell_id)));
        }

        debug!("Cell {} unlocked", cell_id);
        Ok(())
    }

    /// Current lock state; a lock past the staleness window reads as unlocked.
    pub async fn get_cell_lock(&self, cell_id: &str, stale_after: Duration) -> Result<LockStatus> {
        self.get_cell_lock_at(cell_id, stale_after, Utc::now()).await
    }

    pub async fn get_cell_lock_at(
        &self,
        cell_id: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockStatus> {
        let row: Option<(Option<String>, Option<i64>)> =
            sqlx::query_as("SELECT locked_by, locked_at FROM cells WHERE id = ?1")
                .bind(cell_id)
                .fetch_optional(self.pool())
                .await?;

        let (holder, locked_at) =
            row.ok_or_else(|| StorageError::NotFound(format!("cell {}", cell_id)))?;

        let cutoff_ms = now.timestamp_millis() - stale_after.as_millis() as i64;
        match (holder, locked_at) {
            (Some(holder), Some(at)) if at > cutoff_ms => Ok(LockStatus {
                locked: true,
                holder: Some(holder),
                since: millis_to_datetime(at),
            }),
            _ => Ok(LockStatus::unlocked()),
        }
    }

    async fn ensure_cell_exists(&self, cell_id: &str) -> Result<()> {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM cells WHERE id = ?1")
            .bind(cell_id)
            .fetch_optional(self.pool())
            .await?;

        match exists {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(format!("cell {}", cell_id))),
        }
    }
}
