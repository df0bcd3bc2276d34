// ABOUTME: SQLite storage for notebooks and cells
// ABOUTME: Every insert/delete/move/reorder renormalizes cell positions to a dense 0..N-1 range

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::types::{Cell, CellKind, CellStatus, ExecutionRecord, Notebook};

pub(crate) const CELL_COLUMNS: &str = "id, notebook_id, kind, content, position, execution_count, \
     status, duration_ms, outputs, output_refs, locked_by, locked_at, created_at, updated_at";

const ORDERED_IDS: &str =
    "SELECT id FROM cells WHERE notebook_id = ?1 ORDER BY position ASC, created_at ASC, id ASC";

/// Durable store for notebooks, cells and their lock state
pub struct NotebookStorage {
    pool: SqlitePool,
}

impl NotebookStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) a SQLite database and run migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let storage = Self::new(pool);
        storage.migrate().await?;
        Ok(storage)
    }

    /// Single-connection in-memory database, used by tests and throwaway runs.
    ///
    /// The connection is pinned: an in-memory SQLite database vanishes with
    /// the connection that created it.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self::new(pool);
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // NOTEBOOK OPERATIONS
    // ========================================================================

    pub async fn create_notebook(&self, project_id: &str, name: &str) -> Result<Notebook> {
        let now = Utc::now();
        let notebook = Notebook {
            id: new_id("nb"),
            project_id: project_id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO notebooks (id, project_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&notebook.id)
        .bind(&notebook.project_id)
        .bind(&notebook.name)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(notebook)
    }

    pub async fn get_notebook(&self, id: &str) -> Result<Notebook> {
        let row = sqlx::query(
            "SELECT id, project_id, name, created_at, updated_at FROM notebooks WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("notebook {}", id)))?;

        Ok(Notebook {
            id: row.get("id"),
            project_id: row.get("project_id"),
            name: row.get("name"),
            created_at: parse_timestamp(row.get("created_at"))?,
            updated_at: parse_timestamp(row.get("updated_at"))?,
        })
    }

    pub async fn list_notebooks(&self, project_id: &str) -> Result<Vec<Notebook>> {
        let rows = sqlx::query(
            "SELECT id, project_id, name, created_at, updated_at FROM notebooks
             WHERE project_id = ?1 ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Notebook {
                    id: row.get("id"),
                    project_id: row.get("project_id"),
                    name: row.get("name"),
                    created_at: parse_timestamp(row.get("created_at"))?,
                    updated_at: parse_timestamp(row.get("updated_at"))?,
                })
            })
            .collect()
    }

    // ========================================================================
    // CELL OPERATIONS
    // ========================================================================

    pub async fn get_cell(&self, id: &str) -> Result<Cell> {
        let sql = format!("SELECT {} FROM cells WHERE id = ?1", CELL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("cell {}", id)))?;

        row_to_cell(row)
    }

    pub async fn list_cells(&self, notebook_id: &str) -> Result<Vec<Cell>> {
        let sql = format!(
            "SELECT {} FROM cells WHERE notebook_id = ?1 ORDER BY position ASC",
            CELL_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(notebook_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_cell).collect()
    }

    /// Insert a cell at `position` (clamped to `0..=len`), or append when `None`.
    pub async fn create_cell(
        &self,
        notebook_id: &str,
        kind: CellKind,
        content: &str,
        position: Option<i64>,
    ) -> Result<Cell> {
        let mut tx = self.pool.begin().await?;

        let notebook: Option<String> =
            sqlx::query_scalar("SELECT id FROM notebooks WHERE id = ?1")
                .bind(notebook_id)
                .fetch_optional(&mut *tx)
                .await?;
        if notebook.is_none() {
            return Err(StorageError::NotFound(format!("notebook {}", notebook_id)));
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cells WHERE notebook_id = ?1")
            .bind(notebook_id)
            .fetch_one(&mut *tx)
            .await?;
        let position = position.map(|p| p.clamp(0, count)).unwrap_or(count);

        sqlx::query("UPDATE cells SET position = position + 1 WHERE notebook_id = ?1 AND position >= ?2")
            .bind(notebook_id)
            .bind(position)
            .execute(&mut *tx)
            .await?;

        let id = new_id("cell");
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO cells (id, notebook_id, kind, content, position, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&id)
        .bind(notebook_id)
        .bind(kind.as_str())
        .bind(content)
        .bind(position)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        renormalize_positions(&mut tx, notebook_id).await?;
        touch_notebook(&mut tx, notebook_id, &now).await?;
        tx.commit().await?;

        debug!("Created {} cell {} at position {}", kind.as_str(), id, position);
        self.get_cell(&id).await
    }

    pub async fn update_cell_content(&self, id: &str, content: &str) -> Result<Cell> {
        let result = sqlx::query("UPDATE cells SET content = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(content)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("cell {}", id)));
        }

        self.get_cell(id).await
    }

    pub async fn set_cell_status(&self, id: &str, status: CellStatus) -> Result<()> {
        let result = sqlx::query("UPDATE cells SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("cell {}", id)));
        }

        Ok(())
    }

    /// Persist the terminal state of a run, incrementing the execution counter
    /// in the same statement.
    pub async fn record_execution(&self, id: &str, record: ExecutionRecord) -> Result<Cell> {
        let outputs = serde_json::to_string(&record.outputs)?;
        let output_refs = serde_json::to_string(&record.output_refs)?;

        let result = sqlx::query(
            r#"
            UPDATE cells
            SET execution_count = execution_count + 1,
                status = ?1,
                duration_ms = ?2,
                outputs = ?3,
                output_refs = ?4,
                updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.duration_ms)
        .bind(outputs)
        .bind(output_refs)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("cell {}", id)));
        }

        self.get_cell(id).await
    }

    /// Delete a cell and close the gap it leaves. Returns the deleted cell.
    pub async fn delete_cell(&self, id: &str) -> Result<Cell> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM cells WHERE id = ?1", CELL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("cell {}", id)))?;
        let cell = row_to_cell(row)?;

        sqlx::query("DELETE FROM cells WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        renormalize_positions(&mut tx, &cell.notebook_id).await?;
        touch_notebook(&mut tx, &cell.notebook_id, &Utc::now().to_rfc3339()).await?;
        tx.commit().await?;

        Ok(cell)
    }

    /// Move one cell to `position` (clamped), shifting the cells in between.
    /// Returns the notebook's cells in their new order.
    pub async fn move_cell(&self, id: &str, position: i64) -> Result<Vec<Cell>> {
        let mut tx = self.pool.begin().await?;

        let notebook_id: String = sqlx::query_scalar("SELECT notebook_id FROM cells WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("cell {}", id)))?;

        let mut order: Vec<String> = sqlx::query_scalar(ORDERED_IDS)
            .bind(&notebook_id)
            .fetch_all(&mut *tx)
            .await?;

        if let Some(current) = order.iter().position(|cell_id| cell_id == id) {
            let moved = order.remove(current);
            let target = position.clamp(0, order.len() as i64) as usize;
            order.insert(target, moved);
        }

        apply_order(&mut tx, &order).await?;
        touch_notebook(&mut tx, &notebook_id, &Utc::now().to_rfc3339()).await?;
        tx.commit().await?;

        self.list_cells(&notebook_id).await
    }

    /// Replace the notebook's order wholesale. `ordered_ids` must be a
    /// permutation of the notebook's current cell ids.
    pub async fn reorder_cells(&self, notebook_id: &str, ordered_ids: &[String]) -> Result<Vec<Cell>> {
        let mut tx = self.pool.begin().await?;

        let current: Vec<String> = sqlx::query_scalar(ORDERED_IDS)
            .bind(notebook_id)
            .fetch_all(&mut *tx)
            .await?;

        let requested: HashSet<&String> = ordered_ids.iter().collect();
        let existing: HashSet<&String> = current.iter().collect();
        if requested.len() != ordered_ids.len() {
            return Err(StorageError::InvalidReorder(
                "cell ids must not repeat".to_string(),
            ));
        }
        if requested != existing {
            return Err(StorageError::InvalidReorder(format!(
                "expected a permutation of the {} cells in notebook {}",
                current.len(),
                notebook_id
            )));
        }

        apply_order(&mut tx, ordered_ids).await?;
        touch_notebook(&mut tx, notebook_id, &Utc::now().to_rfc3339()).await?;
        tx.commit().await?;

        self.list_cells(notebook_id).await
    }
}

/// Rewrite positions to 0..N-1 following the current order.
async fn renormalize_positions(conn: &mut SqliteConnection, notebook_id: &str) -> Result<()> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT id, position FROM cells WHERE notebook_id = ?1
         ORDER BY position ASC, created_at ASC, id ASC",
    )
    .bind(notebook_id)
    .fetch_all(&mut *conn)
    .await?;

    for (index, (id, position)) in rows.iter().enumerate() {
        if *position != index as i64 {
            sqlx::query("UPDATE cells SET position = ?1 WHERE id = ?2")
                .bind(index as i64)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
    }

    Ok(())
}

async fn apply_order(conn: &mut SqliteConnection, ordered_ids: &[String]) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    for (index, id) in ordered_ids.iter().enumerate() {
        sqlx::query(
            "UPDATE cells SET position = ?1, updated_at = ?2 WHERE id = ?3 AND position != ?1",
        )
        .bind(index as i64)
        .bind(&now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn touch_notebook(conn: &mut SqliteConnection, notebook_id: &str, now: &str) -> Result<()> {
    sqlx::query("UPDATE notebooks SET updated_at = ?1 WHERE id = ?2")
        .bind(now)
        .bind(notebook_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) fn row_to_cell(row: SqliteRow) -> Result<Cell> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let outputs: String = row.get("outputs");
    let output_refs: String = row.get("output_refs");
    let locked_at: Option<i64> = row.get("locked_at");

    Ok(Cell {
        id: row.get("id"),
        notebook_id: row.get("notebook_id"),
        kind: CellKind::from_str(&kind)?,
        content: row.get("content"),
        position: row.get("position"),
        execution_count: row.get("execution_count"),
        status: CellStatus::from_str(&status)?,
        duration_ms: row.get("duration_ms"),
        outputs: serde_json::from_str(&outputs)?,
        output_refs: serde_json::from_str(&output_refs)?,
        locked_by: row.get("locked_by"),
        locked_at: locked_at.and_then(millis_to_datetime),
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    })
}

pub(crate) fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

pub(crate) fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidStatus(format!("invalid timestamp {}: {}", value, e)))
}

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().to_string().replace('-', ""))
}
