// ABOUTME: Direct cell edits shared by human and agent surfaces
// ABOUTME: Content writes and deletes go through the cell lock so they never race a running cell

use cellar_notebook::{Cell, CellKind, NotebookStorage, OutputStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::error::{Result, RuntimeError};
use crate::events::{EventSink, NotebookEvent};

/// Take the cell lock for `holder` or report who holds it.
///
/// A lock released between the failed attempt and the holder lookup is
/// retried once, so a conflict names the actual holder whenever possible.
pub(crate) async fn acquire_cell_lock(
    storage: &NotebookStorage,
    cell_id: &str,
    holder: &str,
    stale_after: Duration,
) -> Result<()> {
    let mut since = None;
    for _ in 0..2 {
        if storage.lock_cell(cell_id, holder, stale_after).await? {
            return Ok(());
        }

        let lock = storage.get_cell_lock(cell_id, stale_after).await?;
        if let (true, Some(current)) = (lock.locked, lock.holder) {
            return Err(RuntimeError::Conflict {
                cell_id: cell_id.to_string(),
                holder: current,
                since: lock.since,
            });
        }
        since = lock.since;
    }

    Err(RuntimeError::Conflict {
        cell_id: cell_id.to_string(),
        holder: "unknown".to_string(),
        since,
    })
}

pub struct CellEditor {
    storage: Arc<NotebookStorage>,
    outputs: Arc<OutputStore>,
    events: Arc<dyn EventSink>,
    stale_after: Duration,
}

impl CellEditor {
    pub fn new(
        storage: Arc<NotebookStorage>,
        outputs: Arc<OutputStore>,
        events: Arc<dyn EventSink>,
        stale_after: Duration,
    ) -> Self {
        Self {
            storage,
            outputs,
            events,
            stale_after,
        }
    }

    pub async fn create_cell(
        &self,
        notebook_id: &str,
        kind: CellKind,
        content: &str,
        position: Option<i64>,
    ) -> Result<Cell> {
        let before = self.positions(notebook_id).await?;
        let cell = self
            .storage
            .create_cell(notebook_id, kind, content, position)
            .await?;

        self.events.notify(
            notebook_id,
            NotebookEvent::CellCreated {
                cell: Box::new(cell.clone()),
            },
        );
        let after = self.storage.list_cells(notebook_id).await?;
        self.notify_shifted(notebook_id, &before, &after, Some(&cell.id));
        Ok(cell)
    }

    pub async fn update_content(&self, cell_id: &str, content: &str, holder: &str) -> Result<Cell> {
        self.acquire(cell_id, holder).await?;

        let written = self.storage.update_cell_content(cell_id, content).await;
        self.release(cell_id).await;

        written?;
        let cell = self.storage.get_cell(cell_id).await?;
        self.events.notify(
            &cell.notebook_id,
            NotebookEvent::CellUpdated {
                cell: Box::new(cell.clone()),
            },
        );
        Ok(cell)
    }

    pub async fn delete_cell(&self, cell_id: &str, holder: &str) -> Result<Cell> {
        self.acquire(cell_id, holder).await?;

        let deleted = match self.storage.delete_cell(cell_id).await {
            Ok(cell) => cell,
            Err(e) => {
                self.release(cell_id).await;
                return Err(e.into());
            }
        };
        self.outputs.delete_outputs(&deleted.output_refs).await;

        self.events.notify(
            &deleted.notebook_id,
            NotebookEvent::CellDeleted {
                cell_id: cell_id.to_string(),
            },
        );

        // Cells below the deleted one moved up
        let remaining = self.storage.list_cells(&deleted.notebook_id).await?;
        for cell in remaining.iter().filter(|c| c.position >= deleted.position) {
            self.events.notify(
                &deleted.notebook_id,
                NotebookEvent::CellUpdated {
                    cell: Box::new(cell.clone()),
                },
            );
        }
        Ok(deleted)
    }

    pub async fn move_cell(&self, cell_id: &str, position: i64) -> Result<Vec<Cell>> {
        let cell = self.storage.get_cell(cell_id).await?;
        let before = self.positions(&cell.notebook_id).await?;
        let cells = self.storage.move_cell(cell_id, position).await?;
        self.notify_shifted(&cell.notebook_id, &before, &cells, None);
        Ok(cells)
    }

    pub async fn reorder(&self, notebook_id: &str, ordered_ids: &[String]) -> Result<Vec<Cell>> {
        let before = self.positions(notebook_id).await?;
        let cells = self.storage.reorder_cells(notebook_id, ordered_ids).await?;
        self.notify_shifted(notebook_id, &before, &cells, None);
        Ok(cells)
    }

    async fn acquire(&self, cell_id: &str, holder: &str) -> Result<()> {
        acquire_cell_lock(&self.storage, cell_id, holder, self.stale_after).await
    }

    async fn release(&self, cell_id: &str) {
        if let Err(e) = self.storage.unlock_cell(cell_id).await {
            error!("Failed to release lock on cell {}: {}", cell_id, e);
        }
    }

    async fn positions(&self, notebook_id: &str) -> Result<HashMap<String, i64>> {
        Ok(self
            .storage
            .list_cells(notebook_id)
            .await?
            .into_iter()
            .map(|cell| (cell.id, cell.position))
            .collect())
    }

    /// Broadcast `cell_updated` for every cell whose position changed
    fn notify_shifted(
        &self,
        notebook_id: &str,
        before: &HashMap<String, i64>,
        after: &[Cell],
        skip: Option<&str>,
    ) {
        for cell in after {
            if Some(cell.id.as_str()) == skip {
                continue;
            }
            if before.get(&cell.id) != Some(&cell.position) {
                self.events.notify(
                    notebook_id,
                    NotebookEvent::CellUpdated {
                        cell: Box::new(cell.clone()),
                    },
                );
            }
        }
    }
}
