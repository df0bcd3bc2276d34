// ABOUTME: Runs one cell end to end under its cooperative lock
// ABOUTME: Lock, mark running, resolve sandbox, execute, classify and persist, then always release

use cellar_notebook::{Cell, CellKind, CellOutput, CellStatus, DatasetLocator, ExecutionRecord, NotebookStorage};
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::classifier::{ClassifiedOutputs, OutputClassifier};
use crate::editor::acquire_cell_lock;
use crate::error::{Result, RuntimeError};
use crate::events::{EventSink, NotebookEvent};
use crate::manager::SandboxManager;
use crate::sandbox::{ExecuteOptions, ExecutionResult, ExecutionStatus};

/// Holder identity used when the caller does not supply one
pub const DEFAULT_HOLDER: &str = "executor";

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// The cell as persisted after the run
    pub cell: Cell,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

pub struct ExecutionOrchestrator {
    storage: Arc<NotebookStorage>,
    datasets: Arc<dyn DatasetLocator>,
    sandboxes: Arc<SandboxManager>,
    classifier: OutputClassifier,
    events: Arc<dyn EventSink>,
    holder: String,
    stale_after: Duration,
}

impl ExecutionOrchestrator {
    pub fn new(
        storage: Arc<NotebookStorage>,
        datasets: Arc<dyn DatasetLocator>,
        sandboxes: Arc<SandboxManager>,
        classifier: OutputClassifier,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let stale_after = sandboxes.config().lock_stale_after;
        Self {
            storage,
            datasets,
            sandboxes,
            classifier,
            events,
            holder: DEFAULT_HOLDER.to_string(),
            stale_after,
        }
    }

    pub async fn run(&self, cell_id: &str, project_id: &str) -> Result<RunOutcome> {
        self.run_as(cell_id, project_id, &self.holder).await
    }

    /// Run a code cell while holding its lock as `holder`.
    ///
    /// Code errors and timeouts come back as `Ok` with the cell in `error`
    /// status. A held lock is `Conflict`; nothing runs in that case.
    pub async fn run_as(&self, cell_id: &str, project_id: &str, holder: &str) -> Result<RunOutcome> {
        let cell = self.storage.get_cell(cell_id).await?;
        if cell.kind != CellKind::Code {
            return Err(RuntimeError::InvalidRequest(format!(
                "cell {} is not a code cell",
                cell_id
            )));
        }

        if let Err(e) = acquire_cell_lock(&self.storage, cell_id, holder, self.stale_after).await {
            info!("Run of cell {} by {} rejected: {}", cell_id, holder, e);
            return Err(e);
        }

        self.events.notify(
            &cell.notebook_id,
            NotebookEvent::CellLocked {
                cell_id: cell_id.to_string(),
                holder: holder.to_string(),
            },
        );

        let started = Instant::now();
        let recorded = AtomicBool::new(false);
        let run = AssertUnwindSafe(self.execute_locked(&cell, project_id, &recorded)).catch_unwind();
        let outcome = self.hold_lock(cell_id, holder, run).await;

        if outcome.is_err() {
            error!("Run of cell {} panicked", cell_id);
            if !recorded.load(Ordering::SeqCst) {
                self.persist_failure(&cell, "Execution aborted by an internal error", elapsed_ms(started))
                    .await;
            }
        }

        if let Err(e) = self.storage.unlock_cell(cell_id).await {
            // The staleness window frees the cell eventually
            error!("Failed to release lock on cell {}: {}", cell_id, e);
        }
        self.events.notify(
            &cell.notebook_id,
            NotebookEvent::CellUnlocked {
                cell_id: cell_id.to_string(),
            },
        );

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Drive `work` to completion, refreshing the lock often enough that it
    /// never reads as stale while the run is still going.
    async fn hold_lock<F: Future>(&self, cell_id: &str, holder: &str, work: F) -> F::Output {
        let mut heartbeat = tokio::time::interval(heartbeat_period(self.stale_after));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        heartbeat.tick().await;

        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = heartbeat.tick() => match self.storage.refresh_cell_lock(cell_id, holder).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Lock on cell {} is no longer held by {}", cell_id, holder),
                    Err(e) => warn!("Failed to refresh lock on cell {}: {}", cell_id, e),
                },
            }
        }
    }

    /// `recorded` flips once a terminal record has been written for this run.
    async fn execute_locked(&self, cell: &Cell, project_id: &str, recorded: &AtomicBool) -> Result<RunOutcome> {
        let started = Instant::now();

        let (result, classified) = match self.attempt(cell, project_id).await {
            Ok(done) => done,
            Err(e) => {
                warn!("Run of cell {} failed: {}", cell.id, e);
                if self.persist_failure(cell, &e.to_string(), elapsed_ms(started)).await {
                    recorded.store(true, Ordering::SeqCst);
                }
                return Err(e);
            }
        };

        let status = match result.status {
            ExecutionStatus::Success => CellStatus::Success,
            ExecutionStatus::Error | ExecutionStatus::Timeout => CellStatus::Error,
        };

        let new_refs = classified.refs.clone();
        let record = ExecutionRecord {
            status,
            duration_ms: result.duration_ms,
            outputs: classified.inline,
            output_refs: classified.refs,
        };

        let updated = match self.storage.record_execution(&cell.id, record).await {
            Ok(updated) => updated,
            Err(e) => {
                let e = RuntimeError::from(e);
                self.classifier.discard(&new_refs).await;
                if self.persist_failure(cell, &e.to_string(), elapsed_ms(started)).await {
                    recorded.store(true, Ordering::SeqCst);
                }
                return Err(e);
            }
        };
        recorded.store(true, Ordering::SeqCst);
        self.classifier.discard(&cell.output_refs).await;

        info!(
            "Cell {} executed: {} in {}ms",
            cell.id,
            result.status.as_str(),
            result.duration_ms
        );
        self.events.notify(
            &cell.notebook_id,
            NotebookEvent::CellExecuted {
                cell: Box::new(updated.clone()),
            },
        );

        Ok(RunOutcome {
            cell: updated,
            status: result.status,
            stdout: result.stdout,
            stderr: result.stderr,
            duration_ms: result.duration_ms,
        })
    }

    async fn attempt(&self, cell: &Cell, project_id: &str) -> Result<(ExecutionResult, ClassifiedOutputs)> {
        self.storage.set_cell_status(&cell.id, CellStatus::Running).await?;
        self.events.notify(
            &cell.notebook_id,
            NotebookEvent::CellExecuting {
                cell_id: cell.id.clone(),
            },
        );

        let datasets = self.datasets.list_datasets(project_id).await?;
        let sandbox = self.sandboxes.ensure(project_id, &datasets).await?;
        let result = self
            .sandboxes
            .execute(&sandbox, &cell.content, ExecuteOptions::default())
            .await?;
        let classified = self.classifier.classify(&cell.id, result.outputs.clone()).await?;

        Ok((result, classified))
    }

    /// Best-effort terminal error state for runs that failed outside the code.
    /// Returns whether the record was written.
    async fn persist_failure(&self, cell: &Cell, message: &str, duration_ms: i64) -> bool {
        let record = ExecutionRecord {
            status: CellStatus::Error,
            duration_ms,
            outputs: vec![CellOutput::error(message)],
            output_refs: Vec::new(),
        };

        match self.storage.record_execution(&cell.id, record).await {
            Ok(updated) => {
                self.classifier.discard(&cell.output_refs).await;
                self.events.notify(
                    &cell.notebook_id,
                    NotebookEvent::CellExecuted {
                        cell: Box::new(updated),
                    },
                );
                true
            }
            Err(e) => {
                error!("Failed to record failure of cell {}: {}", cell.id, e);
                false
            }
        }
    }
}

fn heartbeat_period(stale_after: Duration) -> Duration {
    (stale_after / 3).max(Duration::from_millis(50))
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}
