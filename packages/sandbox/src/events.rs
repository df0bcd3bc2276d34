// ABOUTME: Notebook change notifications and the sinks that deliver them
// ABOUTME: Delivery is fire-and-forget: a missing subscriber never fails the operation that emitted it

use cellar_notebook::Cell;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotebookEvent {
    CellCreated { cell: Box<Cell> },
    CellUpdated { cell: Box<Cell> },
    CellDeleted { cell_id: String },
    CellLocked { cell_id: String, holder: String },
    CellUnlocked { cell_id: String },
    CellExecuting { cell_id: String },
    CellExecuted { cell: Box<Cell> },
}

impl NotebookEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::CellCreated { .. } => "cell_created",
            Self::CellUpdated { .. } => "cell_updated",
            Self::CellDeleted { .. } => "cell_deleted",
            Self::CellLocked { .. } => "cell_locked",
            Self::CellUnlocked { .. } => "cell_unlocked",
            Self::CellExecuting { .. } => "cell_executing",
            Self::CellExecuted { .. } => "cell_executed",
        }
    }
}

/// Event as delivered: the event fields plus a `timestamp`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: NotebookEvent,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: NotebookEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

pub trait EventSink: Send + Sync {
    /// Deliver an event for a notebook. Must not block or fail.
    fn notify(&self, notebook_id: &str, event: NotebookEvent);
}

/// Fans events out over a tokio broadcast channel
pub struct BroadcastSink {
    sender: broadcast::Sender<(String, EventEnvelope)>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, EventEnvelope)> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastSink {
    fn notify(&self, notebook_id: &str, event: NotebookEvent) {
        let kind = event.event_type().to_string();
        // Send only fails when nobody is subscribed
        if self
            .sender
            .send((notebook_id.to_string(), EventEnvelope::new(event)))
            .is_err()
        {
            debug!("No subscribers for {} on notebook {}", kind, notebook_id);
        }
    }
}

pub struct NoopSink;

impl EventSink for NoopSink {
    fn notify(&self, _notebook_id: &str, _event: NotebookEvent) {}
}
