// ABOUTME: Core data model for notebooks, cells, outputs and datasets
// ABOUTME: Shared by the storage layer and the execution runtime

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    /// Executable source code
    Code,
    /// Descriptive content, never executed
    Markdown,
}

impl CellKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Code => "code",
            Self::Markdown => "markdown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "code" => Ok(Self::Code),
            "markdown" => Ok(Self::Markdown),
            _ => Err(StorageError::InvalidStatus(format!("unknown cell kind: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Idle,
    Running,
    Success,
    Error,
}

impl CellStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(StorageError::InvalidStatus(s.to_string())),
        }
    }
}

/// Kind tag of a produced output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Text,
    Error,
    Table,
    Chart,
    Image,
    Html,
}

impl OutputKind {
    /// File extension used when the output is written to blob storage
    pub fn extension(&self, mime_type: Option<&str>) -> &'static str {
        match mime_type {
            Some("image/png") => "png",
            Some("image/svg+xml") => "svg",
            Some("text/html") => "html",
            Some("application/json") => "json",
            _ => match self {
                Self::Html => "html",
                Self::Table | Self::Chart => "json",
                Self::Image => "bin",
                Self::Text | Self::Error => "txt",
            },
        }
    }
}

/// One item produced by executing a cell.
///
/// Binary payloads (PNG images) are carried base64-encoded, so the payload is
/// always a string and its byte size is the UTF-8 length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellOutput {
    pub kind: OutputKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl CellOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Text,
            content: content.into(),
            mime_type: Some("text/plain".to_string()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Error,
            content: message.into(),
            mime_type: Some("text/plain".to_string()),
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Pointer to an output that was too large to keep inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRef {
    pub kind: OutputKind,
    pub storage_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub byte_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: String,
    pub notebook_id: String,
    pub kind: CellKind,
    pub content: String,
    pub position: i64,
    pub execution_count: i64,
    pub status: CellStatus,
    pub duration_ms: Option<i64>,
    pub outputs: Vec<CellOutput>,
    pub output_refs: Vec<OutputRef>,

    // Cooperative lock
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal state written back after a run
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub status: CellStatus,
    pub duration_ms: i64,
    pub outputs: Vec<CellOutput>,
    pub output_refs: Vec<OutputRef>,
}

/// Observed lock state of a cell after applying the staleness window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

impl LockStatus {
    pub fn unlocked() -> Self {
        Self {
            locked: false,
            holder: None,
            since: None,
        }
    }
}

/// A dataset file belonging to a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub project_id: String,
    /// Display filename, e.g. `sales.csv`
    pub filename: String,
    /// Backing file on the host
    pub source_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_strings() {
        for status in [
            CellStatus::Idle,
            CellStatus::Running,
            CellStatus::Success,
            CellStatus::Error,
        ] {
            assert_eq!(CellStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(CellStatus::from_str("timeout").is_err());
    }

    #[test]
    fn test_output_serializes_lowercase_kind() {
        let output = CellOutput::text("120");
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["content"], "120");
        assert_eq!(output.byte_size(), 3);
    }

    #[test]
    fn test_output_without_mime_deserializes() {
        let output: CellOutput =
            serde_json::from_str(r#"{"kind":"html","content":"<b>x</b>"}"#).unwrap();
        assert_eq!(output.kind, OutputKind::Html);
        assert!(output.mime_type.is_none());
        assert_eq!(output.kind.extension(None), "html");
    }
}
