// ABOUTME: Blob storage for outputs too large to keep inline on the cell
// ABOUTME: One file per output under a flat directory, addressed by an opaque storage key

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::types::{CellOutput, OutputRef};

pub struct OutputStore {
    root: PathBuf,
    seq: AtomicU64,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Write `output` to blob storage and return a reference to it.
    ///
    /// PNG payloads arrive base64-encoded and are stored decoded, so the blob
    /// is a real image file. `byte_size` is always the inline payload size.
    pub async fn save_large_output(&self, cell_id: &str, output: &CellOutput) -> Result<OutputRef> {
        tokio::fs::create_dir_all(&self.root).await?;

        let extension = output.kind.extension(output.mime_type.as_deref());
        let storage_key = format!(
            "{}_{}_{}.{}",
            sanitize_key_part(cell_id),
            Utc::now().timestamp_millis(),
            self.seq.fetch_add(1, Ordering::Relaxed),
            extension
        );

        let bytes = if extension == "png" {
            match general_purpose::STANDARD.decode(output.content.as_bytes()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Image output for cell {} is not valid base64: {}", cell_id, e);
                    output.content.as_bytes().to_vec()
                }
            }
        } else {
            output.content.as_bytes().to_vec()
        };

        let path = self.root.join(&storage_key);
        tokio::fs::write(&path, &bytes).await?;
        debug!("Stored {} byte output for cell {} as {}", bytes.len(), cell_id, storage_key);

        Ok(OutputRef {
            kind: output.kind,
            storage_key,
            mime_type: output.mime_type.clone(),
            byte_size: output.byte_size(),
        })
    }

    /// Resolve a storage key to its file path. Keys that could escape the
    /// storage root are rejected.
    pub fn get_output_path(&self, storage_key: &str) -> Result<PathBuf> {
        if storage_key.is_empty()
            || storage_key.contains('/')
            || storage_key.contains('\\')
            || storage_key.contains("..")
        {
            return Err(StorageError::InvalidStorageKey(storage_key.to_string()));
        }
        Ok(self.root.join(storage_key))
    }

    pub async fn read_output(&self, storage_key: &str) -> Result<Vec<u8>> {
        let path = self.get_output_path(storage_key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("output {}", storage_key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove one blob. Returns `Ok(false)` when it was already gone.
    pub async fn delete_output(&self, storage_key: &str) -> Result<bool> {
        let path = self.get_output_path(storage_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted output {}", storage_key);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of the blobs behind `refs`; failures are logged.
    /// Returns how many files were removed.
    pub async fn delete_outputs(&self, refs: &[OutputRef]) -> usize {
        let mut removed = 0;
        for output_ref in refs {
            match self.delete_output(&output_ref.storage_key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to delete output {}: {}", output_ref.storage_key, e),
            }
        }
        removed
    }
}

fn sanitize_key_part(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
