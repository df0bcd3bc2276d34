// ABOUTME: Splits run outputs into inline payloads and blob-stored references
// ABOUTME: Keeps persisted cell rows bounded regardless of what a cell prints or plots

use cellar_notebook::{CellOutput, OutputRef, OutputStore};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct ClassifiedOutputs {
    pub inline: Vec<CellOutput>,
    pub refs: Vec<OutputRef>,
}

pub struct OutputClassifier {
    store: Arc<OutputStore>,
    threshold: u64,
}

impl OutputClassifier {
    pub fn new(store: Arc<OutputStore>, threshold: u64) -> Self {
        Self { store, threshold }
    }

    /// Outputs at or under the threshold stay inline in their original
    /// order; larger ones are written to the blob store.
    pub async fn classify(&self, cell_id: &str, outputs: Vec<CellOutput>) -> Result<ClassifiedOutputs> {
        let mut classified = ClassifiedOutputs::default();

        for output in outputs {
            if output.byte_size() <= self.threshold {
                classified.inline.push(output);
                continue;
            }

            let output_ref = self.store.save_large_output(cell_id, &output).await?;
            debug!(
                "Externalized {} byte {:?} output of cell {} as {}",
                output_ref.byte_size, output_ref.kind, cell_id, output_ref.storage_key
            );
            classified.refs.push(output_ref);
        }

        Ok(classified)
    }

    /// Remove blobs that no persisted cell points at any more
    pub async fn discard(&self, refs: &[OutputRef]) {
        if refs.is_empty() {
            return;
        }
        let removed = self.store.delete_outputs(refs).await;
        debug!("Removed {} of {} superseded outputs", removed, refs.len());
    }
}
