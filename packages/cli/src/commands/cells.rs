// ABOUTME: Cell editing commands
// ABOUTME: Writes go through the cell editor so they respect locks held by running cells

use anyhow::{Context, Result};
use cellar_notebook::{CellKind, OutputStore};
use cellar_sandbox::{CellEditor, RuntimeConfig};
use clap::Subcommand;
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::{AppContext, TracingSink};

#[derive(Subcommand, Debug)]
pub enum CellCommands {
    /// Add a cell to a notebook
    Add {
        /// Notebook ID
        notebook_id: String,
        /// Cell source; read from --file when omitted
        content: Option<String>,
        /// Read the cell source from a file
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// code or markdown
        #[arg(short, long, default_value = "code")]
        kind: String,
        /// Insert at this position (appends when omitted)
        #[arg(short, long)]
        position: Option<i64>,
    },
    /// Replace the source of a cell
    Edit {
        /// Cell ID
        cell_id: String,
        /// New source; read from --file when omitted
        content: Option<String>,
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,
        #[arg(long, default_value = "cli")]
        holder: String,
    },
    /// Move a cell to a new position
    Move {
        /// Cell ID
        cell_id: String,
        /// Target position (clamped to the notebook)
        position: i64,
    },
    /// Delete a cell
    Delete {
        /// Cell ID
        cell_id: String,
        #[arg(long, default_value = "cli")]
        holder: String,
    },
}

pub async fn handle_cell_command(config: &RuntimeConfig, command: CellCommands) -> Result<()> {
    let storage = AppContext::storage_only(config).await?;
    let outputs = Arc::new(OutputStore::new(config.output_dir.clone()));
    let editor = CellEditor::new(storage, outputs, Arc::new(TracingSink), config.lock_stale_after);

    match command {
        CellCommands::Add {
            notebook_id,
            content,
            file,
            kind,
            position,
        } => {
            let kind = CellKind::from_str(&kind)?;
            let content = read_source(content, file.as_deref())?;
            let cell = editor.create_cell(&notebook_id, kind, &content, position).await?;
            println!(
                "{} {} at position {}",
                "Added cell".green(),
                cell.id.cyan(),
                cell.position
            );
        }
        CellCommands::Edit {
            cell_id,
            content,
            file,
            holder,
        } => {
            let content = read_source(content, file.as_deref())?;
            editor.update_content(&cell_id, &content, &holder).await?;
            println!("{} {}", "Updated cell".green(), cell_id.cyan());
        }
        CellCommands::Move { cell_id, position } => {
            let cells = editor.move_cell(&cell_id, position).await?;
            let placed = cells
                .iter()
                .find(|c| c.id == cell_id)
                .map(|c| c.position)
                .unwrap_or(position);
            println!("{} {} to position {}", "Moved cell".green(), cell_id.cyan(), placed);
        }
        CellCommands::Delete { cell_id, holder } => {
            editor.delete_cell(&cell_id, &holder).await?;
            println!("{} {}", "Deleted cell".green(), cell_id.cyan());
        }
    }

    Ok(())
}

fn read_source(content: Option<String>, file: Option<&Path>) -> Result<String> {
    match (content, file) {
        (Some(content), _) => Ok(content),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => anyhow::bail!("Provide the cell source inline or with --file"),
    }
}
