// ABOUTME: Notebook and dataset commands
// ABOUTME: Store-only operations; none of these start a sandbox

use anyhow::{Context, Result};
use cellar_notebook::{CellStatus, DatasetLocator};
use cellar_sandbox::RuntimeConfig;
use clap::Subcommand;
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use std::path::PathBuf;

use crate::context::AppContext;

#[derive(Subcommand, Debug)]
pub enum NotebookCommands {
    /// Create a notebook for a project
    Create {
        /// Project ID the notebook belongs to
        project_id: String,
        /// Notebook name
        name: String,
    },
    /// List the notebooks of a project
    List {
        /// Project ID
        project_id: String,
    },
    /// Show a notebook and its cells
    Show {
        /// Notebook ID
        notebook_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum DatasetCommands {
    /// Register a file as a dataset of a project
    Add {
        /// Project ID
        project_id: String,
        /// File to register
        path: PathBuf,
        /// Name the file gets inside the sandbox (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// List the datasets of a project
    List {
        /// Project ID
        project_id: String,
    },
}

pub async fn handle_notebook_command(config: &RuntimeConfig, command: NotebookCommands) -> Result<()> {
    let storage = AppContext::storage_only(config).await?;

    match command {
        NotebookCommands::Create { project_id, name } => {
            let notebook = storage.create_notebook(&project_id, &name).await?;
            println!("{} {}", "Created notebook".green(), notebook.id.cyan());
        }
        NotebookCommands::List { project_id } => {
            let notebooks = storage.list_notebooks(&project_id).await?;
            if notebooks.is_empty() {
                println!("{}", "No notebooks found".yellow());
                return Ok(());
            }

            let mut table = new_table();
            table.set_header(vec!["ID", "Name", "Updated"]);
            for notebook in &notebooks {
                table.add_row(vec![
                    notebook.id.clone(),
                    notebook.name.clone(),
                    notebook.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                ]);
            }
            println!("{}", table);
        }
        NotebookCommands::Show { notebook_id } => {
            let notebook = storage.get_notebook(&notebook_id).await?;
            let cells = storage.list_cells(&notebook_id).await?;

            println!(
                "{} {} {}",
                "Notebook".blue().bold(),
                notebook.name.bold(),
                format!("({})", notebook.project_id).dimmed()
            );

            let mut table = new_table();
            table.set_header(vec!["#", "ID", "Kind", "Status", "Runs", "Content"]);
            for cell in &cells {
                let status = match cell.status {
                    CellStatus::Success => cell.status.as_str().green().to_string(),
                    CellStatus::Error => cell.status.as_str().red().to_string(),
                    CellStatus::Running => cell.status.as_str().yellow().to_string(),
                    CellStatus::Idle => cell.status.as_str().to_string(),
                };
                table.add_row(vec![
                    cell.position.to_string(),
                    cell.id.clone(),
                    cell.kind.as_str().to_string(),
                    status,
                    cell.execution_count.to_string(),
                    first_line(&cell.content, 50),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}

pub async fn handle_dataset_command(config: &RuntimeConfig, command: DatasetCommands) -> Result<()> {
    let storage = AppContext::storage_only(config).await?;

    match command {
        DatasetCommands::Add {
            project_id,
            path,
            name,
        } => {
            let source = path
                .canonicalize()
                .with_context(|| format!("Dataset file {} not found", path.display()))?;
            let filename = match name {
                Some(name) => name,
                None => source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("Dataset path has no file name")?,
            };

            let dataset = storage.register_dataset(&project_id, &filename, &source).await?;
            println!(
                "{} {} as {}",
                "Registered dataset".green(),
                dataset.id.cyan(),
                dataset.filename
            );
        }
        DatasetCommands::List { project_id } => {
            let datasets = storage.list_datasets(&project_id).await?;
            if datasets.is_empty() {
                println!("{}", "No datasets registered".yellow());
                return Ok(());
            }

            let mut table = new_table();
            table.set_header(vec!["ID", "Filename", "Source"]);
            for dataset in &datasets {
                table.add_row(vec![
                    dataset.id.clone(),
                    dataset.filename.clone(),
                    dataset.source_path.display().to_string(),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}

pub(crate) fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub(crate) fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
