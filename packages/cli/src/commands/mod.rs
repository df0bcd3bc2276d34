// ABOUTME: Top-level command line definition for the cellar binary
// ABOUTME: Global flags override CELLAR_* configuration before dispatching to subcommands

pub mod cells;
pub mod notebooks;
pub mod packages;
pub mod sandbox;

use anyhow::{Context, Result};
use cellar_sandbox::RuntimeConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use cells::CellCommands;
use notebooks::{DatasetCommands, NotebookCommands};
use packages::PackageCommands;

#[derive(Parser, Debug)]
#[command(name = "cellar")]
#[command(about = "Cellar - sandboxed notebook execution")]
#[command(version)]
pub struct Cli {
    /// SQLite database holding notebooks, cells and datasets
    #[arg(long, global = true, env = "CELLAR_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Directory under which per-project workspaces are created
    #[arg(long, global = true, env = "CELLAR_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    /// Per-run timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage notebooks
    #[command(subcommand)]
    Notebook(NotebookCommands),
    /// Add, edit, move and delete cells
    #[command(subcommand)]
    Cell(CellCommands),
    /// Register datasets for a project
    #[command(subcommand)]
    Dataset(DatasetCommands),
    /// Run one code cell in its project's sandbox
    Run {
        /// Cell ID to run
        cell_id: String,
        /// Name recorded as the lock holder while the cell runs
        #[arg(long, default_value = "cli")]
        holder: String,
    },
    /// Run every code cell of a notebook in order
    RunAll {
        /// Notebook ID
        notebook_id: String,
        /// Keep going after a failing cell
        #[arg(long)]
        keep_going: bool,
    },
    /// Manage Python packages inside a project's sandbox
    #[command(subcommand)]
    Packages(PackageCommands),
    /// Ask the sandbox for code completions
    Complete {
        /// Project ID
        project_id: String,
        /// Source file holding the code to complete
        file: PathBuf,
        /// 1-based line of the cursor
        #[arg(long)]
        line: u32,
        /// 0-based column of the cursor
        #[arg(long)]
        column: u32,
    },
    /// Remove managed containers left behind by earlier processes
    Reclaim,
    /// Print the location of an externalized output
    Output {
        /// Storage key from a cell's output references
        storage_key: String,
    },
}

impl Cli {
    /// Environment configuration with command line overrides applied
    pub fn config(&self) -> Result<RuntimeConfig> {
        let mut config = RuntimeConfig::from_env().context("Invalid CELLAR_* configuration")?;
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(root) = &self.workspace_root {
            config.workspace_root = root.clone();
        }
        if let Some(secs) = self.timeout {
            anyhow::ensure!(secs > 0, "--timeout must be at least 1 second");
            config.exec_timeout = Duration::from_secs(secs);
        }
        // One-shot processes never live long enough to reap
        config.idle_timeout = None;
        Ok(config)
    }
}

pub async fn handle_command(cli: Cli) -> Result<()> {
    let config = cli.config()?;

    match cli.command {
        Commands::Notebook(cmd) => notebooks::handle_notebook_command(&config, cmd).await,
        Commands::Dataset(cmd) => notebooks::handle_dataset_command(&config, cmd).await,
        Commands::Cell(cmd) => cells::handle_cell_command(&config, cmd).await,
        Commands::Run { cell_id, holder } => sandbox::run_cell(config, &cell_id, &holder).await,
        Commands::RunAll {
            notebook_id,
            keep_going,
        } => sandbox::run_notebook(config, &notebook_id, keep_going).await,
        Commands::Packages(cmd) => packages::handle_package_command(config, cmd).await,
        Commands::Complete {
            project_id,
            file,
            line,
            column,
        } => sandbox::complete(config, &project_id, &file, line, column).await,
        Commands::Reclaim => sandbox::reclaim(config).await,
        Commands::Output { storage_key } => sandbox::output_path(&config, &storage_key),
    }
}
