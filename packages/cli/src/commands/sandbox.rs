// ABOUTME: Commands that execute inside a project's sandbox
// ABOUTME: Running cells, completions, orphan reclamation and output lookup

use anyhow::{Context, Result};
use cellar_notebook::{Cell, CellKind, OutputKind, OutputStore};
use cellar_sandbox::{ExecutionStatus, RunOutcome, RuntimeConfig, RuntimeError};
use colored::*;
use std::path::Path;

use super::notebooks::new_table;
use crate::context::AppContext;

pub async fn run_cell(config: RuntimeConfig, cell_id: &str, holder: &str) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    let result = async {
        let cell = ctx.storage.get_cell(cell_id).await?;
        let notebook = ctx.storage.get_notebook(&cell.notebook_id).await?;
        let outcome = ctx
            .runtime
            .run_as(cell_id, &notebook.project_id, holder)
            .await?;
        print_outcome(&outcome);
        anyhow::ensure!(
            outcome.status == ExecutionStatus::Success,
            "Cell {} finished with status {}",
            cell_id,
            outcome.status.as_str()
        );
        Ok::<(), anyhow::Error>(())
    }
    .await;

    teardown(&ctx).await;
    if let Some(e) = result.as_ref().err().and_then(|e| e.downcast_ref::<RuntimeError>()) {
        if e.is_conflict() {
            eprintln!("{}", "The cell is held by another run or edit; retry once it finishes".yellow());
        }
    }
    result
}

pub async fn run_notebook(config: RuntimeConfig, notebook_id: &str, keep_going: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    let result = async {
        let notebook = ctx.storage.get_notebook(notebook_id).await?;
        let cells: Vec<Cell> = ctx
            .storage
            .list_cells(notebook_id)
            .await?
            .into_iter()
            .filter(|c| c.kind == CellKind::Code)
            .collect();

        let mut failed = 0;
        for cell in &cells {
            println!("{} [{}] {}", "Running".cyan(), cell.position, cell.id.dimmed());
            let outcome = ctx.runtime.run(&cell.id, &notebook.project_id).await?;
            print_outcome(&outcome);

            if outcome.status != ExecutionStatus::Success {
                failed += 1;
                if !keep_going {
                    anyhow::bail!("Stopped at cell {} ({})", cell.id, outcome.status.as_str());
                }
            }
        }

        println!(
            "Ran {} cells, {} failed",
            cells.len().to_string().cyan(),
            failed.to_string().red()
        );
        anyhow::ensure!(failed == 0, "{} cells failed", failed);
        Ok::<(), anyhow::Error>(())
    }
    .await;

    teardown(&ctx).await;
    result
}

pub async fn complete(
    config: RuntimeConfig,
    project_id: &str,
    file: &Path,
    line: u32,
    column: u32,
) -> Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let ctx = AppContext::open(config).await?;

    let completions = ctx
        .runtime
        .get_completions(project_id, &code, line, column)
        .await;
    teardown(&ctx).await;

    if completions.is_empty() {
        println!("{}", "No completions".yellow());
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(vec!["Label", "Kind", "Detail"]);
    for completion in &completions {
        table.add_row(vec![
            completion.label.clone(),
            completion.kind.clone(),
            completion.detail.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub async fn reclaim(config: RuntimeConfig) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let report = ctx.runtime.initialize_runtime().await?;

    println!(
        "Found {} orphaned containers, removed {}",
        report.found.to_string().cyan(),
        report.removed.to_string().green()
    );
    for error in &report.errors {
        eprintln!("{} {}", "Failed:".red(), error);
    }
    anyhow::ensure!(report.errors.is_empty(), "Some containers could not be removed");
    Ok(())
}

pub fn output_path(config: &RuntimeConfig, storage_key: &str) -> Result<()> {
    let store = OutputStore::new(config.output_dir.clone());
    let path = store.get_output_path(storage_key)?;
    anyhow::ensure!(path.exists(), "No stored output {}", storage_key);
    println!("{}", path.display());
    Ok(())
}

async fn teardown(ctx: &AppContext) {
    let report = ctx.runtime.teardown_all().await;
    for error in &report.errors {
        eprintln!("{} {}", "Teardown failed:".yellow(), error);
    }
}

fn print_outcome(outcome: &RunOutcome) {
    let status = match outcome.status {
        ExecutionStatus::Success => outcome.status.as_str().green(),
        ExecutionStatus::Error => outcome.status.as_str().red(),
        ExecutionStatus::Timeout => outcome.status.as_str().yellow(),
    };
    println!(
        "{} in {}ms (run {})",
        status.bold(),
        outcome.duration_ms,
        outcome.cell.execution_count
    );

    if !outcome.stdout.is_empty() {
        print!("{}", outcome.stdout);
    }
    if !outcome.stderr.is_empty() {
        eprint!("{}", outcome.stderr.dimmed());
    }

    for output in &outcome.cell.outputs {
        match output.kind {
            OutputKind::Error => println!("{}", output.content.red()),
            OutputKind::Text => println!("{}", output.content),
            OutputKind::Image => println!("{}", "[image]".dimmed()),
            kind => println!("{} {}", format!("[{}]", kind_label(kind)).dimmed(), output.content),
        }
    }
    for output_ref in &outcome.cell.output_refs {
        println!(
            "{} {} ({} bytes)",
            format!("[{} stored]", kind_label(output_ref.kind)).dimmed(),
            output_ref.storage_key,
            output_ref.byte_size
        );
    }
}

fn kind_label(kind: OutputKind) -> &'static str {
    match kind {
        OutputKind::Text => "text",
        OutputKind::Error => "error",
        OutputKind::Table => "table",
        OutputKind::Chart => "chart",
        OutputKind::Image => "image",
        OutputKind::Html => "html",
    }
}
