// ABOUTME: Package management commands
// ABOUTME: pip operations inside a project's sandbox; the sandbox is torn down on exit

use anyhow::Result;
use cellar_sandbox::RuntimeConfig;
use clap::Subcommand;
use colored::*;

use super::notebooks::new_table;
use crate::context::AppContext;

#[derive(Subcommand, Debug)]
pub enum PackageCommands {
    /// List installed packages
    List {
        /// Project ID
        project_id: String,
    },
    /// Install a package (pip requirement syntax)
    Install {
        /// Project ID
        project_id: String,
        /// Requirement, e.g. `numpy` or `pandas==2.2.2`
        package: String,
    },
    /// Uninstall a package
    Uninstall {
        /// Project ID
        project_id: String,
        /// Package name
        package: String,
    },
}

pub async fn handle_package_command(config: RuntimeConfig, command: PackageCommands) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let result = dispatch(&ctx, command).await;
    let report = ctx.runtime.teardown_all().await;
    for error in &report.errors {
        eprintln!("{} {}", "Teardown failed:".yellow(), error);
    }
    result
}

async fn dispatch(ctx: &AppContext, command: PackageCommands) -> Result<()> {
    match command {
        PackageCommands::List { project_id } => {
            let packages = ctx.runtime.list_packages(&project_id).await?;

            let mut table = new_table();
            table.set_header(vec!["Package", "Version"]);
            for package in &packages {
                table.add_row(vec![package.name.clone(), package.version.clone()]);
            }
            println!("{}", table);
            println!("Total: {} packages", packages.len().to_string().cyan());
        }
        PackageCommands::Install {
            project_id,
            package,
        } => {
            println!("{} {}", "Installing".cyan(), package);
            let outcome = ctx.runtime.install_package(&project_id, &package).await?;
            print!("{}", outcome.output);
            anyhow::ensure!(outcome.success, "pip install {} failed", package);
            println!("{} {}", "Installed".green(), package);
        }
        PackageCommands::Uninstall {
            project_id,
            package,
        } => {
            let outcome = ctx.runtime.uninstall_package(&project_id, &package).await?;
            print!("{}", outcome.output);
            anyhow::ensure!(outcome.success, "pip uninstall {} failed", package);
            println!("{} {}", "Uninstalled".green(), package);
        }
    }

    Ok(())
}
