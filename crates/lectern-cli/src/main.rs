//! Lectern CLI - plan sermons and series from the terminal
//!
//! Works offline against a local ledger and syncs with a configured backend.

mod cli;
mod commands;
mod config_profiles;
mod error;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::auth::run_auth;
use crate::commands::common::{resolve_db_path, Workspace};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::edit::{run_edit, EditArgs};
use crate::commands::migrate::run_migrate;
use crate::commands::series::run_series;
use crate::commands::sermon::run_sermon;
use crate::commands::sync::{run_sync, run_sync_conflicts, run_sync_resolve};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "lectern=info".parse::<tracing_subscriber::filter::Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    let Some(command) = cli.command else {
        Cli::command().print_help().map_err(CliError::Io)?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
        Commands::Config { command } => run_config(command, profile)?,
        Commands::Auth { command } => run_auth(command, profile)?,
        command => {
            let db_path = resolve_db_path(cli.db_path)?;
            let workspace = Workspace::open(&db_path, profile).await?;
            run_with_workspace(&workspace, command).await?;
        }
    }

    Ok(())
}

async fn run_with_workspace(workspace: &Workspace, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Series { command } => run_series(workspace, command).await,
        Commands::Sermon { command } => run_sermon(workspace, command).await,
        Commands::Edit {
            entity,
            id,
            title,
            description,
            scripture,
            content,
            tags,
            status,
        } => {
            let args = EditArgs {
                title,
                description,
                scripture,
                content,
                tags,
                status,
            };
            run_edit(workspace, entity.into(), &id, args).await
        }
        Commands::Delete { entity, id } => run_delete(workspace, entity.into(), &id).await,
        Commands::Sync { command } => match command {
            None => run_sync(workspace).await,
            Some(SyncCommands::Conflicts { all, limit, json }) => {
                run_sync_conflicts(workspace, all, limit, json).await
            }
            Some(SyncCommands::Resolve { id, keep }) => {
                run_sync_resolve(workspace, id, keep.into()).await
            }
        },
        Commands::Migrate { command } => run_migrate(workspace, command).await,
        Commands::Completions { .. } | Commands::Config { .. } | Commands::Auth { .. } => Ok(()),
    }
}
