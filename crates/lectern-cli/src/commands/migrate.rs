use lectern_core::auth::AuthContext;
use lectern_core::migration::MigrationEngine;

use crate::cli::MigrateCommands;
use crate::commands::common::{format_migration_preview, format_migration_result, Workspace};
use crate::error::CliError;

pub async fn run_migrate(workspace: &Workspace, command: MigrateCommands) -> Result<(), CliError> {
    let session = workspace.session()?;
    let Some(anonymous) = session.anonymous_owner_id() else {
        println!("No offline records to migrate.");
        return Ok(());
    };
    if session.authenticated_owner_id().is_none() {
        return Err(CliError::Auth(
            "sign in with `lectern auth login --user-id <id>` before migrating".to_string(),
        ));
    }

    let orchestrator = workspace.orchestrator()?;
    let engine = MigrationEngine::new(&orchestrator);

    match command {
        MigrateCommands::Preview => {
            let preview = engine.preview(&anonymous).await?;
            for line in format_migration_preview(&preview) {
                println!("{line}");
            }
        }
        MigrateCommands::Run => match engine.run_for_session(&session).await? {
            Some(result) => {
                for line in format_migration_result(&result) {
                    println!("{line}");
                }
                if result.conflict_count > 0 {
                    println!("Run `lectern sync conflicts` to review conflicts.");
                }
            }
            None => println!("No offline records to migrate."),
        },
    }
    Ok(())
}
