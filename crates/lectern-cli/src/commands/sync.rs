use lectern_core::models::{Conflict, Resolution};

use crate::commands::common::{
    conflict_to_item, format_conflict_lines, format_sync_report, ConflictItem, Workspace,
};
use crate::error::CliError;

pub async fn run_sync(workspace: &Workspace) -> Result<(), CliError> {
    let session = workspace.session()?;
    let orchestrator = workspace.orchestrator()?;
    let report = orchestrator.sync_current(&session).await?;

    for line in format_sync_report(&report) {
        println!("{line}");
    }
    if report.pending_conflicts() > 0 {
        println!("Run `lectern sync conflicts` to review pending conflicts.");
    }
    Ok(())
}

pub async fn list_conflicts(
    workspace: &Workspace,
    include_resolved: bool,
    limit: usize,
) -> Result<Vec<Conflict>, CliError> {
    let owner = workspace.owner()?;
    let conflicts = if include_resolved {
        workspace.ledger.list_recent_conflicts(&owner, limit).await?
    } else {
        workspace.ledger.list_pending_conflicts(&owner).await?
    };
    Ok(conflicts)
}

pub async fn run_sync_conflicts(
    workspace: &Workspace,
    include_resolved: bool,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = list_conflicts(workspace, include_resolved, limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_resolve(
    workspace: &Workspace,
    conflict_id: i64,
    resolution: Resolution,
) -> Result<(), CliError> {
    let orchestrator = workspace.orchestrator()?;
    let conflict = orchestrator
        .resolve_conflict(conflict_id, resolution, None)
        .await?;
    println!(
        "Resolved conflict {} on {} {} ({resolution})",
        conflict.id, conflict.entity_type, conflict.record_id
    );
    println!("Run `lectern sync` to push the result.");
    Ok(())
}
