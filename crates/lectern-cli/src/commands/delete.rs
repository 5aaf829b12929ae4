use lectern_core::EntityType;

use crate::commands::common::{resolve_record, Workspace};
use crate::error::CliError;

pub async fn run_delete(
    workspace: &Workspace,
    entity_type: EntityType,
    id: &str,
) -> Result<(), CliError> {
    let owner = workspace.owner()?;
    let record = resolve_record(&workspace.ledger, &owner, entity_type, id).await?;

    let deleted = workspace
        .ledger
        .soft_delete_record(&owner, entity_type, &record.id)
        .await?;
    println!("{}", deleted.id);
    Ok(())
}
