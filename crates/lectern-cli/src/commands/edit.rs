use lectern_core::models::{Entity, Series, Sermon};
use lectern_core::EntityType;

use crate::commands::common::{
    capture_editor_input_with_initial, normalize_content, parse_tags, resolve_record, Workspace,
};
use crate::error::CliError;

/// Field changes requested by `lectern edit`.
#[derive(Debug, Default, Clone)]
pub struct EditArgs {
    pub title: Option<String>,
    pub description: Option<String>,
    pub scripture: Option<String>,
    pub content: Option<String>,
    pub tags: Vec<String>,
    pub status: Option<String>,
}

impl EditArgs {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.scripture.is_none()
            && self.content.is_none()
            && self.tags.is_empty()
            && self.status.is_none()
    }
}

pub async fn run_edit(
    workspace: &Workspace,
    entity_type: EntityType,
    id: &str,
    mut args: EditArgs,
) -> Result<(), CliError> {
    let owner = workspace.owner()?;
    let record = resolve_record(&workspace.ledger, &owner, entity_type, id).await?;

    if args.is_empty() && entity_type == EntityType::Sermon {
        let sermon = Sermon::from_record(&record)?;
        let Some(edited) = capture_editor_input_with_initial(&sermon.content)? else {
            return Err(CliError::NothingToEdit);
        };
        if edited == sermon.content {
            println!("{}", record.id);
            return Ok(());
        }
        args.content = Some(edited);
    }

    let updated = match entity_type {
        EntityType::Series => {
            let series = apply_series_edit(Series::from_record(&record)?, args)?;
            workspace.ledger.update(&owner, &series).await?
        }
        EntityType::Sermon => {
            let sermon = apply_sermon_edit(Sermon::from_record(&record)?, args)?;
            workspace.ledger.update(&owner, &sermon).await?
        }
    };
    println!("{}", updated.id);
    Ok(())
}

pub fn apply_series_edit(mut series: Series, args: EditArgs) -> Result<Series, CliError> {
    if args.is_empty() {
        return Err(CliError::NothingToEdit);
    }
    if args.scripture.is_some() || args.content.is_some() {
        return Err(CliError::Config(
            "--scripture and --content apply to sermons only".to_string(),
        ));
    }
    if let Some(title) = args.title {
        series.title = normalize_content(&title).ok_or(CliError::EmptyTitle)?;
    }
    if let Some(description) = args.description {
        series.description = normalize_content(&description);
    }
    if !args.tags.is_empty() {
        series.tags = parse_tags(&args.tags);
    }
    if let Some(status) = args.status {
        series.status = status.parse().map_err(CliError::Config)?;
    }
    Ok(series)
}

pub fn apply_sermon_edit(mut sermon: Sermon, args: EditArgs) -> Result<Sermon, CliError> {
    if args.is_empty() {
        return Err(CliError::NothingToEdit);
    }
    if args.description.is_some() {
        return Err(CliError::Config(
            "--description applies to series only".to_string(),
        ));
    }
    if let Some(title) = args.title {
        sermon.title = normalize_content(&title).ok_or(CliError::EmptyTitle)?;
    }
    if let Some(scripture) = args.scripture {
        sermon.scripture = normalize_content(&scripture);
    }
    if let Some(content) = args.content {
        sermon.content = normalize_content(&content).unwrap_or_default();
    }
    if !args.tags.is_empty() {
        sermon.tags = parse_tags(&args.tags);
    }
    if let Some(status) = args.status {
        sermon.status = status.parse().map_err(CliError::Config)?;
    }
    Ok(sermon)
}
