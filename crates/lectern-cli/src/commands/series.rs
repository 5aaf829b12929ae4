use lectern_core::models::Series;
use lectern_core::EntityType;

use crate::cli::SeriesCommands;
use crate::commands::common::{
    format_series_lines, normalize_content, now_ms, parse_tags, resolve_title,
    series_to_list_item, SeriesListItem, Workspace,
};
use crate::error::CliError;

pub async fn run_series(workspace: &Workspace, command: SeriesCommands) -> Result<(), CliError> {
    match command {
        SeriesCommands::Add {
            title,
            description,
            tags,
            start,
            end,
        } => {
            let series = build_series(&title, description, &tags, start, end)?;
            let owner = workspace.owner()?;
            let record = workspace.ledger.create(&owner, &series).await?;
            println!("{}", record.id);
            Ok(())
        }
        SeriesCommands::List { limit, json } => {
            let items = list_series(workspace, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("No series yet. Create one with `lectern series add <title>`.");
            } else {
                for line in format_series_lines(&items) {
                    println!("{line}");
                }
            }
            Ok(())
        }
    }
}

pub fn build_series(
    title: &[String],
    description: Option<String>,
    tags: &[String],
    start: Option<String>,
    end: Option<String>,
) -> Result<Series, CliError> {
    let mut series = Series::new(resolve_title(title)?).with_tags(parse_tags(tags));
    series.description = description.as_deref().and_then(normalize_content);
    series.start_date = start.as_deref().and_then(normalize_content);
    series.end_date = end.as_deref().and_then(normalize_content);
    Ok(series)
}

pub async fn list_series(
    workspace: &Workspace,
    limit: usize,
) -> Result<Vec<SeriesListItem>, CliError> {
    let owner = workspace.owner()?;
    let now = now_ms();
    workspace
        .ledger
        .list_records(&owner, EntityType::Series, false)
        .await?
        .iter()
        .take(limit)
        .map(|record| series_to_list_item(record, now))
        .collect()
}
