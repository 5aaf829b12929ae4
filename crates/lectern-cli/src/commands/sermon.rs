use lectern_core::models::Sermon;
use lectern_core::EntityType;

use crate::cli::SermonCommands;
use crate::commands::common::{
    format_sermon_lines, normalize_content, now_ms, parse_tags, read_piped_stdin, resolve_record,
    resolve_title, sermon_to_list_item, SermonListItem, Workspace,
};
use crate::error::CliError;

/// Filters for `sermon list`.
#[derive(Debug, Default)]
pub struct SermonFilter {
    pub series: Option<String>,
    pub tag: Option<String>,
    pub limit: usize,
}

pub async fn run_sermon(workspace: &Workspace, command: SermonCommands) -> Result<(), CliError> {
    match command {
        SermonCommands::Add {
            title,
            series,
            scripture,
            content,
            tags,
        } => {
            let content = match content {
                Some(content) => normalize_content(&content),
                None => read_piped_stdin()?,
            };
            let record_id = add_sermon(workspace, &title, series.as_deref(), scripture, content, &tags)
                .await?;
            println!("{record_id}");
            Ok(())
        }
        SermonCommands::List {
            series,
            tag,
            limit,
            json,
        } => {
            let filter = SermonFilter { series, tag, limit };
            let items = list_sermons(workspace, &filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("No sermons found.");
            } else {
                for line in format_sermon_lines(&items) {
                    println!("{line}");
                }
            }
            Ok(())
        }
    }
}

pub async fn add_sermon(
    workspace: &Workspace,
    title: &[String],
    series: Option<&str>,
    scripture: Option<String>,
    content: Option<String>,
    tags: &[String],
) -> Result<String, CliError> {
    let owner = workspace.owner()?;
    let mut sermon = Sermon::new(resolve_title(title)?).with_tags(parse_tags(tags));
    if let Some(query) = series {
        let parent = resolve_record(&workspace.ledger, &owner, EntityType::Series, query).await?;
        sermon = sermon.in_series(parent.id);
    }
    sermon.scripture = scripture.as_deref().and_then(normalize_content);
    if let Some(content) = content {
        sermon = sermon.with_content(content);
    }

    let record = workspace.ledger.create(&owner, &sermon).await?;
    Ok(record.id.to_string())
}

pub async fn list_sermons(
    workspace: &Workspace,
    filter: &SermonFilter,
) -> Result<Vec<SermonListItem>, CliError> {
    let owner = workspace.owner()?;
    let series_id = match filter.series.as_deref() {
        Some(query) => Some(
            resolve_record(&workspace.ledger, &owner, EntityType::Series, query)
                .await?
                .id
                .to_string(),
        ),
        None => None,
    };
    let tag = filter
        .tag
        .as_deref()
        .and_then(|tag| parse_tags(&[tag.to_string()]).into_iter().next());

    let now = now_ms();
    let mut items = Vec::new();
    for record in workspace
        .ledger
        .list_records(&owner, EntityType::Sermon, false)
        .await?
    {
        let item = sermon_to_list_item(&record, now)?;
        if series_id.is_some() && item.series_id != series_id {
            continue;
        }
        if let Some(tag) = tag.as_deref() {
            if !item.tags.iter().any(|candidate| candidate == tag) {
                continue;
            }
        }
        items.push(item);
        if items.len() >= filter.limit {
            break;
        }
    }
    Ok(items)
}
