use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use lectern_core::auth::{AuthContext, SessionState};
use lectern_core::models::{
    normalize_tags, Conflict, Entity, MigrationPreview, MigrationResult, Series, Sermon,
};
use lectern_core::sync::{SyncOrchestrator, SyncReport};
use lectern_core::{EntityType, Ledger, OwnerId, SyncRecord};
use serde::Serialize;

use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Local ledger plus the profile it is used under.
pub struct Workspace {
    pub ledger: Ledger,
    pub config: CliProfilesConfig,
    pub profile_name: String,
}

impl Workspace {
    /// Open the ledger and load the selected profile, issuing the device's
    /// anonymous owner on first use.
    pub async fn open(db_path: &Path, profile: Option<&str>) -> Result<Self, CliError> {
        let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = config.resolve_profile_name(profile);
        let (owner, created) = config
            .profile_mut_or_default(&profile_name)
            .ensure_anonymous_owner();
        if created {
            config.save().map_err(CliError::Config)?;
            tracing::info!("Issued anonymous owner {owner} for profile '{profile_name}'");
        }

        let ledger = open_ledger(db_path).await?;
        Ok(Self::from_parts(ledger, config, profile_name))
    }

    pub const fn from_parts(ledger: Ledger, config: CliProfilesConfig, profile_name: String) -> Self {
        Self {
            ledger,
            config,
            profile_name,
        }
    }

    pub fn profile(&self) -> Result<&CliProfile, CliError> {
        self.config.profile(&self.profile_name).ok_or_else(|| {
            CliError::Config(format!("Profile '{}' is not configured", self.profile_name))
        })
    }

    pub fn session(&self) -> Result<SessionState, CliError> {
        Ok(self.profile()?.session())
    }

    /// Owner whose records commands read and write.
    pub fn owner(&self) -> Result<OwnerId, CliError> {
        Ok(self.session()?.effective_owner_id())
    }

    pub fn orchestrator(&self) -> Result<SyncOrchestrator, CliError> {
        let profile = self.profile()?;
        let Some(backend) = profile.backend.as_ref() else {
            return Err(CliError::SyncNotConfigured);
        };
        let backend = backend.build()?;
        let config = profile.sync.to_sync_config()?;
        Ok(SyncOrchestrator::new(self.ledger.clone(), backend, config))
    }
}

pub async fn open_ledger(path: &Path) -> Result<Ledger, CliError> {
    Ok(Ledger::open_path(path.to_path_buf()).await?)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("LECTERN_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("lectern").join("lectern.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

/// Find a live record of the owner by full id or unique id prefix.
pub async fn resolve_record(
    ledger: &Ledger,
    owner: &OwnerId,
    entity_type: EntityType,
    query: &str,
) -> Result<SyncRecord, CliError> {
    let query = normalize_record_identifier(query)?;
    let not_found = || CliError::RecordNotFound {
        entity: entity_type.to_string(),
        query: query.clone(),
    };

    let id = match ledger.resolve_id_prefix(owner, entity_type, &query).await {
        Ok(id) => id,
        Err(lectern_core::Error::NotFound(_)) => return Err(not_found()),
        Err(lectern_core::Error::InvalidInput(message)) => {
            return Err(CliError::AmbiguousRecordId(message))
        }
        Err(error) => return Err(error.into()),
    };

    match ledger.get_record(entity_type, &id).await? {
        Some(record) if !record.is_deleted() && record.owner_id == *owner => Ok(record),
        _ => Err(not_found()),
    }
}

#[derive(Debug, Serialize)]
pub struct SeriesListItem {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub tags: Vec<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub updated_at: i64,
    pub relative_time: String,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct SermonListItem {
    pub id: String,
    pub title: String,
    pub series_id: Option<String>,
    pub scripture: Option<String>,
    pub preview: String,
    pub status: String,
    pub tags: Vec<String>,
    pub updated_at: i64,
    pub relative_time: String,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: i64,
    pub entity_type: String,
    pub record_id: String,
    pub conflict_fields: Vec<String>,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub resolution: Option<String>,
}

pub fn series_to_list_item(record: &SyncRecord, now_ms: i64) -> Result<SeriesListItem, CliError> {
    let series = Series::from_record(record)?;
    Ok(SeriesListItem {
        id: series.id.to_string(),
        title: series.title,
        description: series.description,
        status: series.status.to_string(),
        tags: series.tags,
        start_date: series.start_date,
        end_date: series.end_date,
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
        synced: !record.dirty,
    })
}

pub fn sermon_to_list_item(record: &SyncRecord, now_ms: i64) -> Result<SermonListItem, CliError> {
    let sermon = Sermon::from_record(record)?;
    Ok(SermonListItem {
        id: sermon.id.to_string(),
        preview: text_preview(&sermon.content, 80),
        tags: sermon.all_tags(),
        title: sermon.title,
        series_id: sermon.series_id.map(|id| id.to_string()),
        scripture: sermon.scripture,
        status: sermon.status.to_string(),
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
        synced: !record.dirty,
    })
}

pub fn conflict_to_item(conflict: &Conflict) -> ConflictItem {
    ConflictItem {
        id: conflict.id,
        entity_type: conflict.entity_type.to_string(),
        record_id: conflict.record_id.to_string(),
        conflict_fields: conflict.conflict_fields.clone(),
        local_updated_at: conflict.local.updated_at,
        remote_updated_at: conflict.remote.updated_at,
        detected_at: conflict.detected_at,
        detected_at_iso: format_sync_timestamp(conflict.detected_at),
        resolution: conflict.resolution.map(|resolution| resolution.to_string()),
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

fn sync_marker(synced: bool) -> &'static str {
    if synced {
        " "
    } else {
        "*"
    }
}

fn render_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn format_series_lines(items: &[SeriesListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let line = format!(
                "{}{:<13}  {:<40}  {:<10}  {}",
                sync_marker(item.synced),
                short_id(&item.id),
                text_preview(&item.title, 40),
                item.status,
                item.relative_time
            );
            if item.tags.is_empty() {
                line
            } else {
                format!("{line:<80}  {}", render_tags(&item.tags))
            }
        })
        .collect()
}

pub fn format_sermon_lines(items: &[SermonListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let scripture = item.scripture.as_deref().unwrap_or("-");
            let line = format!(
                "{}{:<13}  {:<40}  {:<16}  {:<8}  {}",
                sync_marker(item.synced),
                short_id(&item.id),
                text_preview(&item.title, 40),
                text_preview(scripture, 16),
                item.status,
                item.relative_time
            );
            if item.tags.is_empty() {
                line
            } else {
                format!("{line}  {}", render_tags(&item.tags))
            }
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let state = conflict
                .resolution
                .map_or_else(|| "pending".to_string(), |resolution| resolution.to_string());
            format!(
                "{:>4}  {}  {} {}  fields={}  {}",
                conflict.id,
                format_sync_timestamp(conflict.detected_at),
                conflict.entity_type,
                short_id(&conflict.record_id.to_string()),
                conflict.conflict_fields.join(","),
                state
            )
        })
        .collect()
}

pub fn format_sync_report(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Synced with {}: pushed {}, pulled {}, auto-resolved {}, pending conflicts {}",
        report.backend_id,
        report.pushed(),
        report.pulled(),
        report.auto_resolved(),
        report.pending_conflicts()
    )];
    for error in report.errors() {
        let id = error
            .record_id
            .map_or_else(|| "-".to_string(), |id| short_id(&id.to_string()));
        let retry = if error.retryable { " (will retry)" } else { "" };
        lines.push(format!(
            "  {} {id}: {} {}{retry}",
            error.entity_type, error.kind, error.message
        ));
    }
    lines
}

pub fn format_migration_preview(preview: &MigrationPreview) -> Vec<String> {
    if preview.is_empty() {
        return vec!["No offline records to migrate.".to_string()];
    }
    let mut lines = vec![format!(
        "{} offline records owned by {}:",
        preview.total, preview.anonymous_owner
    )];
    lines.extend(
        preview
            .counts
            .iter()
            .map(|(entity_type, count)| format!("  {entity_type}: {count}")),
    );
    lines
}

pub fn format_migration_result(result: &MigrationResult) -> Vec<String> {
    let headline = if result.success {
        format!(
            "Migrated {} records ({} conflicts to review)",
            result.migrated_count, result.conflict_count
        )
    } else if result.rolled_back {
        "Migration incomplete; unconfirmed records were returned to offline mode".to_string()
    } else {
        "Migration incomplete".to_string()
    };

    let mut lines = vec![headline];
    for entity in &result.per_entity {
        if let Some(entity_type) = entity.entity_type {
            lines.push(format!(
                "  {entity_type}: {} migrated, {} conflicts, {} errors",
                entity.migrated_records,
                entity.conflicts,
                entity.errors.len()
            ));
        }
    }
    lines.extend(result.errors.iter().map(|error| format!("  error: {error}")));
    lines.extend(
        result
            .validation_issues
            .iter()
            .map(|issue| format!("  issue: {issue}")),
    );
    lines
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn text_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn parse_tags(values: &[String]) -> Vec<String> {
    normalize_tags(values)
}

pub fn resolve_title(parts: &[String]) -> Result<String, CliError> {
    normalize_content(&parts.join(" ")).ok_or(CliError::EmptyTitle)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_sermon_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_sermon_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("lectern-sermon-{}-{now}.md", std::process::id()))
}
