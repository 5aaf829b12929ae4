use std::collections::BTreeMap;

use lectern_core::config::{BackendKind, BackendSettings};
use lectern_core::models::{
    Conflict, ConflictStrategy, Entity, RecordSnapshot, Series, SeriesStatus, Sermon,
    SermonStatus,
};
use lectern_core::{EntityType, Ledger, OwnerId, RecordId};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::cli::{CompletionShell, MigrateCommands};
use crate::commands::auth::{login, logout, status_lines};
use crate::commands::common::{
    default_editor, format_conflict_lines, format_relative_time, format_series_lines,
    format_sync_timestamp, normalize_content, normalize_record_identifier, resolve_record,
    resolve_title, text_preview, Workspace,
};
use crate::commands::completions::{render_completions, run_completions};
use crate::commands::config::{apply_config_init, ConfigInitOptions};
use crate::commands::delete::run_delete;
use crate::commands::edit::{apply_series_edit, apply_sermon_edit, EditArgs};
use crate::commands::migrate::run_migrate;
use crate::commands::series::{build_series, list_series};
use crate::commands::sermon::{add_sermon, list_sermons, SermonFilter};
use crate::commands::sync::{list_conflicts, run_sync};
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

const ANON: &str = "anon-device";
const USER: &str = "user-1";

fn workspace_with(profile: CliProfile) -> Workspace {
    let mut config = CliProfilesConfig::default();
    config.profiles.insert("default".to_string(), profile);
    Workspace::from_parts(
        Ledger::open_in_memory().unwrap(),
        config,
        "default".to_string(),
    )
}

fn offline_workspace() -> Workspace {
    workspace_with(CliProfile {
        anonymous_owner_id: Some(ANON.to_string()),
        ..CliProfile::default()
    })
}

fn memory_backend() -> BackendSettings {
    BackendSettings {
        id: Some("local".to_string()),
        kind: BackendKind::Memory,
        ..BackendSettings::default()
    }
}

fn signed_in_workspace() -> Workspace {
    workspace_with(CliProfile {
        backend: Some(memory_backend()),
        anonymous_owner_id: Some(ANON.to_string()),
        user_id: Some(USER.to_string()),
        ..CliProfile::default()
    })
}

fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
    assert_eq!(
        normalize_content("line 1\nline 2\n"),
        Some("line 1\nline 2".to_string())
    );
}

#[test]
fn default_editor_is_defined() {
    assert!(!default_editor().is_empty());
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn text_preview_truncates_first_line() {
    assert_eq!(
        text_preview("Grace   upon grace\nsecond line", 80),
        "Grace upon grace"
    );
    assert_eq!(
        text_preview("This is a very long sentence that should be shortened", 20),
        "This is a very lo..."
    );
}

#[test]
fn format_sync_timestamp_returns_utc_label() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn record_identifier_and_title_reject_empty() {
    assert!(matches!(
        normalize_record_identifier(" \n "),
        Err(CliError::EmptyRecordId)
    ));
    assert_eq!(normalize_record_identifier("  abc123  ").unwrap(), "abc123");
    assert!(matches!(resolve_title(&[]), Err(CliError::EmptyTitle)));
    assert_eq!(resolve_title(&words("Sermon on the Mount")).unwrap(), "Sermon on the Mount");
}

#[test]
fn format_conflict_lines_include_key_fields() {
    let snapshot = RecordSnapshot {
        fields: serde_json::Map::new(),
        created_at: 0,
        updated_at: 100,
        deleted_at: None,
    };
    let conflicts = vec![Conflict {
        id: 7,
        entity_type: EntityType::Sermon,
        record_id: "11111111-1111-7111-8111-111111111111".parse().unwrap(),
        owner_id: OwnerId::new(USER),
        backend_id: "local".to_string(),
        local: snapshot.clone(),
        remote: snapshot,
        conflict_fields: vec!["content".to_string(), "title".to_string()],
        detected_at: 0,
        resolved: false,
        resolution: None,
        resolved_at: None,
    }];

    let rendered = format_conflict_lines(&conflicts);
    assert_eq!(rendered.len(), 1);
    assert!(rendered[0].starts_with("   7"));
    assert!(rendered[0].contains("sermon 11111111-1111"));
    assert!(rendered[0].contains("fields=content,title"));
    assert!(rendered[0].ends_with("pending"));
}

#[test]
fn build_series_normalizes_optional_fields() {
    let series = build_series(
        &words("Advent 2026"),
        Some("  ".to_string()),
        &["Advent".to_string(), "#hope".to_string(), "bad tag".to_string()],
        Some("2026-11-29".to_string()),
        None,
    )
    .unwrap();

    assert_eq!(series.title, "Advent 2026");
    assert_eq!(series.description, None);
    assert_eq!(series.tags, vec!["advent".to_string(), "hope".to_string()]);
    assert_eq!(series.start_date.as_deref(), Some("2026-11-29"));
    assert_eq!(series.status, SeriesStatus::Planning);
}

#[test]
fn edits_apply_only_to_matching_entity() {
    let series = Series::new("Psalms");
    let edited = apply_series_edit(
        series.clone(),
        EditArgs {
            status: Some("active".to_string()),
            tags: vec!["psalms".to_string()],
            ..EditArgs::default()
        },
    )
    .unwrap();
    assert_eq!(edited.status, SeriesStatus::Active);
    assert_eq!(edited.tags, vec!["psalms".to_string()]);

    assert!(matches!(
        apply_series_edit(series.clone(), EditArgs::default()),
        Err(CliError::NothingToEdit)
    ));
    assert!(matches!(
        apply_series_edit(
            series,
            EditArgs {
                scripture: Some("Psalm 23".to_string()),
                ..EditArgs::default()
            }
        ),
        Err(CliError::Config(_))
    ));

    let sermon = apply_sermon_edit(
        Sermon::new("The Good Shepherd"),
        EditArgs {
            scripture: Some("John 10:11".to_string()),
            status: Some("ready".to_string()),
            ..EditArgs::default()
        },
    )
    .unwrap();
    assert_eq!(sermon.scripture.as_deref(), Some("John 10:11"));
    assert_eq!(sermon.status, SermonStatus::Ready);

    assert!(matches!(
        apply_sermon_edit(
            Sermon::new("Blank"),
            EditArgs {
                title: Some("   ".to_string()),
                ..EditArgs::default()
            }
        ),
        Err(CliError::EmptyTitle)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_record_supports_exact_prefix_and_ambiguity() {
    let workspace = offline_workspace();
    let owner = OwnerId::new(ANON);
    let first: RecordId = "11111111-1111-7111-8111-111111111111".parse().unwrap();
    let second: RecordId = "11111111-1111-7111-8111-222222222222".parse().unwrap();
    for (id, title) in [(first, "First"), (second, "Second")] {
        let fields = Series {
            id,
            ..Series::new(title)
        }
        .to_fields()
        .unwrap();
        workspace
            .ledger
            .create_record_with_id(&owner, EntityType::Series, &id, &fields)
            .await
            .unwrap();
    }

    let exact = resolve_record(&workspace.ledger, &owner, EntityType::Series, &first.to_string())
        .await
        .unwrap();
    assert_eq!(exact.id, first);

    let prefixed = resolve_record(
        &workspace.ledger,
        &owner,
        EntityType::Series,
        "11111111-1111-7111-8111-2",
    )
    .await
    .unwrap();
    assert_eq!(prefixed.id, second);

    assert!(matches!(
        resolve_record(&workspace.ledger, &owner, EntityType::Series, "11111111").await,
        Err(CliError::AmbiguousRecordId(_))
    ));
    assert!(matches!(
        resolve_record(&workspace.ledger, &owner, EntityType::Series, "ffff").await,
        Err(CliError::RecordNotFound { .. })
    ));

    let other_owner = OwnerId::new("someone-else");
    assert!(matches!(
        resolve_record(&workspace.ledger, &other_owner, EntityType::Series, &first.to_string())
            .await,
        Err(CliError::RecordNotFound { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn sermons_filter_by_series_and_tag() {
    let workspace = offline_workspace();
    let owner = OwnerId::new(ANON);
    let series = workspace
        .ledger
        .create(&owner, &Series::new("Romans"))
        .await
        .unwrap();
    let series_prefix = series.id.to_string()[..18].to_string();

    add_sermon(
        &workspace,
        &words("Justified by faith"),
        Some(&series_prefix),
        Some("Romans 5:1".to_string()),
        Some("Peace with God #grace".to_string()),
        &[],
    )
    .await
    .unwrap();
    add_sermon(
        &workspace,
        &words("Standalone"),
        None,
        None,
        None,
        &["easter".to_string()],
    )
    .await
    .unwrap();

    let in_series = list_sermons(
        &workspace,
        &SermonFilter {
            series: Some(series_prefix),
            limit: 20,
            ..SermonFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(in_series.len(), 1);
    assert_eq!(in_series[0].title, "Justified by faith");
    assert_eq!(in_series[0].tags, vec!["grace".to_string()]);
    assert!(!in_series[0].synced);

    let tagged = list_sermons(
        &workspace,
        &SermonFilter {
            tag: Some("#Easter".to_string()),
            limit: 20,
            ..SermonFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].title, "Standalone");

    let limited = list_sermons(
        &workspace,
        &SermonFilter {
            limit: 1,
            ..SermonFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_series_reference_is_reported() {
    let workspace = offline_workspace();
    let error = add_sermon(&workspace, &words("Orphan"), Some("0000"), None, None, &[])
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::RecordNotFound { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_hides_record_from_lists() {
    let workspace = offline_workspace();
    let owner = OwnerId::new(ANON);
    let record = workspace
        .ledger
        .create(&owner, &Series::new("Genesis"))
        .await
        .unwrap();
    let lines = format_series_lines(&list_series(&workspace, 20).await.unwrap());
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("Genesis"));

    run_delete(&workspace, EntityType::Series, &record.id.to_string())
        .await
        .unwrap();

    assert!(list_series(&workspace, 20).await.unwrap().is_empty());
    let tombstone = workspace
        .ledger
        .get_record(EntityType::Series, &record.id)
        .await
        .unwrap()
        .unwrap();
    assert!(tombstone.is_deleted());
    assert!(tombstone.dirty);
    assert!(matches!(
        run_delete(&workspace, EntityType::Series, &record.id.to_string()).await,
        Err(CliError::RecordNotFound { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_requires_backend_configuration() {
    let workspace = offline_workspace();
    assert!(matches!(
        run_sync(&workspace).await,
        Err(CliError::SyncNotConfigured)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_pushes_signed_in_records() {
    let workspace = signed_in_workspace();
    add_sermon(
        &workspace,
        &words("Living water"),
        None,
        Some("John 4".to_string()),
        None,
        &[],
    )
    .await
    .unwrap();
    let user = OwnerId::new(USER);
    assert_eq!(
        workspace
            .ledger
            .list_dirty(&user, EntityType::Sermon)
            .await
            .unwrap()
            .len(),
        1
    );

    run_sync(&workspace).await.unwrap();

    assert!(workspace
        .ledger
        .list_dirty(&user, EntityType::Sermon)
        .await
        .unwrap()
        .is_empty());
    assert!(list_conflicts(&workspace, false, 10).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn migrate_run_moves_offline_records_to_user() {
    let workspace = signed_in_workspace();
    let anonymous = OwnerId::new(ANON);
    let user = OwnerId::new(USER);
    let series = workspace
        .ledger
        .create(&anonymous, &Series::new("Offline series"))
        .await
        .unwrap();
    let sermon = Sermon::new("Offline sermon").in_series(series.id);
    workspace.ledger.create(&anonymous, &sermon).await.unwrap();

    run_migrate(&workspace, MigrateCommands::Preview)
        .await
        .unwrap();
    assert_eq!(workspace.ledger.count_live(&anonymous, EntityType::Series).await.unwrap(), 1);

    run_migrate(&workspace, MigrateCommands::Run).await.unwrap();

    let expected = BTreeMap::from([(EntityType::Series, 1), (EntityType::Sermon, 1)]);
    assert_eq!(workspace.ledger.count_live_by_owner(&user).await.unwrap(), expected);
    assert_eq!(workspace.ledger.count_live(&anonymous, EntityType::Sermon).await.unwrap(), 0);
    let moved = workspace
        .ledger
        .get::<Sermon>(&sermon.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.series_id, Some(series.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn migrate_requires_sign_in() {
    let workspace = offline_workspace();
    assert!(matches!(
        run_migrate(&workspace, MigrateCommands::Run).await,
        Err(CliError::Auth(_))
    ));
}

#[test]
fn login_and_logout_update_profile() {
    let mut config = CliProfilesConfig::default();
    login(&mut config, "work", " pastor-1 ", Some("secret".to_string())).unwrap();

    let profile = config.profile("work").unwrap();
    assert_eq!(profile.user_id.as_deref(), Some("pastor-1"));
    assert!(profile.anonymous_owner().is_some());
    assert_eq!(
        profile.backend.as_ref().and_then(|backend| backend.token.as_deref()),
        Some("secret")
    );

    let status = status_lines(&config, "work");
    assert!(status.contains(&"Owner: pastor-1".to_string()));

    assert!(matches!(
        login(&mut config, "work", "anon-123", None),
        Err(CliError::Auth(_))
    ));
    assert!(matches!(
        login(&mut config, "work", "  ", None),
        Err(CliError::Auth(_))
    ));

    assert!(logout(&mut config, "work"));
    assert!(!logout(&mut config, "work"));
    let profile = config.profile("work").unwrap();
    assert_eq!(profile.user_id, None);
    assert_eq!(profile.backend.as_ref().and_then(|b| b.token.clone()), None);
}

#[test]
fn config_init_merges_options_into_profile() {
    let mut config = CliProfilesConfig::default();
    apply_config_init(
        &mut config,
        "laptop",
        ConfigInitOptions {
            backend_id: Some("primary".to_string()),
            backend_kind: Some(BackendKind::Memory),
            strategy: Some(ConflictStrategy::FieldMerge),
            auto_resolve_max_fields: Some(3),
            activate: true,
            ..ConfigInitOptions::default()
        },
    )
    .unwrap();

    assert_eq!(config.active_profile.as_deref(), Some("laptop"));
    let profile = config.profile("laptop").unwrap();
    let backend = profile.backend.as_ref().unwrap();
    assert_eq!(backend.backend_id(), "primary");
    assert_eq!(backend.kind, BackendKind::Memory);
    assert_eq!(profile.sync.strategy, ConflictStrategy::FieldMerge);
    assert_eq!(profile.sync.auto_resolve_max_fields, 3);

    let mut rest = CliProfilesConfig::default();
    let invalid = apply_config_init(
        &mut rest,
        "default",
        ConfigInitOptions {
            backend_kind: Some(BackendKind::Rest),
            backend_url: Some("api.example.com".to_string()),
            ..ConfigInitOptions::default()
        },
    );
    assert!(matches!(invalid, Err(CliError::Core(_))));
}

#[test]
fn run_completions_writes_bash_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("lectern.bash");

    run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_lectern()"));
    assert!(script.contains("complete -F _lectern"));

    let fish = String::from_utf8(render_completions(CompletionShell::Fish)).unwrap();
    assert!(fish.contains("complete -c lectern"));
}

#[test]
fn json_list_items_serialize_sync_state() {
    let item = crate::commands::common::SeriesListItem {
        id: "11111111-1111-7111-8111-111111111111".to_string(),
        title: "Acts".to_string(),
        description: None,
        status: "active".to_string(),
        tags: vec![],
        start_date: None,
        end_date: None,
        updated_at: 5,
        relative_time: "just now".to_string(),
        synced: false,
    };
    let value = serde_json::to_value(&item).unwrap();
    assert_eq!(value["synced"], json!(false));
    assert_eq!(value["title"], json!("Acts"));
}
