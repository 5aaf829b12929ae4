//! Conflict detection and resolution.
//!
//! Everything here is pure: callers apply the chosen snapshot to the ledger.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::models::{ConflictStrategy, EntityDescriptor, Fields, RecordSnapshot, Resolution};

/// Pseudo-field reported when one side is deleted and the other is not.
pub const DELETED_FIELD: &str = "deleted_at";

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub resolution: Resolution,
    pub snapshot: RecordSnapshot,
}

fn field_value<'a>(fields: &'a Fields, name: &str) -> &'a Value {
    fields.get(name).unwrap_or(&Value::Null)
}

/// Names of the descriptor fields that differ, plus the deletion state.
///
/// A missing field and an explicit `null` are the same value.
pub fn diff_fields(
    descriptor: &EntityDescriptor,
    local: &RecordSnapshot,
    remote: &RecordSnapshot,
) -> Vec<String> {
    let mut differing: Vec<String> = descriptor
        .fields
        .iter()
        .filter(|name| field_value(&local.fields, name) != field_value(&remote.fields, name))
        .map(ToString::to_string)
        .collect();

    if local.deleted_at.is_some() != remote.deleted_at.is_some() {
        differing.push(DELETED_FIELD.to_string());
    }

    differing
}

/// Whether a conflict is small enough to resolve without the user.
pub fn is_auto_resolvable(conflict_fields: &[String], max_fields: usize) -> bool {
    conflict_fields.len() <= max_fields
}

/// Resolve a conflict with the given strategy.
pub fn resolve(
    descriptor: &EntityDescriptor,
    local: &RecordSnapshot,
    remote: &RecordSnapshot,
    strategy: ConflictStrategy,
) -> Resolved {
    let keep_local = || Resolved {
        resolution: Resolution::KeepLocal,
        snapshot: local.clone(),
    };
    let keep_remote = || Resolved {
        resolution: Resolution::KeepRemote,
        snapshot: remote.clone(),
    };

    match strategy {
        ConflictStrategy::NewestWins if remote.updated_at > local.updated_at => keep_remote(),
        ConflictStrategy::NewestWins | ConflictStrategy::LocalWins => keep_local(),
        ConflictStrategy::RemoteWins => keep_remote(),
        ConflictStrategy::FieldMerge => Resolved {
            resolution: Resolution::Merge,
            snapshot: field_merge(descriptor, local, remote),
        },
    }
}

/// Per differing field take the newer side (ties keep local); list fields are unioned.
pub fn field_merge(
    descriptor: &EntityDescriptor,
    local: &RecordSnapshot,
    remote: &RecordSnapshot,
) -> RecordSnapshot {
    let remote_newer = remote.updated_at > local.updated_at;
    let mut fields = local.fields.clone();

    for name in descriptor.fields {
        let local_value = field_value(&local.fields, name);
        let remote_value = field_value(&remote.fields, name);
        if local_value == remote_value {
            continue;
        }

        let merged = if descriptor.list_fields.contains(name) {
            union_lists(local_value, remote_value)
        } else if remote_newer {
            remote_value.clone()
        } else {
            local_value.clone()
        };
        fields.insert((*name).to_string(), merged);
    }

    RecordSnapshot {
        fields,
        created_at: local.created_at.min(remote.created_at),
        updated_at: local.updated_at.max(remote.updated_at),
        deleted_at: if remote_newer {
            remote.deleted_at
        } else {
            local.deleted_at
        },
    }
}

/// Local content with user-chosen field values laid over it.
pub fn overlay(local: &RecordSnapshot, remote: &RecordSnapshot, merged: Fields) -> RecordSnapshot {
    let mut fields = local.fields.clone();
    fields.extend(merged);
    RecordSnapshot {
        fields,
        created_at: local.created_at.min(remote.created_at),
        updated_at: local.updated_at.max(remote.updated_at),
        deleted_at: local.deleted_at,
    }
}

fn union_lists(local: &Value, remote: &Value) -> Value {
    let items: BTreeSet<String> = [local, remote]
        .into_iter()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
        .map(ToString::to_string)
        .collect();
    Value::Array(items.into_iter().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn snapshot(fields: Value, updated_at: i64) -> RecordSnapshot {
        let Value::Object(fields) = fields else {
            panic!("fields must be an object");
        };
        RecordSnapshot {
            fields,
            created_at: 0,
            updated_at,
            deleted_at: None,
        }
    }

    fn series() -> &'static EntityDescriptor {
        EntityType::Series.descriptor()
    }

    #[test]
    fn diff_treats_missing_as_null() {
        let local = snapshot(json!({"title": "A", "description": null}), 1);
        let remote = snapshot(json!({"title": "A"}), 2);
        assert!(diff_fields(series(), &local, &remote).is_empty());
    }

    #[test]
    fn diff_reports_deletion_state() {
        let local = snapshot(json!({"title": "A"}), 1);
        let mut remote = snapshot(json!({"title": "B"}), 2);
        remote.deleted_at = Some(2);

        assert_eq!(
            diff_fields(series(), &local, &remote),
            vec!["title".to_string(), DELETED_FIELD.to_string()]
        );
    }

    #[test]
    fn diff_ignores_unknown_fields() {
        let local = snapshot(json!({"title": "A", "color": "red"}), 1);
        let remote = snapshot(json!({"title": "A", "color": "blue"}), 2);
        assert!(diff_fields(series(), &local, &remote).is_empty());
    }

    #[test]
    fn newest_wins_compares_timestamps() {
        let local = snapshot(json!({"title": "Local"}), 100);
        let newer = snapshot(json!({"title": "Remote"}), 200);
        let older = snapshot(json!({"title": "Remote"}), 50);
        let tied = snapshot(json!({"title": "Remote"}), 100);

        let strategy = ConflictStrategy::NewestWins;
        assert_eq!(
            resolve(series(), &local, &newer, strategy).resolution,
            Resolution::KeepRemote
        );
        assert_eq!(
            resolve(series(), &local, &older, strategy).resolution,
            Resolution::KeepLocal
        );
        assert_eq!(
            resolve(series(), &local, &tied, strategy).resolution,
            Resolution::KeepLocal
        );
    }

    #[test]
    fn fixed_side_strategies() {
        let local = snapshot(json!({"title": "Local"}), 300);
        let remote = snapshot(json!({"title": "Remote"}), 100);

        let remote_wins = resolve(series(), &local, &remote, ConflictStrategy::RemoteWins);
        assert_eq!(remote_wins.resolution, Resolution::KeepRemote);
        assert_eq!(remote_wins.snapshot, remote);

        let local_wins = resolve(series(), &remote, &local, ConflictStrategy::LocalWins);
        assert_eq!(local_wins.resolution, Resolution::KeepLocal);
        assert_eq!(local_wins.snapshot, remote);
    }

    #[test]
    fn field_merge_takes_newer_values_and_unions_tags() {
        let local = snapshot(
            json!({"title": "Local", "description": "mine", "tags": ["advent", "hope"]}),
            100,
        );
        let remote = snapshot(
            json!({"title": "Remote", "description": "mine", "tags": ["advent", "joy"]}),
            200,
        );

        let merged = resolve(series(), &local, &remote, ConflictStrategy::FieldMerge);
        assert_eq!(merged.resolution, Resolution::Merge);
        assert_eq!(merged.snapshot.fields["title"], "Remote");
        assert_eq!(merged.snapshot.fields["description"], "mine");
        assert_eq!(merged.snapshot.fields["tags"], json!(["advent", "hope", "joy"]));
        assert_eq!(merged.snapshot.updated_at, 200);
    }

    #[test]
    fn field_merge_ties_keep_local() {
        let local = snapshot(json!({"title": "Local"}), 100);
        let remote = snapshot(json!({"title": "Remote"}), 100);

        let merged = field_merge(series(), &local, &remote);
        assert_eq!(merged.fields["title"], "Local");
    }

    #[test]
    fn overlay_applies_chosen_fields() {
        let local = snapshot(json!({"title": "Local", "description": "mine"}), 100);
        let remote = snapshot(json!({"title": "Remote"}), 200);
        let mut chosen = Fields::new();
        chosen.insert("title".to_string(), json!("Chosen"));

        let merged = overlay(&local, &remote, chosen);
        assert_eq!(merged.fields["title"], "Chosen");
        assert_eq!(merged.fields["description"], "mine");
        assert_eq!(merged.updated_at, 200);
    }

    #[test]
    fn auto_resolve_threshold() {
        let two = vec!["title".to_string(), "tags".to_string()];
        let three = vec![
            "title".to_string(),
            "tags".to_string(),
            "status".to_string(),
        ];
        assert!(is_auto_resolvable(&two, 2));
        assert!(!is_auto_resolvable(&three, 2));
    }
}
