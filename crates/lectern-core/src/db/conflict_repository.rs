//! Conflict repository
//!
//! Pending rows await manual resolution. Auto-resolved conflicts are written
//! already resolved, so the table doubles as a conflict history log, capped
//! per owner.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{Conflict, EntityType, OwnerId, RecordId, RecordSnapshot, Resolution};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const CONFLICT_COLUMNS: &str = "id, entity_type, record_id, owner_id, backend_id, local_snapshot,
     remote_snapshot, conflict_fields, detected_at, resolved, resolution, resolved_at";

/// Resolved conflicts kept per owner; older history is pruned on insert
pub const RESOLVED_HISTORY_LIMIT: usize = 200;

/// A conflict that has been detected but not stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict {
    pub entity_type: EntityType,
    pub record_id: RecordId,
    pub owner_id: OwnerId,
    pub backend_id: String,
    pub local: RecordSnapshot,
    pub remote: RecordSnapshot,
    pub conflict_fields: Vec<String>,
    pub detected_at: i64,
}

/// `SQLite` storage for detected conflicts
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error))
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conflict> {
        let entity_type: String = row.get(1)?;
        let entity_type = entity_type
            .parse::<EntityType>()
            .map_err(|e| conversion_error(1, e))?;
        let record_id: String = row.get(2)?;
        let record_id = record_id
            .parse::<RecordId>()
            .map_err(|e| conversion_error(2, e))?;
        let local: String = row.get(5)?;
        let remote: String = row.get(6)?;
        let conflict_fields: String = row.get(7)?;
        let resolution: Option<String> = row.get(10)?;

        Ok(Conflict {
            id: row.get(0)?,
            entity_type,
            record_id,
            owner_id: OwnerId::new(row.get::<_, String>(3)?),
            backend_id: row.get(4)?,
            local: serde_json::from_str(&local).map_err(|e| conversion_error(5, e))?,
            remote: serde_json::from_str(&remote).map_err(|e| conversion_error(6, e))?,
            conflict_fields: serde_json::from_str(&conflict_fields)
                .map_err(|e| conversion_error(7, e))?,
            detected_at: row.get(8)?,
            resolved: row.get::<_, i32>(9)? != 0,
            resolution: resolution.and_then(|value| value.parse().ok()),
            resolved_at: row.get(11)?,
        })
    }

    /// Get a conflict by id
    pub fn get(&self, id: i64) -> Result<Option<Conflict>> {
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?");
        let conflict = self
            .conn
            .query_row(&sql, params![id], Self::parse_conflict)
            .optional()?;
        Ok(conflict)
    }

    /// The pending conflict for a record on a backend, if any
    pub fn find_pending(
        &self,
        entity_type: EntityType,
        record_id: &RecordId,
        backend_id: &str,
    ) -> Result<Option<Conflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE entity_type = ? AND record_id = ? AND backend_id = ? AND resolved = 0
             ORDER BY id LIMIT 1"
        );
        let conflict = self
            .conn
            .query_row(
                &sql,
                params![entity_type.as_str(), record_id.as_str(), backend_id],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    /// The most recently resolved conflict for a record on a backend
    pub fn find_latest_resolved(
        &self,
        entity_type: EntityType,
        record_id: &RecordId,
        backend_id: &str,
    ) -> Result<Option<Conflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE entity_type = ? AND record_id = ? AND backend_id = ? AND resolved = 1
             ORDER BY id DESC LIMIT 1"
        );
        let conflict = self
            .conn
            .query_row(
                &sql,
                params![entity_type.as_str(), record_id.as_str(), backend_id],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    /// Record a conflict awaiting manual resolution.
    ///
    /// Re-detecting a conflict that is already pending refreshes its snapshots
    /// and field list instead of adding a second row.
    pub fn upsert_pending(&self, conflict: &NewConflict) -> Result<Conflict> {
        let local = serde_json::to_string(&conflict.local)?;
        let remote = serde_json::to_string(&conflict.remote)?;
        let fields = serde_json::to_string(&conflict.conflict_fields)?;

        let id = if let Some(existing) =
            self.find_pending(conflict.entity_type, &conflict.record_id, &conflict.backend_id)?
        {
            self.conn.execute(
                "UPDATE sync_conflicts
                 SET local_snapshot = ?, remote_snapshot = ?, conflict_fields = ?
                 WHERE id = ?",
                params![local, remote, fields, existing.id],
            )?;
            existing.id
        } else {
            self.conn.execute(
                "INSERT INTO sync_conflicts (
                    entity_type, record_id, owner_id, backend_id, local_snapshot,
                    remote_snapshot, conflict_fields, detected_at, resolved
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)",
                params![
                    conflict.entity_type.as_str(),
                    conflict.record_id.as_str(),
                    conflict.owner_id.as_str(),
                    conflict.backend_id,
                    local,
                    remote,
                    fields,
                    conflict.detected_at
                ],
            )?;
            self.conn.last_insert_rowid()
        };

        self.get(id)?
            .ok_or_else(|| crate::Error::Database(format!("Conflict {id} vanished after write")))
    }

    /// Record a conflict that was resolved automatically
    pub fn insert_resolved(
        &self,
        conflict: &NewConflict,
        resolution: Resolution,
        resolved_at: i64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (
                entity_type, record_id, owner_id, backend_id, local_snapshot, remote_snapshot,
                conflict_fields, detected_at, resolved, resolution, resolved_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
            params![
                conflict.entity_type.as_str(),
                conflict.record_id.as_str(),
                conflict.owner_id.as_str(),
                conflict.backend_id,
                serde_json::to_string(&conflict.local)?,
                serde_json::to_string(&conflict.remote)?,
                serde_json::to_string(&conflict.conflict_fields)?,
                conflict.detected_at,
                resolution.as_str(),
                resolved_at
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.prune_resolved(&conflict.owner_id, RESOLVED_HISTORY_LIMIT)?;
        Ok(id)
    }

    /// Delete an owner's resolved conflicts beyond the `keep` most recent.
    /// Pending conflicts are never pruned.
    pub fn prune_resolved(&self, owner: &OwnerId, keep: usize) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM sync_conflicts
             WHERE owner_id = ?1 AND resolved = 1 AND id NOT IN (
                 SELECT id FROM sync_conflicts
                 WHERE owner_id = ?1 AND resolved = 1
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?2
             )",
            params![owner.as_str(), keep as i64],
        )?;
        if removed > 0 {
            tracing::debug!("Pruned {removed} resolved conflicts for {owner}");
        }
        Ok(removed)
    }

    /// Mark a pending conflict resolved; returns false if it was not pending
    pub fn mark_resolved(&self, id: i64, resolution: Resolution, resolved_at: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET resolved = 1, resolution = ?, resolved_at = ?
             WHERE id = ? AND resolved = 0",
            params![resolution.as_str(), resolved_at, id],
        )?;
        Ok(rows > 0)
    }

    /// Pending conflicts for an owner, oldest first
    pub fn list_pending(&self, owner: &OwnerId) -> Result<Vec<Conflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE owner_id = ? AND resolved = 0
             ORDER BY detected_at ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let conflicts = stmt
            .query_map(params![owner.as_str()], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }

    /// Most recent conflicts for an owner, resolved ones included
    pub fn list_recent(&self, owner: &OwnerId, limit: usize) -> Result<Vec<Conflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE owner_id = ?
             ORDER BY id DESC
             LIMIT ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let conflicts = stmt
            .query_map(params![owner.as_str(), limit as i64], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }

    /// Number of pending conflicts for an owner and entity type
    pub fn count_pending(&self, owner: &OwnerId, entity_type: EntityType) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts
             WHERE owner_id = ? AND entity_type = ? AND resolved = 0",
            params![owner.as_str(), entity_type.as_str()],
            |row| row.get::<_, usize>(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Fields;

    fn snapshot(title: &str, updated_at: i64) -> RecordSnapshot {
        let mut fields = Fields::new();
        fields.insert("title".to_string(), title.into());
        RecordSnapshot {
            fields,
            created_at: 1,
            updated_at,
            deleted_at: None,
        }
    }

    fn draft(record_id: RecordId, remote_title: &str) -> NewConflict {
        NewConflict {
            entity_type: EntityType::Series,
            record_id,
            owner_id: OwnerId::new("user-1"),
            backend_id: "rest".to_string(),
            local: snapshot("Local", 10),
            remote: snapshot(remote_title, 20),
            conflict_fields: vec!["title".to_string()],
            detected_at: 30,
        }
    }

    #[test]
    fn test_upsert_pending_refreshes_existing_row() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());
        let record_id = RecordId::new();

        let first = repo.upsert_pending(&draft(record_id, "Remote A")).unwrap();
        let second = repo.upsert_pending(&draft(record_id, "Remote B")).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.remote.fields["title"], "Remote B");
        assert_eq!(repo.list_pending(&OwnerId::new("user-1")).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_resolved_removes_from_pending() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());
        let owner = OwnerId::new("user-1");

        let conflict = repo.upsert_pending(&draft(RecordId::new(), "Remote")).unwrap();
        assert_eq!(repo.count_pending(&owner, EntityType::Series).unwrap(), 1);

        assert!(repo
            .mark_resolved(conflict.id, Resolution::KeepRemote, 40)
            .unwrap());
        assert!(!repo
            .mark_resolved(conflict.id, Resolution::KeepLocal, 50)
            .unwrap());

        let stored = repo.get(conflict.id).unwrap().unwrap();
        assert!(stored.resolved);
        assert_eq!(stored.resolution, Some(Resolution::KeepRemote));
        assert_eq!(stored.resolved_at, Some(40));
        assert!(repo.list_pending(&owner).unwrap().is_empty());
    }

    #[test]
    fn test_prune_resolved_keeps_newest_and_pending() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());
        let owner = OwnerId::new("user-1");

        let pending = repo.upsert_pending(&draft(RecordId::new(), "Open")).unwrap();
        for at in 0..5 {
            let conflict = draft(RecordId::new(), &format!("Remote {at}"));
            repo.insert_resolved(&conflict, Resolution::KeepRemote, 100 + at)
                .unwrap();
        }
        let mut other = draft(RecordId::new(), "Other owner");
        other.owner_id = OwnerId::new("user-2");
        repo.insert_resolved(&other, Resolution::KeepLocal, 50).unwrap();

        assert_eq!(repo.prune_resolved(&owner, 2).unwrap(), 3);

        let remaining = repo.list_recent(&owner, 10).unwrap();
        let titles: Vec<_> = remaining
            .iter()
            .filter_map(|conflict| conflict.remote.fields["title"].as_str())
            .collect();
        assert_eq!(titles, vec!["Remote 4", "Remote 3", "Open"]);
        assert_eq!(repo.list_pending(&owner).unwrap()[0].id, pending.id);
        assert_eq!(repo.list_recent(&OwnerId::new("user-2"), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_resolved_caps_history() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());
        let owner = OwnerId::new("user-1");

        for at in 0..=RESOLVED_HISTORY_LIMIT {
            let conflict = draft(RecordId::new(), "Remote");
            repo.insert_resolved(&conflict, Resolution::KeepRemote, at as i64)
                .unwrap();
        }

        let history = repo.list_recent(&owner, RESOLVED_HISTORY_LIMIT + 10).unwrap();
        assert_eq!(history.len(), RESOLVED_HISTORY_LIMIT);
        assert!(history.iter().all(|conflict| conflict.resolved_at != Some(0)));
    }

    #[test]
    fn test_insert_resolved_is_history_only() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());
        let owner = OwnerId::new("user-1");

        repo.insert_resolved(&draft(RecordId::new(), "Remote"), Resolution::KeepRemote, 40)
            .unwrap();

        assert!(repo.list_pending(&owner).unwrap().is_empty());
        let recent = repo.list_recent(&owner, 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].resolved);
    }
}
