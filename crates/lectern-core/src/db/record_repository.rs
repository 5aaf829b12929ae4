//! Syncable record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{EntityType, Fields, OwnerId, PendingOp, RecordId, RecordSnapshot, SyncRecord};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

const RECORD_COLUMNS: &str =
    "id, owner_id, fields, created_at, updated_at, deleted_at, dirty, op, version, synced_at";

/// Trait for ledger record storage operations
///
/// Local mutations (`insert_local`, `update_local`, `soft_delete`) always mark
/// the record dirty, set the pending op, bump `version` and `updated_at`.
pub trait RecordRepository {
    /// Insert a new locally created record
    fn insert_local(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        fields: &Fields,
        now: i64,
    ) -> Result<SyncRecord>;

    /// Replace the fields of a live local record
    fn update_local(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        fields: &Fields,
        now: i64,
    ) -> Result<SyncRecord>;

    /// Soft delete a live local record, leaving a dirty tombstone
    fn soft_delete(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        now: i64,
    ) -> Result<SyncRecord>;

    /// Get a record by ID, tombstones included
    fn get(&self, entity_type: EntityType, id: &RecordId) -> Result<Option<SyncRecord>>;

    /// List an owner's records, newest first
    fn list(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        include_deleted: bool,
    ) -> Result<Vec<SyncRecord>>;

    /// List an owner's dirty records, oldest change first
    fn list_dirty(&self, owner: &OwnerId, entity_type: EntityType) -> Result<Vec<SyncRecord>>;

    /// Upsert a record as clean remote state
    fn apply_remote(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        snapshot: &RecordSnapshot,
        now: i64,
    ) -> Result<SyncRecord>;

    /// Write a merged snapshot as a dirty local mutation
    fn apply_merged(
        &self,
        entity_type: EntityType,
        id: &RecordId,
        snapshot: &RecordSnapshot,
        now: i64,
    ) -> Result<SyncRecord>;

    /// Force a record back to dirty so it is pushed again
    fn mark_dirty(&self, entity_type: EntityType, id: &RecordId, now: i64) -> Result<bool>;

    /// Clear dirty if the record has not changed since `version` was read
    fn mark_synced(
        &self,
        entity_type: EntityType,
        id: &RecordId,
        version: i64,
        now: i64,
    ) -> Result<bool>;

    /// Hard delete a tombstone that never reached a remote backend
    fn purge_unsynced_tombstone(&self, entity_type: EntityType, id: &RecordId) -> Result<bool>;

    /// Move live records between owners, marking them dirty upserts
    fn reassign_owner(
        &self,
        entity_type: EntityType,
        from: &OwnerId,
        to: &OwnerId,
        now: i64,
    ) -> Result<Vec<RecordId>>;

    /// Move still-dirty records back to their previous owner
    fn restore_owner(
        &self,
        entity_type: EntityType,
        ids: &[RecordId],
        from: &OwnerId,
        to: &OwnerId,
    ) -> Result<usize>;

    /// Count an owner's live records
    fn count_live(&self, owner: &OwnerId, entity_type: EntityType) -> Result<usize>;

    /// Find live record ids starting with `prefix`
    fn list_ids_by_prefix(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<RecordId>>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(entity_type: EntityType, row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
        let id: String = row.get(0)?;
        let id = id
            .parse::<RecordId>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
        let fields = match row.get::<_, Value>(2)? {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        let op: String = row.get(7)?;
        let op = op
            .parse::<PendingOp>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, e.into()))?;

        Ok(SyncRecord {
            id,
            entity_type,
            owner_id: OwnerId::new(row.get::<_, String>(1)?),
            fields,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            deleted_at: row.get(5)?,
            dirty: row.get::<_, i32>(6)? != 0,
            op,
            version: row.get(8)?,
            synced_at: row.get(9)?,
        })
    }

    fn require(&self, entity_type: EntityType, id: &RecordId) -> Result<SyncRecord> {
        self.get(entity_type, id)?
            .ok_or_else(|| Error::NotFound(format!("{entity_type} {id}")))
    }

    fn query_records(
        &self,
        entity_type: EntityType,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<SyncRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(params, |row| Self::parse_record(entity_type, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn insert_local(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        fields: &Fields,
        now: i64,
    ) -> Result<SyncRecord> {
        let sql = format!(
            "INSERT INTO {} ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, NULL, 1, ?, 1, NULL)",
            entity_type.table()
        );
        self.conn.execute(
            &sql,
            params![
                id.as_str(),
                owner.as_str(),
                Value::Object(fields.clone()),
                now,
                now,
                PendingOp::Upsert.as_str()
            ],
        )?;

        self.require(entity_type, id)
    }

    fn update_local(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        fields: &Fields,
        now: i64,
    ) -> Result<SyncRecord> {
        let sql = format!(
            "UPDATE {} SET fields = ?, updated_at = MAX(updated_at, ?), dirty = 1, op = ?,
                    version = version + 1
             WHERE id = ? AND owner_id = ? AND deleted_at IS NULL",
            entity_type.table()
        );
        let rows = self.conn.execute(
            &sql,
            params![
                Value::Object(fields.clone()),
                now,
                PendingOp::Upsert.as_str(),
                id.as_str(),
                owner.as_str()
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{entity_type} {id}")));
        }

        self.require(entity_type, id)
    }

    fn soft_delete(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        now: i64,
    ) -> Result<SyncRecord> {
        let sql = format!(
            "UPDATE {} SET deleted_at = ?, updated_at = MAX(updated_at, ?), dirty = 1, op = ?,
                    version = version + 1
             WHERE id = ? AND owner_id = ? AND deleted_at IS NULL",
            entity_type.table()
        );
        let rows = self.conn.execute(
            &sql,
            params![
                now,
                now,
                PendingOp::Delete.as_str(),
                id.as_str(),
                owner.as_str()
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{entity_type} {id}")));
        }

        self.require(entity_type, id)
    }

    fn get(&self, entity_type: EntityType, id: &RecordId) -> Result<Option<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE id = ?",
            entity_type.table()
        );
        let record = self
            .conn
            .query_row(&sql, params![id.as_str()], |row| {
                Self::parse_record(entity_type, row)
            })
            .optional()?;
        Ok(record)
    }

    fn list(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        include_deleted: bool,
    ) -> Result<Vec<SyncRecord>> {
        let filter = if include_deleted {
            ""
        } else {
            "AND deleted_at IS NULL"
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE owner_id = ? {filter} ORDER BY updated_at DESC",
            entity_type.table()
        );
        self.query_records(entity_type, &sql, params![owner.as_str()])
    }

    fn list_dirty(&self, owner: &OwnerId, entity_type: EntityType) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE owner_id = ? AND dirty = 1 ORDER BY updated_at ASC",
            entity_type.table()
        );
        self.query_records(entity_type, &sql, params![owner.as_str()])
    }

    fn apply_remote(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        snapshot: &RecordSnapshot,
        now: i64,
    ) -> Result<SyncRecord> {
        let op = if snapshot.deleted_at.is_some() {
            PendingOp::Delete
        } else {
            PendingOp::Upsert
        };
        let sql = format!(
            "INSERT INTO {} ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 1, ?8)
             ON CONFLICT(id) DO UPDATE SET
                fields = excluded.fields,
                updated_at = MAX(updated_at, excluded.updated_at),
                deleted_at = excluded.deleted_at,
                dirty = 0,
                op = excluded.op,
                synced_at = excluded.synced_at",
            entity_type.table()
        );
        self.conn.execute(
            &sql,
            params![
                id.as_str(),
                owner.as_str(),
                Value::Object(snapshot.fields.clone()),
                snapshot.created_at,
                snapshot.updated_at,
                snapshot.deleted_at,
                op.as_str(),
                now
            ],
        )?;

        self.require(entity_type, id)
    }

    fn apply_merged(
        &self,
        entity_type: EntityType,
        id: &RecordId,
        snapshot: &RecordSnapshot,
        now: i64,
    ) -> Result<SyncRecord> {
        let op = if snapshot.deleted_at.is_some() {
            PendingOp::Delete
        } else {
            PendingOp::Upsert
        };
        let sql = format!(
            "UPDATE {} SET fields = ?, deleted_at = ?, updated_at = MAX(updated_at, ?, ?),
                    dirty = 1, op = ?, version = version + 1
             WHERE id = ?",
            entity_type.table()
        );
        let rows = self.conn.execute(
            &sql,
            params![
                Value::Object(snapshot.fields.clone()),
                snapshot.deleted_at,
                snapshot.updated_at,
                now,
                op.as_str(),
                id.as_str()
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{entity_type} {id}")));
        }

        self.require(entity_type, id)
    }

    fn mark_dirty(&self, entity_type: EntityType, id: &RecordId, now: i64) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET dirty = 1, version = version + 1, updated_at = MAX(updated_at, ?)
             WHERE id = ?",
            entity_type.table()
        );
        let rows = self.conn.execute(&sql, params![now, id.as_str()])?;
        Ok(rows > 0)
    }

    fn mark_synced(
        &self,
        entity_type: EntityType,
        id: &RecordId,
        version: i64,
        now: i64,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET dirty = 0, synced_at = ? WHERE id = ? AND version = ?",
            entity_type.table()
        );
        let rows = self
            .conn
            .execute(&sql, params![now, id.as_str(), version])?;
        Ok(rows > 0)
    }

    fn purge_unsynced_tombstone(&self, entity_type: EntityType, id: &RecordId) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ? AND deleted_at IS NOT NULL AND synced_at IS NULL",
            entity_type.table()
        );
        let rows = self.conn.execute(&sql, params![id.as_str()])?;
        Ok(rows > 0)
    }

    fn reassign_owner(
        &self,
        entity_type: EntityType,
        from: &OwnerId,
        to: &OwnerId,
        now: i64,
    ) -> Result<Vec<RecordId>> {
        let tx = self.conn.unchecked_transaction()?;

        let select = format!(
            "SELECT id FROM {} WHERE owner_id = ? AND deleted_at IS NULL",
            entity_type.table()
        );
        let ids = {
            let mut stmt = tx.prepare(&select)?;
            let raw = stmt
                .query_map(params![from.as_str()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.iter()
                .map(|id| {
                    id.parse::<RecordId>()
                        .map_err(|_| Error::Database(format!("Invalid record id: {id}")))
                })
                .collect::<Result<Vec<_>>>()?
        };

        let update = format!(
            "UPDATE {} SET owner_id = ?, dirty = 1, op = ?, version = version + 1,
                    updated_at = MAX(updated_at, ?)
             WHERE owner_id = ? AND deleted_at IS NULL",
            entity_type.table()
        );
        tx.execute(
            &update,
            params![to.as_str(), PendingOp::Upsert.as_str(), now, from.as_str()],
        )?;
        tx.commit()?;

        Ok(ids)
    }

    fn restore_owner(
        &self,
        entity_type: EntityType,
        ids: &[RecordId],
        from: &OwnerId,
        to: &OwnerId,
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let sql = format!(
            "UPDATE {} SET owner_id = ? WHERE id = ? AND owner_id = ? AND dirty = 1",
            entity_type.table()
        );

        let mut restored = 0;
        for id in ids {
            restored += tx.execute(&sql, params![to.as_str(), id.as_str(), from.as_str()])?;
        }
        tx.commit()?;

        Ok(restored)
    }

    fn count_live(&self, owner: &OwnerId, entity_type: EntityType) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE owner_id = ? AND deleted_at IS NULL",
            entity_type.table()
        );
        let count = self
            .conn
            .query_row(&sql, params![owner.as_str()], |row| row.get::<_, usize>(0))?;
        Ok(count)
    }

    fn list_ids_by_prefix(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<RecordId>> {
        let sql = format!(
            "SELECT id FROM {} WHERE owner_id = ? AND deleted_at IS NULL AND id LIKE ?
             ORDER BY updated_at DESC LIMIT ?",
            entity_type.table()
        );
        let pattern = format!("{}%", prefix.trim().to_ascii_lowercase());
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![owner.as_str(), pattern, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ids.iter().filter_map(|id| id.parse().ok()).collect())
    }
}
