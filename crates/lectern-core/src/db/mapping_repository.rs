//! Identifier mapping repository
//!
//! Local ids are generated offline before any remote identity exists. Each
//! backend that assigns its own primary keys gets its own mapping namespace,
//! keyed by `(local_id, entity_type, backend_id)`.

use crate::error::{Error, Result};
use crate::models::{EntityType, RecordId};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for identifier mapping storage
pub trait MappingRepository {
    /// Remote id for a local record on a backend
    fn resolve(
        &self,
        local_id: &RecordId,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<Option<String>>;

    /// Local id for a remote record on a backend
    fn resolve_local(
        &self,
        remote_id: &str,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<Option<RecordId>>;

    /// Store or replace a mapping
    fn save(
        &self,
        local_id: &RecordId,
        remote_id: &str,
        entity_type: EntityType,
        backend_id: &str,
        now: i64,
    ) -> Result<()>;

    /// Remote ids that more than one local record maps to
    fn duplicate_remote_ids(
        &self,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<Vec<(String, usize)>>;
}

/// `SQLite` implementation of `MappingRepository`
pub struct SqliteMappingRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMappingRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MappingRepository for SqliteMappingRepository<'_> {
    fn resolve(
        &self,
        local_id: &RecordId,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<Option<String>> {
        let remote_id = self
            .conn
            .query_row(
                "SELECT remote_id FROM id_mappings
                 WHERE local_id = ? AND entity_type = ? AND backend_id = ?",
                params![local_id.as_str(), entity_type.as_str(), backend_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(remote_id)
    }

    fn resolve_local(
        &self,
        remote_id: &str,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<Option<RecordId>> {
        let local_id: Option<String> = self
            .conn
            .query_row(
                "SELECT local_id FROM id_mappings
                 WHERE remote_id = ? AND entity_type = ? AND backend_id = ?
                 ORDER BY synced_at DESC LIMIT 1",
                params![remote_id, entity_type.as_str(), backend_id],
                |row| row.get(0),
            )
            .optional()?;

        local_id
            .map(|id| {
                id.parse()
                    .map_err(|_| Error::Database(format!("Invalid local id in mapping: {id}")))
            })
            .transpose()
    }

    fn save(
        &self,
        local_id: &RecordId,
        remote_id: &str,
        entity_type: EntityType,
        backend_id: &str,
        now: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO id_mappings (local_id, entity_type, backend_id, remote_id, synced_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(local_id, entity_type, backend_id)
             DO UPDATE SET remote_id = excluded.remote_id, synced_at = excluded.synced_at",
            params![
                local_id.as_str(),
                entity_type.as_str(),
                backend_id,
                remote_id,
                now
            ],
        )?;
        Ok(())
    }

    fn duplicate_remote_ids(
        &self,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT remote_id, COUNT(*) AS count FROM id_mappings
             WHERE entity_type = ? AND backend_id = ?
             GROUP BY remote_id
             HAVING count > 1
             ORDER BY remote_id",
        )?;
        let duplicates = stmt
            .query_map(params![entity_type.as_str(), backend_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(duplicates)
    }
}
