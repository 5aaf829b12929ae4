//! Pull watermark repository

use crate::error::Result;
use crate::models::{EntityType, OwnerId};
use rusqlite::{params, Connection, OptionalExtension};

/// `SQLite` storage for per `(entity_type, owner, backend)` pull cursors
pub struct SqliteWatermarkRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteWatermarkRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Last merged remote timestamp (unix ms), if any pull completed
    pub fn get(
        &self,
        entity_type: EntityType,
        owner: &OwnerId,
        backend_id: &str,
    ) -> Result<Option<i64>> {
        let watermark = self
            .conn
            .query_row(
                "SELECT watermark FROM sync_watermarks
                 WHERE entity_type = ? AND owner_id = ? AND backend_id = ?",
                params![entity_type.as_str(), owner.as_str(), backend_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(watermark)
    }

    /// Move the watermark forward; never moves it back
    pub fn advance(
        &self,
        entity_type: EntityType,
        owner: &OwnerId,
        backend_id: &str,
        watermark: i64,
        now: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_watermarks (entity_type, owner_id, backend_id, watermark, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(entity_type, owner_id, backend_id) DO UPDATE SET
                watermark = MAX(watermark, excluded.watermark),
                updated_at = excluded.updated_at",
            params![
                entity_type.as_str(),
                owner.as_str(),
                backend_id,
                watermark,
                now
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_watermark_only_moves_forward() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteWatermarkRepository::new(db.connection());
        let owner = OwnerId::new("user-1");

        assert_eq!(repo.get(EntityType::Series, &owner, "rest").unwrap(), None);

        repo.advance(EntityType::Series, &owner, "rest", 200, 1).unwrap();
        repo.advance(EntityType::Series, &owner, "rest", 100, 2).unwrap();
        assert_eq!(
            repo.get(EntityType::Series, &owner, "rest").unwrap(),
            Some(200)
        );
        assert_eq!(repo.get(EntityType::Series, &owner, "realtime").unwrap(), None);
        assert_eq!(repo.get(EntityType::Sermon, &owner, "rest").unwrap(), None);
    }
}
