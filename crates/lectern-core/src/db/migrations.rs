//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Apply a migration's statements atomically
fn apply(conn: &Connection, version: i32, statements: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(statements)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: record tables, one per entity type
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS series (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            dirty INTEGER NOT NULL DEFAULT 1,
            op TEXT NOT NULL DEFAULT 'upsert',
            version INTEGER NOT NULL DEFAULT 1,
            synced_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_series_owner_dirty ON series(owner_id, dirty);
        CREATE INDEX IF NOT EXISTS idx_series_updated ON series(updated_at DESC);
        CREATE TABLE IF NOT EXISTS sermons (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            dirty INTEGER NOT NULL DEFAULT 1,
            op TEXT NOT NULL DEFAULT 'upsert',
            version INTEGER NOT NULL DEFAULT 1,
            synced_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_sermons_owner_dirty ON sermons(owner_id, dirty);
        CREATE INDEX IF NOT EXISTS idx_sermons_updated ON sermons(updated_at DESC);",
    )
}

/// Migration to version 2: id mappings, pull watermarks and conflicts
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        "CREATE TABLE IF NOT EXISTS id_mappings (
            local_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            backend_id TEXT NOT NULL,
            remote_id TEXT NOT NULL,
            synced_at INTEGER NOT NULL,
            PRIMARY KEY (local_id, entity_type, backend_id)
        );
        CREATE INDEX IF NOT EXISTS idx_id_mappings_remote
            ON id_mappings(backend_id, entity_type, remote_id);
        CREATE TABLE IF NOT EXISTS sync_watermarks (
            entity_type TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            backend_id TEXT NOT NULL,
            watermark INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (entity_type, owner_id, backend_id)
        );
        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            record_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            backend_id TEXT NOT NULL,
            local_snapshot TEXT NOT NULL,
            remote_snapshot TEXT NOT NULL,
            conflict_fields TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolution TEXT,
            resolved_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_pending
            ON sync_conflicts(owner_id, resolved);
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record
            ON sync_conflicts(entity_type, record_id, backend_id);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migration_creates_sync_tables() {
        let conn = setup();
        run(&conn).unwrap();

        for table in [
            "series",
            "sermons",
            "id_mappings",
            "sync_watermarks",
            "sync_conflicts",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }
}
