//! Shared ledger service used by the sync engines, the migration engine and clients.
//!
//! The ledger is the single writer for local state. Every call takes the
//! connection lock for the duration of one repository operation only, so no
//! caller can hold it across a network request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    Database, MappingRepository, NewConflict, RecordRepository, SqliteConflictRepository,
    SqliteMappingRepository, SqliteRecordRepository, SqliteWatermarkRepository,
};
use crate::models::{
    Conflict, Entity, EntityType, Fields, OwnerId, RecordId, RecordSnapshot, Resolution,
    SyncRecord,
};
use crate::util::now_millis;
use crate::{Error, Result};

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Thread-safe service over the local ledger database.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    clock: Clock,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open a ledger at the given filesystem path, creating parent directories.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path = db_path.clone();
        let db = tokio::task::spawn_blocking(move || Database::open(&path))
            .await
            .map_err(|error| Error::Database(error.to_string()))??;
        tracing::info!("Opened ledger at {}", db_path.display());

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            clock: Arc::new(now_millis),
        })
    }

    /// Open an in-memory ledger (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            clock: Arc::new(now_millis),
        })
    }

    /// Replace the wall clock used for timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current ledger time (unix ms).
    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Path of the backing database file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // Local mutations

    /// Create a record with a fresh id.
    pub async fn create_record(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        fields: &Fields,
    ) -> Result<SyncRecord> {
        self.create_record_with_id(owner, entity_type, &RecordId::new(), fields)
            .await
    }

    /// Create a record with a pre-generated id.
    pub async fn create_record_with_id(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        fields: &Fields,
    ) -> Result<SyncRecord> {
        let now = self.now();
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.insert_local(owner, entity_type, id, fields, now)
    }

    /// Replace a record's fields.
    pub async fn update_record(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        fields: &Fields,
    ) -> Result<SyncRecord> {
        let now = self.now();
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.update_local(owner, entity_type, id, fields, now)
    }

    /// Soft-delete a record.
    pub async fn soft_delete_record(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
    ) -> Result<SyncRecord> {
        let now = self.now();
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.soft_delete(owner, entity_type, id, now)
    }

    /// Fetch a record by id, tombstones included.
    pub async fn get_record(
        &self,
        entity_type: EntityType,
        id: &RecordId,
    ) -> Result<Option<SyncRecord>> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.get(entity_type, id)
    }

    /// List an owner's records newest-first.
    pub async fn list_records(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        include_deleted: bool,
    ) -> Result<Vec<SyncRecord>> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.list(owner, entity_type, include_deleted)
    }

    /// Dirty records for an owner, tombstones included, oldest change first.
    pub async fn list_dirty(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
    ) -> Result<Vec<SyncRecord>> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.list_dirty(owner, entity_type)
    }

    /// Resolve a unique id prefix to a live record id.
    pub async fn resolve_id_prefix(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        prefix: &str,
    ) -> Result<RecordId> {
        if let Ok(id) = prefix.trim().parse::<RecordId>() {
            return Ok(id);
        }
        if prefix.trim().is_empty() {
            return Err(Error::InvalidInput("Record id must not be empty".to_string()));
        }

        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        let matches = repo.list_ids_by_prefix(owner, entity_type, prefix, 2)?;
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(Error::NotFound(format!("{entity_type} {prefix}"))),
            _ => Err(Error::InvalidInput(format!(
                "Id prefix '{prefix}' matches more than one {entity_type}"
            ))),
        }
    }

    // Typed entity helpers

    /// Create a typed entity for an owner.
    pub async fn create<E: Entity>(&self, owner: &OwnerId, entity: &E) -> Result<SyncRecord> {
        let fields = entity.to_fields()?;
        self.create_record_with_id(owner, E::TYPE, &entity.id(), &fields)
            .await
    }

    /// Update a typed entity.
    pub async fn update<E: Entity>(&self, owner: &OwnerId, entity: &E) -> Result<SyncRecord> {
        let fields = entity.to_fields()?;
        self.update_record(owner, E::TYPE, &entity.id(), &fields)
            .await
    }

    /// Fetch a live typed entity.
    pub async fn get<E: Entity>(&self, id: &RecordId) -> Result<Option<E>> {
        match self.get_record(E::TYPE, id).await? {
            Some(record) if !record.is_deleted() => E::from_record(&record).map(Some),
            _ => Ok(None),
        }
    }

    /// List an owner's live typed entities newest-first.
    pub async fn list<E: Entity>(&self, owner: &OwnerId) -> Result<Vec<E>> {
        self.list_records(owner, E::TYPE, false)
            .await?
            .iter()
            .map(E::from_record)
            .collect()
    }

    // Remote state

    /// Write remote state for a known record as clean.
    pub async fn apply_remote_record(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        snapshot: &RecordSnapshot,
    ) -> Result<SyncRecord> {
        let now = self.now();
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.apply_remote(owner, entity_type, id, snapshot, now)
    }

    /// Insert a previously unknown remote record together with its mapping.
    pub async fn insert_remote_record(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        id: &RecordId,
        snapshot: &RecordSnapshot,
        remote_id: &str,
        backend_id: &str,
    ) -> Result<SyncRecord> {
        let now = self.now();
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let record = SqliteRecordRepository::new(&tx)
            .apply_remote(owner, entity_type, id, snapshot, now)?;
        SqliteMappingRepository::new(&tx).save(id, remote_id, entity_type, backend_id, now)?;
        tx.commit()?;
        Ok(record)
    }

    /// Write a merged snapshot as a dirty local mutation.
    pub async fn apply_merged_record(
        &self,
        entity_type: EntityType,
        id: &RecordId,
        snapshot: &RecordSnapshot,
    ) -> Result<SyncRecord> {
        let now = self.now();
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.apply_merged(entity_type, id, snapshot, now)
    }

    /// Mark a record dirty again so the next push sends it.
    pub async fn mark_dirty(&self, entity_type: EntityType, id: &RecordId) -> Result<bool> {
        let now = self.now();
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.mark_dirty(entity_type, id, now)
    }

    /// Confirm a push. Returns false when the record changed after `version` was read.
    pub async fn mark_synced(
        &self,
        entity_type: EntityType,
        id: &RecordId,
        version: i64,
    ) -> Result<bool> {
        let now = self.now();
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.mark_synced(entity_type, id, version, now)
    }

    /// Drop a tombstone that never reached any backend.
    pub async fn purge_unsynced_tombstone(
        &self,
        entity_type: EntityType,
        id: &RecordId,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.purge_unsynced_tombstone(entity_type, id)
    }

    // Ownership

    /// Re-point an owner's live records to another owner.
    pub async fn reassign_owner(
        &self,
        entity_type: EntityType,
        from: &OwnerId,
        to: &OwnerId,
    ) -> Result<Vec<RecordId>> {
        let now = self.now();
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.reassign_owner(entity_type, from, to, now)
    }

    /// Hand still-dirty records back to their previous owner.
    pub async fn restore_owner(
        &self,
        entity_type: EntityType,
        ids: &[RecordId],
        from: &OwnerId,
        to: &OwnerId,
    ) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.restore_owner(entity_type, ids, from, to)
    }

    /// Count an owner's live records of one type.
    pub async fn count_live(&self, owner: &OwnerId, entity_type: EntityType) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        repo.count_live(owner, entity_type)
    }

    /// Count an owner's live records of every type.
    pub async fn count_live_by_owner(&self, owner: &OwnerId) -> Result<BTreeMap<EntityType, usize>> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        EntityType::ALL
            .iter()
            .map(|entity_type| Ok((*entity_type, repo.count_live(owner, *entity_type)?)))
            .collect()
    }

    // Identifier mappings

    /// Remote id of a local record on a backend.
    pub async fn resolve_remote_id(
        &self,
        local_id: &RecordId,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let repo = SqliteMappingRepository::new(db.connection());
        repo.resolve(local_id, entity_type, backend_id)
    }

    /// Local id of a remote record on a backend.
    pub async fn resolve_local_id(
        &self,
        remote_id: &str,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<Option<RecordId>> {
        let db = self.db.lock().await;
        let repo = SqliteMappingRepository::new(db.connection());
        repo.resolve_local(remote_id, entity_type, backend_id)
    }

    /// Store or replace a mapping.
    pub async fn save_mapping(
        &self,
        local_id: &RecordId,
        remote_id: &str,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<()> {
        let now = self.now();
        let db = self.db.lock().await;
        let repo = SqliteMappingRepository::new(db.connection());
        repo.save(local_id, remote_id, entity_type, backend_id, now)
    }

    /// Remote ids mapped from more than one local record.
    pub async fn duplicate_remote_ids(
        &self,
        entity_type: EntityType,
        backend_id: &str,
    ) -> Result<Vec<(String, usize)>> {
        let db = self.db.lock().await;
        let repo = SqliteMappingRepository::new(db.connection());
        repo.duplicate_remote_ids(entity_type, backend_id)
    }

    // Watermarks

    /// Newest merged remote timestamp for a pull scope.
    pub async fn watermark(
        &self,
        entity_type: EntityType,
        owner: &OwnerId,
        backend_id: &str,
    ) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        SqliteWatermarkRepository::new(db.connection()).get(entity_type, owner, backend_id)
    }

    /// Advance the watermark for a pull scope.
    pub async fn advance_watermark(
        &self,
        entity_type: EntityType,
        owner: &OwnerId,
        backend_id: &str,
        watermark: i64,
    ) -> Result<()> {
        let now = self.now();
        let db = self.db.lock().await;
        SqliteWatermarkRepository::new(db.connection()).advance(
            entity_type,
            owner,
            backend_id,
            watermark,
            now,
        )
    }

    // Conflicts

    /// Store or refresh a conflict awaiting manual resolution.
    pub async fn upsert_pending_conflict(&self, conflict: &NewConflict) -> Result<Conflict> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).upsert_pending(conflict)
    }

    /// Store an automatically resolved conflict as history.
    pub async fn record_resolved_conflict(
        &self,
        conflict: &NewConflict,
        resolution: Resolution,
    ) -> Result<i64> {
        let now = self.now();
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).insert_resolved(conflict, resolution, now)
    }

    /// Fetch a conflict by id.
    pub async fn get_conflict(&self, id: i64) -> Result<Option<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).get(id)
    }

    /// The pending conflict for a record on a backend, if any.
    pub async fn pending_conflict_for(
        &self,
        entity_type: EntityType,
        record_id: &RecordId,
        backend_id: &str,
    ) -> Result<Option<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).find_pending(
            entity_type,
            record_id,
            backend_id,
        )
    }

    /// The latest resolved conflict for a record on a backend, if any.
    pub async fn latest_resolved_conflict_for(
        &self,
        entity_type: EntityType,
        record_id: &RecordId,
        backend_id: &str,
    ) -> Result<Option<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).find_latest_resolved(
            entity_type,
            record_id,
            backend_id,
        )
    }

    /// Whether a record has a pending conflict on a backend.
    pub async fn has_pending_conflict(
        &self,
        entity_type: EntityType,
        record_id: &RecordId,
        backend_id: &str,
    ) -> Result<bool> {
        Ok(self
            .pending_conflict_for(entity_type, record_id, backend_id)
            .await?
            .is_some())
    }

    /// Pending conflicts for an owner, oldest first.
    pub async fn list_pending_conflicts(&self, owner: &OwnerId) -> Result<Vec<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list_pending(owner)
    }

    /// Recent conflicts for an owner, resolved ones included.
    pub async fn list_recent_conflicts(
        &self,
        owner: &OwnerId,
        limit: usize,
    ) -> Result<Vec<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list_recent(owner, limit)
    }

    /// Count pending conflicts for an owner and type.
    pub async fn count_pending_conflicts(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
    ) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).count_pending(owner, entity_type)
    }

    /// Mark a pending conflict resolved.
    pub async fn mark_conflict_resolved(&self, id: i64, resolution: Resolution) -> Result<bool> {
        let now = self.now();
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).mark_resolved(id, resolution, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Series, Sermon};

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_typed_create_and_list_roundtrip() {
        let ledger = Ledger::open_in_memory().unwrap();
        let owner = OwnerId::new("user-1");

        let series = Series::new("Advent").with_tags(["Hope", "advent"]);
        ledger.create(&owner, &series).await.unwrap();
        let sermon = Sermon::new("Waiting").in_series(series.id);
        ledger.create(&owner, &sermon).await.unwrap();

        let listed = ledger.list::<Series>(&owner).await.unwrap();
        assert_eq!(listed, vec![series.clone()]);

        let fetched = ledger.get::<Sermon>(&sermon.id).await.unwrap().unwrap();
        assert_eq!(fetched.series_id, Some(series.id));

        let record = ledger
            .get_record(EntityType::Sermon, &sermon.id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.dirty);
        assert_eq!(record.version, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleted_entities_are_hidden_from_typed_reads() {
        let ledger = Ledger::open_in_memory().unwrap();
        let owner = OwnerId::new("user-1");
        let series = Series::new("Lent");
        ledger.create(&owner, &series).await.unwrap();

        ledger
            .soft_delete_record(&owner, EntityType::Series, &series.id)
            .await
            .unwrap();

        assert!(ledger.get::<Series>(&series.id).await.unwrap().is_none());
        assert!(ledger.list::<Series>(&owner).await.unwrap().is_empty());
        let tombstone = ledger
            .get_record(EntityType::Series, &series.id)
            .await
            .unwrap()
            .unwrap();
        assert!(tombstone.has_pending_delete());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_remote_record_saves_mapping() {
        let ledger = Ledger::open_in_memory().unwrap().with_clock(|| 5_000);
        let owner = OwnerId::new("user-1");
        let id = RecordId::new();
        let snapshot = RecordSnapshot {
            fields: Series::new("Remote").to_fields().unwrap(),
            created_at: 1_000,
            updated_at: 2_000,
            deleted_at: None,
        };

        let record = ledger
            .insert_remote_record(&owner, EntityType::Series, &id, &snapshot, "rt-1", "rt")
            .await
            .unwrap();

        assert!(!record.dirty);
        assert_eq!(record.synced_at, Some(5_000));
        assert_eq!(
            ledger
                .resolve_local_id("rt-1", EntityType::Series, "rt")
                .await
                .unwrap(),
            Some(id)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_id_prefix_requires_unique_match() {
        let ledger = Ledger::open_in_memory().unwrap();
        let owner = OwnerId::new("user-1");
        let series = Series::new("Psalms");
        ledger.create(&owner, &series).await.unwrap();

        let full = series.id.as_str();
        let resolved = ledger
            .resolve_id_prefix(&owner, EntityType::Series, &full[..8])
            .await
            .unwrap();
        assert_eq!(resolved, series.id);

        let missing = ledger
            .resolve_id_prefix(&owner, EntityType::Series, "ffffffff-none")
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lectern.db");
        let owner = OwnerId::new("user-1");

        {
            let ledger = Ledger::open_path(&path).await.unwrap();
            ledger.create(&owner, &Series::new("Acts")).await.unwrap();
        }

        let reopened = Ledger::open_path(&path).await.unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(
            reopened.count_live(&owner, EntityType::Series).await.unwrap(),
            1
        );
    }
}
