//! In-process backend.
//!
//! Works either as a store that assigns its own ids (`rt-1`, `rt-2`, ...) or as
//! a real-time style store keyed by the client's ids. Latency and failure
//! injection plus call counters make it the backend double in tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::backend::{RemoteBackend, RemotePayload, RemoteRecord, UpdateOutcome};
use super::error::{BackendError, BackendResult};
use crate::models::{EntityType, OwnerId, RecordId};

/// How the memory backend assigns remote ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMode {
    /// Backend-assigned sequential ids
    Sequential,
    /// The client's own record ids
    AdoptLocal,
}

/// Backend operations, for counters and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Health,
    Create,
    Update,
    Delete,
    List,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<(EntityType, String), RemoteRecord>,
    next_id: u64,
    last_stamp: i64,
    queued_failures: HashMap<Operation, VecDeque<BackendError>>,
    record_failures: HashMap<RecordId, BackendError>,
}

impl MemoryState {
    /// Next write time: never behind the client's clock, always past every earlier write.
    fn stamp(&mut self, client_time: i64) -> i64 {
        self.last_stamp = (self.last_stamp + 1).max(client_time);
        self.last_stamp
    }
}

/// Call counters.
#[derive(Debug, Default)]
struct Counters {
    health: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
    list: AtomicUsize,
}

impl Counters {
    const fn slot(&self, operation: Operation) -> &AtomicUsize {
        match operation {
            Operation::Health => &self.health,
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
            Operation::List => &self.list,
        }
    }
}

/// In-process remote store.
#[derive(Debug)]
pub struct MemoryBackend {
    id: String,
    id_mode: IdMode,
    latency: Option<Duration>,
    healthy: AtomicBool,
    state: Mutex<MemoryState>,
    counters: Counters,
}

impl MemoryBackend {
    /// Creates a backend that assigns its own ids.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_id_mode(id, IdMode::Sequential)
    }

    /// Creates a backend keyed by client ids.
    pub fn adopting_local_ids(id: impl Into<String>) -> Self {
        Self::with_id_mode(id, IdMode::AdoptLocal)
    }

    /// Creates a backend with the given id mode.
    pub fn with_id_mode(id: impl Into<String>, id_mode: IdMode) -> Self {
        Self {
            id: id.into(),
            id_mode,
            latency: None,
            healthy: AtomicBool::new(true),
            state: Mutex::new(MemoryState::default()),
            counters: Counters::default(),
        }
    }

    /// Delays every request by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the health probe fail or succeed.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Fails the next call of `operation` with `error`.
    pub fn fail_next(&self, operation: Operation, error: BackendError) {
        self.lock()
            .queued_failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Fails every create and update for one client record.
    pub fn fail_record(&self, local_id: RecordId, error: BackendError) {
        self.lock().record_failures.insert(local_id, error);
    }

    /// Stops failing requests for one client record.
    pub fn clear_record_failure(&self, local_id: &RecordId) {
        self.lock().record_failures.remove(local_id);
    }

    /// Number of calls made for `operation`.
    pub fn calls(&self, operation: Operation) -> usize {
        self.counters.slot(operation).load(Ordering::SeqCst)
    }

    /// Number of create, update and delete calls.
    pub fn write_calls(&self) -> usize {
        self.calls(Operation::Create) + self.calls(Operation::Update) + self.calls(Operation::Delete)
    }

    /// Stores a record as if another device had written it.
    pub fn put(&self, entity_type: EntityType, record: RemoteRecord) {
        let mut state = self.lock();
        state.last_stamp = state.last_stamp.max(record.updated_at);
        state
            .records
            .insert((entity_type, record.remote_id.clone()), record);
    }

    /// Removes a record outright.
    pub fn remove(&self, entity_type: EntityType, remote_id: &str) -> Option<RemoteRecord> {
        self.lock()
            .records
            .remove(&(entity_type, remote_id.to_string()))
    }

    /// Fetches a stored record.
    pub fn get(&self, entity_type: EntityType, remote_id: &str) -> Option<RemoteRecord> {
        self.lock()
            .records
            .get(&(entity_type, remote_id.to_string()))
            .cloned()
    }

    /// All stored records of one type.
    pub fn records(&self, entity_type: EntityType) -> Vec<RemoteRecord> {
        self.lock()
            .records
            .iter()
            .filter(|((stored_type, _), _)| *stored_type == entity_type)
            .map(|(_, record)| record.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn begin(&self, operation: Operation) -> BackendResult<()> {
        self.counters.slot(operation).fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let queued = self
            .lock()
            .queued_failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        queued.map_or(Ok(()), Err)
    }

    fn check_record(&self, local_id: &RecordId) -> BackendResult<()> {
        self.lock()
            .record_failures
            .get(local_id)
            .cloned()
            .map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn adopts_local_ids(&self) -> bool {
        self.id_mode == IdMode::AdoptLocal
    }

    async fn health_check(&self) -> BackendResult<()> {
        self.begin(Operation::Health).await?;
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Network(format!("{} is unreachable", self.id)))
        }
    }

    async fn create(
        &self,
        entity_type: EntityType,
        payload: &RemotePayload,
    ) -> BackendResult<String> {
        self.begin(Operation::Create).await?;
        self.check_record(&payload.local_id)?;

        let mut state = self.lock();
        let remote_id = match self.id_mode {
            IdMode::Sequential => {
                state.next_id += 1;
                format!("rt-{}", state.next_id)
            }
            IdMode::AdoptLocal => payload.local_id.as_str(),
        };
        let updated_at = state.stamp(payload.updated_at);
        state.records.insert(
            (entity_type, remote_id.clone()),
            RemoteRecord {
                remote_id: remote_id.clone(),
                owner_id: payload.owner_id.clone(),
                fields: payload.fields.clone(),
                created_at: payload.created_at,
                updated_at,
                deleted_at: None,
            },
        );
        Ok(remote_id)
    }

    async fn update(
        &self,
        entity_type: EntityType,
        remote_id: &str,
        payload: &RemotePayload,
    ) -> BackendResult<UpdateOutcome> {
        self.begin(Operation::Update).await?;
        self.check_record(&payload.local_id)?;

        let mut state = self.lock();
        let key = (entity_type, remote_id.to_string());
        if !state.records.contains_key(&key) {
            return Ok(UpdateOutcome::NotFound);
        }
        let updated_at = state.stamp(payload.updated_at);
        let Some(record) = state.records.get_mut(&key) else {
            return Ok(UpdateOutcome::NotFound);
        };
        record.owner_id = payload.owner_id.clone();
        record.fields = payload.fields.clone();
        record.updated_at = updated_at;
        record.deleted_at = None;
        Ok(UpdateOutcome::Updated)
    }

    async fn soft_delete(
        &self,
        entity_type: EntityType,
        remote_id: &str,
        deleted_at: i64,
    ) -> BackendResult<()> {
        self.begin(Operation::Delete).await?;

        let mut state = self.lock();
        let key = (entity_type, remote_id.to_string());
        let previous = state
            .records
            .get(&key)
            .map(|record| record.updated_at)
            .ok_or_else(|| BackendError::NotFound(remote_id.to_string()))?;
        let updated_at = state.stamp(previous.max(deleted_at));
        let record = state
            .records
            .get_mut(&key)
            .ok_or_else(|| BackendError::NotFound(remote_id.to_string()))?;
        record.deleted_at = Some(deleted_at);
        record.updated_at = updated_at;
        Ok(())
    }

    async fn list_since(
        &self,
        entity_type: EntityType,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> BackendResult<Vec<RemoteRecord>> {
        self.begin(Operation::List).await?;

        let mut records: Vec<RemoteRecord> = self
            .lock()
            .records
            .iter()
            .filter(|((stored_type, _), record)| {
                *stored_type == entity_type
                    && record.owner_id == *owner
                    && since.map_or(true, |since| record.updated_at > since)
            })
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by_key(|record| record.updated_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fields;

    fn payload(owner: &str) -> RemotePayload {
        let mut fields = Fields::new();
        fields.insert("title".to_string(), "Advent".into());
        RemotePayload {
            owner_id: OwnerId::new(owner),
            local_id: RecordId::new(),
            fields,
            created_at: 1,
            updated_at: 2,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sequential_ids_and_counters() {
        let backend = MemoryBackend::new("rt");
        let first = backend
            .create(EntityType::Series, &payload("user-1"))
            .await
            .unwrap();
        let second = backend
            .create(EntityType::Series, &payload("user-1"))
            .await
            .unwrap();

        assert_eq!(first, "rt-1");
        assert_eq!(second, "rt-2");
        assert_eq!(backend.calls(Operation::Create), 2);
        assert!(!backend.adopts_local_ids());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn adopting_backend_keys_by_local_id() {
        let backend = MemoryBackend::adopting_local_ids("live");
        let payload = payload("user-1");
        let remote_id = backend.create(EntityType::Series, &payload).await.unwrap();

        assert_eq!(remote_id, payload.local_id.as_str());
        assert!(backend.adopts_local_ids());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_and_delete_missing_records() {
        let backend = MemoryBackend::new("rt");
        let outcome = backend
            .update(EntityType::Series, "rt-9", &payload("user-1"))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::NotFound);

        let deleted = backend.soft_delete(EntityType::Series, "rt-9", 5).await;
        assert!(matches!(deleted, Err(BackendError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_since_filters_owner_and_time() {
        let backend = MemoryBackend::new("rt");
        let mut mine = payload("user-1");
        mine.updated_at = 10;
        backend.create(EntityType::Series, &mine).await.unwrap();
        mine.updated_at = 30;
        backend.create(EntityType::Series, &mine).await.unwrap();
        backend
            .create(EntityType::Series, &payload("user-2"))
            .await
            .unwrap();

        let owner = OwnerId::new("user-1");
        let all = backend
            .list_since(EntityType::Series, &owner, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let recent = backend
            .list_since(EntityType::Series, &owner, Some(10))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].updated_at, 30);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_failures_are_consumed_in_order() {
        let backend = MemoryBackend::new("rt");
        backend.fail_next(Operation::Health, BackendError::Timeout);

        assert_eq!(backend.health_check().await, Err(BackendError::Timeout));
        assert_eq!(backend.health_check().await, Ok(()));

        backend.set_healthy(false);
        assert!(matches!(
            backend.health_check().await,
            Err(BackendError::Network(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn late_writes_are_stamped_after_earlier_ones() {
        let backend = MemoryBackend::new("rt");
        let owner = OwnerId::new("user-1");
        let mut fresh = payload("user-1");
        fresh.updated_at = 100;
        backend.create(EntityType::Series, &fresh).await.unwrap();
        let seen = backend
            .list_since(EntityType::Series, &owner, None)
            .await
            .unwrap();
        let watermark = seen[0].updated_at;

        // Edited offline before the write above reached the store
        let mut stale = payload("user-1");
        stale.updated_at = 40;
        let late_id = backend.create(EntityType::Series, &stale).await.unwrap();
        backend
            .soft_delete(EntityType::Series, &late_id, 50)
            .await
            .unwrap();

        let late = backend
            .list_since(EntityType::Series, &owner, Some(watermark))
            .await
            .unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].remote_id, late_id);
        assert_eq!(late[0].deleted_at, Some(50));
        assert!(late[0].updated_at > watermark);
    }
}
