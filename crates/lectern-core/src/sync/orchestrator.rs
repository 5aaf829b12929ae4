//! Sync orchestrator: one serialized pass per owner.
//!
//! A pass pushes every entity type in dependency order, then pulls every type
//! in the same order, against the active backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::backend::RemoteBackend;
use super::config::SyncConfig;
use super::pull::PullEngine;
use super::push::PushEngine;
use super::report::{EntitySyncReport, SyncReport};
use super::resolver;
use crate::auth::AuthContext;
use crate::models::{Conflict, ConflictStrategy, EntityType, Fields, OwnerId, Resolution};
use crate::services::Ledger;
use crate::{Error, Result};

/// Coordinates push and pull passes for any number of owners.
pub struct SyncOrchestrator {
    ledger: Ledger,
    backends: BTreeMap<String, Arc<dyn RemoteBackend>>,
    active: Arc<dyn RemoteBackend>,
    config: SyncConfig,
    owner_locks: std::sync::Mutex<HashMap<OwnerId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("active", &self.active.id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Creates an orchestrator with `backend` registered and active.
    pub fn new(ledger: Ledger, backend: Arc<dyn RemoteBackend>, config: SyncConfig) -> Self {
        let mut backends = BTreeMap::new();
        backends.insert(backend.id().to_string(), Arc::clone(&backend));
        Self {
            ledger,
            backends,
            active: backend,
            config,
            owner_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Registers another backend without activating it.
    pub fn register_backend(&mut self, backend: Arc<dyn RemoteBackend>) {
        self.backends.insert(backend.id().to_string(), backend);
    }

    /// Makes a registered backend the target of subsequent passes.
    pub fn set_active_backend(&mut self, backend_id: &str) -> Result<()> {
        let backend = self
            .backends
            .get(backend_id)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown backend: {backend_id}")))?;
        self.active = Arc::clone(backend);
        Ok(())
    }

    pub fn active_backend(&self) -> &Arc<dyn RemoteBackend> {
        &self.active
    }

    pub fn backend_ids(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Claim the per-owner pass lock, failing fast if a pass is running.
    pub(crate) fn begin_pass(&self, owner: &OwnerId) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .owner_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(owner.clone()).or_default())
        };
        lock.try_lock_owned()
            .map_err(|_| Error::SyncInProgress(owner.to_string()))
    }

    /// Run a full pass for one owner against the active backend.
    pub async fn sync_all(&self, owner: &OwnerId) -> Result<SyncReport> {
        let _pass = self.begin_pass(owner)?;
        let backend = Arc::clone(&self.active);
        let started_at = self.ledger.now();

        self.config
            .call(|| backend.health_check())
            .await
            .inspect_err(|error| {
                tracing::warn!("Backend {} failed its health check: {error}", backend.id());
            })?;

        let order = EntityType::sync_order();
        let push = PushEngine::new(&self.ledger, backend.as_ref(), &self.config);
        let pull = PullEngine::new(&self.ledger, backend.as_ref(), &self.config);

        let mut pushed = Vec::with_capacity(order.len());
        for entity_type in &order {
            pushed.push(push.push(owner, *entity_type).await?);
        }

        let mut entities = Vec::with_capacity(order.len());
        for (entity_type, push_report) in order.iter().zip(pushed) {
            let pull_report = pull.pull(owner, *entity_type).await?;
            entities.push(EntitySyncReport {
                entity_type: *entity_type,
                push: push_report,
                pull: pull_report,
            });
        }

        let report = SyncReport {
            owner_id: owner.clone(),
            backend_id: backend.id().to_string(),
            started_at,
            finished_at: self.ledger.now(),
            entities,
        };
        tracing::info!(
            "Sync with {} for {owner}: pushed {}, pulled {}, auto-resolved {}, pending conflicts {}, errors {}",
            report.backend_id,
            report.pushed(),
            report.pulled(),
            report.auto_resolved(),
            report.pending_conflicts(),
            report.errors().count()
        );
        Ok(report)
    }

    /// Run a pass for the signed-in user of an online session.
    pub async fn sync_current(&self, auth: &dyn AuthContext) -> Result<SyncReport> {
        if !auth.is_authenticated_online() {
            return Err(Error::NotAuthenticated);
        }
        self.sync_all(&auth.effective_owner_id()).await
    }

    /// Conflicts waiting for the user, oldest first.
    pub async fn pending_conflicts(&self, owner: &OwnerId) -> Result<Vec<Conflict>> {
        self.ledger.list_pending_conflicts(owner).await
    }

    /// Apply the user's decision on a pending conflict.
    ///
    /// `merged` supplies field values for [`Resolution::Merge`]; without it the
    /// two sides are field-merged.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: Resolution,
        merged: Option<Fields>,
    ) -> Result<Conflict> {
        let conflict = self
            .ledger
            .get_conflict(conflict_id)
            .await?
            .ok_or(Error::ConflictNotFound(conflict_id))?;
        if conflict.resolved {
            return Err(Error::ConflictAlreadyResolved(conflict_id));
        }

        let _pass = self.begin_pass(&conflict.owner_id)?;
        let entity_type = conflict.entity_type;
        let record = self
            .ledger
            .get_record(entity_type, &conflict.record_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{entity_type} {}", conflict.record_id)))?;

        match resolution {
            Resolution::KeepRemote => {
                self.ledger
                    .apply_remote_record(&record.owner_id, entity_type, &record.id, &conflict.remote)
                    .await?;
            }
            Resolution::KeepLocal => {
                self.ledger.mark_dirty(entity_type, &record.id).await?;
            }
            Resolution::Merge => {
                let local = record.snapshot();
                let snapshot = match merged {
                    Some(fields) => resolver::overlay(&local, &conflict.remote, fields),
                    None => {
                        resolver::resolve(
                            entity_type.descriptor(),
                            &local,
                            &conflict.remote,
                            ConflictStrategy::FieldMerge,
                        )
                        .snapshot
                    }
                };
                self.ledger
                    .apply_merged_record(entity_type, &record.id, &snapshot)
                    .await?;
            }
        }

        if !self
            .ledger
            .mark_conflict_resolved(conflict_id, resolution)
            .await?
        {
            return Err(Error::ConflictAlreadyResolved(conflict_id));
        }
        tracing::info!("Resolved conflict {conflict_id} on {entity_type} {} ({resolution})", record.id);

        self.ledger
            .get_conflict(conflict_id)
            .await?
            .ok_or(Error::ConflictNotFound(conflict_id))
    }
}
