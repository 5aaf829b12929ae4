//! Pull engine: merges remote changes since the watermark into the ledger.

use serde_json::Value;

use super::backend::{RemoteBackend, RemoteRecord};
use super::config::SyncConfig;
use super::report::{PullReport, RecordError};
use super::resolver::{diff_fields, is_auto_resolvable, resolve};
use crate::db::NewConflict;
use crate::models::{
    EntityType, Fields, OwnerId, RecordId, RecordSnapshot, Resolution, SyncRecord,
};
use crate::services::Ledger;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeOutcome {
    Inserted,
    Updated,
    Unchanged,
    Skipped,
    Converged,
    AutoResolved,
    PendingConflict,
}

/// Whether `snapshot` carries the local record's content and deletion state.
fn same_content(local: &SyncRecord, snapshot: &RecordSnapshot) -> bool {
    local.fields == snapshot.fields && local.is_deleted() == snapshot.deleted_at.is_some()
}

/// Pulls one owner's remote changes of one entity type.
pub struct PullEngine<'a> {
    ledger: &'a Ledger,
    backend: &'a dyn RemoteBackend,
    config: &'a SyncConfig,
}

impl<'a> PullEngine<'a> {
    pub const fn new(
        ledger: &'a Ledger,
        backend: &'a dyn RemoteBackend,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            ledger,
            backend,
            config,
        }
    }

    /// Fetch records updated after the watermark and merge them.
    pub async fn pull(&self, owner: &OwnerId, entity_type: EntityType) -> Result<PullReport> {
        let backend = self.backend;
        let since = self
            .ledger
            .watermark(entity_type, owner, backend.id())
            .await?;

        match self
            .config
            .call(move || backend.list_since(entity_type, owner, since))
            .await
        {
            Ok(records) => self.merge_batch(owner, entity_type, &records).await,
            Err(error) => {
                tracing::warn!("Failed to list {entity_type} from {}: {error}", backend.id());
                Ok(PullReport {
                    errors: vec![RecordError::new(entity_type, None, &error.into())],
                    ..PullReport::default()
                })
            }
        }
    }

    /// Merge a fetched batch. The watermark advances only if every record merged.
    pub async fn merge_batch(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        records: &[RemoteRecord],
    ) -> Result<PullReport> {
        let mut report = PullReport {
            fetched: records.len(),
            ..PullReport::default()
        };
        let mut all_merged = true;

        for remote in records {
            match self.merge_record(owner, entity_type, remote).await {
                Ok(outcome) => match outcome {
                    MergeOutcome::Inserted => report.inserted += 1,
                    MergeOutcome::Updated => report.updated += 1,
                    MergeOutcome::Unchanged => report.unchanged += 1,
                    MergeOutcome::Skipped => report.skipped += 1,
                    MergeOutcome::Converged => report.converged += 1,
                    MergeOutcome::AutoResolved => report.auto_resolved += 1,
                    MergeOutcome::PendingConflict => report.pending_conflicts += 1,
                },
                Err(error) => {
                    all_merged = false;
                    tracing::warn!(
                        "Failed to merge {entity_type} {}: {error}",
                        remote.remote_id
                    );
                    let mut failure = RecordError::new(entity_type, None, &error);
                    failure.message = format!("remote {}: {}", remote.remote_id, failure.message);
                    report.errors.push(failure);
                }
            }
        }

        let newest = records.iter().map(|record| record.updated_at).max();
        match newest {
            Some(newest) if all_merged => {
                self.ledger
                    .advance_watermark(entity_type, owner, self.backend.id(), newest)
                    .await?;
                report.watermark = Some(newest);
            }
            Some(_) => tracing::debug!("Holding {entity_type} watermark after merge failures"),
            None => {}
        }

        Ok(report)
    }

    async fn merge_record(
        &self,
        owner: &OwnerId,
        entity_type: EntityType,
        remote: &RemoteRecord,
    ) -> Result<MergeOutcome> {
        if remote.owner_id != *owner {
            return Err(Error::InvalidInput(format!(
                "remote {} belongs to owner {}",
                remote.remote_id, remote.owner_id
            )));
        }

        let backend_id = self.backend.id();
        let fields = self.localize_references(entity_type, &remote.fields).await?;
        let remote_snapshot = remote.snapshot_with(fields);

        let Some(local) = self.find_local(entity_type, remote).await? else {
            if remote.is_deleted() {
                tracing::debug!("Skipping remote tombstone {} for unknown record", remote.remote_id);
                return Ok(MergeOutcome::Skipped);
            }
            let id = self.new_local_id(entity_type, remote).await?;
            self.ledger
                .insert_remote_record(
                    owner,
                    entity_type,
                    &id,
                    &remote_snapshot,
                    &remote.remote_id,
                    backend_id,
                )
                .await?;
            return Ok(MergeOutcome::Inserted);
        };

        // Left to the migration that owns it
        if local.owner_id != *owner {
            tracing::warn!(
                "Skipping remote {}: {entity_type} {} belongs to owner {}",
                remote.remote_id,
                local.id,
                local.owner_id
            );
            return Ok(MergeOutcome::Skipped);
        }

        if !local.dirty {
            if remote.updated_at <= local.updated_at || same_content(&local, &remote_snapshot) {
                return Ok(MergeOutcome::Unchanged);
            }
            self.ledger
                .apply_remote_record(&local.owner_id, entity_type, &local.id, &remote_snapshot)
                .await?;
            return Ok(MergeOutcome::Updated);
        }

        let descriptor = entity_type.descriptor();
        let local_snapshot = local.snapshot();
        let conflict_fields = diff_fields(descriptor, &local_snapshot, &remote_snapshot);
        let pending = self
            .ledger
            .pending_conflict_for(entity_type, &local.id, backend_id)
            .await?;

        if conflict_fields.is_empty() {
            self.ledger
                .apply_remote_record(&local.owner_id, entity_type, &local.id, &remote_snapshot)
                .await?;
            if let Some(stale) = pending {
                self.ledger
                    .mark_conflict_resolved(stale.id, Resolution::KeepRemote)
                    .await?;
            }
            return Ok(MergeOutcome::Converged);
        }

        let conflict = NewConflict {
            entity_type,
            record_id: local.id,
            owner_id: local.owner_id.clone(),
            backend_id: backend_id.to_string(),
            local: local_snapshot,
            remote: remote_snapshot,
            conflict_fields,
            detected_at: self.ledger.now(),
        };

        if pending.is_none()
            && is_auto_resolvable(&conflict.conflict_fields, self.config.auto_resolve_max_fields)
        {
            let resolved = resolve(
                descriptor,
                &conflict.local,
                &conflict.remote,
                self.config.strategy,
            );
            if same_content(&local, &resolved.snapshot)
                && self.already_resolved(&conflict).await?
            {
                tracing::debug!(
                    "Remote {} for {entity_type} {} was already resolved",
                    remote.remote_id,
                    local.id
                );
                return Ok(MergeOutcome::Unchanged);
            }
            self.apply_resolution(&local, resolved.resolution, &resolved.snapshot)
                .await?;
            self.ledger
                .record_resolved_conflict(&conflict, resolved.resolution)
                .await?;
            tracing::debug!(
                "Auto-resolved {entity_type} {} ({}) on {:?}",
                local.id,
                resolved.resolution,
                conflict.conflict_fields
            );
            return Ok(MergeOutcome::AutoResolved);
        }

        let stored = self.ledger.upsert_pending_conflict(&conflict).await?;
        tracing::info!(
            "Conflict {} on {entity_type} {} needs review ({:?})",
            stored.id,
            local.id,
            stored.conflict_fields
        );
        Ok(MergeOutcome::PendingConflict)
    }

    async fn apply_resolution(
        &self,
        local: &SyncRecord,
        resolution: Resolution,
        snapshot: &RecordSnapshot,
    ) -> Result<()> {
        match resolution {
            Resolution::KeepRemote => {
                self.ledger
                    .apply_remote_record(&local.owner_id, local.entity_type, &local.id, snapshot)
                    .await?;
            }
            // Already dirty, the next push sends it
            Resolution::KeepLocal => {}
            Resolution::Merge => {
                self.ledger
                    .apply_merged_record(local.entity_type, &local.id, snapshot)
                    .await?;
            }
        }
        Ok(())
    }

    /// Whether the latest resolution for this record saw the same remote content.
    async fn already_resolved(&self, conflict: &NewConflict) -> Result<bool> {
        let latest = self
            .ledger
            .latest_resolved_conflict_for(
                conflict.entity_type,
                &conflict.record_id,
                &conflict.backend_id,
            )
            .await?;
        Ok(latest.is_some_and(|previous| previous.remote == conflict.remote))
    }

    async fn find_local(
        &self,
        entity_type: EntityType,
        remote: &RemoteRecord,
    ) -> Result<Option<SyncRecord>> {
        let backend_id = self.backend.id();
        if let Some(id) = self
            .ledger
            .resolve_local_id(&remote.remote_id, entity_type, backend_id)
            .await?
        {
            if let Some(record) = self.ledger.get_record(entity_type, &id).await? {
                return Ok(Some(record));
            }
        }

        if !self.backend.adopts_local_ids() {
            return Ok(None);
        }
        let Ok(id) = remote.remote_id.parse::<RecordId>() else {
            return Ok(None);
        };
        let record = self.ledger.get_record(entity_type, &id).await?;
        if record.is_some() {
            self.ledger
                .save_mapping(&id, &remote.remote_id, entity_type, backend_id)
                .await?;
        }
        Ok(record)
    }

    async fn new_local_id(&self, entity_type: EntityType, remote: &RemoteRecord) -> Result<RecordId> {
        if let Some(id) = self
            .ledger
            .resolve_local_id(&remote.remote_id, entity_type, self.backend.id())
            .await?
        {
            return Ok(id);
        }
        if self.backend.adopts_local_ids() {
            if let Ok(id) = remote.remote_id.parse::<RecordId>() {
                return Ok(id);
            }
        }
        Ok(RecordId::new())
    }

    /// Remote fields with references translated to local ids.
    async fn localize_references(&self, entity_type: EntityType, fields: &Fields) -> Result<Fields> {
        let backend_id = self.backend.id();
        let mut fields = fields.clone();

        for reference in entity_type.descriptor().references {
            let Some(Value::String(remote_parent)) = fields.get(reference.field).cloned() else {
                continue;
            };

            let mut local_parent = self
                .ledger
                .resolve_local_id(&remote_parent, reference.target, backend_id)
                .await?;
            if local_parent.is_none() && self.backend.adopts_local_ids() {
                if let Ok(id) = remote_parent.parse::<RecordId>() {
                    if self.ledger.get_record(reference.target, &id).await?.is_some() {
                        local_parent = Some(id);
                    }
                }
            }

            let value = match local_parent {
                Some(id) => Value::String(id.as_str()),
                None => {
                    tracing::warn!(
                        "{entity_type} field {} references unknown {} {remote_parent}, clearing it",
                        reference.field,
                        reference.target
                    );
                    Value::Null
                }
            };
            fields.insert(reference.field.to_string(), value);
        }

        Ok(fields)
    }
}
