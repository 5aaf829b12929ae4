//! Push engine: drains dirty ledger records to one backend.
//!
//! Records are pushed independently; a failure is recorded against its record,
//! which stays dirty for the next pass.

use futures::stream::{self, StreamExt};
use serde_json::Value;

use super::backend::{RemoteBackend, RemotePayload, UpdateOutcome};
use super::config::SyncConfig;
use super::error::BackendError;
use super::report::{PushReport, RecordError};
use crate::models::{EntityType, OwnerId, PendingOp, RecordId, SyncRecord};
use crate::services::Ledger;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Created,
    Updated,
    Recreated,
    Deleted,
    Purged,
}

/// Pushes one owner's dirty records of one entity type.
pub struct PushEngine<'a> {
    ledger: &'a Ledger,
    backend: &'a dyn RemoteBackend,
    config: &'a SyncConfig,
}

impl<'a> PushEngine<'a> {
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

    /// Push every dirty record of `entity_type` owned by `owner`.
    pub async fn push(&self, owner: &OwnerId, entity_type: EntityType) -> Result<PushReport> {
        let backend_id = self.backend.id();
        let mut report = PushReport::default();

        let mut ready = Vec::new();
        for record in self.ledger.list_dirty(owner, entity_type).await? {
            if self
                .ledger
                .has_pending_conflict(entity_type, &record.id, backend_id)
                .await?
            {
                tracing::debug!("Holding back {entity_type} {} with a pending conflict", record.id);
                report.skipped_conflicts += 1;
            } else {
                ready.push(record);
            }
        }
        report.attempted = ready.len();

        let engine = self;
        let results: Vec<(RecordId, Result<(PushOutcome, bool)>)> = stream::iter(ready)
            .map(move |record| async move {
                let result = engine.push_record(entity_type, &record).await;
                (record.id, result)
            })
            .buffer_unordered(self.config.push_concurrency.max(1))
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok((outcome, confirmed)) => {
                    match outcome {
                        PushOutcome::Created => report.created += 1,
                        PushOutcome::Updated => report.updated += 1,
                        PushOutcome::Recreated => report.recreated += 1,
                        PushOutcome::Deleted => report.deleted += 1,
                        PushOutcome::Purged => report.purged += 1,
                    }
                    if !confirmed {
                        report.superseded += 1;
                    }
                }
                Err(error) => {
                    tracing::warn!("Failed to push {entity_type} {id} to {backend_id}: {error}");
                    report
                        .errors
                        .push(RecordError::new(entity_type, Some(id), &error));
                }
            }
        }

        Ok(report)
    }

    /// Push one record. The flag is false when a newer local edit kept it dirty.
    async fn push_record(
        &self,
        entity_type: EntityType,
        record: &SyncRecord,
    ) -> Result<(PushOutcome, bool)> {
        let backend_id = self.backend.id();
        let remote_id = self
            .ledger
            .resolve_remote_id(&record.id, entity_type, backend_id)
            .await?;

        let outcome = if record.op == PendingOp::Delete || record.is_deleted() {
            let deleted_at = record.deleted_at.unwrap_or(record.updated_at);
            match remote_id {
                Some(remote_id) => self.send_delete(entity_type, &remote_id, deleted_at).await?,
                None if record.synced_at.is_none() => {
                    if !self
                        .ledger
                        .purge_unsynced_tombstone(entity_type, &record.id)
                        .await?
                    {
                        tracing::warn!("Tombstone {entity_type} {} was not purged", record.id);
                    }
                    tracing::debug!("Purged unsynced {entity_type} {}", record.id);
                    return Ok((PushOutcome::Purged, true));
                }
                None => {
                    self.send_delete(entity_type, &record.id.as_str(), deleted_at)
                        .await?;
                }
            }
            PushOutcome::Deleted
        } else {
            let payload = self.payload(entity_type, record).await?;
            match remote_id {
                None => {
                    self.create(entity_type, record, &payload).await?;
                    PushOutcome::Created
                }
                Some(remote_id) => {
                    let backend = self.backend;
                    let (target, body) = (remote_id.as_str(), &payload);
                    let outcome = self
                        .config
                        .call(move || backend.update(entity_type, target, body))
                        .await?;
                    if outcome == UpdateOutcome::NotFound {
                        tracing::warn!(
                            "{entity_type} {} is gone from {backend_id}, creating it again",
                            record.id
                        );
                        self.create(entity_type, record, &payload).await?;
                        PushOutcome::Recreated
                    } else {
                        PushOutcome::Updated
                    }
                }
            }
        };

        let confirmed = self
            .ledger
            .mark_synced(entity_type, &record.id, record.version)
            .await?;
        tracing::debug!("Pushed {entity_type} {} ({outcome:?})", record.id);
        Ok((outcome, confirmed))
    }

    async fn create(
        &self,
        entity_type: EntityType,
        record: &SyncRecord,
        payload: &RemotePayload,
    ) -> Result<()> {
        let backend = self.backend;
        let remote_id = self
            .config
            .call(move || backend.create(entity_type, payload))
            .await?;
        self.ledger
            .save_mapping(&record.id, &remote_id, entity_type, backend.id())
            .await
    }

    async fn send_delete(
        &self,
        entity_type: EntityType,
        remote_id: &str,
        deleted_at: i64,
    ) -> Result<()> {
        let backend = self.backend;
        match self
            .config
            .call(move || backend.soft_delete(entity_type, remote_id, deleted_at))
            .await
        {
            Ok(()) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Record content with references translated to the parents' remote ids.
    async fn payload(&self, entity_type: EntityType, record: &SyncRecord) -> Result<RemotePayload> {
        let backend_id = self.backend.id();
        let mut fields = record.fields.clone();

        for reference in entity_type.descriptor().references {
            let Some(Value::String(parent)) = fields.get(reference.field).cloned() else {
                continue;
            };
            let parent_id: RecordId = parent.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "{entity_type} {} has invalid {}: {parent}",
                    record.id, reference.field
                ))
            })?;

            if let Some(remote_parent) = self
                .ledger
                .resolve_remote_id(&parent_id, reference.target, backend_id)
                .await?
            {
                fields.insert(reference.field.to_string(), Value::String(remote_parent));
                continue;
            }

            let parent_live = self
                .ledger
                .get_record(reference.target, &parent_id)
                .await?
                .is_some_and(|parent| !parent.is_deleted());
            if parent_live {
                return Err(Error::MissingParent {
                    entity_type,
                    field: reference.field.to_string(),
                    parent_id: parent,
                });
            }

            tracing::warn!(
                "{entity_type} {} references deleted {} {parent_id}, sending without it",
                record.id,
                reference.target
            );
            fields.insert(reference.field.to_string(), Value::Null);
        }

        Ok(RemotePayload {
            owner_id: record.owner_id.clone(),
            local_id: record.id,
            fields,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
