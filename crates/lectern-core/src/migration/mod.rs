//! Migration of offline data from an anonymous owner to a signed-in user.
//!
//! A run re-points the anonymous owner's live records, pushes them under the
//! new owner, validates the result and hands unconfirmed records back when
//! something went wrong. Local data is never deleted.

use serde_json::Value;
use tokio::sync::OwnedMutexGuard;

use crate::auth::AuthContext;
use crate::models::{
    EntityMigrationResult, EntityType, MigrationPreview, MigrationResult, OwnerId, RecordId,
};
use crate::sync::{PushEngine, SyncOrchestrator};
use crate::{Error, Result};

/// Moves anonymous data to an authenticated owner through the sync pipeline.
#[derive(Debug, Clone, Copy)]
pub struct MigrationEngine<'a> {
    orchestrator: &'a SyncOrchestrator,
}

impl<'a> MigrationEngine<'a> {
    pub const fn new(orchestrator: &'a SyncOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Count what a migration would move. Read-only.
    pub async fn preview(&self, anonymous: &OwnerId) -> Result<MigrationPreview> {
        let counts = self
            .orchestrator
            .ledger()
            .count_live_by_owner(anonymous)
            .await?;
        let total = counts.values().sum();
        Ok(MigrationPreview {
            anonymous_owner: anonymous.clone(),
            counts,
            total,
        })
    }

    /// Re-point and push every live anonymous record without validating.
    pub async fn migrate(
        &self,
        anonymous: &OwnerId,
        authenticated: &OwnerId,
    ) -> Result<MigrationResult> {
        check_owners(anonymous, authenticated)?;
        let _passes = self.begin_passes(anonymous, authenticated)?;
        Ok(self.migrate_entities(anonymous, authenticated).await)
    }

    /// Migrate, validate and roll back on failure.
    pub async fn run(&self, anonymous: &OwnerId, authenticated: &OwnerId) -> Result<MigrationResult> {
        check_owners(anonymous, authenticated)?;
        let _passes = self.begin_passes(anonymous, authenticated)?;

        let mut result = self.migrate_entities(anonymous, authenticated).await;
        match self.validate(authenticated, anonymous).await {
            Ok(issues) => result.validation_issues = issues,
            Err(error) => result
                .validation_issues
                .push(format!("validation did not complete: {error}")),
        }

        if result.errors.is_empty() && result.validation_issues.is_empty() {
            result.success = true;
            tracing::info!(
                "Migrated {} records from {anonymous} to {authenticated} ({} conflicts)",
                result.migrated_count,
                result.conflict_count
            );
            return Ok(result);
        }

        tracing::warn!(
            "Migration from {anonymous} to {authenticated} incomplete: {} errors, {} validation issues",
            result.errors.len(),
            result.validation_issues.len()
        );
        match self.rollback(&result, anonymous, authenticated).await {
            Ok(restored) => {
                tracing::info!("Returned {restored} unconfirmed records to {anonymous}");
                result.rolled_back = true;
                Ok(result)
            }
            Err(error) if !result.validation_issues.is_empty() => {
                let mut issues = result.validation_issues;
                issues.extend(result.errors);
                Err(Error::MigrationFatal {
                    issues,
                    rollback_error: error.to_string(),
                })
            }
            Err(error) => {
                result.errors.push(error.to_string());
                Ok(result)
            }
        }
    }

    /// Migrate the session's anonymous data once the user is signed in online.
    ///
    /// Returns `None` when there is nothing to migrate.
    pub async fn run_for_session(&self, auth: &dyn AuthContext) -> Result<Option<MigrationResult>> {
        let (Some(anonymous), Some(authenticated)) =
            (auth.anonymous_owner_id(), auth.authenticated_owner_id())
        else {
            return Ok(None);
        };
        if anonymous == authenticated {
            return Ok(None);
        }
        if !auth.is_authenticated_online() {
            return Err(Error::NotAuthenticated);
        }
        if self.preview(&anonymous).await?.is_empty() {
            tracing::debug!("No offline data to migrate for {anonymous}");
            return Ok(None);
        }
        self.run(&anonymous, &authenticated).await.map(Some)
    }

    /// Both owners' records change hands, so neither may sync meanwhile.
    fn begin_passes(
        &self,
        anonymous: &OwnerId,
        authenticated: &OwnerId,
    ) -> Result<(OwnedMutexGuard<()>, OwnedMutexGuard<()>)> {
        let anonymous_pass = self.orchestrator.begin_pass(anonymous)?;
        let authenticated_pass = self.orchestrator.begin_pass(authenticated)?;
        Ok((anonymous_pass, authenticated_pass))
    }

    /// Check the migrated state and describe every problem found.
    pub async fn validate(&self, owner: &OwnerId, anonymous: &OwnerId) -> Result<Vec<String>> {
        let ledger = self.orchestrator.ledger();
        let backend_id = self.orchestrator.active_backend().id();
        let mut issues = Vec::new();

        for entity_type in EntityType::sync_order() {
            let references = entity_type.descriptor().references;
            if !references.is_empty() {
                for record in ledger.list_records(owner, entity_type, false).await? {
                    for reference in references {
                        let Some(Value::String(parent)) = record.fields.get(reference.field) else {
                            continue;
                        };
                        let parent_record = match parent.parse::<RecordId>() {
                            Ok(parent_id) => ledger.get_record(reference.target, &parent_id).await?,
                            Err(_) => None,
                        };
                        let valid = parent_record.is_some_and(|parent_record| {
                            !parent_record.is_deleted() && parent_record.owner_id == *owner
                        });
                        if !valid {
                            issues.push(format!(
                                "{entity_type} {} field {} points to {parent}, which is not a live {} of {owner}",
                                record.id, reference.field, reference.target
                            ));
                        }
                    }
                }
            }

            for (remote_id, count) in ledger.duplicate_remote_ids(entity_type, backend_id).await? {
                issues.push(format!(
                    "{entity_type} remote id {remote_id} is mapped from {count} local records"
                ));
            }

            let left_behind = ledger.count_live(anonymous, entity_type).await?;
            if left_behind > 0 {
                issues.push(format!(
                    "{left_behind} live {entity_type} records still belong to {anonymous}"
                ));
            }
        }

        Ok(issues)
    }

    /// Hand re-pointed records that are still dirty back to the anonymous owner.
    pub async fn rollback(
        &self,
        result: &MigrationResult,
        anonymous: &OwnerId,
        authenticated: &OwnerId,
    ) -> Result<usize> {
        let ledger = self.orchestrator.ledger();
        let mut restored = 0;

        for entity in &result.per_entity {
            let Some(entity_type) = entity.entity_type else {
                continue;
            };
            if entity.reassigned.is_empty() {
                continue;
            }
            restored += ledger
                .restore_owner(entity_type, &entity.reassigned, authenticated, anonymous)
                .await
                .map_err(|error| {
                    Error::MigrationIntegrity(format!("could not restore {entity_type} records: {error}"))
                })?;
        }

        Ok(restored)
    }

    async fn migrate_entities(&self, anonymous: &OwnerId, authenticated: &OwnerId) -> MigrationResult {
        let mut per_entity = Vec::new();
        for entity_type in EntityType::sync_order() {
            per_entity.push(self.migrate_entity(entity_type, anonymous, authenticated).await);
        }

        let errors = per_entity
            .iter()
            .flat_map(|entity| entity.errors.iter().cloned())
            .collect();
        MigrationResult {
            success: false,
            migrated_count: per_entity.iter().map(|entity| entity.migrated_records).sum(),
            conflict_count: per_entity.iter().map(|entity| entity.conflicts).sum(),
            per_entity,
            errors,
            validation_issues: Vec::new(),
            rolled_back: false,
        }
    }

    async fn migrate_entity(
        &self,
        entity_type: EntityType,
        anonymous: &OwnerId,
        authenticated: &OwnerId,
    ) -> EntityMigrationResult {
        let ledger = self.orchestrator.ledger();
        let mut result = EntityMigrationResult::new(entity_type);

        result.reassigned = match ledger
            .reassign_owner(entity_type, anonymous, authenticated)
            .await
        {
            Ok(ids) => ids,
            Err(error) => {
                result.errors.push(format!("{entity_type}: {error}"));
                return result;
            }
        };
        tracing::debug!(
            "Re-pointed {} {entity_type} records to {authenticated}",
            result.reassigned.len()
        );

        let push = PushEngine::new(
            ledger,
            self.orchestrator.active_backend().as_ref(),
            self.orchestrator.config(),
        );
        match push.push(authenticated, entity_type).await {
            Ok(report) => result.errors.extend(report.errors.iter().map(|error| {
                let id = error
                    .record_id
                    .map_or_else(String::new, |id| format!(" {id}"));
                format!("{entity_type}{id}: {}", error.message)
            })),
            Err(error) => result.errors.push(format!("{entity_type}: {error}")),
        }

        for id in &result.reassigned {
            match ledger.get_record(entity_type, id).await {
                Ok(Some(record)) if !record.dirty => result.migrated_records += 1,
                Ok(_) => {}
                Err(error) => result.errors.push(format!("{entity_type} {id}: {error}")),
            }
        }

        match ledger.count_pending_conflicts(authenticated, entity_type).await {
            Ok(count) => result.conflicts = count,
            Err(error) => result.errors.push(format!("{entity_type}: {error}")),
        }

        result
    }
}

fn check_owners(anonymous: &OwnerId, authenticated: &OwnerId) -> Result<()> {
    if anonymous == authenticated {
        return Err(Error::InvalidInput(format!(
            "Cannot migrate {anonymous} onto itself"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::auth::{Connectivity, SessionState};
    use crate::models::{Series, Sermon};
    use crate::services::Ledger;
    use crate::sync::{BackendError, MemoryBackend, RetryPolicy, SyncConfig};

    struct Setup {
        ledger: Ledger,
        backend: Arc<MemoryBackend>,
        orchestrator: SyncOrchestrator,
        anonymous: OwnerId,
        user: OwnerId,
    }

    fn setup() -> Setup {
        let ledger = Ledger::open_in_memory().unwrap();
        let backend = Arc::new(MemoryBackend::new("rt"));
        let config = SyncConfig::new().with_retry(RetryPolicy::no_retry());
        let orchestrator = SyncOrchestrator::new(ledger.clone(), backend.clone(), config);
        Setup {
            ledger,
            backend,
            orchestrator,
            anonymous: OwnerId::new("anon-device"),
            user: OwnerId::new("user-1"),
        }
    }

    async fn seed(s: &Setup) -> (Series, Sermon) {
        let series = Series::new("Offline series").with_tags(["draft"]);
        let sermon = Sermon::new("Offline sermon")
            .with_content("Notes #hope")
            .in_series(series.id);
        s.ledger.create(&s.anonymous, &series).await.unwrap();
        s.ledger.create(&s.anonymous, &sermon).await.unwrap();
        (series, sermon)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn preview_counts_without_changes() {
        let s = setup();
        seed(&s).await;
        let before = s
            .ledger
            .list_records(&s.anonymous, EntityType::Series, true)
            .await
            .unwrap();

        let preview = MigrationEngine::new(&s.orchestrator)
            .preview(&s.anonymous)
            .await
            .unwrap();

        assert_eq!(preview.total, 2);
        assert_eq!(preview.counts[&EntityType::Series], 1);
        assert_eq!(preview.counts[&EntityType::Sermon], 1);
        assert_eq!(
            s.ledger
                .list_records(&s.anonymous, EntityType::Series, true)
                .await
                .unwrap(),
            before
        );
        assert_eq!(s.backend.write_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_moves_records_to_user_and_pushes_them() {
        let s = setup();
        let (series, sermon) = seed(&s).await;

        let result = MigrationEngine::new(&s.orchestrator)
            .run(&s.anonymous, &s.user)
            .await
            .unwrap();

        assert!(result.success, "{result:?}");
        assert_eq!(result.migrated_count, 2);
        assert_eq!(result.conflict_count, 0);
        assert!(!result.rolled_back);

        let moved = s.ledger.get_record(EntityType::Sermon, &sermon.id).await.unwrap().unwrap();
        assert_eq!(moved.owner_id, s.user);
        assert!(!moved.dirty);

        let series_remote = s
            .ledger
            .resolve_remote_id(&series.id, EntityType::Series, "rt")
            .await
            .unwrap()
            .unwrap();
        let remote_sermons = s.backend.records(EntityType::Sermon);
        let remote_sermon = &remote_sermons[0];
        assert_eq!(remote_sermon.owner_id, s.user);
        assert_eq!(remote_sermon.fields["series_id"], series_remote.as_str());
        assert_eq!(s.ledger.count_live(&s.anonymous, EntityType::Series).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_migration_rolls_back_without_losing_data() {
        let s = setup();
        let (series, sermon) = seed(&s).await;
        let original_series = s.ledger.get::<Series>(&series.id).await.unwrap().unwrap();
        let original_sermon = s.ledger.get::<Sermon>(&sermon.id).await.unwrap().unwrap();
        s.backend
            .fail_record(series.id, BackendError::Validation("rejected".into()));

        let result = MigrationEngine::new(&s.orchestrator)
            .run(&s.anonymous, &s.user)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.rolled_back);
        assert_eq!(result.per_entity.len(), 2);
        assert!(result.per_entity.iter().all(|entity| !entity.errors.is_empty()));

        for (entity_type, id) in [(EntityType::Series, series.id), (EntityType::Sermon, sermon.id)] {
            let record = s.ledger.get_record(entity_type, &id).await.unwrap().unwrap();
            assert_eq!(record.owner_id, s.anonymous);
            assert!(record.dirty);
        }
        assert_eq!(
            s.ledger.get::<Series>(&series.id).await.unwrap().unwrap(),
            original_series
        );
        assert_eq!(
            s.ledger.get::<Sermon>(&sermon.id).await.unwrap().unwrap(),
            original_sermon
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tombstones_stay_with_anonymous_owner() {
        let s = setup();
        let kept = Series::new("Kept");
        let dropped = Series::new("Dropped");
        s.ledger.create(&s.anonymous, &kept).await.unwrap();
        s.ledger.create(&s.anonymous, &dropped).await.unwrap();
        s.ledger
            .soft_delete_record(&s.anonymous, EntityType::Series, &dropped.id)
            .await
            .unwrap();

        let result = MigrationEngine::new(&s.orchestrator)
            .run(&s.anonymous, &s.user)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.per_entity[0].reassigned, vec![kept.id]);
        let tombstone = s
            .ledger
            .get_record(EntityType::Series, &dropped.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tombstone.owner_id, s.anonymous);
        assert_eq!(s.backend.calls(crate::sync::Operation::Delete), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn validate_reports_broken_references_and_leftovers() {
        let s = setup();
        let series = Series::new("Still anonymous");
        s.ledger.create(&s.anonymous, &series).await.unwrap();
        s.ledger
            .create(&s.user, &Sermon::new("Dangling").in_series(series.id))
            .await
            .unwrap();

        let issues = MigrationEngine::new(&s.orchestrator)
            .validate(&s.user, &s.anonymous)
            .await
            .unwrap();

        assert_eq!(issues.len(), 2, "{issues:?}");
        assert!(issues[0].contains("still belong to anon-device"));
        assert!(issues[1].contains("series_id"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_for_session_needs_anonymous_data_and_online_user() {
        let s = setup();
        seed(&s).await;
        let engine = MigrationEngine::new(&s.orchestrator);

        let anonymous_only = SessionState::anonymous(s.anonymous.clone());
        assert!(engine.run_for_session(&anonymous_only).await.unwrap().is_none());

        let offline = SessionState::authenticated(
            Some(s.anonymous.clone()),
            s.user.clone(),
            Connectivity::Offline,
        );
        assert!(matches!(
            engine.run_for_session(&offline).await,
            Err(Error::NotAuthenticated)
        ));

        let online = SessionState::authenticated(
            Some(s.anonymous.clone()),
            s.user.clone(),
            Connectivity::Online,
        );
        let result = engine.run_for_session(&online).await.unwrap().unwrap();
        assert!(result.success);

        // Nothing left the second time
        assert!(engine.run_for_session(&online).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migration_waits_for_either_owner_to_finish_syncing() {
        let s = setup();
        let (series, _) = seed(&s).await;
        let engine = MigrationEngine::new(&s.orchestrator);

        let anonymous_pass = s.orchestrator.begin_pass(&s.anonymous).unwrap();
        let blocked = engine.run(&s.anonymous, &s.user).await;
        assert!(matches!(blocked, Err(Error::SyncInProgress(_))));
        let blocked = engine.migrate(&s.anonymous, &s.user).await;
        assert!(matches!(blocked, Err(Error::SyncInProgress(_))));
        drop(anonymous_pass);

        let user_pass = s.orchestrator.begin_pass(&s.user).unwrap();
        let blocked = engine.run(&s.anonymous, &s.user).await;
        assert!(matches!(blocked, Err(Error::SyncInProgress(_))));
        drop(user_pass);

        let untouched = s
            .ledger
            .get_record(EntityType::Series, &series.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.owner_id, s.anonymous);
        assert_eq!(s.backend.write_calls(), 0);

        let result = engine.run(&s.anonymous, &s.user).await.unwrap();
        assert!(result.success);
        assert!(s.orchestrator.begin_pass(&s.anonymous).is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migrating_onto_same_owner_is_rejected() {
        let s = setup();
        let result = MigrationEngine::new(&s.orchestrator)
            .run(&s.user, &s.user)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
