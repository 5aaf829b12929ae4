//! Sync pass reports.

use serde::{Deserialize, Serialize};

use crate::models::{EntityType, OwnerId, RecordId};
use crate::Error;

/// A failure recorded against one record (or a whole entity type when `record_id` is `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub entity_type: EntityType,
    pub record_id: Option<RecordId>,
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl RecordError {
    pub fn new(entity_type: EntityType, record_id: Option<RecordId>, error: &Error) -> Self {
        let (kind, retryable) = match error {
            Error::Backend(backend) => (backend.kind(), backend.is_retryable()),
            Error::MissingParent { .. } => ("missing_parent", true),
            Error::Sqlite(_) | Error::Database(_) => ("ledger", false),
            Error::Serialization(_) => ("serialization", false),
            _ => ("other", false),
        };
        Self {
            entity_type,
            record_id,
            kind: kind.to_string(),
            message: error.to_string(),
            retryable,
        }
    }
}

/// Push results for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    /// Dirty records considered
    pub attempted: usize,
    pub created: usize,
    pub updated: usize,
    /// Updates that found the remote record gone and created it again
    pub recreated: usize,
    pub deleted: usize,
    /// Tombstones dropped without a network call
    pub purged: usize,
    /// Records held back by a pending conflict
    pub skipped_conflicts: usize,
    /// Confirmed remotely but edited again meanwhile, so still dirty
    pub superseded: usize,
    pub errors: Vec<RecordError>,
}

impl PushReport {
    /// Records confirmed by the backend.
    pub const fn confirmed(&self) -> usize {
        self.created + self.updated + self.recreated + self.deleted
    }
}

/// Pull results for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReport {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Remote tombstones for records this device never had
    pub skipped: usize,
    /// Dirty records that already matched the remote
    pub converged: usize,
    pub auto_resolved: usize,
    pub pending_conflicts: usize,
    pub errors: Vec<RecordError>,
    /// New watermark, when it advanced
    pub watermark: Option<i64>,
}

/// Push and pull results for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySyncReport {
    pub entity_type: EntityType,
    pub push: PushReport,
    pub pull: PullReport,
}

/// Results of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub owner_id: OwnerId,
    pub backend_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub entities: Vec<EntitySyncReport>,
}

impl SyncReport {
    pub fn pushed(&self) -> usize {
        self.entities.iter().map(|entity| entity.push.confirmed()).sum()
    }

    pub fn pulled(&self) -> usize {
        self.entities
            .iter()
            .map(|entity| entity.pull.inserted + entity.pull.updated)
            .sum()
    }

    pub fn auto_resolved(&self) -> usize {
        self.entities.iter().map(|entity| entity.pull.auto_resolved).sum()
    }

    pub fn pending_conflicts(&self) -> usize {
        self.entities
            .iter()
            .map(|entity| entity.pull.pending_conflicts)
            .sum()
    }

    /// Every error from push and pull, in entity order.
    pub fn errors(&self) -> impl Iterator<Item = &RecordError> {
        self.entities
            .iter()
            .flat_map(|entity| entity.push.errors.iter().chain(entity.pull.errors.iter()))
    }

    /// No errors and nothing waiting for the user.
    pub fn is_clean(&self) -> bool {
        self.errors().next().is_none() && self.pending_conflicts() == 0
    }

    pub fn entity(&self, entity_type: EntityType) -> Option<&EntitySyncReport> {
        self.entities
            .iter()
            .find(|entity| entity.entity_type == entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::BackendError;

    #[test]
    fn record_error_classifies_backend_errors() {
        let error = Error::Backend(BackendError::Timeout);
        let record = RecordError::new(EntityType::Series, Some(RecordId::new()), &error);
        assert_eq!(record.kind, "timeout");
        assert!(record.retryable);

        let error = Error::MissingParent {
            entity_type: EntityType::Sermon,
            field: "series_id".to_string(),
            parent_id: "abc".to_string(),
        };
        let record = RecordError::new(EntityType::Sermon, None, &error);
        assert_eq!(record.kind, "missing_parent");
        assert!(record.retryable);
    }

    #[test]
    fn report_totals() {
        let mut series = EntitySyncReport {
            entity_type: EntityType::Series,
            push: PushReport::default(),
            pull: PullReport::default(),
        };
        series.push.created = 2;
        series.push.deleted = 1;
        series.pull.inserted = 3;
        series.pull.pending_conflicts = 1;

        let report = SyncReport {
            owner_id: OwnerId::new("user-1"),
            backend_id: "rt".to_string(),
            started_at: 0,
            finished_at: 1,
            entities: vec![series],
        };

        assert_eq!(report.pushed(), 3);
        assert_eq!(report.pulled(), 3);
        assert!(!report.is_clean());
        assert!(report.entity(EntityType::Sermon).is_none());
    }
}
