//! Migration preview and result models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{EntityType, OwnerId, RecordId};

/// Read-only summary of the offline data an anonymous owner would migrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPreview {
    pub anonymous_owner: OwnerId,
    pub counts: BTreeMap<EntityType, usize>,
    pub total: usize,
}

impl MigrationPreview {
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Outcome of migrating one entity type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMigrationResult {
    pub entity_type: Option<EntityType>,
    /// Records re-pointed to the authenticated owner
    pub reassigned: Vec<RecordId>,
    /// Records confirmed by the remote backend
    pub migrated_records: usize,
    /// Pending conflicts for this type after the push
    pub conflicts: usize,
    pub errors: Vec<String>,
}

impl EntityMigrationResult {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type: Some(entity_type),
            ..Self::default()
        }
    }
}

/// Outcome of one migration attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub success: bool,
    pub migrated_count: usize,
    pub conflict_count: usize,
    pub per_entity: Vec<EntityMigrationResult>,
    pub errors: Vec<String>,
    /// Issues found by post-migration validation
    pub validation_issues: Vec<String>,
    /// Whether unconfirmed records were handed back to the anonymous owner
    pub rolled_back: bool,
}
