//! Remote backend adapter contract.
//!
//! A backend stores records under its own identifier space. The engines never
//! assume a canonical backend: every mapping and watermark is keyed by
//! [`RemoteBackend::id`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::BackendResult;
use crate::models::{EntityType, Fields, OwnerId, RecordId, RecordSnapshot};

/// Record content sent to a backend on create and update.
///
/// Reference fields already carry the parent's remote id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePayload {
    pub owner_id: OwnerId,
    /// Client-side id, for backends that key records by it
    pub local_id: RecordId,
    pub fields: Fields,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A record as listed by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub remote_id: String,
    pub owner_id: OwnerId,
    pub fields: Fields,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl RemoteRecord {
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Content of this record with the given (translated) fields
    pub const fn snapshot_with(&self, fields: Fields) -> RecordSnapshot {
        RecordSnapshot {
            fields,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

/// Result of an update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The backend no longer has the record
    NotFound,
}

/// A remote store the sync engines can push to and pull from.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Stable identifier of this backend, used to key mappings and watermarks.
    fn id(&self) -> &str;

    /// Whether the backend stores records under the client's own ids.
    fn adopts_local_ids(&self) -> bool {
        false
    }

    /// Cheap reachability probe run before every pass.
    async fn health_check(&self) -> BackendResult<()>;

    /// Create a record and return its remote id.
    async fn create(&self, entity_type: EntityType, payload: &RemotePayload)
        -> BackendResult<String>;

    /// Replace a record's content.
    async fn update(
        &self,
        entity_type: EntityType,
        remote_id: &str,
        payload: &RemotePayload,
    ) -> BackendResult<UpdateOutcome>;

    /// Tombstone a record.
    async fn soft_delete(
        &self,
        entity_type: EntityType,
        remote_id: &str,
        deleted_at: i64,
    ) -> BackendResult<()>;

    /// Records of one owner updated after `since` (all of them when `None`).
    async fn list_since(
        &self,
        entity_type: EntityType,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> BackendResult<Vec<RemoteRecord>>;
}
