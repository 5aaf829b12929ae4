//! Syncable record model shared by every entity type

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::EntityType;

/// Domain fields of a record, keyed by the entity descriptor's field names
pub type Fields = Map<String, Value>;

/// A locally generated record identifier, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The user scope a record belongs to (anonymous device id or account id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an owner identifier
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh anonymous owner id for an offline-only device
    #[must_use]
    pub fn anonymous() -> Self {
        Self(format!("anon-{}", Uuid::now_v7()))
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Pending action to replay remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOp {
    Upsert,
    Delete,
}

impl PendingOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for PendingOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown pending op: {other}")),
        }
    }
}

/// A record as stored in the local ledger, with its sync metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Locally generated identifier
    pub id: RecordId,
    /// Entity type this record belongs to
    pub entity_type: EntityType,
    /// Owning user scope
    pub owner_id: OwnerId,
    /// Domain fields
    pub fields: Fields,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last mutation timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete timestamp (Unix ms)
    pub deleted_at: Option<i64>,
    /// Local state not yet confirmed remotely
    pub dirty: bool,
    /// Pending remote action
    pub op: PendingOp,
    /// Local change counter
    pub version: i64,
    /// Last remote confirmation (Unix ms)
    pub synced_at: Option<i64>,
}

impl SyncRecord {
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the record still has an unsynced tombstone
    pub fn has_pending_delete(&self) -> bool {
        self.dirty && self.op == PendingOp::Delete
    }

    /// The mergeable part of the record
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            fields: self.fields.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }

    /// Read a text field
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// The content of one side of a record: fields plus timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub fields: Fields,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_unique_and_parseable() {
        let id1 = RecordId::new();
        let id2 = RecordId::new();
        assert_ne!(id1, id2);

        let parsed: RecordId = id1.as_str().parse().unwrap();
        assert_eq!(id1, parsed);
    }

    #[test]
    fn anonymous_owner_ids_are_prefixed() {
        let owner = OwnerId::anonymous();
        assert!(owner.as_str().starts_with("anon-"));
        assert_ne!(owner, OwnerId::anonymous());
    }

    #[test]
    fn pending_op_parse() {
        assert_eq!("upsert".parse::<PendingOp>(), Ok(PendingOp::Upsert));
        assert_eq!("delete".parse::<PendingOp>(), Ok(PendingOp::Delete));
        assert!("drop".parse::<PendingOp>().is_err());
    }
}
