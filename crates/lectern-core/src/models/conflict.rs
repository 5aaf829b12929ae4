//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{EntityType, OwnerId, RecordId, RecordSnapshot};

/// How a conflict was (or should be) resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    Merge,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_local" | "local" => Ok(Self::KeepLocal),
            "keep_remote" | "remote" => Ok(Self::KeepRemote),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// Automatic conflict resolution policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Later `updated_at` wins outright, ties keep local
    #[default]
    NewestWins,
    /// Local record always wins
    LocalWins,
    /// Remote record always wins
    RemoteWins,
    /// Per-field newest value, list fields unioned
    FieldMerge,
}

impl ConflictStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewestWins => "newest_wins",
            Self::LocalWins => "local_wins",
            Self::RemoteWins => "remote_wins",
            Self::FieldMerge => "field_merge",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "newest_wins" | "lww" => Ok(Self::NewestWins),
            "local_wins" => Ok(Self::LocalWins),
            "remote_wins" => Ok(Self::RemoteWins),
            "field_merge" | "merge" => Ok(Self::FieldMerge),
            other => Err(format!("unknown conflict strategy: {other}")),
        }
    }
}

/// Divergence between local and remote state for the same record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflict row identifier
    pub id: i64,
    pub entity_type: EntityType,
    /// Local record involved in the conflict
    pub record_id: RecordId,
    pub owner_id: OwnerId,
    /// Backend the remote side came from
    pub backend_id: String,
    /// Local side when the conflict was detected
    pub local: RecordSnapshot,
    /// Remote side, references already translated to local ids
    pub remote: RecordSnapshot,
    /// Names of the differing fields
    pub conflict_fields: Vec<String>,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
    pub resolved: bool,
    pub resolution: Option<Resolution>,
    /// Resolution timestamp (unix ms)
    pub resolved_at: Option<i64>,
}
