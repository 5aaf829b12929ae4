//! Error types for lectern-core

use thiserror::Error;

use crate::models::EntityType;
use crate::sync::BackendError;

/// Result type alias using lectern-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lectern-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote backend error that aborted an operation
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A referenced parent has no remote identity yet
    #[error("{entity_type} field {field} references {parent_id}, which is not synced yet")]
    MissingParent {
        entity_type: EntityType,
        field: String,
        parent_id: String,
    },

    /// A sync pass is already running for this owner
    #[error("Sync already in progress for owner {0}")]
    SyncInProgress(String),

    /// Sync requested without an online authenticated session
    #[error("Not authenticated online")]
    NotAuthenticated,

    /// Conflict lookup failed
    #[error("Conflict not found: {0}")]
    ConflictNotFound(i64),

    /// Conflict was already resolved
    #[error("Conflict {0} is already resolved")]
    ConflictAlreadyResolved(i64),

    /// Migration left the ledger in an inconsistent state
    #[error("Migration integrity error: {0}")]
    MigrationIntegrity(String),

    /// Migration failed validation and the rollback failed too
    #[error("Migration failed and rollback did not complete: {issues:?}; rollback error: {rollback_error}")]
    MigrationFatal {
        /// Validation issues and per-entity errors reported by the migration
        issues: Vec<String>,
        /// Why the rollback failed
        rollback_error: String,
    },
}
