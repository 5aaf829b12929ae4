use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] lectern_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Title cannot be empty")]
    EmptyTitle,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Nothing to change; pass at least one field flag")]
    NothingToEdit,
    #[error("{entity} not found for id/prefix: {query}")]
    RecordNotFound { entity: String, query: String },
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error(
        "Sync is not configured. Run `lectern config init --backend-url <url>` and `lectern auth login --user-id <id>`."
    )]
    SyncNotConfigured,
}
