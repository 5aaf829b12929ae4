//! Offline-first sync: push and pull engines, conflict resolution and backend adapters.

mod backend;
mod config;
mod error;
mod memory;
mod orchestrator;
mod pull;
mod push;
mod report;
pub mod resolver;
mod rest;


pub use backend::{RemoteBackend, RemotePayload, RemoteRecord, UpdateOutcome};
pub use config::{RetryPolicy, SyncConfig, DEFAULT_AUTO_RESOLVE_MAX_FIELDS};
pub use error::{BackendError, BackendResult};
pub use memory::{IdMode, MemoryBackend, Operation};
pub use orchestrator::SyncOrchestrator;
pub use pull::PullEngine;
pub use push::PushEngine;
pub use report::{EntitySyncReport, PullReport, PushReport, RecordError, SyncReport};
pub use rest::RestBackend;
