//! lectern-core - Core library for Lectern
//!
//! This crate contains the models, local ledger, sync engines and migration
//! engine shared by Lectern interfaces. Records are written to the ledger
//! first and replayed to a remote backend by the sync orchestrator.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod migration;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{EntityType, OwnerId, RecordId, Series, Sermon, SyncRecord};
pub use services::Ledger;
