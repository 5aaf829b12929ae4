//! Database layer for Lectern

mod conflict_repository;
mod connection;
mod mapping_repository;
mod migrations;
mod record_repository;
mod watermark_repository;

pub use conflict_repository::{NewConflict, SqliteConflictRepository};
pub use connection::Database;
pub use mapping_repository::{MappingRepository, SqliteMappingRepository};
pub use record_repository::{RecordRepository, SqliteRecordRepository};
pub use watermark_repository::SqliteWatermarkRepository;
