//! Data models for Lectern

mod conflict;
mod entity;
mod migration;
mod record;
mod series;
mod sermon;
mod tags;

pub use conflict::{Conflict, ConflictStrategy, Resolution};
pub use entity::{Entity, EntityDescriptor, EntityType, Reference};
pub use migration::{EntityMigrationResult, MigrationPreview, MigrationResult};
pub use record::{Fields, OwnerId, PendingOp, RecordId, RecordSnapshot, SyncRecord};
pub use series::{Series, SeriesStatus};
pub use sermon::{Sermon, SermonStatus};
pub use tags::{extract_tags, normalize_tags};
