//! Entity type descriptors and the typed entity contract

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{Fields, RecordId, SyncRecord};
use crate::error::{Error, Result};

/// Every syncable entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Series,
    Sermon,
}

/// A field on one entity type that holds the id of another entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub field: &'static str,
    pub target: EntityType,
}

/// Static description of how an entity type is stored and synced
#[derive(Debug)]
pub struct EntityDescriptor {
    pub entity_type: EntityType,
    /// Local table name
    pub table: &'static str,
    /// Remote collection name
    pub collection: &'static str,
    /// Domain fields compared during conflict detection
    pub fields: &'static [&'static str],
    /// Fields that are unioned rather than replaced during a field merge
    pub list_fields: &'static [&'static str],
    /// Foreign keys to other entity types
    pub references: &'static [Reference],
}

static SERIES: EntityDescriptor = EntityDescriptor {
    entity_type: EntityType::Series,
    table: "series",
    collection: "series",
    fields: &[
        "title",
        "description",
        "tags",
        "start_date",
        "end_date",
        "status",
    ],
    list_fields: &["tags"],
    references: &[],
};

static SERMON: EntityDescriptor = EntityDescriptor {
    entity_type: EntityType::Sermon,
    table: "sermons",
    collection: "sermons",
    fields: &[
        "series_id",
        "title",
        "scripture",
        "content",
        "tags",
        "preached_on",
        "status",
    ],
    list_fields: &["tags"],
    references: &[Reference {
        field: "series_id",
        target: EntityType::Series,
    }],
};

impl EntityType {
    /// All entity types, in declaration order
    pub const ALL: [Self; 2] = [Self::Series, Self::Sermon];

    pub fn descriptor(self) -> &'static EntityDescriptor {
        match self {
            Self::Series => &SERIES,
            Self::Sermon => &SERMON,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Series => "series",
            Self::Sermon => "sermon",
        }
    }

    pub fn table(self) -> &'static str {
        self.descriptor().table
    }

    /// Entity types this type references
    pub fn dependencies(self) -> impl Iterator<Item = Self> {
        self.descriptor()
            .references
            .iter()
            .map(|reference| reference.target)
    }

    /// Entity types ordered so that every type comes after the types it references
    pub fn sync_order() -> Vec<Self> {
        let mut ordered: Vec<Self> = Vec::with_capacity(Self::ALL.len());
        let mut remaining: Vec<Self> = Self::ALL.to_vec();

        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|candidate| {
                let ready = candidate
                    .dependencies()
                    .all(|dep| dep == *candidate || ordered.contains(&dep));
                if ready {
                    ordered.push(*candidate);
                }
                !ready
            });
            if remaining.len() == before {
                // Reference cycle: keep declaration order for the rest
                ordered.append(&mut remaining);
            }
        }

        ordered
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "series" => Ok(Self::Series),
            "sermon" | "sermons" => Ok(Self::Sermon),
            other => Err(Error::InvalidInput(format!("Unknown entity type: {other}"))),
        }
    }
}

/// A typed domain entity that is stored as a [`SyncRecord`]
pub trait Entity: Serialize + DeserializeOwned {
    /// The entity type this struct represents
    const TYPE: EntityType;

    /// The record id
    fn id(&self) -> RecordId;

    /// Domain fields of this entity (everything except `id`)
    fn to_fields(&self) -> Result<Fields> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                map.remove("id");
                Ok(map)
            }
            _ => Err(Error::InvalidInput(format!(
                "{} did not serialize to an object",
                Self::TYPE
            ))),
        }
    }

    /// Rebuild the entity from a ledger record
    fn from_record(record: &SyncRecord) -> Result<Self> {
        if record.entity_type != Self::TYPE {
            return Err(Error::InvalidInput(format!(
                "Expected a {} record, got {}",
                Self::TYPE,
                record.entity_type
            )));
        }
        let mut map = record.fields.clone();
        map.insert("id".to_string(), Value::String(record.id.as_str()));
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_order_puts_parents_first() {
        let order = EntityType::sync_order();
        assert_eq!(order, vec![EntityType::Series, EntityType::Sermon]);
    }

    #[test]
    fn entity_type_parse() {
        assert_eq!("Series".parse::<EntityType>().unwrap(), EntityType::Series);
        assert_eq!("sermons".parse::<EntityType>().unwrap(), EntityType::Sermon);
        assert!("notes".parse::<EntityType>().is_err());
    }

    #[test]
    fn descriptors_list_references() {
        let sermon = EntityType::Sermon.descriptor();
        assert_eq!(sermon.references.len(), 1);
        assert_eq!(sermon.references[0].target, EntityType::Series);
        assert!(sermon.fields.contains(&"series_id"));
        assert!(EntityType::Series.descriptor().references.is_empty());
    }
}
