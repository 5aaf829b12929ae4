//! Sermon model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{extract_tags, normalize_tags, Entity, EntityType, RecordId};

/// Preparation status of a sermon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SermonStatus {
    #[default]
    Draft,
    Ready,
    Preached,
    Archived,
}

impl fmt::Display for SermonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::Preached => "preached",
            Self::Archived => "archived",
        };
        f.write_str(label)
    }
}

impl FromStr for SermonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "ready" => Ok(Self::Ready),
            "preached" => Ok(Self::Preached),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown sermon status: {other}")),
        }
    }
}

/// A sermon, optionally part of a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sermon {
    /// Unique identifier
    pub id: RecordId,
    /// Parent series, if any
    #[serde(default)]
    pub series_id: Option<RecordId>,
    pub title: String,
    /// Scripture reference, e.g. "Romans 8:28-39"
    #[serde(default)]
    pub scripture: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// ISO date (YYYY-MM-DD)
    #[serde(default)]
    pub preached_on: Option<String>,
    #[serde(default)]
    pub status: SermonStatus,
}

impl Sermon {
    /// Create a new draft sermon with the given title
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            series_id: None,
            title: title.into(),
            scripture: None,
            content: String::new(),
            tags: Vec::new(),
            preached_on: None,
            status: SermonStatus::default(),
        }
    }

    #[must_use]
    pub const fn in_series(mut self, series_id: RecordId) -> Self {
        self.series_id = Some(series_id);
        self
    }

    #[must_use]
    pub fn with_scripture(mut self, scripture: impl Into<String>) -> Self {
        self.scripture = Some(scripture.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    /// Explicit tags plus #hashtags found in the content
    #[must_use]
    pub fn all_tags(&self) -> Vec<String> {
        normalize_tags(self.tags.iter().cloned().chain(extract_tags(&self.content)))
    }
}

impl Entity for Sermon {
    const TYPE: EntityType = EntityType::Sermon;

    fn id(&self) -> RecordId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sermon_serializes_series_reference_as_string() {
        let series_id = RecordId::new();
        let sermon = Sermon::new("Hope").in_series(series_id);
        let fields = sermon.to_fields().unwrap();

        assert_eq!(fields["series_id"], series_id.as_str());
        assert_eq!(fields["status"], "draft");
    }

    #[test]
    fn all_tags_merges_content_hashtags() {
        let sermon = Sermon::new("Hope")
            .with_tags(["advent"])
            .with_content("Waiting well #Advent #hope");
        assert_eq!(sermon.all_tags(), vec!["advent", "hope"]);
    }
}
