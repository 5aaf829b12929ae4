//! Series model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{normalize_tags, Entity, EntityType, RecordId};

/// Planning status of a sermon series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    #[default]
    Planning,
    Active,
    Completed,
    Archived,
}

impl fmt::Display for SeriesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Planning => "planning",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        };
        f.write_str(label)
    }
}

impl FromStr for SeriesStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planning" => Ok(Self::Planning),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown series status: {other}")),
        }
    }
}

/// A series groups sermons preached over a period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// Unique identifier
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// ISO date (YYYY-MM-DD)
    #[serde(default)]
    pub start_date: Option<String>,
    /// ISO date (YYYY-MM-DD)
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub status: SeriesStatus,
}

impl Series {
    /// Create a new series with the given title
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            title: title.into(),
            description: None,
            tags: Vec::new(),
            start_date: None,
            end_date: None,
            status: SeriesStatus::default(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
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
}

impl Entity for Series {
    const TYPE: EntityType = EntityType::Series;

    fn id(&self) -> RecordId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_fields_exclude_id() {
        let series = Series::new("Romans")
            .with_description("Verse by verse")
            .with_tags(["Epistles", "paul"]);
        let fields = series.to_fields().unwrap();

        assert!(!fields.contains_key("id"));
        assert_eq!(fields["title"], "Romans");
        assert_eq!(fields["status"], "planning");
        assert_eq!(fields["tags"], serde_json::json!(["epistles", "paul"]));
    }

    #[test]
    fn series_status_parse() {
        assert_eq!("Active".parse::<SeriesStatus>(), Ok(SeriesStatus::Active));
        assert!("paused".parse::<SeriesStatus>().is_err());
    }
}
