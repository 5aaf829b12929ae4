//! Tag normalization shared by series and sermons

use regex::Regex;
use std::collections::BTreeSet;

const TAG_PATTERN: &str = r"^[a-z][a-z0-9_-]*$";
const HASHTAG_PATTERN: &str = r"#([a-zA-Z][a-zA-Z0-9_-]*)";

/// Normalize a list of tags.
///
/// Tags are trimmed, lowercased, stripped of a leading `#`, validated against
/// `[a-z][a-z0-9_-]*`, deduplicated and sorted. Invalid tags are dropped.
#[must_use]
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let re = Regex::new(TAG_PATTERN).expect("Invalid regex");
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().trim_start_matches('#').to_lowercase())
        .filter(|tag| re.is_match(tag))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Extract #tags from text
///
/// Valid tags match the pattern: `#[a-zA-Z][a-zA-Z0-9_-]*`
/// Tags are returned in lowercase, deduplicated and sorted.
///
/// # Examples
///
/// ```
/// use lectern_core::models::extract_tags;
///
/// let tags = extract_tags("Grace in #Romans and #advent-2024");
/// assert_eq!(tags, vec!["advent-2024".to_string(), "romans".to_string()]);
/// ```
#[must_use]
pub fn extract_tags(text: &str) -> Vec<String> {
    let re = Regex::new(HASHTAG_PATTERN).expect("Invalid regex");
    normalize_tags(re.captures_iter(text).map(|cap| cap[1].to_string()))
}
