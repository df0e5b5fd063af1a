//! The normalized, backend-agnostic post record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw fields a backend supplies for one post.
///
/// Hashtags are not part of the input; they are derived from the caption when a
/// [`PostRecord`] is built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostFields {
    pub id: String,
    #[serde(default)]
    pub caption: String,
    pub timestamp: DateTime<Utc>,
    /// Set when the source payload carried no timestamp and `timestamp` is the epoch default.
    #[serde(default)]
    pub timestamp_defaulted: bool,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// One retrieved post. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PostFields")]
pub struct PostRecord {
    id: String,
    caption: String,
    timestamp: DateTime<Utc>,
    timestamp_defaulted: bool,
    like_count: u64,
    comment_count: u64,
    media_type: String,
    url: String,
    location: Option<String>,
    hashtags: Vec<String>,
}

impl From<PostFields> for PostRecord {
    fn from(fields: PostFields) -> Self {
        let hashtags = extract_hashtags(&fields.caption);
        Self {
            id: fields.id,
            caption: fields.caption,
            timestamp: fields.timestamp,
            timestamp_defaulted: fields.timestamp_defaulted,
            like_count: fields.like_count,
            comment_count: fields.comment_count,
            media_type: fields.media_type,
            url: fields.url,
            location: fields.location,
            hashtags,
        }
    }
}

impl PostRecord {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn caption(&self) -> &str {
        &self.caption
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True when the backend omitted the creation time and the epoch was substituted.
    #[must_use]
    pub fn timestamp_defaulted(&self) -> bool {
        self.timestamp_defaulted
    }

    #[must_use]
    pub fn like_count(&self) -> u64 {
        self.like_count
    }

    #[must_use]
    pub fn comment_count(&self) -> u64 {
        self.comment_count
    }

    /// Likes plus comments.
    #[must_use]
    pub fn engagement(&self) -> u64 {
        self.like_count.saturating_add(self.comment_count)
    }

    /// Backend-defined media tag (`GraphImage`, `VIDEO`, ...). Not validated.
    #[must_use]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    #[must_use]
    pub fn hashtags(&self) -> &[String] {
        &self.hashtags
    }
}

/// Extract hashtags (without the leading `#`) from whitespace-delimited caption tokens.
///
/// Every `#`-prefixed token contributes its remainder as a tag, except a bare `#`, which
/// would yield an empty tag and is skipped instead.
#[must_use]
pub fn extract_hashtags(caption: &str) -> Vec<String> {
    caption
        .split_whitespace()
        .filter_map(|word| word.strip_prefix('#'))
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}
