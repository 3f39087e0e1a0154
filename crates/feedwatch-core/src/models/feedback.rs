//! Feedback record model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity key of a feedback record, unique across the collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(String);

impl FeedbackId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeedbackId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A single piece of user feedback as stored in the document collection.
///
/// Records are immutable once written upstream. The store metadata fields are
/// carried through untouched; only `_ts` is interpreted, as the monotonic
/// sequence number used for incremental queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub id: FeedbackId,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub feedback_text: String,
    /// ISO-8601 creation timestamp
    pub created_at: String,
    #[serde(rename = "_rid", default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(rename = "_self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attachments: Option<String>,
    #[serde(rename = "_ts", default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

impl FeedbackRecord {
    /// Build a record without store metadata.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        user_name: impl Into<String>,
        user_email: impl Into<String>,
        feedback_text: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        let user_name = user_name.into();
        Self {
            id: FeedbackId::new(id),
            user_id: user_name.to_lowercase().replace(' ', "-"),
            user_name,
            user_email: user_email.into(),
            feedback_text: feedback_text.into(),
            created_at: created_at.into(),
            rid: None,
            self_link: None,
            etag: None,
            attachments: None,
            ts: None,
        }
    }

    /// Attach the store sequence number.
    #[must_use]
    pub fn with_sequence(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }

    /// The store's internal sequence number, if the record came from the store.
    #[must_use]
    pub const fn sequence(&self) -> Option<i64> {
        self.ts
    }

    /// Parse `createdAt` as an RFC 3339 instant.
    #[must_use]
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.created_at.trim())
            .ok()
            .map(|value| value.with_timezone(&Utc))
    }
}

/// Highest sequence number across a batch of records.
pub fn max_sequence<'a>(records: impl IntoIterator<Item = &'a FeedbackRecord>) -> Option<i64> {
    records
        .into_iter()
        .filter_map(FeedbackRecord::sequence)
        .max()
}
