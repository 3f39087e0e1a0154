//! Feedback list filtering (name, email, text and creation date range).

use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::models::FeedbackRecord;

/// Five independent predicates combined with logical AND. Unset predicates
/// match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackFilter {
    pub name: Option<String>,
    pub email: Option<String>,
    pub text: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl FeedbackFilter {
    /// A filter with every predicate unset.
    #[must_use]
    pub fn cleared() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        normalize_query(self.name.as_deref()).is_none()
            && normalize_query(self.email.as_deref()).is_none()
            && normalize_query(self.text.as_deref()).is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
    }

    /// Parse a `YYYY-MM-DD` calendar date.
    pub fn parse_date(raw: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
            Error::InvalidInput(format!("invalid date '{}': expected YYYY-MM-DD", raw.trim()))
        })
    }

    #[must_use]
    pub fn matches(&self, record: &FeedbackRecord) -> bool {
        contains_query(&record.user_name, self.name.as_deref())
            && contains_query(&record.user_email, self.email.as_deref())
            && contains_query(&record.feedback_text, self.text.as_deref())
            && self.matches_date_range(record)
    }

    fn matches_date_range(&self, record: &FeedbackRecord) -> bool {
        if self.date_from.is_none() && self.date_to.is_none() {
            return true;
        }
        // A record without a readable creation time cannot satisfy a date bound.
        let Some(created) = record.created_at_utc() else {
            return false;
        };
        let day = created.date_naive();

        self.date_from.is_none_or(|from| day >= from) && self.date_to.is_none_or(|to| day <= to)
    }
}

/// Records matching `filter`, in their original relative order.
#[must_use]
pub fn filter_feedback<'a>(
    records: &'a [FeedbackRecord],
    filter: &FeedbackFilter,
) -> Vec<&'a FeedbackRecord> {
    records.iter().filter(|record| filter.matches(record)).collect()
}

fn normalize_query(raw: Option<&str>) -> Option<String> {
    raw.map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
}

fn contains_query(haystack: &str, query: Option<&str>) -> bool {
    let Some(query) = normalize_query(query) else {
        return true;
    };
    haystack.to_lowercase().contains(&query)
}
