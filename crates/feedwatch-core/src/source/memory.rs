//! In-process feedback source.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::FeedbackSource;
use crate::error::Result;
use crate::models::FeedbackRecord;

/// Append-only, in-memory collection honoring the [`FeedbackSource`] contract.
///
/// Records appended without a sequence number are stamped with the next
/// value after the current maximum, mirroring how the store assigns `_ts`.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: RwLock<Vec<FeedbackRecord>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_records(records: Vec<FeedbackRecord>) -> Self {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            push_stamped(&mut stored, record);
        }
        Self {
            records: RwLock::new(stored),
        }
    }

    /// A handful of sample records for local runs.
    #[must_use]
    pub fn demo() -> Self {
        let base = chrono::Utc::now() - chrono::Duration::hours(3);
        let samples = [
            ("Ada Lovelace", "ada@example.com", "Love the new summary card layout."),
            ("Grace Hopper", "grace@example.com", "The bot answered in the wrong channel twice today."),
            ("Alan Turing", "alan@example.com", "Could we get a shortcut to repeat the last question?"),
            ("Katherine Johnson", "katherine@example.com", "Response times feel faster this week."),
        ];
        let records = samples
            .iter()
            .enumerate()
            .map(|(index, (name, email, text))| {
                let offset = i64::try_from(index).unwrap_or(0);
                let created = base + chrono::Duration::minutes(offset * 30);
                FeedbackRecord::new(
                    format!("demo-{}", index + 1),
                    *name,
                    *email,
                    *text,
                    created.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                )
                .with_sequence(created.timestamp())
            })
            .collect();
        Self::with_records(records)
    }

    /// Append a record, stamping a sequence number when it has none.
    /// Returns the stored record.
    pub async fn append(&self, record: FeedbackRecord) -> FeedbackRecord {
        let mut guard = self.records.write().await;
        push_stamped(&mut guard, record)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl FeedbackSource for MemorySource {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<FeedbackRecord>> {
        let guard = self.records.read().await;
        Ok(newest_first(guard.iter()).into_iter().take(limit).collect())
    }

    async fn fetch_since(&self, watermark: Option<i64>) -> Result<Vec<FeedbackRecord>> {
        let guard = self.records.read().await;
        let matching = guard.iter().filter(|record| match watermark {
            Some(watermark) => record.sequence().unwrap_or(0) > watermark,
            None => true,
        });
        Ok(newest_first(matching))
    }
}

fn push_stamped(records: &mut Vec<FeedbackRecord>, mut record: FeedbackRecord) -> FeedbackRecord {
    if record.ts.is_none() {
        let next = records
            .iter()
            .filter_map(FeedbackRecord::sequence)
            .max()
            .map_or(1, |max| max + 1);
        record.ts = Some(next);
    }
    records.push(record.clone());
    record
}

/// Sort by sequence number descending; ties keep insertion order reversed so
/// the latest append comes first.
fn newest_first<'a>(records: impl Iterator<Item = &'a FeedbackRecord>) -> Vec<FeedbackRecord> {
    let mut out: Vec<FeedbackRecord> = records.cloned().collect();
    out.reverse();
    out.sort_by(|left, right| right.sequence().cmp(&left.sequence()));
    out
}
