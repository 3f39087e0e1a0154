//! Feedback data sources.
//!
//! A source exposes the two queries the dashboard needs over a
//! timestamp-ordered document collection. Sources are constructed once and
//! shared behind an `Arc<dyn FeedbackSource>`; every query is read-only, so a
//! single handle serves any number of concurrent connections.

mod cosmos;
mod memory;

pub use cosmos::CosmosSource;
pub use memory::MemorySource;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::FeedbackRecord;

/// Query contract over the feedback collection.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    /// Newest-first page of at most `limit` records.
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<FeedbackRecord>>;

    /// Newest-first records whose sequence number is strictly greater than
    /// `watermark`. `None` scans the whole collection.
    async fn fetch_since(&self, watermark: Option<i64>) -> Result<Vec<FeedbackRecord>>;
}
