//! Per-connection push loop behind `GET /api/feedback/stream`.
//!
//! Each connection owns a lazily polled stream: nothing runs unless the
//! response body asks for the next event, and dropping the body (client
//! disconnect) drops the timer with it. The loop greets immediately, then
//! polls the source on a fixed interval until the connection ceiling.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use feedwatch_core::events::{StreamEvent, FETCH_FAILED_MESSAGE};
use feedwatch_core::models::max_sequence;
use feedwatch_core::source::FeedbackSource;
use feedwatch_core::{FeedbackId, FeedbackRecord};
use futures_util::stream::{self, Stream};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushLoopConfig {
    pub poll_interval: Duration,
    pub max_duration: Duration,
    /// Move the watermark up to each emitted batch. When off, every tick
    /// re-queries from the watermark the connection was opened with.
    pub advance_watermark: bool,
}

impl PushLoopConfig {
    pub const fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_duration: config.stream_max_duration,
            advance_watermark: config.advance_watermark,
        }
    }
}

struct PushLoop {
    source: Arc<dyn FeedbackSource>,
    watermark: Option<i64>,
    advance_watermark: bool,
    /// Newest sequence number emitted so far and the ids emitted at it.
    frontier: Option<i64>,
    sent_at_frontier: HashSet<FeedbackId>,
    ticker: Interval,
    deadline: Instant,
    greeted: bool,
}

/// Event stream for one push connection, starting from `since`.
pub fn push_loop(
    source: Arc<dyn FeedbackSource>,
    since: Option<i64>,
    config: PushLoopConfig,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    let start = Instant::now();
    let mut ticker = interval_at(start + config.poll_interval, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let state = PushLoop {
        source,
        watermark: since,
        advance_watermark: config.advance_watermark,
        frontier: None,
        sent_at_frontier: HashSet::new(),
        ticker,
        deadline: start + config.max_duration,
        greeted: false,
    };
    tracing::debug!(since = ?since, "Push connection opened");

    stream::unfold(state, |mut state| async move {
        let event = state.next_event().await?;
        Some((event, state))
    })
}

impl PushLoop {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        if !self.greeted {
            self.greeted = true;
            return Some(StreamEvent::connected());
        }

        loop {
            tokio::select! {
                biased;
                () = sleep_until(self.deadline) => {
                    tracing::debug!("Push connection reached its lifetime ceiling");
                    return None;
                }
                _ = self.ticker.tick() => {}
            }

            match self.source.fetch_since(self.watermark).await {
                Ok(mut records) => {
                    if self.advance_watermark {
                        records.retain(|record| !self.sent_at_frontier.contains(&record.id));
                    }
                    if records.is_empty() {
                        continue;
                    }
                    if self.advance_watermark {
                        self.advance_past(&records);
                    }
                    tracing::debug!(
                        count = records.len(),
                        watermark = ?self.watermark,
                        "Pushing new feedback"
                    );
                    return Some(StreamEvent::new_feedback(records));
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Push loop fetch failed");
                    return Some(StreamEvent::error(FETCH_FAILED_MESSAGE));
                }
            }
        }
    }
}

impl PushLoop {
    /// `_ts` has one-second resolution, so records can still arrive at the
    /// newest emitted second. The next query starts one below it and the ids
    /// already emitted at that second are filtered out.
    fn advance_past(&mut self, records: &[FeedbackRecord]) {
        let Some(batch_max) = max_sequence(records) else {
            return;
        };
        if self.frontier.is_none_or(|frontier| batch_max > frontier) {
            self.frontier = Some(batch_max);
            self.sent_at_frontier.clear();
        }
        let Some(frontier) = self.frontier else {
            return;
        };
        self.sent_at_frontier.extend(
            records
                .iter()
                .filter(|record| record.sequence() == Some(frontier))
                .map(|record| record.id.clone()),
        );
        let resume = frontier - 1;
        self.watermark = Some(self.watermark.map_or(resume, |current| current.max(resume)));
    }
}

impl Drop for PushLoop {
    fn drop(&mut self) {
        tracing::debug!("Push connection closed");
    }
}
