//! Client-side reconciliation of the live feedback feed.
//!
//! [`FeedReconciler`] owns the authoritative newest-first record list for one
//! viewing session. It performs no I/O: a driver feeds it the snapshot, the
//! push connection's lifecycle and every decoded event, and asks it whether a
//! reconnect should be armed or fired.
//!
//! Merges are idempotent by record identity, so redelivered batches (from a
//! server that re-sends, a stale connection, or the network) never duplicate
//! entries. New batches are prepended as a block; records already present are
//! never reordered.

use std::collections::HashSet;
use std::time::Duration;

use crate::events::StreamEvent;
use crate::models::{max_sequence, FeedbackId, FeedbackRecord};

/// Fixed delay before reopening a lost push connection.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

pub const RECONNECTING_MESSAGE: &str = "Connection lost. Attempting to reconnect...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Loading,
    Connected,
    Disconnected,
}

/// Answer to a lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Arm a single reconnect timer for the given delay.
    Schedule(Duration),
    /// A reconnect timer is already armed; do not arm another.
    AlreadyPending,
    /// The session is over; never reconnect.
    TornDown,
}

/// What a single stream event did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Greeted,
    /// Number of records that were new to the list.
    Merged(usize),
    UpstreamError(String),
    /// Malformed payload, or the session was already torn down.
    Dropped,
}

#[derive(Debug)]
pub struct FeedReconciler {
    records: Vec<FeedbackRecord>,
    known: HashSet<FeedbackId>,
    unread: usize,
    state: ConnectionState,
    error: Option<String>,
    watermark: Option<i64>,
    backoff: Duration,
    reconnect_pending: bool,
    torn_down: bool,
}

impl Default for FeedReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            known: HashSet::new(),
            unread: 0,
            state: ConnectionState::Loading,
            error: None,
            watermark: None,
            backoff: RECONNECT_BACKOFF,
            reconnect_pending: false,
            torn_down: false,
        }
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Install the initial newest-first page and leave the loading state.
    ///
    /// The watermark starts at the newest record's sequence number; an empty
    /// page leaves it unset so the first connection scans everything.
    pub fn load_snapshot(&mut self, records: Vec<FeedbackRecord>) {
        if self.torn_down {
            return;
        }
        self.records.clear();
        self.known.clear();
        self.unread = 0;
        self.error = None;

        for record in records {
            if self.known.insert(record.id.clone()) {
                self.records.push(record);
            }
        }
        self.watermark = self
            .records
            .first()
            .and_then(FeedbackRecord::sequence)
            .or_else(|| max_sequence(&self.records));

        if self.state == ConnectionState::Loading {
            self.state = ConnectionState::Disconnected;
        }
        tracing::debug!(
            records = self.records.len(),
            watermark = ?self.watermark,
            "Loaded feedback snapshot"
        );
    }

    /// The initial page could not be fetched. The feed stays usable and the
    /// push connection can still be opened.
    pub fn load_failed(&mut self, message: impl Into<String>) {
        if self.torn_down {
            return;
        }
        self.error = Some(message.into());
        if self.state == ConnectionState::Loading {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Watermark to send as `since` when opening a push connection.
    #[must_use]
    pub const fn watermark(&self) -> Option<i64> {
        self.watermark
    }

    pub fn connection_opened(&mut self) {
        if self.torn_down {
            return;
        }
        self.state = ConnectionState::Connected;
        self.error = None;
        self.reconnect_pending = false;
    }

    /// Merge a newest-first batch. Returns how many records were new.
    ///
    /// The watermark moves to one below the batch's newest sequence number:
    /// `_ts` has one-second resolution, so later records can share that
    /// second. A reconnect re-receives the batch's newest records and
    /// dedup drops them.
    pub fn apply_batch(&mut self, batch: Vec<FeedbackRecord>) -> usize {
        if self.torn_down {
            return 0;
        }

        if let Some(batch_max) = max_sequence(&batch) {
            let resume = batch_max - 1;
            self.watermark = Some(self.watermark.map_or(resume, |current| current.max(resume)));
        }

        let fresh: Vec<FeedbackRecord> = batch
            .into_iter()
            .filter(|record| self.known.insert(record.id.clone()))
            .collect();
        let added = fresh.len();
        if added == 0 {
            return 0;
        }

        self.unread += added;
        self.records.splice(0..0, fresh);
        tracing::debug!(added, unread = self.unread, "Merged feedback batch");
        added
    }

    pub fn handle_event(&mut self, event: StreamEvent) -> EventOutcome {
        if self.torn_down {
            return EventOutcome::Dropped;
        }
        match event {
            StreamEvent::Connected { message, .. } => {
                tracing::info!("{message}");
                EventOutcome::Greeted
            }
            StreamEvent::NewFeedback { data, .. } => EventOutcome::Merged(self.apply_batch(data)),
            StreamEvent::Error { message, .. } => {
                tracing::warn!(message = %message, "Feedback stream reported an error");
                self.error = Some(message.clone());
                EventOutcome::UpstreamError(message)
            }
        }
    }

    /// Decode and apply one `data:` payload. Malformed payloads are logged
    /// and dropped.
    pub fn handle_payload(&mut self, payload: &str) -> EventOutcome {
        match StreamEvent::parse(payload) {
            Ok(event) => self.handle_event(event),
            Err(error) => {
                tracing::warn!(error = %error, "Dropping malformed stream payload");
                EventOutcome::Dropped
            }
        }
    }

    /// The push connection failed or closed. At most one reconnect is ever
    /// pending.
    pub fn connection_lost(&mut self) -> ReconnectDecision {
        if self.torn_down {
            return ReconnectDecision::TornDown;
        }
        self.state = ConnectionState::Disconnected;
        self.error = Some(RECONNECTING_MESSAGE.to_string());

        if self.reconnect_pending {
            return ReconnectDecision::AlreadyPending;
        }
        self.reconnect_pending = true;
        ReconnectDecision::Schedule(self.backoff)
    }

    /// The reconnect timer fired. Reopen only when the previous connection is
    /// confirmed closed and the session is still alive.
    pub fn reconnect_due(&mut self, connection_closed: bool) -> bool {
        self.reconnect_pending = false;
        !self.torn_down && connection_closed
    }

    /// The operator caught up (e.g. scrolled to the top).
    pub fn mark_seen(&mut self) {
        self.unread = 0;
    }

    /// End the session: no reconnect is armed and later events are ignored.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.reconnect_pending = false;
        self.state = ConnectionState::Disconnected;
    }

    #[must_use]
    pub fn records(&self) -> &[FeedbackRecord] {
        &self.records
    }

    /// Records merged since the operator last caught up.
    #[must_use]
    pub fn new_records(&self) -> &[FeedbackRecord] {
        &self.records[..self.unread.min(self.records.len())]
    }

    #[must_use]
    pub const fn is_new(&self, index: usize) -> bool {
        index < self.unread
    }

    #[must_use]
    pub const fn unread(&self) -> usize {
        self.unread
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    #[must_use]
    pub const fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }
}
