//! Push stream events and the `text/event-stream` framing they travel in.
//!
//! Each event is one JSON object carried in a `data:` field and terminated by
//! a blank line. The decoder here is the client half; the server half is a
//! plain `data: <json>\n\n` frame per event.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::FeedbackRecord;
use crate::util::unix_millis_now;

pub const CONNECTED_MESSAGE: &str = "Connected to feedback stream";
pub const FETCH_FAILED_MESSAGE: &str = "Failed to fetch new feedback";

/// One message on the push connection. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected {
        message: String,
        timestamp: i64,
    },
    NewFeedback {
        data: Vec<FeedbackRecord>,
        timestamp: i64,
    },
    Error {
        message: String,
        timestamp: i64,
    },
}

impl StreamEvent {
    #[must_use]
    pub fn connected() -> Self {
        Self::Connected {
            message: CONNECTED_MESSAGE.to_string(),
            timestamp: unix_millis_now(),
        }
    }

    #[must_use]
    pub fn new_feedback(data: Vec<FeedbackRecord>) -> Self {
        Self::NewFeedback {
            data,
            timestamp: unix_millis_now(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: unix_millis_now(),
        }
    }

    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        match self {
            Self::Connected { timestamp, .. }
            | Self::NewFeedback { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Parse the JSON payload of a `data:` field.
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|error| Error::Parse(format!("invalid stream event: {error}")))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encode as a complete event-stream frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}

/// Incremental `text/event-stream` decoder.
///
/// Feed raw body chunks with [`push`](Self::push); complete event payloads
/// (the joined `data:` lines of each event) come back in arrival order.
/// Chunk boundaries may fall anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl EventStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(payload) = self.handle_line(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Bytes received but not yet terminated by a newline.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn handle_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            let payload = self.data_lines.join("\n");
            self.data_lines.clear();
            return Some(payload);
        }

        // Comment lines (keep-alives) start with a colon.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        if field == "data" {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data_lines.push(value.to_string());
        }
        None
    }
}
