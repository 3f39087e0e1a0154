use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use colored::Colorize;
use feedwatch_core::FeedbackRecord;
use serde::Serialize;

use crate::client::ApiClient;
use crate::error::CliError;
use crate::session::StoredSession;

pub const EMPTY_FEED_MESSAGE: &str = "No feedback items found";

const LINE_PREVIEW_CHARS: usize = 60;
const JSON_PREVIEW_CHARS: usize = 120;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackListItem {
    pub id: String,
    pub user_name: String,
    pub user_email: String,
    pub preview: String,
    pub feedback_text: String,
    pub created_at: String,
    pub relative_time: String,
}

/// Build an authorized client from the stored session for `api_url`.
pub fn authorized_client(api_url: &str, session_path: &Path) -> Result<ApiClient, CliError> {
    let session = StoredSession::require_for(session_path, api_url)?;
    Ok(ApiClient::new(api_url)?.with_token(session.token))
}

pub fn format_feedback_line(record: &FeedbackRecord, now_ms: i64, is_new: bool) -> String {
    let marker = if is_new {
        "new".green().bold().to_string()
    } else {
        "   ".to_string()
    };
    let relative_time = record_relative_time(record, now_ms);
    let preview = feedback_preview(&record.feedback_text, LINE_PREVIEW_CHARS);

    format!(
        "{marker}  {relative_time:<10}  {:<20}  {:<28}  {preview}",
        truncate_chars(&record.user_name, 20),
        truncate_chars(&record.user_email, 28),
    )
}

pub fn format_feedback_lines(records: &[&FeedbackRecord], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| format_feedback_line(record, now_ms, false))
        .collect()
}

pub fn feedback_to_list_item(record: &FeedbackRecord, now_ms: i64) -> FeedbackListItem {
    FeedbackListItem {
        id: record.id.to_string(),
        user_name: record.user_name.clone(),
        user_email: record.user_email.clone(),
        preview: feedback_preview(&record.feedback_text, JSON_PREVIEW_CHARS),
        feedback_text: record.feedback_text.clone(),
        created_at: record.created_at.clone(),
        relative_time: record_relative_time(record, now_ms),
    }
}

/// First line of the text with whitespace collapsed, capped at `max_chars`.
pub fn feedback_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = value.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn record_relative_time(record: &FeedbackRecord, now_ms: i64) -> String {
    record.created_at_utc().map_or_else(
        || record.created_at.clone(),
        |created| format_relative_time(created.timestamp_millis(), now_ms),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Use `provided` when present, otherwise read one line from stdin.
///
/// The prompt goes to stderr so stdout stays clean for piping. Input is not
/// masked.
pub fn resolve_password(provided: Option<String>, prompt: &str) -> Result<String, CliError> {
    if let Some(password) = provided {
        return normalize_password(&password);
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("{prompt}");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    normalize_password(&line)
}

/// Strip the trailing line ending. Surrounding spaces are part of the password.
pub fn normalize_password(raw: &str) -> Result<String, CliError> {
    let password = raw.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        Err(CliError::EmptyPassword)
    } else {
        Ok(password.to_string())
    }
}
