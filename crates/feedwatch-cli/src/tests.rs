use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use feedwatch_core::events::StreamEvent;
use feedwatch_core::filter::FeedbackFilter;
use feedwatch_core::reconcile::ConnectionState;
use feedwatch_core::FeedbackRecord;
use futures_util::stream;
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

use crate::cli::FilterArgs;
use crate::client::{api_error, ApiClient, ByteStream, FeedTransport};
use crate::commands::common::{
    feedback_preview, feedback_to_list_item, format_feedback_line, format_relative_time,
    normalize_password, record_relative_time,
};
use crate::commands::hash_password::encode_password_hash;
use crate::commands::watch::{watch_feed, WatchOptions};
use crate::error::CliError;
use crate::session::{clear_session_at, StoredSession};

fn record(id: &str, ts: i64) -> FeedbackRecord {
    FeedbackRecord::new(
        id,
        "Ada Lovelace",
        "ada@example.com",
        format!("Feedback {id}"),
        "2024-05-01T10:00:00Z",
    )
    .with_sequence(ts)
}

fn frame(event: &StreamEvent) -> String {
    event.to_frame().unwrap()
}

fn ids(records: &[FeedbackRecord]) -> Vec<&str> {
    records.iter().map(|record| record.id.as_str()).collect()
}

enum FakeConnection {
    /// Deliver the chunks, then close.
    Close(Vec<String>),
    /// Deliver the chunks, then stay open.
    Hold(Vec<String>),
    Fail(u16),
}

struct FakeTransport {
    snapshot_status: Option<u16>,
    snapshot: Vec<FeedbackRecord>,
    connections: Mutex<VecDeque<FakeConnection>>,
    calls: Mutex<Vec<(Duration, Option<i64>)>>,
    started: Instant,
}

impl FakeTransport {
    fn new(snapshot: Vec<FeedbackRecord>, connections: Vec<FakeConnection>) -> Self {
        Self {
            snapshot_status: None,
            snapshot,
            connections: Mutex::new(connections.into()),
            calls: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    fn failing_snapshot(mut self, status: u16) -> Self {
        self.snapshot_status = Some(status);
        self
    }

    fn calls(&self) -> Vec<(Duration, Option<i64>)> {
        self.calls.lock().unwrap().clone()
    }
}

fn api_failure(status: u16) -> CliError {
    CliError::Api {
        status,
        message: "fake failure".to_string(),
    }
}

fn byte_stream(chunks: Vec<String>, hold_open: bool) -> ByteStream {
    let delivered = stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, CliError>(chunk.into_bytes())),
    );
    if hold_open {
        delivered.chain(stream::pending()).boxed()
    } else {
        delivered.boxed()
    }
}

#[async_trait]
impl FeedTransport for FakeTransport {
    async fn snapshot(&self, _limit: usize) -> Result<Vec<FeedbackRecord>, CliError> {
        match self.snapshot_status {
            Some(status) => Err(api_failure(status)),
            None => Ok(self.snapshot.clone()),
        }
    }

    async fn connect(&self, since: Option<i64>) -> Result<ByteStream, CliError> {
        self.calls
            .lock()
            .unwrap()
            .push((self.started.elapsed(), since));
        let next = self.connections.lock().unwrap().pop_front();
        match next {
            Some(FakeConnection::Close(chunks)) => Ok(byte_stream(chunks, false)),
            Some(FakeConnection::Hold(chunks)) => Ok(byte_stream(chunks, true)),
            Some(FakeConnection::Fail(status)) => Err(api_failure(status)),
            None => Ok(byte_stream(Vec::new(), true)),
        }
    }
}

fn options() -> WatchOptions {
    WatchOptions::new(20, FeedbackFilter::cleared())
}

fn quiet_seen() -> mpsc::UnboundedReceiver<()> {
    mpsc::unbounded_channel().1
}

fn assert_near(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(50),
        "expected about {expected:?}, got {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn watch_reconnects_after_backoff_with_advanced_watermark() {
    let transport = FakeTransport::new(
        vec![record("a", 100)],
        vec![FakeConnection::Close(vec![
            frame(&StreamEvent::connected()),
            frame(&StreamEvent::new_feedback(vec![record("b", 105)])),
        ])],
    );
    let mut out = Vec::new();

    let feed = watch_feed(
        &transport,
        &options(),
        sleep(Duration::from_secs(5)),
        quiet_seen(),
        &mut out,
    )
    .await
    .unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], (Duration::ZERO, Some(100)));
    assert_near(calls[1].0, Duration::from_secs(3));
    assert_eq!(calls[1].1, Some(104));

    assert_eq!(ids(feed.records()), vec!["b", "a"]);
    assert_eq!(feed.unread(), 1);
    assert!(feed.is_torn_down());

    let rendered = String::from_utf8(out).unwrap();
    assert!(rendered.contains("Feedback a"));
    assert!(rendered.contains("Feedback b"));
    assert!(rendered.contains("disconnected"));
}

#[tokio::test(start_paused = true)]
async fn watch_marks_only_unread_records_as_new() {
    let transport = FakeTransport::new(
        vec![record("a", 100)],
        vec![FakeConnection::Hold(vec![frame(&StreamEvent::new_feedback(
            vec![record("b", 105)],
        ))])],
    );
    let mut out = Vec::new();

    let feed = watch_feed(
        &transport,
        &options(),
        sleep(Duration::from_secs(1)),
        quiet_seen(),
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(ids(feed.new_records()), vec!["b"]);
    let rendered = String::from_utf8(out).unwrap();
    let line_for = |text: &str| {
        rendered
            .lines()
            .find(|line| line.contains(text))
            .unwrap_or_default()
            .to_string()
    };
    assert!(line_for("Feedback b").contains("new"));
    assert!(!line_for("Feedback a").contains("new"));
}

#[tokio::test(start_paused = true)]
async fn watch_drops_duplicates_across_chunk_boundaries() {
    let batch = frame(&StreamEvent::new_feedback(vec![
        record("c", 110),
        record("a", 100),
    ]));
    let (head, tail) = batch.split_at(batch.len() / 2);
    let transport = FakeTransport::new(
        vec![record("b", 105), record("a", 100)],
        vec![FakeConnection::Hold(vec![
            head.to_string(),
            tail.to_string(),
            frame(&StreamEvent::new_feedback(vec![record("c", 110)])),
        ])],
    );
    let mut out = Vec::new();

    let feed = watch_feed(
        &transport,
        &options(),
        sleep(Duration::from_secs(1)),
        quiet_seen(),
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(ids(feed.records()), vec!["c", "b", "a"]);
    assert_eq!(feed.unread(), 1);
    assert_eq!(feed.watermark(), Some(109));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn watch_retries_failed_connection_after_backoff() {
    let transport = FakeTransport::new(
        vec![record("a", 100)],
        vec![
            FakeConnection::Fail(502),
            FakeConnection::Hold(vec![frame(&StreamEvent::connected())]),
        ],
    );
    let mut out = Vec::new();

    let feed = watch_feed(
        &transport,
        &options(),
        sleep(Duration::from_secs(10)),
        quiet_seen(),
        &mut out,
    )
    .await
    .unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_near(calls[1].0, Duration::from_secs(3));
    assert_eq!(calls[1].1, Some(100));
    assert_eq!(feed.state(), ConnectionState::Disconnected);

    let rendered = String::from_utf8(out).unwrap();
    assert!(rendered.contains("Connection lost. Attempting to reconnect..."));
    assert!(rendered.contains("live"));
}

#[tokio::test(start_paused = true)]
async fn watch_stops_when_session_is_rejected() {
    let transport = FakeTransport::new(vec![record("a", 100)], vec![FakeConnection::Fail(401)]);
    let mut out = Vec::new();

    let error = watch_feed(
        &transport,
        &options(),
        sleep(Duration::from_secs(60)),
        quiet_seen(),
        &mut out,
    )
    .await
    .unwrap_err();

    assert!(error.is_unauthorized());
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn watch_continues_after_snapshot_failure() {
    let transport = FakeTransport::new(
        Vec::new(),
        vec![FakeConnection::Hold(vec![frame(&StreamEvent::new_feedback(
            vec![record("a", 100)],
        ))])],
    )
    .failing_snapshot(500);
    let mut out = Vec::new();

    let feed = watch_feed(
        &transport,
        &options(),
        sleep(Duration::from_secs(1)),
        quiet_seen(),
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(transport.calls(), vec![(Duration::ZERO, None)]);
    assert_eq!(ids(feed.records()), vec!["a"]);
    let rendered = String::from_utf8(out).unwrap();
    assert!(rendered.contains("Failed to load feedback"));
}

#[tokio::test(start_paused = true)]
async fn watch_marks_feed_seen_on_signal() {
    let transport = FakeTransport::new(
        vec![record("a", 100)],
        vec![FakeConnection::Hold(vec![frame(&StreamEvent::new_feedback(
            vec![record("b", 105), record("c", 106)],
        ))])],
    );
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        sleep(Duration::from_millis(500)).await;
        seen_tx.send(()).unwrap();
    });
    let mut out = Vec::new();

    let feed = watch_feed(
        &transport,
        &options(),
        sleep(Duration::from_secs(1)),
        seen_rx,
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(feed.records().len(), 3);
    assert_eq!(feed.unread(), 0);
}

#[tokio::test(start_paused = true)]
async fn watch_hides_filtered_records_but_still_merges_them() {
    let mut other = record("z", 107);
    other.user_name = "Grace Hopper".to_string();
    other.feedback_text = "Hidden by filter".to_string();
    let transport = FakeTransport::new(
        vec![record("a", 100)],
        vec![FakeConnection::Hold(vec![frame(&StreamEvent::new_feedback(
            vec![other],
        ))])],
    );
    let options = WatchOptions::new(
        20,
        FeedbackFilter {
            name: Some("ada".to_string()),
            ..FeedbackFilter::default()
        },
    );
    let mut out = Vec::new();

    let feed = watch_feed(
        &transport,
        &options,
        sleep(Duration::from_secs(1)),
        quiet_seen(),
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(ids(feed.records()), vec!["z", "a"]);
    let rendered = String::from_utf8(out).unwrap();
    assert!(rendered.contains("Feedback a"));
    assert!(!rendered.contains("Hidden by filter"));
}

#[tokio::test(start_paused = true)]
async fn watch_shutdown_during_backoff_skips_reconnect() {
    let transport = FakeTransport::new(vec![record("a", 100)], vec![FakeConnection::Close(vec![])]);
    let mut out = Vec::new();

    let feed = watch_feed(
        &transport,
        &options(),
        sleep(Duration::from_secs(1)),
        quiet_seen(),
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(transport.calls().len(), 1);
    assert!(feed.is_torn_down());
    assert!(!feed.reconnect_pending());
}

#[test]
fn filter_args_parse_dates_and_reject_inverted_range() {
    let args = FilterArgs {
        name: Some("ada".to_string()),
        from: Some("2024-05-01".to_string()),
        to: Some("2024-05-31".to_string()),
        ..FilterArgs::default()
    };
    let filter = args.to_filter().unwrap();
    assert_eq!(filter.name.as_deref(), Some("ada"));
    assert_eq!(
        filter.date_from.map(|date| date.to_string()).as_deref(),
        Some("2024-05-01")
    );

    let inverted = FilterArgs {
        from: Some("2024-06-01".to_string()),
        to: Some("2024-05-01".to_string()),
        ..FilterArgs::default()
    };
    assert!(matches!(
        inverted.to_filter(),
        Err(CliError::InvalidArgument(_))
    ));

    let malformed = FilterArgs {
        from: Some("05/01/2024".to_string()),
        ..FilterArgs::default()
    };
    assert!(matches!(malformed.to_filter(), Err(CliError::Core(_))));
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
}

#[test]
fn record_relative_time_falls_back_to_raw_value() {
    let mut unreadable = record("a", 1);
    unreadable.created_at = "yesterday".to_string();
    assert_eq!(record_relative_time(&unreadable, 0), "yesterday");
}

#[test]
fn feedback_preview_truncates_with_ellipsis() {
    let preview = feedback_preview("This is a very long sentence that should be shortened", 20);
    assert_eq!(preview, "This is a very lo...");
    assert_eq!(feedback_preview("  two\n lines ", 20), "two");
}

#[test]
fn feedback_line_includes_author_and_text() {
    let line = format_feedback_line(&record("a", 1), 0, true);
    assert!(line.contains("Ada Lovelace"));
    assert!(line.contains("ada@example.com"));
    assert!(line.contains("Feedback a"));
    assert!(line.contains("new"));
}

#[test]
fn list_item_serializes_camel_case() {
    let item = feedback_to_list_item(&record("a", 1), 0);
    let json = serde_json::to_value(&item).unwrap();
    assert_eq!(json["userName"], "Ada Lovelace");
    assert_eq!(json["feedbackText"], "Feedback a");
}

#[test]
fn normalize_password_strips_only_line_endings() {
    assert_eq!(normalize_password(" secret \r\n").unwrap(), " secret ");
    assert!(matches!(
        normalize_password("\n"),
        Err(CliError::EmptyPassword)
    ));
}

#[test]
fn encoded_password_hash_verifies() {
    let encoded = encode_password_hash("hunter2", 4).unwrap();
    let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
    assert!(bcrypt::verify("hunter2", &decoded).unwrap());
    assert!(!bcrypt::verify("hunter3", &decoded).unwrap());
}

#[test]
fn api_client_requires_http_url() {
    assert!(ApiClient::new("https://feedback.example.com/").is_ok());
    assert!(matches!(
        ApiClient::new("feedback.example.com"),
        Err(CliError::InvalidArgument(_))
    ));
}

#[test]
fn api_error_prefers_server_message() {
    let snapshot = api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        r#"{"success":false,"error":"Failed to fetch feedback","message":"boom"}"#,
    );
    assert_eq!(
        snapshot.to_string(),
        "API request failed with HTTP 500: Failed to fetch feedback: boom"
    );

    let unauthorized = api_error(StatusCode::UNAUTHORIZED, r#"{"error":"Unauthorized"}"#);
    assert!(unauthorized.is_unauthorized());
    assert_eq!(
        unauthorized.to_string(),
        "API request failed with HTTP 401: Unauthorized"
    );

    let empty = api_error(StatusCode::BAD_GATEWAY, "");
    assert_eq!(
        empty.to_string(),
        "API request failed with HTTP 502: Bad Gateway"
    );
}

#[test]
fn session_round_trips_and_clears() {
    let path = unique_session_path();
    let session = StoredSession::new("http://localhost:8080/", "token-1".to_string());
    session.save_to_path(&path).unwrap();

    let loaded = StoredSession::require_for(&path, "http://localhost:8080").unwrap();
    assert_eq!(loaded.token, "token-1");
    assert_eq!(loaded.api_url, "http://localhost:8080");

    assert!(matches!(
        StoredSession::require_for(&path, "https://elsewhere.example.com"),
        Err(CliError::NotLoggedIn(_))
    ));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    assert!(clear_session_at(&path).unwrap());
    assert!(!clear_session_at(&path).unwrap());
    assert!(StoredSession::load_from_path(&path).unwrap().is_none());

    if let Some(parent) = path.parent() {
        let _ = std::fs::remove_dir(parent);
    }
}

#[test]
fn session_debug_redacts_token() {
    let session = StoredSession::new("http://localhost:8080", "super-secret".to_string());
    let rendered = format!("{session:?}");
    assert!(!rendered.contains("super-secret"));
    assert!(rendered.contains("[REDACTED]"));
}

fn unique_session_path() -> PathBuf {
    static NEXT_TEST_SESSION_ID: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let sequence = NEXT_TEST_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
        .join(format!("feedwatch-cli-test-{timestamp}-{sequence}"))
        .join("session.json")
}
