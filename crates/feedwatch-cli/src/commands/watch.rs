//! Live feed: initial page, then the push connection with automatic
//! reconnects until interrupted.

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use colored::Colorize;
use feedwatch_core::events::EventStreamDecoder;
use feedwatch_core::filter::FeedbackFilter;
use feedwatch_core::reconcile::{
    EventOutcome, FeedReconciler, ReconnectDecision, RECONNECT_BACKOFF,
};
use feedwatch_core::util::sanitize;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::client::FeedTransport;
use crate::commands::common::{authorized_client, format_feedback_line, EMPTY_FEED_MESSAGE};
use crate::error::CliError;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub limit: usize,
    pub filter: FeedbackFilter,
    pub backoff: Duration,
}

impl WatchOptions {
    pub const fn new(limit: usize, filter: FeedbackFilter) -> Self {
        Self {
            limit,
            filter,
            backoff: RECONNECT_BACKOFF,
        }
    }
}

pub async fn run_watch(
    api_url: &str,
    limit: usize,
    filter: FeedbackFilter,
    session_path: &Path,
) -> Result<(), CliError> {
    let client = authorized_client(api_url, session_path)?;
    let options = WatchOptions::new(limit, filter);

    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    spawn_seen_reader(seen_tx);

    let shutdown = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let mut stdout = io::stdout();
    let feed = watch_feed(&client, &options, shutdown, seen_rx, &mut stdout).await?;
    println!(
        "Stopped watching ({} records, {} unread)",
        feed.records().len(),
        feed.new_records().len()
    );
    Ok(())
}

/// Every line on stdin (the operator pressing Enter) marks the feed as seen.
fn spawn_seen_reader(seen: mpsc::UnboundedSender<()>) {
    // Plain thread: a blocking stdin read would otherwise hold up runtime shutdown.
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            if line.is_err() || seen.send(()).is_err() {
                break;
            }
        }
    });
}

/// Drive one watch session until `shutdown` resolves.
///
/// A rejected session (HTTP 401) ends the session with an error; any other
/// connection failure is retried after `options.backoff`.
pub async fn watch_feed<T, F, W>(
    transport: &T,
    options: &WatchOptions,
    shutdown: F,
    mut seen: mpsc::UnboundedReceiver<()>,
    out: &mut W,
) -> Result<FeedReconciler, CliError>
where
    T: FeedTransport + ?Sized,
    F: Future<Output = ()>,
    W: Write,
{
    let mut feed = FeedReconciler::new().with_backoff(options.backoff);
    tokio::pin!(shutdown);

    let snapshot = tokio::select! {
        biased;
        () = &mut shutdown => {
            feed.teardown();
            return Ok(feed);
        }
        result = transport.snapshot(options.limit) => result,
    };
    match snapshot {
        Ok(records) => {
            feed.load_snapshot(records);
            render_snapshot(out, &feed, &options.filter)?;
        }
        Err(error) if error.is_unauthorized() => {
            feed.teardown();
            return Err(error);
        }
        Err(error) => {
            tracing::warn!(error = %error, "Failed to load initial feedback");
            feed.load_failed(sanitize(&error));
            writeln!(out, "{}", format!("Failed to load feedback: {error}").red())?;
        }
    }

    'session: loop {
        let since = feed.watermark();
        let connected = tokio::select! {
            biased;
            () = &mut shutdown => break 'session,
            result = transport.connect(since) => result,
        };

        match connected {
            Ok(mut stream) => {
                tracing::debug!(?since, "Push connection opened");
                feed.connection_opened();
                render_status(out, &feed)?;

                let mut decoder = EventStreamDecoder::new();
                loop {
                    tokio::select! {
                        biased;
                        () = &mut shutdown => break 'session,
                        Some(()) = seen.recv() => {
                            feed.mark_seen();
                            render_status(out, &feed)?;
                        }
                        chunk = stream.next() => match chunk {
                            Some(Ok(bytes)) => {
                                for payload in decoder.push(&bytes) {
                                    let outcome = feed.handle_payload(&payload);
                                    render_outcome(out, &feed, &options.filter, &outcome)?;
                                }
                            }
                            Some(Err(error)) => {
                                tracing::warn!(error = %error, "Push connection failed");
                                break;
                            }
                            None => {
                                tracing::debug!("Push connection closed by server");
                                break;
                            }
                        },
                    }
                }
            }
            Err(error) if error.is_unauthorized() => {
                feed.teardown();
                return Err(error);
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to open push connection");
            }
        }

        let delay = match feed.connection_lost() {
            ReconnectDecision::Schedule(delay) => delay,
            ReconnectDecision::AlreadyPending => continue,
            ReconnectDecision::TornDown => break,
        };
        render_status(out, &feed)?;

        let backoff = tokio::time::sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break 'session,
                Some(()) = seen.recv() => {
                    feed.mark_seen();
                }
                () = &mut backoff => break,
            }
        }

        // The stream above has been dropped, so the old connection is closed.
        if !feed.reconnect_due(true) {
            break;
        }
    }

    feed.teardown();
    Ok(feed)
}

fn render_snapshot<W: Write>(
    out: &mut W,
    feed: &FeedReconciler,
    filter: &FeedbackFilter,
) -> io::Result<()> {
    let lines = visible_lines(feed, feed.records().len(), filter);
    if lines.is_empty() {
        writeln!(out, "{EMPTY_FEED_MESSAGE}")?;
        return Ok(());
    }

    // Oldest first so the newest record sits just above the prompt.
    for line in lines.iter().rev() {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

fn render_outcome<W: Write>(
    out: &mut W,
    feed: &FeedReconciler,
    filter: &FeedbackFilter,
    outcome: &EventOutcome,
) -> io::Result<()> {
    match outcome {
        EventOutcome::Merged(added) if *added > 0 => {
            let lines = visible_lines(feed, *added, filter);
            if lines.len() < *added {
                tracing::debug!(hidden = *added - lines.len(), "New feedback hidden by filter");
            }
            for line in lines.iter().rev() {
                writeln!(out, "{line}")?;
            }
            if !lines.is_empty() {
                render_status(out, feed)?;
            }
            Ok(())
        }
        EventOutcome::UpstreamError(message) => {
            writeln!(out, "{}", format!("Server error: {message}").yellow())
        }
        EventOutcome::Greeted | EventOutcome::Merged(_) | EventOutcome::Dropped => Ok(()),
    }
}

/// Rendered lines for the newest `count` records that pass `filter`, newest
/// first, marked by the reconciler's unread state.
fn visible_lines(feed: &FeedReconciler, count: usize, filter: &FeedbackFilter) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    feed.records()
        .iter()
        .enumerate()
        .take(count)
        .filter(|(_, record)| filter.matches(record))
        .map(|(index, record)| format_feedback_line(record, now_ms, feed.is_new(index)))
        .collect()
}

fn render_status<W: Write>(out: &mut W, feed: &FeedReconciler) -> io::Result<()> {
    let indicator = if feed.is_live() {
        "● live".green().to_string()
    } else {
        "● disconnected".red().to_string()
    };
    let unread = if feed.unread() > 0 {
        format!("  {} new (press Enter to mark seen)", feed.unread())
    } else {
        String::new()
    };

    match feed.error() {
        Some(error) if !feed.is_live() => writeln!(out, "{indicator}{unread}  {}", error.dimmed()),
        _ => writeln!(out, "{indicator}{unread}"),
    }
}

