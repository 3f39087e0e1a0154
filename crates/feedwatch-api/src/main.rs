mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use feedwatch_core::source::{CosmosSource, FeedbackSource, MemorySource};
use feedwatch_core::FeedbackRecord;
use routes::{app_router, AppState};

const DEMO_APPEND_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("feedwatch_api=info".parse()?)
                .add_directive("feedwatch_core=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting feedwatch-api with config: {:?}", config);

    let source = build_source(&config)?;
    let state = AppState::from_config(config, source);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("feedwatch-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}

fn build_source(
    config: &AppConfig,
) -> Result<Option<Arc<dyn FeedbackSource>>, feedwatch_core::Error> {
    if config.demo_mode {
        tracing::info!("Demo mode: serving seeded in-memory feedback");
        let memory = Arc::new(MemorySource::demo());
        spawn_demo_feed(memory.clone());
        let source: Arc<dyn FeedbackSource> = memory;
        return Ok(Some(source));
    }

    match &config.source {
        Some(source_config) => {
            let source: Arc<dyn FeedbackSource> =
                Arc::new(CosmosSource::new(source_config.clone())?);
            Ok(Some(source))
        }
        None => {
            tracing::warn!(
                "No feedback source configured; feedback routes will fail until COSMOS_DB_* is set"
            );
            Ok(None)
        }
    }
}

const DEMO_SAMPLES: [(&str, &str, &str); 4] = [
    ("Margaret Hamilton", "margaret@example.com", "The reminder cards are very helpful."),
    ("Donald Knuth", "donald@example.com", "Found a typo in the welcome message."),
    ("Frances Allen", "frances@example.com", "Please add a way to mute notifications."),
    ("John Backus", "john@example.com", "Answers were accurate for my billing question."),
];

/// Sample appended on the `round`-th tick, counting from 1.
fn demo_sample(round: usize) -> (&'static str, &'static str, &'static str) {
    DEMO_SAMPLES[round.saturating_sub(1) % DEMO_SAMPLES.len()]
}

/// Periodically append sample feedback so the live stream has something to show.
fn spawn_demo_feed(source: Arc<MemorySource>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DEMO_APPEND_INTERVAL);
        ticker.tick().await;
        for round in 1_usize.. {
            ticker.tick().await;
            let (name, email, text) = demo_sample(round);
            let now = chrono::Utc::now();
            let record = FeedbackRecord::new(
                format!("demo-live-{round}"),
                name,
                email,
                text,
                now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            )
            .with_sequence(now.timestamp());
            let stored = source.append(record).await;
            tracing::debug!(id = %stored.id, "Appended demo feedback");
        }
    });
}
