use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use feedwatch_core::events::StreamEvent;
use feedwatch_core::source::FeedbackSource;
use feedwatch_core::wire::{
    LoginRequest, LoginResponse, SnapshotFailure, SnapshotResponse, DEFAULT_SNAPSHOT_LIMIT,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, PasswordVerifier, SessionSigner, INVALID_PASSWORD};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{client_key, LoginRateLimiter, RateLimitMetricsSnapshot};
use crate::stream::{push_loop, PushLoopConfig};

pub const MAX_SNAPSHOT_LIMIT: usize = 1_000;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    source: Option<Arc<dyn FeedbackSource>>,
    passwords: Arc<PasswordVerifier>,
    sessions: Arc<SessionSigner>,
    login_rate_limiter: Arc<LoginRateLimiter>,
    push: PushLoopConfig,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>, source: Option<Arc<dyn FeedbackSource>>) -> Self {
        let passwords = PasswordVerifier::from_config(&config);
        if !passwords.is_configured() {
            tracing::warn!("ADMIN_PASSWORD_HASH is not set; operator login will be refused");
        }
        Self {
            source,
            passwords: Arc::new(passwords),
            sessions: Arc::new(SessionSigner::from_config(&config)),
            login_rate_limiter: Arc::new(LoginRateLimiter::from_config(&config)),
            push: PushLoopConfig::from_config(&config),
            config,
        }
    }

    fn source(&self) -> Result<Arc<dyn FeedbackSource>, AppError> {
        self.source.clone().ok_or_else(|| {
            AppError::config(
                "Feedback source is not configured. Set COSMOS_DB_ENDPOINT and COSMOS_DB_KEY, or COSMOS_DB_CONNECTION_STRING",
            )
        })
    }
}

pub fn app_router(state: AppState) -> Router {
    let snapshot_routes = Router::new()
        .route("/api/feedback", get(list_feedback))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    let stream_routes = Router::new()
        .route("/api/feedback/stream", get(stream_feedback))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_stream_session,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/auth", post(login))
        .merge(snapshot_routes)
        .merge(stream_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    login_rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        login_rate_limit: state.login_rate_limiter.metrics_snapshot(),
    })
}

async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    state.sessions.verify(token)?;
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Like [`require_session`], but also accepts `?token=` since browser event
/// sources cannot set headers.
async fn require_stream_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match extract_bearer_token(request.headers()) {
        Ok(token) => {
            state.sessions.verify(token)?;
        }
        Err(header_error) => {
            let token = Query::<TokenQuery>::try_from_uri(request.uri())
                .ok()
                .and_then(|Query(query)| query.token)
                .filter(|token| !token.trim().is_empty())
                .ok_or(header_error)?;
            state.sessions.verify(token.trim())?;
        }
    }
    Ok(next.run(request).await)
}

async fn login(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    state
        .login_rate_limiter
        .check(&client_key(&headers))
        .await?;

    let password = payload
        .ok()
        .and_then(|Json(request)| request.password)
        .filter(|password| !password.is_empty())
        .ok_or_else(|| AppError::bad_request("Password required"))?;

    if !state.passwords.verify(&password).await? {
        tracing::info!("Rejected operator login");
        return Err(AppError::unauthorized(INVALID_PASSWORD));
    }

    let token = state.sessions.issue()?;
    tracing::info!("Issued operator session");
    Ok(Json(LoginResponse {
        success: true,
        token,
        message: "Authentication successful".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    limit: Option<String>,
}

async fn list_feedback(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Response, AppError> {
    let limit = parse_limit(query.limit.as_deref())?;

    let result = match state.source() {
        Ok(source) => source.fetch_recent(limit).await.map_err(AppError::from),
        Err(error) => Err(error),
    };

    match result {
        Ok(records) => Ok(Json(SnapshotResponse::new(records)).into_response()),
        Err(error) => {
            tracing::error!(error = %error, "Failed to fetch feedback snapshot");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SnapshotFailure::new(error.to_string())),
            )
                .into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    since: Option<String>,
}

async fn stream_feedback(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let since = parse_since(query.since.as_deref())?;
    let source = state.source()?;

    let events = push_loop(source, since, state.push).map(|event| Ok(to_sse_event(&event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &StreamEvent) -> Event {
    match event.to_json() {
        Ok(json) => Event::default().data(json),
        Err(error) => {
            tracing::error!(error = %error, "Failed to encode stream event");
            Event::default().comment("encoding failure")
        }
    }
}

fn parse_limit(raw: Option<&str>) -> Result<usize, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(DEFAULT_SNAPSHOT_LIMIT);
    };
    let limit = raw
        .parse::<usize>()
        .map_err(|_| AppError::bad_request("limit must be a non-negative integer"))?;
    Ok(limit.min(MAX_SNAPSHOT_LIMIT))
}

fn parse_since(raw: Option<&str>) -> Result<Option<i64>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| AppError::bad_request("since must be an integer"))
}
