//! HTTP client for the feedwatch API.

use std::time::Duration;

use async_trait::async_trait;
use feedwatch_core::util::{compact_text, is_http_url, sanitize};
use feedwatch_core::wire::{ErrorBody, LoginRequest, LoginResponse, SnapshotFailure, SnapshotResponse};
use feedwatch_core::FeedbackRecord;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;

use crate::error::CliError;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Raw body chunks of an open push connection.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, CliError>>;

/// What the watch driver needs from the server.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn snapshot(&self, limit: usize) -> Result<Vec<FeedbackRecord>, CliError>;

    async fn connect(&self, since: Option<i64>) -> Result<ByteStream, CliError>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, CliError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !is_http_url(&base_url) {
            return Err(CliError::InvalidArgument(
                "--api-url must start with http:// or https://".to_string(),
            ));
        }
        // No overall timeout: push connections stay open for minutes.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: None,
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.as_deref() {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Exchange the operator password for a session token.
    pub async fn login(&self, password: &str) -> Result<String, CliError> {
        let response = self
            .http
            .post(self.url("/api/auth"))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&LoginRequest {
                password: Some(password.to_string()),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let login = serde_json::from_str::<LoginResponse>(&body)?;
        Ok(login.token)
    }

    pub async fn fetch_snapshot(&self, limit: usize) -> Result<Vec<FeedbackRecord>, CliError> {
        let request = self
            .http
            .get(self.url("/api/feedback"))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .query(&[("limit", limit)]);
        let response = self.authorized(request).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let snapshot = serde_json::from_str::<SnapshotResponse>(&body)?;
        tracing::debug!(count = snapshot.count, "Fetched feedback snapshot");
        Ok(snapshot.data)
    }

    pub async fn open_stream(&self, since: Option<i64>) -> Result<ByteStream, CliError> {
        let mut request = self
            .http
            .get(self.url("/api/feedback/stream"))
            .header(ACCEPT, "text/event-stream");
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        let response = self.authorized(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(CliError::from))
            .boxed())
    }
}

#[async_trait]
impl FeedTransport for ApiClient {
    async fn snapshot(&self, limit: usize) -> Result<Vec<FeedbackRecord>, CliError> {
        self.fetch_snapshot(limit).await
    }

    async fn connect(&self, since: Option<i64>) -> Result<ByteStream, CliError> {
        self.open_stream(since).await
    }
}

/// Turn a failed response into an error, preferring the server's own message.
pub fn api_error(status: StatusCode, body: &str) -> CliError {
    let message = if let Ok(failure) = serde_json::from_str::<SnapshotFailure>(body) {
        format!("{}: {}", failure.error, compact_text(&failure.message))
    } else if let Ok(error) = serde_json::from_str::<ErrorBody>(body) {
        compact_text(&error.error)
    } else if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        sanitize(&compact_text(body))
    };

    CliError::Api {
        status: status.as_u16(),
        message,
    }
}
