//! HTTP request and response bodies shared by the API and its clients.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::FeedbackRecord;

/// Default page size of the snapshot endpoint.
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 50;

/// Successful snapshot body: `{success, data, count}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub success: bool,
    pub data: Vec<FeedbackRecord>,
    pub count: usize,
}

impl SnapshotResponse {
    #[must_use]
    pub fn new(data: Vec<FeedbackRecord>) -> Self {
        Self {
            success: true,
            count: data.len(),
            data,
        }
    }
}

/// Failed snapshot body: `{success: false, error, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFailure {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl SnapshotFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: "Failed to fetch feedback items".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LoginRequest")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub message: String,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LoginResponse")
            .field("success", &self.success)
            .field("token", &"[REDACTED]")
            .field("message", &self.message)
            .finish()
    }
}

/// Generic `{error}` body returned by failing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
