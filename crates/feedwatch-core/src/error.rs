//! Error types for feedwatch-core

use thiserror::Error;

/// Result type alias using feedwatch-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in feedwatch-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Data source credentials or settings are missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The data source rejected or failed a query
    #[error("Upstream query failed: {0}")]
    Upstream(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed event or response payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
