use std::time::Duration;

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use feedwatch_core::util::sanitize;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

pub const SERVER_CONFIGURATION_ERROR: &str = "Server configuration error";
pub const INVALID_PASSWORD: &str = "Invalid password";

/// Checks the shared operator password against the configured bcrypt hash.
#[derive(Clone)]
pub struct PasswordVerifier {
    encoded_hash: Option<String>,
}

impl PasswordVerifier {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            encoded_hash: config.admin_password_hash.clone(),
        }
    }

    pub const fn is_configured(&self) -> bool {
        self.encoded_hash.is_some()
    }

    /// `Ok(false)` on mismatch; a missing or unreadable hash is a server
    /// configuration error.
    pub async fn verify(&self, password: &str) -> Result<bool, AppError> {
        let encoded = self
            .encoded_hash
            .as_deref()
            .ok_or_else(|| AppError::config(SERVER_CONFIGURATION_ERROR))?;
        let hash = decode_password_hash(encoded)?;
        let password = password.to_string();

        // CPU-bound; run it off the async workers.
        let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|error| AppError::internal(format!("Password check aborted: {error}")))?;

        outcome.map_err(|error| {
            tracing::error!(error = %error, "ADMIN_PASSWORD_HASH is not a valid bcrypt hash");
            AppError::config(SERVER_CONFIGURATION_ERROR)
        })
    }
}

fn decode_password_hash(encoded: &str) -> Result<String, AppError> {
    let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|_| {
        tracing::error!("ADMIN_PASSWORD_HASH is not valid base64");
        AppError::config(SERVER_CONFIGURATION_ERROR)
    })?;
    String::from_utf8(bytes).map_err(|_| {
        tracing::error!("ADMIN_PASSWORD_HASH does not decode to text");
        AppError::config(SERVER_CONFIGURATION_ERROR)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub authenticated: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and validates HS256 session tokens.
#[derive(Clone)]
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, config.session_ttl)
    }

    pub fn issue(&self) -> Result<String, AppError> {
        self.issue_at(chrono::Utc::now().timestamp())
    }

    fn issue_at(&self, issued_at: i64) -> Result<String, AppError> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = SessionClaims {
            authenticated: true,
            iat: issued_at,
            exp: issued_at.saturating_add(ttl),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|error| AppError::internal(format!("Token signing failed: {}", sanitize(&error))))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AppError> {
        let validation = Validation::new(Algorithm::HS256);
        let decoded = decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;
        if !decoded.claims.authenticated {
            return Err(AppError::unauthorized("Token is not an operator session"));
        }
        Ok(decoded.claims)
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[cfg(test)]
pub(crate) fn encoded_hash_for(password: &str) -> String {
    // Minimum cost keeps the tests fast.
    let hash = bcrypt::hash(password, 4).unwrap();
    STANDARD.encode(hash)
}
