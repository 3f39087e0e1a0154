//! Persisted operator session.
//!
//! The session token lives in `<config_dir>/feedwatch/session.json`. On unix
//! the file is created with mode `0600`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CliError;

const SESSION_FILE_NAME: &str = "session.json";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub api_url: String,
    pub token: String,
    /// Unix seconds
    pub created_at: i64,
}

impl fmt::Debug for StoredSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StoredSession")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

pub fn default_session_path() -> Result<PathBuf, CliError> {
    let base = dirs::config_dir()
        .ok_or_else(|| CliError::Config("Failed to resolve CLI config directory".to_string()))?;
    Ok(base.join("feedwatch").join(SESSION_FILE_NAME))
}

impl StoredSession {
    pub fn new(api_url: &str, token: String) -> Self {
        Self {
            api_url: normalize_api_url(api_url),
            token,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Option<Self>, CliError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let session = serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!(
                "Failed to parse session at {}: {}",
                path.display(),
                error
            ))
        })?;
        Ok(Some(session))
    }

    /// Load the session for `api_url`, failing when there is none.
    pub fn require_for(path: &Path, api_url: &str) -> Result<Self, CliError> {
        let wanted = normalize_api_url(api_url);
        match Self::load_from_path(path)? {
            Some(session) if session.api_url == wanted => Ok(session),
            Some(session) => {
                tracing::debug!(
                    stored = %session.api_url,
                    requested = %wanted,
                    "Stored session belongs to another API"
                );
                Err(CliError::NotLoggedIn(wanted))
            }
            None => Err(CliError::NotLoggedIn(wanted)),
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        write_private(path, serialized.as_bytes())?;
        Ok(())
    }
}

/// Remove the stored session. Returns whether one existed.
pub fn clear_session_at(path: &Path) -> Result<bool, CliError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error.into()),
    }
}

pub fn normalize_api_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}
