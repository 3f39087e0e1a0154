//! Data source configuration.
//!
//! Resolves the Cosmos DB account, database and container used by the
//! feedback source. Credentials come either as an endpoint/key pair or as a
//! single connection string; the explicit pair wins when both are present.

use std::fmt;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_DATABASE_NAME: &str = "teams-bot-db";
const DEFAULT_CONTAINER_NAME: &str = "teams-bot-feedback";

/// Connection settings for the feedback document collection.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub endpoint: String,
    pub key: String,
    pub database: String,
    pub container: String,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SourceConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &"[REDACTED]")
            .field("database", &self.database)
            .field("container", &self.container)
            .finish()
    }
}

impl SourceConfig {
    /// Returns `Ok(None)` when no credential variable is set at all.
    pub fn optional_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let any_set = ["COSMOS_DB_ENDPOINT", "COSMOS_DB_KEY", "COSMOS_DB_CONNECTION_STRING"]
            .into_iter()
            .any(|name| normalize_text_option(lookup(name)).is_some());
        if !any_set {
            return Ok(None);
        }
        Self::from_lookup(lookup).map(Some)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = normalize_text_option(lookup("COSMOS_DB_ENDPOINT"));
        let key = normalize_text_option(lookup("COSMOS_DB_KEY"));

        let (endpoint, key) = match (endpoint, key) {
            (Some(endpoint), Some(key)) => (endpoint, key),
            _ => {
                let connection_string = normalize_text_option(lookup("COSMOS_DB_CONNECTION_STRING"))
                    .ok_or_else(|| {
                        Error::Config(
                            "Cosmos DB configuration is missing. Set either COSMOS_DB_ENDPOINT and COSMOS_DB_KEY, or COSMOS_DB_CONNECTION_STRING".to_string(),
                        )
                    })?;
                parse_connection_string(&connection_string)?
            }
        };

        if !is_http_url(&endpoint) {
            return Err(Error::Config(
                "Cosmos DB endpoint must start with http:// or https://".to_string(),
            ));
        }

        let database = normalize_text_option(lookup("COSMOS_DB_DATABASE_NAME"))
            .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());
        let container = normalize_text_option(lookup("COSMOS_DB_CONTAINER_NAME"))
            .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string());

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key,
            database,
            container,
        })
    }
}

/// Split an `AccountEndpoint=...;AccountKey=...;` connection string.
fn parse_connection_string(raw: &str) -> Result<(String, String)> {
    let mut endpoint = None;
    let mut key = None;

    for part in raw.split(';') {
        // Keys are base64 and may end in `=`, so only split on the first one.
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "accountendpoint" => endpoint = normalize_text_option(Some(value.to_string())),
            "accountkey" => key = normalize_text_option(Some(value.to_string())),
            _ => {}
        }
    }

    let endpoint = endpoint.ok_or_else(|| {
        Error::Config("COSMOS_DB_CONNECTION_STRING is missing AccountEndpoint".to_string())
    })?;
    let key = key.ok_or_else(|| {
        Error::Config("COSMOS_DB_CONNECTION_STRING is missing AccountKey".to_string())
    })?;
    Ok((endpoint, key))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<SourceConfig> {
        SourceConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn missing_credentials_is_a_config_error() {
        let err = config_from(&HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("COSMOS_DB_CONNECTION_STRING"));
    }

    #[test]
    fn endpoint_and_key_pair_with_defaults() {
        let mut map = HashMap::new();
        map.insert("COSMOS_DB_ENDPOINT", "https://acct.documents.azure.com:443/");
        map.insert("COSMOS_DB_KEY", "c2VjcmV0");

        let config = config_from(&map).unwrap();
        assert_eq!(config.endpoint, "https://acct.documents.azure.com:443");
        assert_eq!(config.database, "teams-bot-db");
        assert_eq!(config.container, "teams-bot-feedback");
    }

    #[test]
    fn connection_string_keeps_base64_padding() {
        let mut map = HashMap::new();
        map.insert(
            "COSMOS_DB_CONNECTION_STRING",
            "AccountEndpoint=https://acct.documents.azure.com:443/;AccountKey=a2V5a2V5==;",
        );
        map.insert("COSMOS_DB_CONTAINER_NAME", "feedback");

        let config = config_from(&map).unwrap();
        assert_eq!(config.endpoint, "https://acct.documents.azure.com:443");
        assert_eq!(config.key, "a2V5a2V5==");
        assert_eq!(config.container, "feedback");
    }

    #[test]
    fn connection_string_requires_key() {
        let mut map = HashMap::new();
        map.insert(
            "COSMOS_DB_CONNECTION_STRING",
            "AccountEndpoint=https://acct.documents.azure.com:443/;",
        );
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("AccountKey"));
    }

    #[test]
    fn unset_source_is_optional() {
        let map: HashMap<&str, &str> = HashMap::new();
        let resolved =
            SourceConfig::optional_from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
                .unwrap();
        assert_eq!(resolved, None);

        let mut partial = HashMap::new();
        partial.insert("COSMOS_DB_ENDPOINT", "https://acct.documents.azure.com");
        let err = SourceConfig::optional_from_lookup(|key| {
            partial.get(key).map(|value| (*value).to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn debug_redacts_key() {
        let mut map = HashMap::new();
        map.insert("COSMOS_DB_ENDPOINT", "https://acct.documents.azure.com");
        map.insert("COSMOS_DB_KEY", "super-sensitive-key");

        let debug_output = format!("{:?}", config_from(&map).unwrap());
        assert!(!debug_output.contains("super-sensitive-key"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
