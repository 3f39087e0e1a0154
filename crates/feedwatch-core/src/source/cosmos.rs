//! Cosmos DB (SQL API) feedback source over the REST gateway.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use super::FeedbackSource;
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::models::FeedbackRecord;
use crate::util::{compact_text, sanitize};

const API_VERSION: &str = "2018-12-31";
const QUERY_TIMEOUT_SECS: u64 = 15;
/// Upper bound on continuation pages followed for a single query.
const MAX_QUERY_PAGES: usize = 20;

// The REST gateway cannot serve cross-partition ORDER BY or TOP without a
// query plan, so ordering and limits are applied after the pages arrive.
const ALL_QUERY: &str = "SELECT * FROM c";
const SINCE_QUERY: &str = "SELECT * FROM c WHERE c._ts > @since";

/// Feedback source backed by a Cosmos DB container.
#[derive(Debug, Clone)]
pub struct CosmosSource {
    client: reqwest::Client,
    config: SourceConfig,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    parameters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<FeedbackRecord>,
}

#[derive(Debug, Deserialize)]
struct CosmosErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl CosmosSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        // Fail at construction rather than on the first query.
        STANDARD
            .decode(config.key.as_bytes())
            .map_err(|_| Error::Config("Cosmos DB key is not valid base64".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(QUERY_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, config })
    }

    fn resource_link(&self) -> String {
        format!(
            "dbs/{}/colls/{}",
            self.config.database, self.config.container
        )
    }

    fn docs_url(&self) -> String {
        format!("{}/{}/docs", self.config.endpoint, self.resource_link())
    }

    async fn query(&self, body: QueryBody<'_>) -> Result<Vec<FeedbackRecord>> {
        let mut records = Vec::new();
        let mut continuation: Option<String> = None;

        for _ in 0..MAX_QUERY_PAGES {
            let date = rfc1123_now();
            let token = authorization_token(
                "POST",
                "docs",
                &self.resource_link(),
                &date,
                &self.config.key,
            )?;

            let mut headers = HeaderMap::new();
            headers.insert("authorization", header_value(&token)?);
            headers.insert("x-ms-date", header_value(&date)?);
            headers.insert("x-ms-version", HeaderValue::from_static(API_VERSION));
            headers.insert("x-ms-documentdb-isquery", HeaderValue::from_static("True"));
            headers.insert(
                "x-ms-documentdb-query-enablecrosspartition",
                HeaderValue::from_static("True"),
            );
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/query+json"),
            );
            headers.insert("x-ms-max-item-count", HeaderValue::from_static("-1"));
            if let Some(token) = continuation.as_deref() {
                headers.insert("x-ms-continuation", header_value(token)?);
            }

            let response = self
                .client
                .post(self.docs_url())
                .headers(headers)
                .body(serde_json::to_vec(&body)?)
                .send()
                .await
                .map_err(|error| {
                    Error::Upstream(format!("Cosmos query request failed: {}", sanitize(&error)))
                })?;

            let status = response.status();
            continuation = response
                .headers()
                .get("x-ms-continuation")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .filter(|value| !value.is_empty());

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Upstream(parse_api_error(status.as_u16(), &body)));
            }

            let page = response.json::<QueryPage>().await.map_err(|error| {
                Error::Parse(format!("Cosmos query response parse failed: {}", sanitize(&error)))
            })?;
            records.extend(page.documents);

            if continuation.is_none() {
                return Ok(records);
            }
        }

        tracing::warn!(
            pages = MAX_QUERY_PAGES,
            returned = records.len(),
            "Cosmos query still had pages left; results are partial"
        );
        Ok(records)
    }
}

#[async_trait]
impl FeedbackSource for CosmosSource {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<FeedbackRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let body = QueryBody {
            query: ALL_QUERY,
            parameters: Vec::new(),
        };
        let records = newest_first(self.query(body).await?, Some(limit));
        tracing::debug!(limit, returned = records.len(), "Fetched recent feedback");
        Ok(records)
    }

    async fn fetch_since(&self, watermark: Option<i64>) -> Result<Vec<FeedbackRecord>> {
        let body = match watermark {
            Some(since) => QueryBody {
                query: SINCE_QUERY,
                parameters: vec![json!({ "name": "@since", "value": since })],
            },
            None => QueryBody {
                query: ALL_QUERY,
                parameters: Vec::new(),
            },
        };
        Ok(newest_first(self.query(body).await?, None))
    }
}

/// Order by `_ts` descending, keeping page order among equal values, and cap
/// at `limit`.
fn newest_first(mut records: Vec<FeedbackRecord>, limit: Option<usize>) -> Vec<FeedbackRecord> {
    records.sort_by(|left, right| right.sequence().cmp(&left.sequence()));
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    records
}

/// Build the master-key authorization header value for a request.
///
/// The signed payload is `verb\nresourceType\nresourceLink\ndate\n\n` with the
/// verb, resource type and date lowercased; the resource link keeps its case.
pub(crate) fn authorization_token(
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
    master_key: &str,
) -> Result<String> {
    let key = STANDARD
        .decode(master_key.as_bytes())
        .map_err(|_| Error::Config("Cosmos DB key is not valid base64".to_string()))?;
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );

    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|error| Error::Config(format!("Cosmos DB key rejected: {error}")))?;
    mac.update(payload.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let token = format!("type=master&ver=1.0&sig={signature}");
    Ok(urlencoding::encode(&token).into_owned())
}

fn rfc1123_now() -> String {
    rfc1123(Utc::now())
}

fn rfc1123(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::InvalidInput("header value contains invalid characters".to_string()))
}

fn parse_api_error(status: u16, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<CosmosErrorBody>(body) {
        if let Some(message) = payload.message {
            let code = payload.code.unwrap_or_else(|| "Error".to_string());
            return format!(
                "Cosmos query failed with HTTP {status} ({code}): {}",
                compact_text(&message)
            );
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("Cosmos query failed with HTTP {status}")
    } else {
        format!(
            "Cosmos query failed with HTTP {status}: {}",
            compact_text(trimmed)
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const TEST_KEY: &str = "ZmVlZHdhdGNoLXRlc3QtbWFzdGVyLWtleQ==";

    fn config() -> SourceConfig {
        SourceConfig {
            endpoint: "https://acct.documents.azure.com:443".to_string(),
            key: TEST_KEY.to_string(),
            database: "teams-bot-db".to_string(),
            container: "teams-bot-feedback".to_string(),
        }
    }

    #[test]
    fn rfc1123_date_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();
        assert_eq!(rfc1123(at), "Wed, 01 May 2024 10:15:00 GMT");
    }

    #[test]
    fn authorization_token_matches_reference_signature() {
        let token = authorization_token(
            "POST",
            "docs",
            "dbs/teams-bot-db/colls/teams-bot-feedback",
            "Wed, 01 May 2024 10:15:00 GMT",
            TEST_KEY,
        )
        .unwrap();
        assert_eq!(
            token,
            "type%3Dmaster%26ver%3D1.0%26sig%3DC0I8M8mwmuNp6qTK1DdCFX9je%2B%2B5xNycPrgr76CLpXY%3D"
        );
    }

    #[test]
    fn new_rejects_non_base64_key() {
        let mut bad = config();
        bad.key = "not base64 !!".to_string();
        let err = CosmosSource::new(bad).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn docs_url_targets_container() {
        let source = CosmosSource::new(config()).unwrap();
        assert_eq!(
            source.docs_url(),
            "https://acct.documents.azure.com:443/dbs/teams-bot-db/colls/teams-bot-feedback/docs"
        );
    }

    #[test]
    fn api_error_prefers_structured_message() {
        let body = r#"{"code":"BadRequest","message":"Syntax error near 'FROM'"}"#;
        assert_eq!(
            parse_api_error(400, body),
            "Cosmos query failed with HTTP 400 (BadRequest): Syntax error near 'FROM'"
        );
        assert_eq!(parse_api_error(503, "  "), "Cosmos query failed with HTTP 503");
    }

    fn stored(id: &str, ts: Option<i64>) -> FeedbackRecord {
        let record = FeedbackRecord::new(id, "n", "e", "t", "2024-05-01T00:00:00Z");
        match ts {
            Some(ts) => record.with_sequence(ts),
            None => record,
        }
    }

    #[test]
    fn queries_leave_ordering_to_the_client() {
        for query in [ALL_QUERY, SINCE_QUERY] {
            assert!(!query.contains("ORDER BY"), "{query}");
            assert!(!query.contains("TOP"), "{query}");
        }
    }

    #[test]
    fn newest_first_sorts_across_pages_and_truncates() {
        let pages = vec![
            stored("p1-old", Some(3)),
            stored("p1-new", Some(9)),
            stored("p2-mid", Some(5)),
            stored("p2-tie", Some(9)),
            stored("unsequenced", None),
        ];

        let ordered = newest_first(pages.clone(), None);
        let ids: Vec<&str> = ordered.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["p1-new", "p2-tie", "p2-mid", "p1-old", "unsequenced"]);

        let top = newest_first(pages, Some(2));
        let ids: Vec<&str> = top.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["p1-new", "p2-tie"]);
    }

    #[test]
    fn query_page_reads_documents() {
        let page: QueryPage = serde_json::from_str(
            r#"{"_rid":"x","Documents":[{"id":"1","userId":"u","userName":"n","userEmail":"e","feedbackText":"t","createdAt":"2024-05-01T00:00:00Z","_ts":5}],"_count":1}"#,
        )
        .unwrap();
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.documents[0].sequence(), Some(5));
    }
}
