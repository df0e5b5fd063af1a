use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use super::traits::{Backend, PagePuller, PageResult};
use crate::constants::{
    GRAPH_API_INVALID_TOKEN_CODE, GRAPH_API_MAX_PAGE_SIZE, GRAPH_API_MEDIA_FIELDS,
};
use crate::error::FetchError;
use crate::record::{PostFields, PostRecord};
use crate::session::Session;

/// Access token plus the account whose media it can read.
#[derive(Clone, PartialEq, Eq)]
pub struct GraphApiCredentials {
    pub access_token: String,
    pub account_id: String,
}

impl fmt::Debug for GraphApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphApiCredentials")
            .field("access_token", &"<redacted>")
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Pages through the configured account's media edge on the Graph API.
///
/// There is no soft-block recovery here: a 401 (or Graph error 190) means the access
/// token itself is bad, so it is surfaced as a terminal error.
pub struct GraphApiPuller {
    endpoint: String,
    access_token: String,
}

impl GraphApiPuller {
    /// `base_url` is the versioned endpoint base, e.g. `https://graph.facebook.com/v21.0/`.
    #[must_use]
    pub fn new(base_url: &str, credentials: &GraphApiCredentials) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            endpoint: format!("{base}/{}/media", credentials.account_id),
            access_token: credentials.access_token.clone(),
        }
    }
}

#[async_trait]
impl PagePuller for GraphApiPuller {
    fn backend(&self) -> Backend {
        Backend::GraphApi
    }

    fn page_size_hint(&self, max_results: usize) -> usize {
        GRAPH_API_MAX_PAGE_SIZE.min(max_results).max(1)
    }

    async fn fetch_page(
        &self,
        session: &Session,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<PageResult, FetchError> {
        let limit = page_size.min(GRAPH_API_MAX_PAGE_SIZE).to_string();
        let mut params = vec![
            ("fields", GRAPH_API_MEDIA_FIELDS),
            ("access_token", self.access_token.as_str()),
            ("limit", limit.as_str()),
        ];
        if let Some(after) = cursor {
            params.push(("after", after));
        }

        debug!(limit = %limit, cursor = ?cursor, "Fetching Graph API page");

        let response = session
            .client()
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => return Err(FetchError::Unauthorized { soft_block: false }),
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                if graph_error_code(&body) == Some(GRAPH_API_INVALID_TOKEN_CODE) {
                    warn!("Graph API rejected the access token");
                    return Err(FetchError::Unauthorized { soft_block: false });
                }
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                });
            }
            status if !status.is_success() => {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let body = response.text().await?;
        parse_graph_api_page(&body)
    }
}

fn graph_error_code(body: &str) -> Option<i64> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .pointer("/error/code")
        .and_then(Value::as_i64)
}

/// Parse a Graph API media page.
///
/// Items that lack an id or a parseable timestamp are skipped.
///
/// # Errors
///
/// Returns [`FetchError::Parse`] if the body is not JSON or has no `data` array.
pub fn parse_graph_api_page(body: &str) -> Result<PageResult, FetchError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::Parse(format!("Graph API body is not JSON: {e}")))?;

    let items = root
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Parse("missing data array".to_string()))?;

    let records = items
        .iter()
        .filter_map(|item| match parse_item(item) {
            Ok(record) => Some(record),
            Err(reason) => {
                warn!(reason = %reason, "Skipping malformed Graph API post");
                None
            }
        })
        .collect();

    // `paging.next` is only present when another page exists.
    let next_cursor = root
        .get("paging")
        .filter(|p| p.get("next").and_then(Value::as_str).is_some())
        .and_then(|p| p.pointer("/cursors/after"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(ToString::to_string);

    Ok(PageResult {
        records,
        next_cursor,
    })
}

fn parse_item(item: &Value) -> Result<PostRecord, String> {
    let id = item
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "item has no id".to_string())?
        .to_string();

    let raw_timestamp = item
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("item {id} has no timestamp"))?;
    let timestamp = parse_graph_timestamp(raw_timestamp)
        .ok_or_else(|| format!("item {id} has an unparseable timestamp '{raw_timestamp}'"))?;

    let url = item
        .get("media_url")
        .or_else(|| item.get("thumbnail_url"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(PostRecord::from(PostFields {
        id,
        caption: item
            .get("caption")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        timestamp,
        timestamp_defaulted: false,
        like_count: item.get("like_count").and_then(Value::as_u64).unwrap_or(0),
        comment_count: item
            .get("comments_count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        media_type: item
            .get("media_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        url,
        location: None,
    }))
}

/// Graph API timestamps look like `2024-01-01T12:00:00+0000`; plain RFC 3339 is accepted too.
fn parse_graph_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
