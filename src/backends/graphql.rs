use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::traits::{Backend, PagePuller, PageResult};
use crate::constants::{
    GRAPHQL_PAGE_SIZE_MAX, GRAPHQL_PAGE_SIZE_MIN, GRAPHQL_POSTS_QUERY_HASH, GRAPHQL_QUERY_PATH,
    IG_APP_ID,
};
use crate::error::FetchError;
use crate::identity::UserId;
use crate::record::{PostFields, PostRecord};
use crate::session::Session;

/// Pages through a public profile's timeline via the GraphQL query endpoint.
///
/// HTTP 401 from this backend is a soft block: the retry controller answers it by
/// rotating the session.
pub struct GraphQlPuller {
    endpoint: String,
    referer: String,
    user_id: UserId,
}

impl GraphQlPuller {
    #[must_use]
    pub fn new(base_url: &str, user_id: UserId) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            endpoint: format!("{base}{GRAPHQL_QUERY_PATH}"),
            referer: format!("{base}/"),
            user_id,
        }
    }
}

#[async_trait]
impl PagePuller for GraphQlPuller {
    fn backend(&self) -> Backend {
        Backend::GraphQl
    }

    fn page_size_hint(&self, max_results: usize) -> usize {
        let size = rand::thread_rng().gen_range(GRAPHQL_PAGE_SIZE_MIN..=GRAPHQL_PAGE_SIZE_MAX);
        size.min(max_results).max(1)
    }

    async fn fetch_page(
        &self,
        session: &Session,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<PageResult, FetchError> {
        let variables = json!({
            "id": self.user_id.as_str(),
            "first": page_size,
            "after": cursor,
        })
        .to_string();

        debug!(
            user_id = %self.user_id,
            page_size,
            cursor = ?cursor,
            "Fetching GraphQL page"
        );

        let response = session
            .client()
            .get(&self.endpoint)
            .query(&[
                ("query_hash", GRAPHQL_POSTS_QUERY_HASH),
                ("variables", variables.as_str()),
            ])
            .header("x-requested-with", "XMLHttpRequest")
            .header("x-ig-app-id", IG_APP_ID)
            .header(header::ACCEPT, "*/*")
            .header(header::REFERER, &self.referer)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(FetchError::Unauthorized { soft_block: true }),
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            status if !status.is_success() => {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let body = response.text().await?;
        parse_graphql_page(&body)
    }
}

/// Parse a GraphQL timeline response.
///
/// Malformed individual edges are logged and skipped; only a broken envelope fails the page.
///
/// # Errors
///
/// Returns [`FetchError::Parse`] if the body is not JSON or lacks the timeline object.
pub fn parse_graphql_page(body: &str) -> Result<PageResult, FetchError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::Parse(format!("GraphQL body is not JSON: {e}")))?;

    let media = root
        .pointer("/data/user/edge_owner_to_timeline_media")
        .filter(|v| v.is_object())
        .ok_or_else(|| {
            FetchError::Parse("missing data.user.edge_owner_to_timeline_media".to_string())
        })?;

    let edges = media
        .get("edges")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);

    let total_count = media.get("count").and_then(Value::as_u64);
    debug!(
        total_count = ?total_count,
        edges = edges.len(),
        "Parsing GraphQL page"
    );

    let records = edges
        .iter()
        .filter_map(|edge| match parse_node(edge.get("node")) {
            Ok(record) => Some(record),
            Err(reason) => {
                warn!(reason = %reason, "Skipping malformed GraphQL post");
                None
            }
        })
        .collect();

    let page_info = media.get("page_info");
    let has_next_page = page_info
        .and_then(|p| p.get("has_next_page"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let next_cursor = page_info
        .and_then(|p| p.get("end_cursor"))
        .and_then(Value::as_str)
        .filter(|c| has_next_page && !c.is_empty())
        .map(ToString::to_string);

    Ok(PageResult {
        records,
        next_cursor,
    })
}

fn parse_node(node: Option<&Value>) -> Result<PostRecord, String> {
    let node = node
        .filter(|n| n.is_object())
        .ok_or_else(|| "edge has no node object".to_string())?;

    let id = match node.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err("node has no id".to_string()),
    };

    let caption = node
        .pointer("/edge_media_to_caption/edges/0/node/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let (timestamp, timestamp_defaulted) = match node.get("taken_at_timestamp") {
        None | Some(Value::Null) => {
            warn!(post_id = %id, "GraphQL post has no taken_at_timestamp, defaulting to epoch");
            (DateTime::<Utc>::UNIX_EPOCH, true)
        }
        Some(value) => {
            let secs = value
                .as_i64()
                .ok_or_else(|| format!("post {id} has a non-integer taken_at_timestamp"))?;
            let ts = DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| format!("post {id} has an out-of-range timestamp {secs}"))?;
            (ts, false)
        }
    };

    let like_count = node
        .pointer("/edge_media_preview_like/count")
        .or_else(|| node.pointer("/edge_liked_by/count"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let comment_count = node
        .pointer("/edge_media_to_comment/count")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Ok(PostRecord::from(PostFields {
        id,
        caption,
        timestamp,
        timestamp_defaulted,
        like_count,
        comment_count,
        media_type: string_field(node, "__typename"),
        url: string_field(node, "display_url"),
        location: node
            .pointer("/location/name")
            .and_then(Value::as_str)
            .map(ToString::to_string),
    }))
}

fn string_field(node: &Value, key: &str) -> String {
    node.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
