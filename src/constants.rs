//! Shared constants used across the fetch engine.

/// Desktop browser signatures a session picks its user agent from.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/119.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

/// Default host for profile pages and the GraphQL endpoint.
pub const DEFAULT_INSTAGRAM_BASE_URL: &str = "https://www.instagram.com";

/// Default Graph API `endpoint_base` (domain + version, trailing slash).
pub const DEFAULT_GRAPH_API_BASE_URL: &str = "https://graph.facebook.com/v21.0/";

/// Path of the GraphQL query endpoint, relative to the Instagram base URL.
pub const GRAPHQL_QUERY_PATH: &str = "/graphql/query/";

/// Query hash identifying "public posts by user id".
pub const GRAPHQL_POSTS_QUERY_HASH: &str = "472f257a40c653c64c666ce877d59d2b";

/// Web app id sent with GraphQL requests.
pub const IG_APP_ID: &str = "936619743392459";

/// Field list requested from the Graph API media edge.
pub const GRAPH_API_MEDIA_FIELDS: &str =
    "id,caption,media_type,media_url,permalink,thumbnail_url,timestamp,like_count,comments_count";

/// Largest page the Graph API accepts.
pub const GRAPH_API_MAX_PAGE_SIZE: usize = 100;

/// Bounds for the randomized GraphQL page-size hint.
pub const GRAPHQL_PAGE_SIZE_MIN: usize = 12;
pub const GRAPHQL_PAGE_SIZE_MAX: usize = 50;

/// Graph API error code for an invalid or expired access token.
pub const GRAPH_API_INVALID_TOKEN_CODE: i64 = 190;
