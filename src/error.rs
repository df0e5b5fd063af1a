use thiserror::Error;

use crate::record::PostRecord;

/// Failure kinds produced by the fetch engine.
///
/// Retryable kinds are absorbed by [`crate::retry::RetryController`]; callers only ever
/// observe a terminal kind or [`FetchError::RetriesExhausted`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status without a more specific meaning.
    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16 },

    /// HTTP 429.
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    /// HTTP 401. `soft_block` is true for the GraphQL backend, where it signals
    /// automation suspicion rather than a bad credential.
    #[error("unauthorized (HTTP 401, soft_block={soft_block})")]
    Unauthorized { soft_block: bool },

    /// The page envelope could not be parsed.
    #[error("malformed response: {0}")]
    Parse(String),

    #[error("no user id found for '{username}'")]
    IdentityNotFound { username: String },

    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("a target username is required for the GraphQL backend")]
    UsernameRequired,

    #[error("failed to build HTTP session: {0}")]
    SessionBuild(#[source] reqwest::Error),
}

impl FetchError {
    /// Whether the retry controller may attempt the call again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::HttpStatus { .. } | Self::RateLimited | Self::Parse(_) => {
                true
            }
            Self::Unauthorized { soft_block } => *soft_block,
            Self::IdentityNotFound { .. }
            | Self::RetriesExhausted { .. }
            | Self::InvalidRequest(_)
            | Self::UsernameRequired
            | Self::SessionBuild(_) => false,
        }
    }

    /// The innermost cause, looking through [`FetchError::RetriesExhausted`].
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A terminal failure together with the records accumulated before it happened.
#[derive(Debug, Error)]
#[error("{source} ({} records fetched before failure)", .partial.len())]
pub struct PartialFetch {
    #[source]
    pub source: FetchError,
    pub partial: Vec<PostRecord>,
}

impl PartialFetch {
    #[must_use]
    pub fn new(source: FetchError, partial: Vec<PostRecord>) -> Self {
        Self { source, partial }
    }
}

impl From<FetchError> for PartialFetch {
    fn from(source: FetchError) -> Self {
        Self::new(source, Vec::new())
    }
}
