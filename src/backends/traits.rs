use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::record::PostRecord;
use crate::session::Session;

/// Upstream data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Unauthenticated GraphQL scrape of public profiles.
    GraphQl,
    /// Official credentialed Graph API; the account comes from the credentials.
    GraphApi,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GraphQl => f.write_str("graphql"),
            Self::GraphApi => f.write_str("graph_api"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "graphql" => Ok(Self::GraphQl),
            "graph_api" | "graph-api" | "graphapi" => Ok(Self::GraphApi),
            _ => Err(format!("must be 'graphql' or 'graph_api', got '{s}'")),
        }
    }
}

/// One backend response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageResult {
    pub records: Vec<PostRecord>,
    /// Present when more pages exist.
    pub next_cursor: Option<String>,
}

/// Fetches single pages from one backend.
///
/// Implementations make exactly one HTTP request per call and never retry or sleep;
/// that is left to [`crate::retry::RetryController`].
#[async_trait]
pub trait PagePuller: Send + Sync {
    fn backend(&self) -> Backend;

    /// Page size to request, never above `max_results`.
    fn page_size_hint(&self, max_results: usize) -> usize;

    /// Fetch the page after `cursor` (the first page when `None`).
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] classified by the backend's own semantics.
    async fn fetch_page(
        &self,
        session: &Session,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<PageResult, FetchError>;
}
