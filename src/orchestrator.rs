//! Pagination driver: turns a [`FetchRequest`] into an ordered list of posts.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backends::{Backend, GraphApiPuller, GraphQlPuller, PagePuller};
use crate::config::Config;
use crate::error::{FetchError, PartialFetch};
use crate::filter::filter_posts;
use crate::identity::IdentityResolver;
use crate::record::PostRecord;
use crate::retry::RetryController;
use crate::session::{Session, SessionFactory};

/// Default hard ceiling on returned records.
pub const DEFAULT_MAX_RESULTS: usize = 10_000;

/// Characters a profile handle may contain; it is placed verbatim in the profile URL path.
static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._]{1,30}$").unwrap());

/// How the fetched posts are selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMethod {
    All,
    /// The first `count` posts in backend order.
    Recent { count: usize },
    /// The top `percentage` percent of posts by likes + comments.
    Top { percentage: u8 },
    /// Posts with `since <= timestamp <= until`.
    DateRange {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

impl FetchMethod {
    /// Whether `record` can be part of the result at all. Only date ranges exclude
    /// records before the final selection.
    #[must_use]
    pub fn admits(&self, record: &PostRecord) -> bool {
        match self {
            Self::DateRange { since, until } => {
                !record.timestamp_defaulted()
                    && *since <= record.timestamp()
                    && record.timestamp() <= *until
            }
            _ => true,
        }
    }

    /// True once a newest-first page has reached posts older than the range.
    fn is_past_range(&self, page: &[PostRecord]) -> bool {
        match (self, page.last()) {
            (Self::DateRange { since, .. }, Some(oldest)) => {
                !oldest.timestamp_defaulted() && oldest.timestamp() < *since
            }
            _ => false,
        }
    }
}

/// Caller intent for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Required for [`Backend::GraphQl`]; the Graph API account comes from the credentials.
    pub target_username: Option<String>,
    pub backend: Backend,
    pub method: FetchMethod,
    pub max_results: usize,
}

impl FetchRequest {
    #[must_use]
    pub fn new(backend: Backend, method: FetchMethod) -> Self {
        Self {
            target_username: None,
            backend,
            method,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.target_username = Some(username.into());
        self
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Check the request invariants before any network call.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::UsernameRequired`] or [`FetchError::InvalidRequest`].
    pub fn validate(&self) -> Result<(), FetchError> {
        let username = self
            .target_username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());
        if self.backend == Backend::GraphQl {
            let Some(username) = username else {
                return Err(FetchError::UsernameRequired);
            };
            // A handle made only of dots would be read as a path segment like `..`.
            if !USERNAME_PATTERN.is_match(username) || username.chars().all(|c| c == '.') {
                return Err(FetchError::InvalidRequest(format!(
                    "invalid username '{username}': expected 1-30 letters, digits, '.' or '_'"
                )));
            }
        }
        if self.max_results == 0 {
            return Err(FetchError::InvalidRequest(
                "max_results must be at least 1".to_string(),
            ));
        }
        match &self.method {
            FetchMethod::Recent { count: 0 } => Err(FetchError::InvalidRequest(
                "recent count must be at least 1".to_string(),
            )),
            FetchMethod::Top { percentage } if *percentage == 0 || *percentage > 100 => {
                Err(FetchError::InvalidRequest(format!(
                    "top percentage must be in 1..=100, got {percentage}"
                )))
            }
            FetchMethod::DateRange { since, until } if since > until => {
                Err(FetchError::InvalidRequest(format!(
                    "date range start {since} is after its end {until}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Upper bound on records to accumulate.
    #[must_use]
    pub fn fetch_bound(&self) -> usize {
        match self.method {
            FetchMethod::Recent { count } => count.min(self.max_results),
            _ => self.max_results,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Pagination ran until the request was satisfied or the backend ran out of pages.
    Completed,
    /// The cancellation token fired; `records` holds what was accumulated by then.
    Cancelled,
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub records: Vec<PostRecord>,
    pub status: FetchStatus,
    pub pages_fetched: usize,
}

/// Composes identity resolution, page pulling and retry policy for one request at a time.
///
/// Each call to [`FetchOrchestrator::run`] owns its own session and counters, so one
/// orchestrator can serve concurrent runs for different profiles.
pub struct FetchOrchestrator {
    config: Config,
    factory: SessionFactory,
    retry: RetryController,
}

impl FetchOrchestrator {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let factory = SessionFactory::new(config.request_timeout);
        let retry = RetryController::new(config.retry.clone(), factory.clone());
        Self {
            config,
            factory,
            retry,
        }
    }

    /// Fetch posts for `request`, stopping early if `cancel` fires between pages.
    ///
    /// # Errors
    ///
    /// Returns a [`PartialFetch`] carrying the terminal error and any records fetched
    /// before it.
    pub async fn run(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, PartialFetch> {
        request.validate()?;

        if cancel.is_cancelled() {
            return Ok(FetchReport {
                records: Vec::new(),
                status: FetchStatus::Cancelled,
                pages_fetched: 0,
            });
        }

        let mut session = self.factory.create_session()?;
        info!(
            backend = %request.backend,
            username = ?request.target_username,
            method = ?request.method,
            max_results = request.max_results,
            "Starting fetch"
        );

        let puller: Box<dyn PagePuller> = match request.backend {
            Backend::GraphQl => {
                let username = request
                    .target_username
                    .as_deref()
                    .map(str::trim)
                    .ok_or(FetchError::UsernameRequired)?;
                let resolver = IdentityResolver::new(&self.config.instagram_base_url);
                let resolver = &resolver;
                let user_id = self
                    .retry
                    .execute(&mut session, move |s| async move {
                        resolver.resolve(username, &s).await
                    })
                    .await?;
                Box::new(GraphQlPuller::new(&self.config.instagram_base_url, user_id))
            }
            Backend::GraphApi => {
                let credentials = self.config.graph_api.as_ref().ok_or_else(|| {
                    FetchError::InvalidRequest(
                        "Graph API credentials are not configured".to_string(),
                    )
                })?;
                Box::new(GraphApiPuller::new(
                    &self.config.graph_api_base_url,
                    credentials,
                ))
            }
        };

        self.paginate(request, puller.as_ref(), &mut session, cancel)
            .await
    }

    async fn paginate(
        &self,
        request: &FetchRequest,
        puller: &dyn PagePuller,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, PartialFetch> {
        let bound = request.fetch_bound();
        let mut accumulated: Vec<PostRecord> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut seen_cursors: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages_fetched = 0usize;
        let mut status = FetchStatus::Completed;

        loop {
            if cancel.is_cancelled() {
                status = FetchStatus::Cancelled;
                break;
            }

            let page_size = puller.page_size_hint(bound.saturating_sub(accumulated.len()));
            let cursor_ref = cursor.as_deref();
            let page = match self
                .retry
                .execute(session, move |s| async move {
                    puller.fetch_page(&s, cursor_ref, page_size).await
                })
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(
                        backend = %puller.backend(),
                        pages_fetched,
                        accumulated = accumulated.len(),
                        "Fetch failed: {e}"
                    );
                    return Err(PartialFetch::new(e, finish(request, accumulated)));
                }
            };
            pages_fetched += 1;

            let fetched = page.records.len();
            let past_range = request.method.is_past_range(&page.records);
            let mut new_posts = 0usize;
            for record in page.records {
                if !seen_ids.insert(record.id().to_string()) {
                    debug!(post_id = %record.id(), "Skipping duplicate post");
                    continue;
                }
                new_posts += 1;
                if request.method.admits(&record) {
                    accumulated.push(record);
                }
            }

            info!(
                page = pages_fetched,
                fetched,
                new_posts,
                accumulated = accumulated.len(),
                has_next = page.next_cursor.is_some(),
                "Fetched page"
            );

            let Some(next_cursor) = page.next_cursor else {
                break;
            };
            if accumulated.len() >= bound {
                debug!(bound, "Request satisfied");
                break;
            }
            if past_range {
                debug!("Reached posts older than the requested range");
                break;
            }
            if fetched == 0 {
                warn!("Backend returned an empty page with a cursor, stopping");
                break;
            }
            if new_posts == 0 {
                warn!(cursor = %next_cursor, "Page contained only posts already seen, stopping");
                break;
            }
            if !seen_cursors.insert(next_cursor.clone()) {
                warn!(cursor = %next_cursor, "Backend repeated a cursor, stopping");
                break;
            }
            cursor = Some(next_cursor);

            tokio::select! {
                () = tokio::time::sleep(self.config.page_delay) => {}
                () = cancel.cancelled() => {
                    status = FetchStatus::Cancelled;
                    break;
                }
            }
        }

        if status == FetchStatus::Cancelled {
            info!(
                accumulated = accumulated.len(),
                pages_fetched,
                "Fetch cancelled"
            );
        }

        let records = finish(request, accumulated);
        info!(
            returned = records.len(),
            pages_fetched,
            status = ?status,
            "Fetch finished"
        );

        Ok(FetchReport {
            records,
            status,
            pages_fetched,
        })
    }
}

/// Truncate to the request bound and apply the method's selection.
fn finish(request: &FetchRequest, mut records: Vec<PostRecord>) -> Vec<PostRecord> {
    records.truncate(request.fetch_bound());
    filter_posts(&request.method, records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_graphql_requires_username() {
        let request = FetchRequest::new(Backend::GraphQl, FetchMethod::All);
        assert!(matches!(request.validate(), Err(FetchError::UsernameRequired)));

        let request = request.with_username("   ");
        assert!(matches!(request.validate(), Err(FetchError::UsernameRequired)));

        let graph_api = FetchRequest::new(Backend::GraphApi, FetchMethod::All);
        assert!(graph_api.validate().is_ok());
    }

    #[test]
    fn test_username_must_be_a_plain_handle() {
        for username in [
            "someone/../nasa",
            "..",
            ".",
            "nasa?x=1",
            "nasa#frag",
            "na sa",
            "a_very_long_handle_that_exceeds_thirty",
        ] {
            let request =
                FetchRequest::new(Backend::GraphQl, FetchMethod::All).with_username(username);
            assert!(
                matches!(request.validate(), Err(FetchError::InvalidRequest(_))),
                "accepted {username}"
            );
        }

        for username in ["nasa", "john.doe_99", " padded "] {
            let request =
                FetchRequest::new(Backend::GraphQl, FetchMethod::All).with_username(username);
            assert!(request.validate().is_ok(), "rejected {username}");
        }
    }

    #[test]
    fn test_method_invariants() {
        let base = FetchRequest::new(Backend::GraphApi, FetchMethod::All);

        for method in [
            FetchMethod::Recent { count: 0 },
            FetchMethod::Top { percentage: 0 },
            FetchMethod::Top { percentage: 101 },
            FetchMethod::DateRange {
                since: ts(200),
                until: ts(100),
            },
        ] {
            let request = FetchRequest {
                method,
                ..base.clone()
            };
            assert!(matches!(
                request.validate(),
                Err(FetchError::InvalidRequest(_))
            ));
        }

        let same_instant = FetchRequest {
            method: FetchMethod::DateRange {
                since: ts(100),
                until: ts(100),
            },
            ..base.clone()
        };
        assert!(same_instant.validate().is_ok());

        let zero_max = base.with_max_results(0);
        assert!(matches!(
            zero_max.validate(),
            Err(FetchError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_fetch_bound() {
        let recent = FetchRequest::new(Backend::GraphApi, FetchMethod::Recent { count: 10 });
        assert_eq!(recent.fetch_bound(), 10);
        assert_eq!(recent.clone().with_max_results(4).fetch_bound(), 4);

        let top = FetchRequest::new(Backend::GraphApi, FetchMethod::Top { percentage: 20 })
            .with_max_results(300);
        assert_eq!(top.fetch_bound(), 300);
    }
}
