//! Browser-like HTTP sessions.

use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::debug;

use crate::constants::USER_AGENTS;
use crate::error::FetchError;

/// Builds HTTP sessions with a randomized browser fingerprint.
///
/// The factory itself is read-only and can be shared between concurrent fetches.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    user_agents: &'static [&'static str],
    timeout: Duration,
}

impl SessionFactory {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_user_agents(USER_AGENTS, timeout)
    }

    #[must_use]
    pub fn with_user_agents(user_agents: &'static [&'static str], timeout: Duration) -> Self {
        Self {
            user_agents,
            timeout,
        }
    }

    /// Create an independent session with a freshly chosen user agent.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::SessionBuild`] if the HTTP client cannot be constructed.
    pub fn create_session(&self) -> Result<Session, FetchError> {
        self.build(0)
    }

    /// Discard `session` and return a new one with a newly randomized fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::SessionBuild`] if the HTTP client cannot be constructed.
    pub fn refresh(&self, session: &Session) -> Result<Session, FetchError> {
        let fresh = self.build(session.generation.saturating_add(1))?;
        debug!(
            generation = fresh.generation,
            user_agent = fresh.user_agent,
            "Rotated HTTP session"
        );
        Ok(fresh)
    }

    fn pick_user_agent(&self) -> &'static str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }

    fn build(&self, generation: u32) -> Result<Session, FetchError> {
        let user_agent = self.pick_user_agent();
        let headers = browser_headers();

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers.clone())
            .cookie_store(true)
            .timeout(self.timeout)
            .build()
            .map_err(FetchError::SessionBuild)?;

        let detached = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(self.timeout)
            .build()
            .map_err(FetchError::SessionBuild)?;

        Ok(Session {
            client,
            detached,
            user_agent,
            generation,
        })
    }
}

/// Standard headers an ordinary browser sends on a top-level navigation.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.5"),
    );
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate, br"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("document"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("none"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-user"),
        HeaderValue::from_static("?1"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers
}

/// One outbound HTTP session.
///
/// Cookies live only as long as the session. Cloning shares the underlying connection
/// pool and cookie jar.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    detached: Client,
    user_agent: &'static str,
    generation: u32,
}

impl Session {
    /// Client carrying this session's cookie jar.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Client with the same fingerprint but no cookie jar, for requests that must not
    /// leave state behind in the session.
    #[must_use]
    pub fn detached(&self) -> &Client {
        &self.detached
    }

    #[must_use]
    pub fn user_agent(&self) -> &'static str {
        self.user_agent
    }

    /// How many times this session lineage has been rotated.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}
