//! Username to backend user-id resolution.

use std::fmt;

use regex::Regex;
use reqwest::header;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::FetchError;
use crate::session::Session;

static USER_ID_TOKEN: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r#""user_id":"(\d+)""#).unwrap());

static GENERIC_ID_TOKEN: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r#""id":"(\d+)""#).unwrap());

static SHARED_DATA_BLOCK: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"(?s)window\._sharedData = (\{.*?\});").unwrap()
});

static ADDITIONAL_DATA_BLOCK: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"(?s)window\.__additionalDataLoaded\([^)]+,\s*(\{.*?\})\);").unwrap()
});

/// Opaque numeric identifier of a profile on the GraphQL backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Wrap `raw` if it is a non-empty run of ASCII digits.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        (!raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())).then(|| Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One way of pulling a user id out of a profile page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// `"user_id":"<digits>"`
    UserIdToken,
    /// `"id":"<digits>"`; can collide with unrelated numeric fields.
    GenericIdToken,
    /// `window._sharedData = {...};` then `entry_data.ProfilePage[0].graphql.user.id`.
    SharedData,
    /// `window.__additionalDataLoaded(..., {...});` then `graphql.user.id`.
    AdditionalDataLoaded,
}

impl IdStrategy {
    /// Most specific first. The first strategy that yields a usable id wins.
    pub const ORDERED: [Self; 4] = [
        Self::UserIdToken,
        Self::GenericIdToken,
        Self::SharedData,
        Self::AdditionalDataLoaded,
    ];

    /// Apply this strategy to raw page text.
    #[must_use]
    pub fn extract(self, html: &str) -> Option<UserId> {
        match self {
            Self::UserIdToken => capture(&USER_ID_TOKEN, html).and_then(UserId::parse),
            Self::GenericIdToken => capture(&GENERIC_ID_TOKEN, html).and_then(UserId::parse),
            Self::SharedData => {
                let block: Value = serde_json::from_str(capture(&SHARED_DATA_BLOCK, html)?).ok()?;
                id_from_value(block.pointer("/entry_data/ProfilePage/0/graphql/user/id")?)
            }
            Self::AdditionalDataLoaded => {
                let block: Value =
                    serde_json::from_str(capture(&ADDITIONAL_DATA_BLOCK, html)?).ok()?;
                id_from_value(block.pointer("/graphql/user/id")?)
            }
        }
    }
}

fn capture<'a>(pattern: &Regex, html: &'a str) -> Option<&'a str> {
    pattern
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn id_from_value(value: &Value) -> Option<UserId> {
    match value {
        Value::String(s) => UserId::parse(s),
        Value::Number(n) => n.as_u64().and_then(|n| UserId::parse(&n.to_string())),
        _ => None,
    }
}

/// Run the ordered strategy list against `html`.
#[must_use]
pub fn extract_user_id(html: &str) -> Option<(IdStrategy, UserId)> {
    IdStrategy::ORDERED
        .into_iter()
        .find_map(|strategy| strategy.extract(html).map(|id| (strategy, id)))
}

/// Resolves usernames by scanning the profile page.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    base_url: String,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the profile page for `username` and extract its user id.
    ///
    /// Uses the session's cookie-less client, so the session jar is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::IdentityNotFound`] when the profile is missing or no strategy
    /// matches, and a retryable kind for transport or throttling failures.
    pub async fn resolve(&self, username: &str, session: &Session) -> Result<UserId, FetchError> {
        let url = format!("{}/{username}/", self.base_url);
        debug!(username = %username, url = %url, "Resolving user id");

        let response = session
            .detached()
            .get(&url)
            .header(header::REFERER, format!("{}/", self.base_url))
            .header("sec-fetch-site", "same-origin")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(FetchError::IdentityNotFound {
                    username: username.to_string(),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            StatusCode::UNAUTHORIZED => return Err(FetchError::Unauthorized { soft_block: true }),
            status if !status.is_success() => {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let html = response.text().await?;

        let (strategy, user_id) =
            extract_user_id(&html).ok_or_else(|| FetchError::IdentityNotFound {
                username: username.to_string(),
            })?;

        info!(username = %username, user_id = %user_id, strategy = ?strategy, "Resolved user id");
        Ok(user_id)
    }
}
