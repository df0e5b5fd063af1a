//! Profile post fetcher library.
//!
//! Retrieves a social profile's posts either through the credentialed Graph API
//! or by paging the public GraphQL endpoint with a browser-like session, and
//! normalizes them into [`PostRecord`]s selected by a [`FetchMethod`].

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod backends;
pub mod config;
pub mod constants;
pub mod error;
pub mod export;
pub mod filter;
pub mod identity;
pub mod orchestrator;
pub mod record;
pub mod retry;
pub mod session;

pub use backends::{Backend, GraphApiCredentials, PagePuller, PageResult};
pub use config::{Config, ConfigError};
pub use error::{FetchError, PartialFetch};
pub use orchestrator::{FetchMethod, FetchOrchestrator, FetchReport, FetchRequest, FetchStatus};
pub use record::PostRecord;
