//! The social-network API capability.
//!
//! Collection code never talks to HTTP directly; it is handed a
//! [`SocialApi`] and pulls pages from the cursors it returns. The live
//! implementation is [`crate::twitter::TwitterClient`]; tests inject
//! scripted fakes.
//!
//! # Rate limits
//!
//! Every call may fail with [`ApiError::RateLimited`]. [`with_backoff`]
//! sleeps and retries the same call until it succeeds or fails with any
//! other error. Cursors keep their position across a failed call, so a
//! retried [`PageCursor::next_page`] resumes where it stopped.

use std::time::Duration;
use thiserror::Error;

use crate::models::{Tweet, User};

/// Most ids a single profile lookup accepts.
pub const MAX_LOOKUP_IDS: usize = 100;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode API response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited)
    }
}

/// A paginated result set, pulled one page at a time.
pub trait PageCursor {
    type Item;

    /// The next page, or `None` once the result set is exhausted.
    fn next_page(&mut self) -> Result<Option<Vec<Self::Item>>, ApiError>;
}

pub type TweetCursor<'a> = Box<dyn PageCursor<Item = Tweet> + 'a>;

/// Read access to tweets and profiles.
pub trait SocialApi {
    /// Tweets matching `query`, newest first.
    fn search(&self, query: &str) -> TweetCursor<'_>;

    /// Tweets posted by `user_id`, newest first.
    fn timeline(&self, user_id: u64) -> TweetCursor<'_>;

    /// Profiles for at most [`MAX_LOOKUP_IDS`] ids. Unknown or suspended
    /// ids are silently absent from the result.
    fn lookup_users(&self, ids: &[u64]) -> Result<Vec<User>, ApiError>;
}

/// Run `call` until it returns anything other than a rate-limit error,
/// sleeping `backoff` between attempts.
pub fn with_backoff<T>(
    backoff: Duration,
    what: &str,
    mut call: impl FnMut() -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    loop {
        match call() {
            Err(ApiError::RateLimited) => {
                tracing::warn!(
                    source = what,
                    backoff_secs = backoff.as_secs(),
                    "rate limit hit, going to sleep"
                );
                std::thread::sleep(backoff);
            }
            other => return other,
        }
    }
}

/// Pull pages from `cursor`, handing each to `visit`.
///
/// With `single_page` set only the first page is read. Returns the number
/// of pages visited. API errors other than rate limits are returned as
/// [`ApiError`] inside the `anyhow::Error`, so callers can tell them apart
/// from failures raised by `visit`.
pub fn for_each_page<T>(
    cursor: &mut dyn PageCursor<Item = T>,
    backoff: Duration,
    what: &str,
    single_page: bool,
    mut visit: impl FnMut(Vec<T>) -> anyhow::Result<()>,
) -> anyhow::Result<usize> {
    let mut pages = 0;
    while let Some(page) = with_backoff(backoff, what, || cursor.next_page())? {
        pages += 1;
        tracing::debug!(source = what, page = pages, items = page.len(), "flipping page");
        visit(page)?;
        if single_page {
            break;
        }
    }
    Ok(pages)
}
