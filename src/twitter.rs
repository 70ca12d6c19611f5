//! Twitter REST v1.1 client.
//!
//! Implements [`SocialApi`] over `reqwest::blocking` with OAuth 1.0a
//! user-context signing (HMAC-SHA1).
//!
//! # Credentials
//!
//! | Variable | OAuth parameter |
//! |----------|-----------------|
//! | `TWITTER_APP_PUBLIC` | consumer key |
//! | `TWITTER_APP_SECRET` | consumer secret |
//! | `TWITTER_PER_PUBLIC` | access token |
//! | `TWITTER_PER_SECRET` | access token secret |
//!
//! # Pagination
//!
//! Search and timeline results are walked backwards with `max_id`: each
//! request asks for tweets older than the oldest one already seen, until
//! an empty page comes back.

use anyhow::{Context, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use sha1::Sha1;
use std::time::Duration;

use crate::api::{ApiError, PageCursor, SocialApi, TweetCursor};
use crate::config::ApiConfig;
use crate::models::{Tweet, User};

type HmacSha1 = Hmac<Sha1>;

const SEARCH_ENDPOINT: &str = "search/tweets.json";
const TIMELINE_ENDPOINT: &str = "statuses/user_timeline.json";
const LOOKUP_ENDPOINT: &str = "users/lookup.json";

// ============ Credentials ============

/// OAuth 1.0a application and user credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: String,
    pub token_secret: String,
}

impl Credentials {
    /// Load all four keys from the environment.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).with_context(|| format!("{} environment variable not set", name))
        };
        Ok(Self {
            consumer_key: var("TWITTER_APP_PUBLIC")?,
            consumer_secret: var("TWITTER_APP_SECRET")?,
            token: var("TWITTER_PER_PUBLIC")?,
            token_secret: var("TWITTER_PER_SECRET")?,
        })
    }
}

// ============ Client ============

pub struct TwitterClient {
    http: Client,
    base_url: String,
    page_size: u32,
    credentials: Credentials,
}

impl TwitterClient {
    pub fn new(config: &ApiConfig, credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            credentials,
        })
    }

    /// Build a client from `config` and credentials in the environment.
    pub fn from_env(config: &ApiConfig) -> Result<Self> {
        Self::new(config, Credentials::from_env()?)
    }

    /// Signed GET returning the response body.
    fn get(&self, endpoint: &str, params: &[(String, String)]) -> Result<String, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let auth = authorization_header(
            &self.credentials,
            "GET",
            &url,
            params,
            &uuid::Uuid::new_v4().simple().to_string(),
            chrono::Utc::now().timestamp(),
        );
        let full_url = if params.is_empty() {
            url
        } else {
            format!("{}?{}", url, encode_params(params))
        };

        let response = self
            .http
            .get(&full_url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()?;
        let status = response.status();
        if is_rate_limit(status) {
            return Err(ApiError::RateLimited);
        }
        let body = response.text()?;
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn cursor(&self, source: TweetSource, params: Vec<(String, String)>) -> MaxIdCursor<'_> {
        MaxIdCursor {
            client: self,
            source,
            params,
            max_id: None,
            exhausted: false,
        }
    }
}

impl SocialApi for TwitterClient {
    fn search(&self, query: &str) -> TweetCursor<'_> {
        Box::new(self.cursor(
            TweetSource::Search,
            vec![
                ("q".to_string(), query.to_string()),
                ("include_entities".to_string(), "true".to_string()),
                ("count".to_string(), self.page_size.to_string()),
            ],
        ))
    }

    fn timeline(&self, user_id: u64) -> TweetCursor<'_> {
        Box::new(self.cursor(
            TweetSource::Timeline,
            vec![
                ("user_id".to_string(), user_id.to_string()),
                ("count".to_string(), self.page_size.to_string()),
            ],
        ))
    }

    fn lookup_users(&self, ids: &[u64]) -> Result<Vec<User>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        match self.get(LOOKUP_ENDPOINT, &[("user_id".to_string(), joined)]) {
            Ok(body) => Ok(serde_json::from_str(&body)?),
            // None of the ids resolved.
            Err(ApiError::Http { status: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

fn is_rate_limit(status: StatusCode) -> bool {
    // 420 is the legacy "Enhance Your Calm" response.
    status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 420
}

// ============ Pagination ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TweetSource {
    Search,
    Timeline,
}

impl TweetSource {
    fn endpoint(self) -> &'static str {
        match self {
            TweetSource::Search => SEARCH_ENDPOINT,
            TweetSource::Timeline => TIMELINE_ENDPOINT,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    statuses: Vec<Tweet>,
}

/// Decode one page of tweets. Search wraps its page in `statuses`; the
/// timeline endpoint returns a bare array.
fn parse_page(source: TweetSource, body: &str) -> Result<Vec<Tweet>, ApiError> {
    Ok(match source {
        TweetSource::Search => serde_json::from_str::<SearchResponse>(body)?.statuses,
        TweetSource::Timeline => serde_json::from_str(body)?,
    })
}

/// The `max_id` for the page after `page`, or `None` when nothing older exists.
fn next_max_id(page: &[Tweet]) -> Option<u64> {
    page.iter().map(|t| t.id).min()?.checked_sub(1)
}

struct MaxIdCursor<'a> {
    client: &'a TwitterClient,
    source: TweetSource,
    params: Vec<(String, String)>,
    max_id: Option<u64>,
    exhausted: bool,
}

impl PageCursor for MaxIdCursor<'_> {
    type Item = Tweet;

    fn next_page(&mut self) -> Result<Option<Vec<Tweet>>, ApiError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut params = self.params.clone();
        if let Some(max_id) = self.max_id {
            params.push(("max_id".to_string(), max_id.to_string()));
        }

        let body = self.client.get(self.source.endpoint(), &params)?;
        let page = parse_page(self.source, &body)?;
        if page.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        match next_max_id(&page) {
            Some(next) => self.max_id = Some(next),
            None => self.exhausted = true,
        }
        Ok(Some(page))
    }
}

// ============ OAuth 1.0a ============

/// Percent-encode per RFC 3986, leaving only unreserved characters.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Encode and sort parameters into `k=v&k=v` form.
fn encode_params(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// `METHOD&url&params`, each part percent-encoded.
fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> String {
    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        uri_encode(url),
        uri_encode(&encode_params(params))
    )
}

fn sign(base_string: &str, consumer_secret: &str, token_secret: &str) -> String {
    let key = format!("{}&{}", uri_encode(consumer_secret), uri_encode(token_secret));
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(base_string.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

fn oauth_params(credentials: &Credentials, nonce: &str, timestamp: i64) -> Vec<(String, String)> {
    vec![
        ("oauth_consumer_key".to_string(), credentials.consumer_key.clone()),
        ("oauth_nonce".to_string(), nonce.to_string()),
        ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
        ("oauth_timestamp".to_string(), timestamp.to_string()),
        ("oauth_token".to_string(), credentials.token.clone()),
        ("oauth_version".to_string(), "1.0".to_string()),
    ]
}

/// Build the `Authorization: OAuth ...` header for one request.
fn authorization_header(
    credentials: &Credentials,
    method: &str,
    url: &str,
    params: &[(String, String)],
    nonce: &str,
    timestamp: i64,
) -> String {
    let mut oauth = oauth_params(credentials, nonce, timestamp);
    let mut all = oauth.clone();
    all.extend_from_slice(params);

    let signature = sign(
        &signature_base_string(method, url, &all),
        &credentials.consumer_secret,
        &credentials.token_secret,
    );
    oauth.push(("oauth_signature".to_string(), signature));

    let fields = oauth
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {}", fields)
}
