//! Shared HTTP plumbing: authenticated GET with a per-request timeout, JSON decoding and
//! mapping of HTTP statuses onto [`ProviderError`] variants.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::Credentials;
use crate::contract::ProviderError;

const USER_AGENT: &str = concat!("contributor-count/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 300;

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Maps a non-success response onto an error. `now_epoch` is the current Unix time in
/// seconds, used to turn `X-RateLimit-Reset` into a delay.
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    now_epoch: u64,
) -> ProviderError {
    let mut message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = status.to_string();
    }
    match status.as_u16() {
        401 => ProviderError::Auth(message),
        403 if header_u64(headers, "x-ratelimit-remaining") == Some(0) => {
            ProviderError::RateLimited {
                retry_after: header_u64(headers, "x-ratelimit-reset")
                    .map(|reset| Duration::from_secs(reset.saturating_sub(now_epoch))),
            }
        }
        // Secondary rate limits answer 403 with a Retry-After.
        403 if headers.contains_key("retry-after") => ProviderError::RateLimited {
            retry_after: header_u64(headers, "retry-after").map(Duration::from_secs),
        },
        403 => ProviderError::Auth(message),
        404 => ProviderError::NotFound(message),
        429 => ProviderError::RateLimited {
            retry_after: header_u64(headers, "retry-after").map(Duration::from_secs),
        },
        500 | 502 | 503 | 504 => ProviderError::Unavailable(message),
        code => ProviderError::Api {
            status: code,
            message,
        },
    }
}

/// The `rel="next"` target of an RFC 8288 `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    static LINK: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = LINK
        .get_or_init(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).ok())
        .as_ref()?;
    let value = headers.get("link")?.to_str().ok()?;
    value
        .split(',')
        .find_map(|part| pattern.captures(part))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `base` with `segments` appended (each percent-encoded, `/` included) and `query` added.
pub fn endpoint(base: &Url, segments: &[&str], query: &[(&str, String)]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    }
    url
}

pub fn parse_base(url: &str) -> Result<Url, ProviderError> {
    Url::parse(url.trim_end_matches('/')).map_err(|e| ProviderError::InvalidUrl(format!("{url}: {e}")))
}

pub fn parse_cursor(cursor: &str) -> Result<Url, ProviderError> {
    Url::parse(cursor).map_err(|e| ProviderError::InvalidUrl(format!("{cursor}: {e}")))
}

/// A decoded JSON body together with the response headers (for header-based pagination).
pub struct JsonResponse<T> {
    pub body: T,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    credentials: Credentials,
}

impl HttpTransport {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(HttpTransport {
            client,
            credentials,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<JsonResponse<T>, ProviderError> {
        debug!(url = %url, "GET");
        let mut request = self.client.get(url).header(ACCEPT, "application/json");
        request = match &self.credentials {
            Credentials::Anonymous => request,
            Credentials::Token(token) => request.bearer_auth(token),
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        };

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let now_epoch = chrono::Utc::now().timestamp().max(0) as u64;
            return Err(classify_status(status, &headers, &body, now_epoch));
        }
        let body = response.json::<T>().await?;
        Ok(JsonResponse { body, headers })
    }
}
