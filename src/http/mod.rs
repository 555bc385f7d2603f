//! Paced HTTP client
//!
//! Wraps a `reqwest::Client` so every call goes through a [`RateLimiter`],
//! labelled with its request path. Non-success responses become
//! [`HttpError::Status`], which carries the `Retry-After` hint so the limiter
//! can honour it when the server answers 429.

mod retry_after;

pub use retry_after::parse_retry_after;

use crate::config::HttpConfig;
use crate::limiter::{LimiterError, RateLimiter};
use crate::retry::ThrottleSignal;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from a single HTTP attempt.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },

    /// Connection-level failure (DNS, refused, reset).
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// Body could not be read or decoded.
    #[error("Invalid response: {0}")]
    Decode(String),

    /// Request could not be built (bad URL, unserializable body).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout
        } else if let Some(status) = err.status() {
            HttpError::Status {
                status: status.as_u16(),
                retry_after: None,
                body: err.to_string(),
            }
        } else if err.is_decode() {
            HttpError::Decode(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidRequest(err.to_string())
        } else {
            HttpError::Network(err.to_string())
        }
    }
}

impl ThrottleSignal for HttpError {
    fn is_throttled(&self) -> bool {
        self.status() == Some(StatusCode::TOO_MANY_REQUESTS.as_u16())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            HttpError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Summary of a successful response whose body was not decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    pub status: u16,
    pub bytes: usize,
    /// Duration of the final attempt only
    pub latency_ms: u64,
}

/// HTTP client whose calls are governed by a shared [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct PacedClient {
    client: reqwest::Client,
    limiter: RateLimiter,
    base_url: Option<String>,
}

impl PacedClient {
    /// Build a client from configuration.
    pub fn new(config: &HttpConfig, limiter: RateLimiter) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::with_client(client, limiter, config.base_url.clone()))
    }

    /// Use an existing client (for testing).
    pub fn with_client(
        client: reqwest::Client,
        limiter: RateLimiter,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            limiter,
            base_url,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Resolve a path against the base URL.
    pub fn url(&self, path: &str) -> String {
        match &self.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            None => path.to_string(),
        }
    }

    /// GET `path` and decode a JSON body.
    pub async fn get_json<T>(&self, path: &str) -> Result<T, LimiterError<HttpError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.send_json::<(), T>(Method::GET, path, None).await
    }

    /// Send a request with an optional JSON body and decode a JSON response.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, LimiterError<HttpError>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        // Serialized once so every attempt sends the same payload.
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| LimiterError::Request(HttpError::InvalidRequest(e.to_string())))?;
        let client = self.client.clone();
        let url = self.url(path);

        self.limiter
            .enqueue(label_for(path), move || {
                let mut request = client.request(method.clone(), &url);
                if let Some(body) = &body {
                    request = request.json(body);
                }
                async move {
                    let response = checked(request.send().await?).await?;
                    response
                        .json::<T>()
                        .await
                        .map_err(|e| HttpError::Decode(e.to_string()))
                }
            })
            .await
    }

    /// GET `path`, reading the body only to measure it.
    pub async fn fetch(&self, path: &str) -> Result<FetchOutcome, LimiterError<HttpError>> {
        self.fetch_as(&label_for(path), path).await
    }

    /// Like [`fetch`](Self::fetch) but classified under an explicit label.
    pub async fn fetch_as(
        &self,
        endpoint: &str,
        path: &str,
    ) -> Result<FetchOutcome, LimiterError<HttpError>> {
        let client = self.client.clone();
        let url = self.url(path);

        self.limiter
            .enqueue(endpoint, move || {
                let request = client.get(&url);
                async move {
                    let started = Instant::now();
                    let response = checked(request.send().await?).await?;
                    let status = response.status().as_u16();
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| HttpError::Decode(e.to_string()))?;
                    Ok::<_, HttpError>(FetchOutcome {
                        status,
                        bytes: bytes.len(),
                        latency_ms: started.elapsed().as_millis() as u64,
                    })
                }
            })
            .await
    }
}

/// Endpoint label for classification: the path without query or fragment.
pub fn label_for(path: &str) -> String {
    let path = path
        .split_once("://")
        .map(|(_, rest)| rest.find('/').map_or("/", |i| &rest[i..]))
        .unwrap_or(path);
    path.split(['?', '#']).next().unwrap_or(path).to_string()
}

/// Turn a non-success response into [`HttpError::Status`].
async fn checked(response: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_retry_after(value, chrono::Utc::now()));
    let body = response.text().await.unwrap_or_default();

    Err(HttpError::Status {
        status: status.as_u16(),
        retry_after,
        body,
    })
}
