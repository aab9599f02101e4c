//! HTTP transport with linear retry
//!
//! Every request to the token endpoint and the data plane goes through
//! [`Transport::request`]:
//! - timeouts, connection errors and 5xx responses are retried
//! - the delay before attempt `n + 1` is `n * backoff_unit`
//! - any other non-success status (429 included) is returned at once
//! - the last failure is returned once attempts run out

use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry_formatter::{RetryContext, RetryErrorType};
use super::{TransportError, TransportErrorKind};
use crate::collector::config::{calculate_backoff, BACKOFF_UNIT, MAX_ATTEMPTS};
use crate::collector::rate_limit::RateLimiter;
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};

/// Longest response body excerpt kept in error messages
const ERROR_BODY_LIMIT: usize = 512;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// A request description that can be replayed on every attempt
#[derive(Clone)]
pub struct TransportRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    form: Option<Vec<(String, String)>>,
}

impl TransportRequest {
    /// GET `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            form: None,
        }
    }

    /// POST `url` with a url-encoded form body
    pub fn post_form<I, K, V>(url: impl Into<String>, form: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            form: Some(form.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// `Authorization: Bearer <token>`
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    /// `Accept: application/json`
    pub fn accept_json(self) -> Self {
        self.header("Accept", "application/json")
    }

    /// Append query parameters.
    pub fn query<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Method
    pub fn method(&self) -> Method {
        self.method
    }

    /// URL without the extra query parameters
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Extra query parameters
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Value of the first header with this name, compared case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// URL path used as the metrics label, without scheme, host or query
    fn endpoint(&self) -> String {
        url::Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| self.url.clone())
    }

    /// URL without query string, safe to log
    fn display_url(&self) -> String {
        self.url
            .split_once('?')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| self.url.clone())
    }
}

// Header values and form values may carry credentials.
impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        let form: Option<Vec<&str>> = self
            .form
            .as_ref()
            .map(|form| form.iter().map(|(k, _)| k.as_str()).collect());
        f.debug_struct("TransportRequest")
            .field("method", &self.method)
            .field("url", &self.display_url())
            .field("headers", &headers)
            .field("query", &self.query)
            .field("form_fields", &form)
            .finish()
    }
}

/// Successful response
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status
    pub status: u16,
    /// Raw body
    pub body: Bytes,
    /// Attempts it took, 1 when the first try succeeded
    pub attempts: u32,
}

impl TransportResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Attempt bound and backoff unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    /// Linear backoff unit
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_unit: BACKOFF_UNIT,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given bound and unit. A bound of zero is raised to one.
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.backoff_unit)
    }
}

/// HTTP transport shared by the credential provider and the page walker
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    policy: RetryPolicy,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl Transport {
    /// Transport over `client` with the given retry policy
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            rate_limiter: None,
        }
    }

    /// Pace every attempt through `limiter`.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Retry policy
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Perform `request`, retrying transient failures.
    pub async fn request(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let endpoint = request.endpoint();
        let display_url = request.display_url();
        let mut last_failure: Option<RetryErrorType> = None;

        for attempt in 1..=max_attempts {
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire().await.map_err(|e| TransportError {
                    kind: TransportErrorKind::InvalidRequest,
                    url: display_url.clone(),
                    message: e.to_string(),
                    attempts: attempt,
                })?;
            }

            let metrics = HttpRequestMetrics::start(endpoint.as_str(), attempt);
            let failure = match self.send_once(request).await {
                Ok((status, body)) => {
                    metrics.record_complete(status);
                    if (200..300).contains(&status) {
                        if let Some(previous) = last_failure {
                            let ctx = RetryContext::new(
                                attempt,
                                max_attempts,
                                previous,
                                Duration::ZERO,
                                "",
                                endpoint.as_str(),
                            );
                            info!("{}", ctx.format_success());
                        }
                        debug!(
                            method = %request.method,
                            endpoint = %endpoint,
                            status,
                            attempt,
                            bytes = body.len(),
                            "Request succeeded"
                        );
                        return Ok(TransportResponse {
                            status,
                            body,
                            attempts: attempt,
                        });
                    }
                    TransportError {
                        kind: TransportErrorKind::HttpStatus(status),
                        url: display_url.clone(),
                        message: excerpt(&body),
                        attempts: attempt,
                    }
                }
                Err((kind, message)) => {
                    metrics.record_network_error(&kind.to_string());
                    TransportError {
                        kind,
                        url: display_url.clone(),
                        message,
                        attempts: attempt,
                    }
                }
            };

            let error_type = RetryErrorType::from(failure.kind);
            if !error_type.is_retryable() {
                debug!(
                    endpoint = %endpoint,
                    kind = %failure.kind,
                    attempt,
                    "Not retrying {}",
                    error_type.description()
                );
                return Err(failure);
            }

            if attempt == max_attempts {
                let ctx = RetryContext::new(
                    attempt,
                    max_attempts,
                    error_type,
                    Duration::ZERO,
                    failure.to_string(),
                    endpoint.as_str(),
                );
                warn!("{}", ctx.format_failure());
                return Err(failure);
            }

            let backoff = self.policy.delay_after(attempt);
            let ctx = RetryContext::new(
                attempt,
                max_attempts,
                error_type,
                backoff,
                failure.to_string(),
                endpoint.as_str(),
            );
            warn!("{}", ctx.format_retry());
            record_retry_backoff(backoff, attempt);
            last_failure = Some(error_type);
            tokio::time::sleep(backoff).await;
        }

        // The loop always returns: the last attempt either succeeds or returns its failure.
        Err(TransportError {
            kind: TransportErrorKind::InvalidRequest,
            url: display_url,
            message: "no attempts were made".to_string(),
            attempts: 0,
        })
    }

    async fn send_once(
        &self,
        request: &TransportRequest,
    ) -> Result<(u16, Bytes), (TransportErrorKind, String)> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        Ok((status, body))
    }
}

fn classify(err: reqwest::Error) -> (TransportErrorKind, String) {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_builder() {
        TransportErrorKind::InvalidRequest
    } else {
        TransportErrorKind::Connection
    };
    (kind, err.to_string())
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.len() <= ERROR_BODY_LIMIT {
        return text.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
