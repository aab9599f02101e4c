//! Retry message formatting
//!
//! Turns a transport failure into consistent, user-facing log lines with
//! attempt counters and remediation hints.

use std::time::Duration;

use super::TransportErrorKind;

/// Classification of retry errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request or connect timeout
    NetworkTimeout,
    /// Connection refused, DNS failure or reset
    NetworkOffline,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 401/403
    AuthFailed(u16),
    /// HTTP 429. Surfaced, not retried.
    RateLimit,
    /// Other non-success statuses
    ClientError(u16),
    /// Request could not be built
    InvalidRequest,
}

impl RetryErrorType {
    /// Short description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "access denied (403)",
                _ => "authentication failed",
            },
            Self::RateLimit => "rate limit exceeded",
            Self::ClientError(code) => match code {
                400 => "bad request",
                404 => "resource not found",
                _ => "client error",
            },
            Self::InvalidRequest => "invalid request",
        }
    }

    /// Suggested remediation shown after the final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check network connectivity and proxy settings",
            Self::NetworkOffline => "Verify DNS resolution and the proxy_url setting",
            Self::ServerError(_) => "Defender EASM may be experiencing issues, try again later",
            Self::AuthFailed(_) => {
                "Verify tenant_id, client_id, client_secret and the app role assignment"
            }
            Self::RateLimit => "Lower --concurrency or schedule collections further apart",
            Self::ClientError(_) => {
                "Check subscription_id, resource_group, workspace_name and api_version"
            }
            Self::InvalidRequest => "Check easm_base_url and data_plane_endpoint",
        }
    }

    /// Whether another attempt can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout | Self::NetworkOffline | Self::ServerError(_)
        )
    }
}

impl From<TransportErrorKind> for RetryErrorType {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Timeout => Self::NetworkTimeout,
            TransportErrorKind::Connection => Self::NetworkOffline,
            TransportErrorKind::InvalidRequest => Self::InvalidRequest,
            TransportErrorKind::HttpStatus(code) => match code {
                401 | 403 => Self::AuthFailed(code),
                429 => Self::RateLimit,
                c if c >= 500 => Self::ServerError(c),
                c => Self::ClientError(c),
            },
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered the retry
    pub error_type: RetryErrorType,
    /// Delay before the next attempt
    pub backoff_duration: Duration,
    /// Original error text
    pub error_message: String,
    /// Endpoint that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Convenience constructor used by the transport.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        error_message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration,
            error_message: error_message.into(),
            endpoint: endpoint.into(),
        }
    }

    /// "Retrying (attempt 2/5) after service unavailable - waiting 2.0 seconds... (/assets)"
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.attempt + 1,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64(),
            self.endpoint
        )
    }

    /// Message logged when an attempt after a failure succeeds.
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} succeeded - resuming collection ({})",
            self.attempt, self.max_attempts, self.endpoint
        )
    }

    /// Multi-line failure summary with suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!("[FAILED] Request failed after {} attempt(s)", self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  Endpoint: {}", self.endpoint),
            "  Suggestions:".to_string(),
        ];
        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }
        lines.join("\n")
    }

    /// Suggestions tailored to the current context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts
            ));
        }
        suggestions
    }
}
