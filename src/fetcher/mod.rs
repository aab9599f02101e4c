//! Remote listing access: transport, retry, paging and watermarks

use futures_util::Stream;
use std::fmt;
use std::pin::Pin;

use crate::auth::AuthError;
use crate::resume::ResumeError;
use crate::Record;

pub mod client;
pub mod http;
pub mod pagination;
pub mod retry_formatter;
pub mod watermark;

pub use http::{Method, RetryPolicy, Transport, TransportRequest, TransportResponse};
pub use pagination::{parse_page, walk, Page, PageWalker, WalkContext, WalkOutcome};
pub use watermark::{Watermark, WatermarkTracker};

/// Failure classification for a transport request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request or connect timeout elapsed
    Timeout,
    /// Connection refused, reset, DNS failure or a broken body stream
    Connection,
    /// The server answered with a non-success status
    HttpStatus(u16),
    /// The request could not be built (bad URL, bad header)
    InvalidRequest,
}

impl TransportErrorKind {
    /// Timeouts, connection errors and 5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection => true,
            Self::HttpStatus(code) => *code >= 500,
            Self::InvalidRequest => false,
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connection => write!(f, "connection error"),
            Self::HttpStatus(code) => write!(f, "HTTP {code}"),
            Self::InvalidRequest => write!(f, "invalid request"),
        }
    }
}

/// Transport failure after retries were exhausted or skipped
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} from {url} after {attempts} attempt(s): {message}")]
pub struct TransportError {
    /// Classification
    pub kind: TransportErrorKind,
    /// Request URL without query parameters
    pub url: String,
    /// Error text or a truncated response body
    pub message: String,
    /// Attempts made
    pub attempts: u32,
}

impl TransportError {
    /// HTTP status, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            TransportErrorKind::HttpStatus(code) => Some(code),
            _ => None,
        }
    }

    /// Whether the server rejected the bearer token
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Credential failure
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Response body is not JSON
    #[error("parse error: {0}")]
    ParseError(String),

    /// The listing URL or a continuation link is not a valid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Checkpoint store failure
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] ResumeError),

    /// The API returned the page it was asked for as its own continuation
    #[error("pagination loop detected at {0}")]
    PaginationLoop(String),

    /// Too many pages in one run
    #[error("page limit of {0} exceeded")]
    PageLimitExceeded(u64),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Lazy stream of records from one collection
pub type RecordStream = Pin<Box<dyn Stream<Item = FetcherResult<Record>> + Send>>;
