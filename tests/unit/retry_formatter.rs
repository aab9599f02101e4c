use std::time::Duration;

use easm_collector::fetcher::retry_formatter::{RetryContext, RetryErrorType};
use easm_collector::fetcher::TransportErrorKind;

fn sample_context(error_type: RetryErrorType) -> RetryContext {
    RetryContext::new(
        2,
        5,
        error_type,
        Duration::from_secs(4),
        "HTTP 503: upstream busy",
        "/assets/hosts",
    )
}

#[test]
fn format_retry_captures_attempt_and_wait() {
    let message = sample_context(RetryErrorType::ServerError(503)).format_retry();
    assert!(message.contains("attempt 3/5"));
    assert!(message.contains("service unavailable"));
    assert!(message.contains("4.0 seconds"));
    assert!(message.contains("/assets/hosts"));
}

#[test]
fn format_success_names_endpoint() {
    let message = sample_context(RetryErrorType::NetworkTimeout).format_success();
    assert!(message.contains("Retry attempt 2/5 succeeded"));
    assert!(message.contains("/assets/hosts"));
}

#[test]
fn format_failure_lists_suggestions() {
    let output = sample_context(RetryErrorType::ServerError(502)).format_failure();
    assert!(output.contains("Request failed after 2 attempt(s)"));
    assert!(output.contains("HTTP 503: upstream busy"));
    assert!(output.contains("try again later"));
    assert!(output.contains("--max-retries"));
}

#[test]
fn non_retryable_failures_skip_max_retries_hint() {
    let suggestions = sample_context(RetryErrorType::AuthFailed(401)).format_suggestions();
    assert_eq!(suggestions.len(), 1);
    assert!(suggestions[0].contains("client_secret"));
}

#[test]
fn classification_matches_retry_rules() {
    let retryable = [
        TransportErrorKind::Timeout,
        TransportErrorKind::Connection,
        TransportErrorKind::HttpStatus(500),
        TransportErrorKind::HttpStatus(504),
    ];
    for kind in retryable {
        assert!(RetryErrorType::from(kind).is_retryable(), "{kind:?}");
    }

    let fatal = [
        TransportErrorKind::InvalidRequest,
        TransportErrorKind::HttpStatus(400),
        TransportErrorKind::HttpStatus(401),
        TransportErrorKind::HttpStatus(404),
        TransportErrorKind::HttpStatus(429),
    ];
    for kind in fatal {
        assert!(!RetryErrorType::from(kind).is_retryable(), "{kind:?}");
    }
}
