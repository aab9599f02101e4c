//! Transport retry classification and attempt counting

use easm_collector::collector::config::{calculate_backoff, BACKOFF_UNIT, MAX_ATTEMPTS};
use easm_collector::fetcher::client::{build_http_client, ClientOptions};
use easm_collector::fetcher::{
    RetryPolicy, Transport, TransportErrorKind, TransportRequest,
};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::support::transport;

#[tokio::test]
async fn test_two_503s_then_success_takes_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assets"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assets"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"value":[]}"#))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport(5)
        .request(&TransportRequest::get(format!("{}/assets", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.attempts, 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    for status in [400u16, 403, 404, 429] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .expect(1)
            .mount(&server)
            .await;

        let err = transport(5)
            .request(&TransportRequest::get(format!("{}/assets", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::HttpStatus(status));
        assert_eq!(err.attempts, 1, "status {status}");
        assert!(err.message.contains("nope"));
    }
}

#[tokio::test]
async fn test_server_errors_exhaust_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = transport(3)
        .request(&TransportRequest::get(format!("{}/assets", server.uri())))
        .await
        .unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::HttpStatus(500));
    assert_eq!(err.attempts, 3);
}

#[tokio::test]
async fn test_timeouts_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = build_http_client(
        &ClientOptions::default().with_request_timeout(Duration::from_millis(100)),
    )
    .unwrap();
    let transport = Transport::new(client, RetryPolicy::new(2, Duration::from_millis(10)));
    let err = transport
        .request(&TransportRequest::get(format!("{}/slow", server.uri())))
        .await
        .unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Timeout);
    assert_eq!(err.attempts, 2);
}

#[tokio::test]
async fn test_connection_refused_is_retried() {
    // Bind and drop to get a port nobody listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let err = transport(2)
        .request(&TransportRequest::get(format!("http://127.0.0.1:{port}/assets")))
        .await
        .unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Connection);
    assert_eq!(err.attempts, 2);
}

#[test]
fn test_default_backoff_is_linear_in_two_second_steps() {
    assert_eq!(MAX_ATTEMPTS, 5);
    let policy = RetryPolicy::new(MAX_ATTEMPTS, BACKOFF_UNIT);
    let delays: Vec<Duration> = (1..MAX_ATTEMPTS).map(|n| policy.delay_after(n)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(6),
            Duration::from_secs(8)
        ]
    );
    assert_eq!(calculate_backoff(3, BACKOFF_UNIT), Duration::from_secs(6));
}
