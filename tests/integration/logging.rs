//! Structured logging of retries and token exchanges

use easm_collector::auth::CredentialProvider;
use easm_collector::fetcher::TransportRequest;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::support::{provider, transport, TOKEN_PATH};

/// Writer capturing formatted log lines
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn json_subscriber(captured: &Captured) -> impl tracing::Subscriber + Send + Sync {
    let writer = captured.clone();
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new("easm_collector=debug"))
        .with_writer(move || writer.clone())
        .finish()
}

#[test]
fn test_env_filter_parsing() {
    let _ = EnvFilter::new("info");
    let _ = EnvFilter::new("easm_collector=debug");
    let _ = EnvFilter::new("easm_collector::fetcher=trace,easm_collector=info");
}

#[tokio::test]
async fn test_retry_is_logged_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let captured = Captured::default();
    let _guard = tracing::subscriber::set_default(json_subscriber(&captured));

    transport(3)
        .request(&TransportRequest::get(format!("{}/assets", server.uri())))
        .await
        .unwrap();

    let text = captured.text();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(lines.iter().any(|l| l["level"] == "WARN"
        && l["fields"]["message"]
            .as_str()
            .is_some_and(|m| m.contains("Retrying (attempt 2/3) after service unavailable"))));
    assert!(text.contains("Retry attempt 2/3 succeeded"));
}

#[tokio::test]
async fn test_client_secret_never_logged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "tok-secret-value", "expires_in": 3600})),
        )
        .mount(&server)
        .await;

    let captured = Captured::default();
    let _guard = tracing::subscriber::set_default(json_subscriber(&captured));

    let token = provider(&server, transport(1)).get_token().await.unwrap();
    assert_eq!(token, "tok-secret-value");

    let text = captured.text();
    assert!(text.contains("Acquired access token"));
    assert!(!text.contains("s3cret"));
    assert!(!text.contains("tok-secret-value"));
}
