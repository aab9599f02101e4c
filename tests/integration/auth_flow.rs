//! Token exchange, caching and re-authentication

use easm_collector::auth::{AuthError, CredentialProvider};
use easm_collector::fetcher::{FetcherError, PageWalker};
use easm_collector::resume::{CheckpointStore, MemoryCheckpointStore};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::support::{context, hosts, provider, transport, TOKEN_PATH};

async fn mount_tokens_in_order(server: &MockServer, tokens: &[&str]) {
    for token in tokens {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": token, "expires_in": 3600})),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_token_request_is_a_client_credentials_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=client-1"))
        .and(body_string_contains("scope=https%3A%2F%2Fapi.easm.defender.microsoft.com%2F.default"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "tok-1", "expires_in": "3599"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, transport(5));
    assert_eq!(provider.get_token().await.unwrap(), "tok-1");
    // Served from cache.
    assert_eq!(provider.get_token().await.unwrap(), "tok-1");
    assert!(provider.cached_expiry().await.is_some());
}

#[tokio::test]
async fn test_rejected_credentials_leave_checkpoints_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cursor = format!("{}/assets/hosts?$skipToken=K", server.uri());
    let store = Arc::new(MemoryCheckpointStore::with_values([
        ("defender_easm_hosts:next_link", cursor.as_str()),
        ("defender_easm_hosts:watermark", "2024-01-01T00:00:00Z"),
    ]));
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let mut walker = PageWalker::open(ctx, hosts()).unwrap();

    let err = walker.next_page().await.unwrap_err();
    assert!(matches!(
        err,
        FetcherError::Auth(AuthError::Rejected { status: 401, .. })
    ));
    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot["defender_easm_hosts:next_link"], cursor);
}

#[tokio::test]
async fn test_token_without_access_token_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token_type": "Bearer"})))
        .mount(&server)
        .await;

    let err = provider(&server, transport(5)).get_token().await.unwrap_err();
    assert!(matches!(err, AuthError::MissingToken));
}

#[tokio::test]
async fn test_mid_pagination_401_reauthenticates_once() {
    let server = MockServer::start().await;
    mount_tokens_in_order(&server, &["tok-1", "tok-2"]).await;

    Mock::given(method("GET"))
        .and(path("/assets/hosts"))
        .and(query_param_is_missing("$skipToken"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "h1"}],
            "nextLink": format!("{}/assets/hosts?$skipToken=C1", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assets/hosts"))
        .and(query_param("$skipToken", "C1"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assets/hosts"))
        .and(query_param("$skipToken", "C1"))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [{"id": "h2"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let mut walker = PageWalker::open(ctx, hosts()).unwrap();

    let mut ids = Vec::new();
    while let Some(page) = walker.next_page().await.unwrap() {
        ids.extend(page.records.iter().map(|r| r["id"].as_str().unwrap().to_string()));
    }
    let outcome = walker.finish().unwrap();

    assert_eq!(ids, vec!["h1", "h2"]);
    assert_eq!(outcome.pages, 2);
    assert_eq!(store.get("defender_easm_hosts:next_link").unwrap(), None);
}

#[tokio::test]
async fn test_second_401_surfaces_and_keeps_cursor() {
    let server = MockServer::start().await;
    mount_tokens_in_order(&server, &["tok-1", "tok-2"]).await;
    Mock::given(method("GET"))
        .and(path("/assets/hosts"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let cursor = format!("{}/assets/hosts?$skipToken=K", server.uri());
    let store = Arc::new(MemoryCheckpointStore::with_values([(
        "defender_easm_hosts:next_link",
        cursor.as_str(),
    )]));
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let mut walker = PageWalker::open(ctx, hosts()).unwrap();

    match walker.next_page().await.unwrap_err() {
        FetcherError::Transport(e) => {
            assert_eq!(e.status(), Some(401));
            assert_eq!(e.attempts, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(
        store.get("defender_easm_hosts:next_link").unwrap(),
        Some(cursor)
    );
}

#[tokio::test]
async fn test_oversized_expires_in_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"access_token": "tok-1", "expires_in": 9_000_000_000_000_000i64}),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, transport(5));
    assert_eq!(provider.get_token().await.unwrap(), "tok-1");

    let expiry = provider.cached_expiry().await.unwrap();
    assert!(expiry <= chrono::Utc::now() + chrono::Duration::days(1));
}
