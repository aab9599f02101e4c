//! Shared fixtures for mock-server tests

use easm_collector::auth::{ClientCredentialProvider, ClientCredentials, CredentialProvider};
use easm_collector::collector::CollectionTaskConfig;
use easm_collector::fetcher::client::build_http_client;
use easm_collector::fetcher::{RetryPolicy, Transport, WalkContext};
use easm_collector::resume::CheckpointStore;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT: &str = "tenant-1";
pub const API_VERSION: &str = "2024-10-01-preview";
pub const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";

/// Transport with a short backoff so retry tests stay fast
pub fn transport(max_attempts: u32) -> Arc<Transport> {
    let client = build_http_client(&Default::default()).unwrap();
    Arc::new(Transport::new(
        client,
        RetryPolicy::new(max_attempts, Duration::from_millis(10)),
    ))
}

/// Client-credentials provider pointed at the mock server
pub fn provider(server: &MockServer, transport: Arc<Transport>) -> Arc<ClientCredentialProvider> {
    let credentials = ClientCredentials::new(TENANT, "client-1", SecretString::from("s3cret".to_string()))
        .with_authority(server.uri());
    Arc::new(ClientCredentialProvider::new(credentials, transport))
}

pub fn context(
    server: &MockServer,
    credentials: Arc<dyn CredentialProvider>,
    store: Arc<dyn CheckpointStore>,
) -> WalkContext {
    WalkContext {
        transport: transport(5),
        credentials,
        store,
        base_url: server.uri(),
        api_version: API_VERSION.to_string(),
    }
}

/// Mount a token endpoint issuing `token`.
pub async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": token, "expires_in": 3600})),
        )
        .mount(server)
        .await;
}

/// Incremental collection keyed on `properties.lastUpdatedDateTime`
pub fn insights(page_size: u32) -> CollectionTaskConfig {
    CollectionTaskConfig::builder("exposure_insights", "/exposures", "defender:easm:insight")
        .page_size(page_size)
        .timestamp_field("properties.lastUpdatedDateTime")
        .filter_template("properties/lastUpdatedDateTime gt datetimeoffset'{watermark}'")
        .build()
        .unwrap()
}

/// Cursor-only collection
pub fn hosts() -> CollectionTaskConfig {
    CollectionTaskConfig::builder("hosts", "/assets/hosts", "defender:easm:host")
        .build()
        .unwrap()
}

/// `count` records with ids from `first_id` and timestamps one second apart
/// starting at 2024-03-01T00:00:00Z + `first_id` seconds.
pub fn records(first_id: usize, count: usize) -> Vec<Value> {
    (first_id..first_id + count)
        .map(|i| {
            let ts = chrono::DateTime::from_timestamp(1_709_251_200 + i as i64, 0)
                .unwrap()
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string();
            json!({
                "id": format!("r{i}"),
                "properties": { "lastUpdatedDateTime": ts }
            })
        })
        .collect()
}

/// Timestamp of record `i` as produced by [`records`]
pub fn timestamp_of(i: usize) -> String {
    chrono::DateTime::from_timestamp(1_709_251_200 + i as i64, 0)
        .unwrap()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

pub fn listing(records: Vec<Value>, next_link: Option<String>) -> Value {
    match next_link {
        Some(link) => json!({"value": records, "nextLink": link}),
        None => json!({"value": records}),
    }
}
