//! End-to-end collection runs against a mock data plane

use easm_collector::collector::{CollectionTask, CollectionTaskConfig, ResponseStyle};
use easm_collector::fetcher::{walk, FetcherError, PageWalker};
use easm_collector::output::MemorySink;
use easm_collector::resume::{CheckpointStore, MemoryCheckpointStore};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::support::{
    context, hosts, insights, listing, mount_token, provider, records, timestamp_of, transport,
    API_VERSION, TOKEN_PATH,
};

const CURSOR_KEY: &str = "defender_easm_exposure_insights:next_link";
const WATERMARK_KEY: &str = "defender_easm_exposure_insights:watermark";

/// Two pages: 150 records with continuation C1, then 50 records.
async fn mount_two_pages(server: &MockServer) -> String {
    let next = format!(
        "{}/exposures?api-version={API_VERSION}&$skipToken=C1",
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/exposures"))
        .and(query_param("api-version", API_VERSION))
        .and(query_param("$top", "150"))
        .and(query_param_is_missing("$skipToken"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(listing(records(0, 150), Some(next.clone()))),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exposures"))
        .and(query_param("$skipToken", "C1"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(records(150, 50), None)))
        .expect(1)
        .mount(server)
        .await;
    next
}

#[tokio::test]
async fn test_cursor_committed_per_page_and_watermark_at_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "tok-1", "expires_in": 3600})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let next = mount_two_pages(&server).await;

    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let mut walker = PageWalker::open(ctx, insights(150)).unwrap();

    let first = walker.next_page().await.unwrap().unwrap();
    assert_eq!(first.records.len(), 150);
    // Nothing is persisted until the caller is done with the page.
    assert_eq!(store.get(CURSOR_KEY).unwrap(), None);
    walker.commit_page().unwrap();
    assert_eq!(store.get(CURSOR_KEY).unwrap(), Some(next));

    let second = walker.next_page().await.unwrap().unwrap();
    assert_eq!(second.records.len(), 50);
    assert!(second.next_link.is_none());
    walker.commit_page().unwrap();
    assert_eq!(store.get(CURSOR_KEY).unwrap(), None);
    assert_eq!(store.get(WATERMARK_KEY).unwrap(), None);

    assert!(walker.next_page().await.unwrap().is_none());
    let outcome = walker.finish().unwrap();
    assert!(outcome.completed);
    assert!(outcome.watermark_committed);
    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.records, 200);
    assert_eq!(store.get(WATERMARK_KEY).unwrap(), Some(timestamp_of(199)));
}

#[tokio::test]
async fn test_task_emits_every_record_and_flushes_per_page() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    mount_two_pages(&server).await;

    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let sink = MemorySink::new();

    let summary = CollectionTask::new(insights(150), ctx, Box::new(sink.clone()))
        .run()
        .await
        .unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.records_emitted, 200);
    assert_eq!(summary.pages, 2);
    assert!(summary.watermark_committed);
    assert_eq!(summary.final_watermark, Some(timestamp_of(199)));
    assert_eq!(sink.len(), 200);
    assert_eq!(sink.flushes(), 2);

    let events = sink.events();
    assert_eq!(events[0].sourcetype, "defender:easm:insight");
    assert_eq!(events[0].record().unwrap()["id"], "r0");
    assert_eq!(events[199].record().unwrap()["id"], "r199");
    assert_eq!(store.get(CURSOR_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_second_run_filters_on_stored_watermark() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    let watermark = timestamp_of(199);
    Mock::given(method("GET"))
        .and(path("/exposures"))
        .and(query_param(
            "$filter",
            format!("properties/lastUpdatedDateTime gt datetimeoffset'{watermark}'").as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCheckpointStore::with_values([(
        WATERMARK_KEY,
        watermark.as_str(),
    )]));
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let summary = CollectionTask::new(insights(150), ctx, Box::new(MemorySink::new()))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.records_emitted, 0);
    assert!(!summary.watermark_committed);
    assert_eq!(summary.final_watermark.as_deref(), Some(watermark.as_str()));
    assert_eq!(store.get(WATERMARK_KEY).unwrap(), Some(watermark));
}

#[tokio::test]
async fn test_resume_uses_stored_continuation_verbatim() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/exposures"))
        .and(query_param_is_missing("$skipToken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exposures"))
        .and(query_param("$skipToken", "C1"))
        .and(query_param_is_missing("$filter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(records(150, 50), None)))
        .expect(1)
        .mount(&server)
        .await;

    let cursor = format!(
        "{}/exposures?api-version={API_VERSION}&$skipToken=C1",
        server.uri()
    );
    let old = timestamp_of(0);
    let store = Arc::new(MemoryCheckpointStore::with_values([
        (CURSOR_KEY, cursor.as_str()),
        (WATERMARK_KEY, old.as_str()),
    ]));
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let summary = CollectionTask::new(insights(150), ctx, Box::new(MemorySink::new()))
        .run()
        .await
        .unwrap();

    assert!(summary.resumed_from_cursor);
    assert_eq!(summary.records_emitted, 50);
    assert_eq!(store.get(CURSOR_KEY).unwrap(), None);
    assert_eq!(store.get(WATERMARK_KEY).unwrap(), Some(timestamp_of(199)));
}

#[tokio::test]
async fn test_records_without_usable_timestamps_are_still_emitted() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    let ts = timestamp_of(5);
    Mock::given(method("GET"))
        .and(path("/exposures"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"id": "a", "properties": {"lastUpdatedDateTime": ts}},
                {"id": "b", "properties": {}},
                {"id": "c", "properties": {"lastUpdatedDateTime": "yesterday-ish"}}
            ]
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let sink = MemorySink::new();
    let summary = CollectionTask::new(insights(150), ctx, Box::new(sink.clone()))
        .run()
        .await
        .unwrap();

    assert_eq!(sink.len(), 3);
    assert_eq!(summary.missing_timestamps, 1);
    assert_eq!(summary.unparseable_timestamps, 1);
    assert_eq!(store.get(WATERMARK_KEY).unwrap(), Some(ts));
}

#[tokio::test]
async fn test_single_object_response_is_one_record() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/license"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "license",
            "properties": {"assetCount": 1200}
        })))
        .mount(&server)
        .await;

    let license = CollectionTaskConfig::builder("license", "/license", "defender:easm:license")
        .response_style(ResponseStyle::SingleObject)
        .build()
        .unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = context(&server, provider(&server, transport(5)), store);
    let sink = MemorySink::new();
    let summary = CollectionTask::new(license, ctx, Box::new(sink.clone()))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.records_emitted, 1);
    assert_eq!(sink.events()[0].record().unwrap()["properties"]["assetCount"], 1200);
}

#[tokio::test]
async fn test_odata_and_relative_next_links() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path("/assets/hosts"))
        .and(query_param_is_missing("$skipToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "h1"}],
            "@odata.nextLink": format!("{}/assets/hosts?$skipToken=P2", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assets/hosts"))
        .and(query_param("$skipToken", "P2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "h2"}],
            "nextLink": "/assets/hosts?$skipToken=P3"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assets/hosts"))
        .and(query_param("$skipToken", "P3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [{"id": "h3"}]})))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let items: Vec<_> = walk(ctx, hosts()).collect().await;

    let ids: Vec<String> = items
        .into_iter()
        .map(|item| item.unwrap()["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["h1", "h2", "h3"]);
    assert_eq!(store.get("defender_easm_hosts:next_link").unwrap(), None);
}

#[tokio::test]
async fn test_self_referencing_next_link_is_a_loop() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    let same = format!("{}/assets/hosts?api-version={API_VERSION}", server.uri());
    Mock::given(method("GET"))
        .and(path("/assets/hosts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(listing(vec![json!({"id": "h1"})], Some(same))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCheckpointStore::new());
    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let mut walker = PageWalker::open(ctx, hosts()).unwrap();

    let err = walker.next_page().await.unwrap_err();
    assert!(matches!(err, FetcherError::PaginationLoop(_)));
    assert_eq!(store.get("defender_easm_hosts:next_link").unwrap(), None);
}

#[tokio::test]
async fn test_relative_next_link_keeps_workspace_path() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    let workspace = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Easm/workspaces/ws";
    Mock::given(method("GET"))
        .and(path(format!("{workspace}/assets/hosts")))
        .and(query_param_is_missing("$skipToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "h1"}],
            "nextLink": "/assets/hosts?$skipToken=P2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{workspace}/assets/hosts")))
        .and(query_param("$skipToken", "P2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [{"id": "h2"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCheckpointStore::new());
    let mut ctx = context(&server, provider(&server, transport(5)), store.clone());
    ctx.base_url = format!("{}{workspace}", server.uri());
    let items: Vec<_> = walk(ctx, hosts()).collect().await;

    let ids: Vec<String> = items
        .into_iter()
        .map(|item| item.unwrap()["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["h1", "h2"]);
    assert_eq!(store.get("defender_easm_hosts:next_link").unwrap(), None);
}

#[tokio::test]
async fn test_older_records_never_move_watermark_back() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1").await;
    let newest = timestamp_of(109);
    Mock::given(method("GET"))
        .and(path("/exposures"))
        .and(query_param_is_missing("$filter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(records(100, 10), None)))
        .expect(1)
        .mount(&server)
        .await;
    // The second run gets stale data even though it asked for newer.
    Mock::given(method("GET"))
        .and(path("/exposures"))
        .and(query_param(
            "$filter",
            format!("properties/lastUpdatedDateTime gt datetimeoffset'{newest}'").as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(records(0, 5), None)))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCheckpointStore::new());

    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let first = CollectionTask::new(insights(150), ctx, Box::new(MemorySink::new()))
        .run()
        .await
        .unwrap();
    assert!(first.watermark_committed);
    assert_eq!(store.get(WATERMARK_KEY).unwrap(), Some(newest.clone()));

    let ctx = context(&server, provider(&server, transport(5)), store.clone());
    let sink = MemorySink::new();
    let second = CollectionTask::new(insights(150), ctx, Box::new(sink.clone()))
        .run()
        .await
        .unwrap();

    assert_eq!(sink.len(), 5);
    assert!(!second.watermark_committed);
    assert_eq!(second.final_watermark.as_deref(), Some(newest.as_str()));
    assert_eq!(store.get(WATERMARK_KEY).unwrap(), Some(newest));
}
