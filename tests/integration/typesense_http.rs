//! HTTP-level tests for the Typesense client against a mock server

use std::sync::Arc;
use std::time::Duration;

use index_backfill::checkpoint::Checkpoint;
use index_backfill::index::{
    FieldSpec, IndexError, IndexWriter, TypesenseClient, TypesenseConfig, UpdateOutcome,
};
use index_backfill::shutdown::ShutdownCoordinator;
use index_backfill::sync::{Job, SyncEngine};
use serde_json::{json, Map, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{fast_settings, FakeSource, MemoryStore};

const COLLECTION_PATH: &str = "/collections/products_search";

fn client(server: &MockServer) -> TypesenseClient {
    TypesenseClient::new(&TypesenseConfig {
        protocol: "http".to_string(),
        host: server.address().ip().to_string(),
        port: server.address().port(),
        api_key: "test-key".to_string(),
        collection: "products_search".to_string(),
        query_by: "product_name".to_string(),
        connect_timeout: Duration::from_secs(2),
    })
    .unwrap()
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_update_document_patches_with_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(format!("{COLLECTION_PATH}/documents/a")))
        .and(header("x-typesense-api-key", "test-key"))
        .and(body_json(json!({ "created_at": 1704067200 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "a" })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client(&server)
        .update_document("a", &fields(json!({ "created_at": 1704067200 })))
        .await;

    assert_eq!(outcome, UpdateOutcome::Updated);
}

#[tokio::test]
async fn test_update_document_maps_404_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(format!("{COLLECTION_PATH}/documents/gone")))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({ "message": "Could not find a document with id: gone" })),
        )
        .mount(&server)
        .await;

    let outcome = client(&server)
        .update_document("gone", &fields(json!({ "created_at": 0 })))
        .await;

    assert_eq!(outcome, UpdateOutcome::NotFound);
}

#[tokio::test]
async fn test_update_document_maps_server_error_to_failed() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Not Ready or Lagging"))
        .mount(&server)
        .await;

    let outcome = client(&server)
        .update_document("a", &fields(json!({ "created_at": 0 })))
        .await;

    match outcome {
        UpdateOutcome::Failed(reason) => {
            assert!(reason.contains("503"), "{reason}");
            assert!(reason.contains("Not Ready"), "{reason}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_page_sends_one_based_page_and_parses_hits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{COLLECTION_PATH}/documents/search")))
        .and(query_param("q", "*"))
        .and(query_param("query_by", "product_name"))
        .and(query_param("per_page", "250"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": 3,
            "page": 1,
            "hits": [
                { "document": { "id": "f", "product_name": "chair", "created_at": 5 } },
                { "document": { "id": 42, "product_name": "desk" } },
                { "document": { "product_name": "no id" } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let docs = client(&server).list_page(0, 250).await.unwrap();

    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["f", "42"]);
    assert_eq!(docs[0].fields["created_at"], json!(5));
}

#[tokio::test]
async fn test_list_page_caps_page_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{COLLECTION_PATH}/documents/search")))
        .and(query_param("per_page", "250"))
        .and(query_param("page", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "hits": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let docs = client(&server).list_page(3, 1000).await.unwrap();
    assert!(docs.is_empty());
}

#[tokio::test]
async fn test_list_page_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Not Ready or Lagging"))
        .mount(&server)
        .await;

    let err = client(&server).list_page(0, 10).await.unwrap_err();

    assert!(matches!(err, IndexError::HttpError { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_list_page_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Forbidden - a valid api key is required"))
        .mount(&server)
        .await;

    let err = client(&server).list_page(0, 10).await.unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_ensure_schema_patches_only_missing_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "products_search",
            "fields": [
                { "name": "product_name", "type": "string" },
                { "name": "created_at", "type": "int64", "optional": true }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(COLLECTION_PATH))
        .and(body_json(json!({
            "fields": [{ "name": "deleted_at", "type": "int64", "optional": true }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "fields": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let added = client(&server)
        .ensure_schema_fields(&[
            FieldSpec::optional_int64("created_at"),
            FieldSpec::optional_int64("deleted_at"),
        ])
        .await
        .unwrap();

    assert_eq!(added, vec!["deleted_at".to_string()]);
}

#[tokio::test]
async fn test_ensure_schema_skips_patch_when_complete() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fields": [
                { "name": "created_at", "type": "int64" },
                { "name": "deleted_at", "type": "int64" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let added = client(&server)
        .ensure_schema_fields(&[FieldSpec::optional_int64("created_at")])
        .await
        .unwrap();

    assert!(added.is_empty());
}

/// A document missing from the index is tallied and the batch carries on.
#[tokio::test]
async fn test_scan_tolerates_missing_documents_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fields": [
                { "name": "created_at", "type": "int64" },
                { "name": "deleted_at", "type": "int64" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{COLLECTION_PATH}/documents/b")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{COLLECTION_PATH}/documents/a")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{COLLECTION_PATH}/documents/c")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let source = Arc::new(FakeSource::new().with_created_at(&[
        ("a", json!(1)),
        ("b", json!(2)),
        ("c", json!(3)),
    ]));
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(
        source,
        Arc::new(client(&server)),
        store,
        Job::CreatedAt.plan(),
        fast_settings(10, 250),
        ShutdownCoordinator::shared(),
    );

    let mut checkpoint = Checkpoint::new("backfill_created_at");
    engine.run_scanning_phase(&mut checkpoint).await.unwrap();

    assert_eq!(checkpoint.cursor, "c");
    assert_eq!(checkpoint.counters.updated_index, 2);
    assert_eq!(checkpoint.counters.not_found_index, 1);
    assert_eq!(checkpoint.counters.total_processed, 3);
}
