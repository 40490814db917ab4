use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geoetl_core::config::SyncConfig;
use geoetl_core::crypto;
use geoetl_core::error::BoxError;
use geoetl_core::types::ExternalSync;
use geoetl_sync::{CoordinatePayload, IngestReceipt, PayloadIngest, SyncError, SyncService, SyncStore};
use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const KEY: &str = "0123456789abcdef0123456789abcdef";

#[derive(Default)]
struct MemoryStore {
    syncs: Vec<ExternalSync>,
    recorded: Mutex<Vec<(i64, DateTime<Utc>)>>,
    fail_record: bool,
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn find_sync(&self, id: i64) -> Result<Option<ExternalSync>, BoxError> {
        Ok(self.syncs.iter().find(|s| s.id == id).cloned())
    }

    async fn record_sync_time(&self, id: i64, at: DateTime<Utc>) -> Result<(), BoxError> {
        if self.fail_record {
            return Err("database is locked".into());
        }
        self.recorded.lock().unwrap().push((id, at));
        Ok(())
    }
}

#[derive(Default)]
struct Inbox {
    received: Mutex<Vec<(i64, CoordinatePayload)>>,
}

#[async_trait]
impl PayloadIngest for Inbox {
    async fn ingest(&self, owner_id: i64, payload: &CoordinatePayload) -> Result<IngestReceipt, BoxError> {
        self.received.lock().unwrap().push((owner_id, payload.clone()));
        Ok(IngestReceipt {
            batch_id: payload.batch_id.clone(),
            accepted: payload.points.len(),
        })
    }
}

fn descriptor(url: String) -> ExternalSync {
    ExternalSync {
        id: 42,
        owner_id: 7,
        name: "warehouse-erp".into(),
        url,
        method: "get".into(),
        auth_header_key: "X-Api-Key".into(),
        auth_header_value: crypto::encrypt("erp-secret", KEY).unwrap(),
        cron_schedule: "*/15 * * * *".into(),
        last_sync_at: None,
    }
}

fn service(store: Arc<MemoryStore>, inbox: Arc<Inbox>) -> SyncService {
    SyncService::new(&SyncConfig::default(), KEY, store, inbox).unwrap()
}

fn points_body(batch_id: &str) -> serde_json::Value {
    json!({
        "batch_id": batch_id,
        "points": [
            {"latitude": -6.2, "longitude": 106.8, "timestamp": "2024-05-01T10:00:00Z", "metadata": {"courier_id": "C1"}},
            {"latitude": -6.3, "longitude": 106.9}
        ]
    })
}

#[tokio::test]
async fn pulls_with_decrypted_auth_and_ingests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/points"))
        .and(header("X-Api-Key", "erp-secret"))
        .and(header("Accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(points_body("B-1")))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::default());
    let inbox = Arc::new(Inbox::default());
    let receipt = service(store.clone(), inbox.clone())
        .execute(&descriptor(format!("{}/points", server.uri())))
        .await
        .unwrap();

    assert_eq!(receipt, IngestReceipt { batch_id: "B-1".into(), accepted: 2 });
    let received = inbox.received.lock().unwrap();
    assert_eq!(received[0].0, 7);
    assert_eq!(received[0].1.points[0].metadata["courier_id"], "C1");
    assert_eq!(store.recorded.lock().unwrap()[0].0, 42);
}

#[tokio::test]
async fn missing_batch_id_gets_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(points_body("")))
        .mount(&server)
        .await;

    let inbox = Arc::new(Inbox::default());
    let receipt = service(Arc::new(MemoryStore::default()), inbox)
        .execute(&descriptor(server.uri()))
        .await
        .unwrap();
    assert!(receipt.batch_id.starts_with("ERP-SYNC-42-"), "{}", receipt.batch_id);
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::default());
    let err = service(store.clone(), Arc::new(Inbox::default()))
        .execute(&descriptor(server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Status(502)));
    assert!(store.recorded.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unparseable_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let err = service(Arc::new(MemoryStore::default()), Arc::new(Inbox::default()))
        .execute(&descriptor(server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DECODE_ERROR");
}

#[tokio::test]
async fn empty_points_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"batch_id": "B", "points": []})))
        .mount(&server)
        .await;

    let inbox = Arc::new(Inbox::default());
    let err = service(Arc::new(MemoryStore::default()), inbox.clone())
        .execute(&descriptor(server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Rejected(_)));
    assert!(inbox.received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn undecryptable_auth_is_dropped_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(|req: &Request| {
            assert!(!req.headers.contains_key("x-api-key"));
            ResponseTemplate::new(200).set_body_json(points_body("B-2"))
        })
        .expect(1)
        .mount(&server)
        .await;

    let mut sync = descriptor(server.uri());
    sync.method = "POST".into();
    sync.auth_header_value = "not-ciphertext".into();
    let receipt = service(Arc::new(MemoryStore::default()), Arc::new(Inbox::default()))
        .execute(&sync)
        .await
        .unwrap();
    assert_eq!(receipt.accepted, 2);
}

#[tokio::test]
async fn failing_to_record_sync_time_is_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("x-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(points_body("B-3")))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore {
        fail_record: true,
        ..Default::default()
    });
    let receipt = service(store, Arc::new(Inbox::default()))
        .execute(&descriptor(server.uri()))
        .await
        .unwrap();
    assert_eq!(receipt.batch_id, "B-3");
}

#[tokio::test]
async fn execute_by_id_looks_up_descriptor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(points_body("B-4")))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore {
        syncs: vec![descriptor(server.uri())],
        ..Default::default()
    });
    let svc = service(store, Arc::new(Inbox::default()));
    assert_eq!(svc.execute_by_id(42).await.unwrap().batch_id, "B-4");
    assert!(matches!(svc.execute_by_id(1).await.unwrap_err(), SyncError::NotFound(1)));
}
