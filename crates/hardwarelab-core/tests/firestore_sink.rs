//! 集成测试 - Firestore 写入端
//!
//! 用进程内的 axum 服务器模拟 Firestore REST 接口。

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use hardwarelab_core::adapter::PAIRING_INITIATED;
use hardwarelab_core::channel::METHOD_PAIR_DEVICE;
use hardwarelab_core::sink::firestore::FirestoreConfig;
use hardwarelab_core::{
    Adapter, AdapterOptions, CommandResult, DeviceRecord, EventSink, FirestoreSink,
    MemoryRegistry, MethodCall, PairingLogEntry, SinkError, WriteMode,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct RecordedWrite {
    project: String,
    database: String,
    collection: String,
    key: Option<String>,
    authorization: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct FakeFirestore {
    writes: Arc<Mutex<Vec<RecordedWrite>>>,
}

impl FakeFirestore {
    fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }
}

async fn create_document(
    State(state): State<FakeFirestore>,
    Path((project, database, collection)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if project == "denied" {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": {"code": 403, "status": "PERMISSION_DENIED"}})),
        );
    }

    let mut writes = state.writes.lock().unwrap();
    writes.push(RecordedWrite {
        project: project.clone(),
        database: database.clone(),
        collection: collection.clone(),
        key: query.get("key").cloned(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.clone(),
    });

    let name = format!(
        "projects/{project}/databases/{database}/documents/{collection}/doc-{}",
        writes.len()
    );
    (
        StatusCode::OK,
        Json(json!({"name": name, "fields": body["fields"].clone()})),
    )
}

async fn spawn_fake_firestore() -> (String, FakeFirestore) {
    let state = FakeFirestore::default();
    let app = Router::new()
        .route(
            "/v1/projects/:project/databases/:database/documents/:collection",
            post(create_document),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/v1"), state)
}

fn config(endpoint: &str, project: &str) -> FirestoreConfig {
    let mut config = FirestoreConfig::new(project);
    config.endpoint = endpoint.to_string();
    config
}

#[tokio::test]
async fn test_write_creates_document() {
    let (endpoint, fake) = spawn_fake_firestore().await;
    let mut config = config(&endpoint, "hardwarelab");
    config.api_key = Some("web-key".to_string());
    config.auth_token = Some("token-123".to_string());
    let sink = FirestoreSink::new(config).unwrap();

    let entry = PairingLogEntry {
        name: "Headset".to_string(),
        address: "AA:BB:CC:DD:EE:FF".to_string(),
        paired_at: 1_700_000_000_000,
    };
    let receipt = sink.write(&entry).await.unwrap();

    assert_eq!(
        receipt.document,
        "projects/hardwarelab/databases/(default)/documents/device_pairings/doc-1"
    );

    let writes = fake.writes();
    assert_eq!(writes.len(), 1);
    let write = &writes[0];
    assert_eq!(write.project, "hardwarelab");
    assert_eq!(write.database, "(default)");
    assert_eq!(write.collection, "device_pairings");
    assert_eq!(write.key.as_deref(), Some("web-key"));
    assert_eq!(write.authorization.as_deref(), Some("Bearer token-123"));
    assert_eq!(
        write.body,
        json!({
            "fields": {
                "name": {"stringValue": "Headset"},
                "address": {"stringValue": "AA:BB:CC:DD:EE:FF"},
                "paired_at": {"integerValue": "1700000000000"}
            }
        })
    );
}

#[tokio::test]
async fn test_rejected_write_reports_status() {
    let (endpoint, fake) = spawn_fake_firestore().await;
    let sink = FirestoreSink::new(config(&endpoint, "denied")).unwrap();

    let err = sink
        .write(&PairingLogEntry::now("Headset", "AA:BB:CC:DD:EE:FF"))
        .await
        .unwrap_err();

    match err {
        SinkError::Rejected { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("PERMISSION_DENIED"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(fake.writes().is_empty());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    // 绑定后立即释放端口，保证没有服务在监听
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sink = FirestoreSink::new(config(&format!("http://{addr}/v1"), "hardwarelab")).unwrap();
    let err = sink
        .write(&PairingLogEntry::now("Headset", "AA:BB:CC:DD:EE:FF"))
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::Transport(_)));
}

/// 从命令到 Firestore 文档的完整路径
#[tokio::test]
async fn test_pair_device_reaches_firestore() {
    let (endpoint, fake) = spawn_fake_firestore().await;
    let registry = Arc::new(MemoryRegistry::default());
    registry.add_visible(DeviceRecord::new(Some("Speaker"), "11:22:33:44:55:66"));
    let sink = Arc::new(FirestoreSink::new(config(&endpoint, "hardwarelab")).unwrap());
    let adapter = Adapter::new(
        registry,
        sink,
        AdapterOptions {
            write_mode: WriteMode::Await,
            ..Default::default()
        },
    );

    let call =
        MethodCall::new(1, METHOD_PAIR_DEVICE).with_argument("address", "11:22:33:44:55:66");
    let result = adapter.dispatch(&call).await;

    assert_eq!(
        result,
        CommandResult::Success {
            value: json!(PAIRING_INITIATED)
        }
    );
    let writes = fake.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].body["fields"]["address"]["stringValue"],
        "11:22:33:44:55:66"
    );
    assert_eq!(writes[0].body["fields"]["name"]["stringValue"], "Speaker");
}
