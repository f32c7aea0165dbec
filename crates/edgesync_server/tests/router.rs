//! HTTP router tests.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use edgesync_engine::{NodeRole, Replica, SyncAdmin, SyncStatus};
use edgesync_protocol::{
    ChangeRecord, ConflictPolicy, FieldKind, Operation, Payload, RecordId, RecordSchema,
    SchemaRegistry, UploadRequest,
};
use edgesync_server::{router, AuthConfig, ServerConfig, SyncServer};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const KEY: &str = "edge-key";

fn registry() -> SchemaRegistry {
    SchemaRegistry::new().register(
        RecordSchema::new("inventory.product")
            .field("name", FieldKind::Text)
            .field("qty", FieldKind::Integer),
    )
}

fn app_with(role: NodeRole, config: ServerConfig) -> (Router, Arc<SyncServer>) {
    let replica = Arc::new(Replica::new(registry()).with_lanes(vec!["sibling".into()]));
    let server = Arc::new(SyncServer::new(SyncAdmin::new(replica, role), config));
    (router(server.clone()), server)
}

fn cloud() -> (Router, Arc<SyncServer>) {
    app_with(NodeRole::Cloud, ServerConfig::default().with_api_key(KEY))
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn upload_body(changes: &[ChangeRecord]) -> Value {
    serde_json::to_value(UploadRequest::from_batch(changes)).unwrap()
}

fn product(id: &str, qty: i64, version: u64) -> ChangeRecord {
    let mut payload = Payload::new();
    payload.insert("name".into(), json!(format!("item {id}")));
    payload.insert("qty".into(), json!(qty));
    ChangeRecord::new("inventory.product", id, Operation::Create, payload, version).unwrap()
}

#[tokio::test]
async fn health_is_open() {
    let (app, _) = cloud();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["role"], "cloud");
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let (app, server) = cloud();
    let request = Request::builder()
        .uri("/sync/download")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(server.stats().rejected, 1);
}

#[tokio::test]
async fn signed_tokens_are_accepted() {
    let (app, server) = app_with(
        NodeRole::Cloud,
        ServerConfig::default().with_auth(AuthConfig::new(b"router-secret".to_vec())),
    );
    let token = server
        .authenticator()
        .tokens()
        .unwrap()
        .create_token("store-4")
        .unwrap();
    let request = Request::builder()
        .uri("/sync/status")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn upload_then_download() {
    let (app, _) = cloud();

    let body = upload_body(&[product("1", 3, 1), product("2", 8, 1)]);
    let (status, body) = send(&app, request(Method::POST, "/sync/upload", Some(body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "processed": 2, "conflicts": 0 }));

    let (status, body) = send(&app, request(Method::GET, "/sync/download", None)).await;
    assert_eq!(status, StatusCode::OK);
    let changes = body["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0]["operation"], "update");
    let hwm = body["high_water_mark"].as_str().unwrap().to_string();

    let uri = format!("/sync/download?since={hwm}");
    let (_, body) = send(&app, request(Method::GET, &uri, None)).await;
    assert!(body["changes"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn integer_record_ids_are_accepted() {
    let (app, server) = cloud();
    let body = json!({
        "changes": {
            "create": [{ "model": "inventory.product", "id": 42, "data": { "qty": 1 }, "version": 1 }]
        }
    });
    let (status, body) = send(&app, request(Method::POST, "/sync/upload", Some(body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 1);
    assert!(server
        .replica()
        .get("inventory.product", &RecordId::from(42u64))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn malformed_upload_is_bad_request() {
    let (app, _) = cloud();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/sync/upload")
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
        .body(Body::from("{\"changes\": 5}"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn invalid_since_is_bad_request() {
    let (app, _) = cloud();
    let (status, _) = send(
        &app,
        request(Method::GET, "/sync/download?since=last-tuesday", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn local_nodes_do_not_serve_the_wire_contract() {
    let (app, _) = app_with(NodeRole::Local, ServerConfig::default().with_api_key(KEY));
    let (status, _) = send(&app, request(Method::GET, "/sync/download", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, request(Method::GET, "/sync/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "local");
}

#[tokio::test]
async fn admin_queue_logs_and_clear() {
    let (app, server) = cloud();
    let replica = server.replica().clone();
    let mut fields = Payload::new();
    fields.insert("qty".into(), json!(1));
    replica.create("inventory.product", "9", fields).unwrap();

    let (status, body) = send(&app, request(Method::GET, "/sync/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pending_changes"], 1);

    let (_, body) = send(&app, request(Method::GET, "/sync/queue?limit=10", None)).await;
    let queue = body["queue"].as_array().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0]["peer"], "sibling");
    assert_eq!(queue[0]["record_id"], "9");

    let (status, body) = send(&app, request(Method::DELETE, "/sync/clear-queue", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);

    let (_, body) = send(&app, request(Method::GET, "/sync/logs?limit=1", None)).await;
    assert_eq!(body["logs"][0]["operation"], "admin");
    assert_eq!(body["logs"][0]["message"], "sync queue cleared");
}

#[tokio::test]
async fn purge_requires_a_timestamp() {
    let (app, _) = cloud();
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/sync/purge",
            Some(json!({ "before": "2030-01-01T00:00:00Z" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);

    let (status, _) = send(&app, request(Method::POST, "/sync/purge", Some(json!({})))).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn sync_now_without_peers() {
    let (app, _) = cloud();
    let (status, body) = send(&app, request(Method::POST, "/sync/sync-now", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"][0], "no peers configured");
}

#[tokio::test]
async fn manual_conflict_resolved_over_http() {
    let (app, server) = app_with(
        NodeRole::Cloud,
        ServerConfig::default()
            .with_api_key(KEY)
            .with_conflict_policy(ConflictPolicy::Manual),
    );
    let replica = server.replica().clone();
    let mut fields = Payload::new();
    fields.insert("qty".into(), json!(10));
    replica.create("inventory.product", "5", fields.clone()).unwrap();
    replica.update("inventory.product", "5", fields).unwrap();

    let body = upload_body(&[product("5", 2, 1)]);
    let (_, body) = send(&app, request(Method::POST, "/sync/upload", Some(body))).await;
    assert_eq!(body["conflicts"], 1);

    let unknown = json!({ "record_type": "inventory.product", "record_id": "5", "resolution": "later" });
    let (status, _) = send(
        &app,
        request(Method::POST, "/sync/resolve-conflict", Some(unknown)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resolve = json!({ "record_type": "inventory.product", "record_id": "5", "resolution": "remote" });
    let (status, body) = send(
        &app,
        request(Method::POST, "/sync/resolve-conflict", Some(resolve.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fields"]["qty"], 2);

    let stored = replica
        .get("inventory.product", &RecordId::from("5"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);

    let (status, _) = send(
        &app,
        request(Method::POST, "/sync/resolve-conflict", Some(resolve)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
