//! HTTP router exposing the wire contract and the administrative surface.

use crate::error::{ServerError, ServerResult};
use crate::server::{parse_since, ServerStats, SyncServer};
use axum::{
    body::Bytes,
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use edgesync_engine::{LocalRecord, Resolution, SyncSummary, DEFAULT_LIMIT};
use edgesync_protocol::{DownloadResponse, Payload, RecordId, UploadResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

type SharedServer = Arc<SyncServer>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = Json(json!({ "error": self.kind(), "message": self.to_string() }));
        (status, body).into_response()
    }
}

/// Builds the router for a node.
///
/// Every `/sync/*` route requires a bearer token when the server has
/// credentials configured; `/health` is always open.
pub fn router(server: SharedServer) -> Router {
    let sync = Router::new()
        .route("/sync/upload", post(upload))
        .route("/sync/download", get(download))
        .route("/sync/status", get(status))
        .route("/sync/queue", get(queue))
        .route("/sync/logs", get(logs))
        .route("/sync/sync-now", post(sync_now))
        .route("/sync/resolve-conflict", post(resolve_conflict))
        .route("/sync/clear-queue", delete(clear_queue))
        .route("/sync/purge", post(purge))
        .route_layer(middleware::from_fn_with_state(server.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(sync)
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn serve(
    server: SharedServer,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> ServerResult<()> {
    let addr = server.config().bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, role = %server.admin().role(), "sync server listening");

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("sync server stopped");
    Ok(())
}

async fn require_auth(
    State(server): State<SharedServer>,
    request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match server.authenticate(bearer) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// Runs `f` on the blocking pool.
///
/// Engine calls take parking_lot locks, write state files and, for
/// `sync-now`, perform blocking HTTP requests to peers.
async fn blocking<T, F>(server: SharedServer, f: F) -> ServerResult<T>
where
    F: FnOnce(&SyncServer) -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&server))
        .await
        .map_err(|e| ServerError::Internal(format!("worker failed: {e}")))?
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    role: String,
    stats: ServerStats,
}

async fn health(State(server): State<SharedServer>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        role: server.admin().role().to_string(),
        stats: server.stats(),
    })
}

async fn upload(
    State(server): State<SharedServer>,
    body: Bytes,
) -> ServerResult<Json<UploadResponse>> {
    let response = blocking(server, move |s| s.handle_upload_body(&body)).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    since: Option<String>,
}

async fn download(
    State(server): State<SharedServer>,
    Query(params): Query<DownloadParams>,
) -> ServerResult<Json<DownloadResponse>> {
    let since = parse_since(params.since.as_deref())?;
    let response = blocking(server, move |s| s.handle_download(since)).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn status(State(server): State<SharedServer>) -> Json<Value> {
    Json(json!(server.admin().status()))
}

async fn queue(
    State(server): State<SharedServer>,
    Query(params): Query<LimitParams>,
) -> Json<Value> {
    let items = server.admin().queue(params.limit.unwrap_or(DEFAULT_LIMIT));
    Json(json!({ "queue": items }))
}

async fn logs(
    State(server): State<SharedServer>,
    Query(params): Query<LimitParams>,
) -> Json<Value> {
    let entries = server.admin().logs(params.limit.unwrap_or(DEFAULT_LIMIT));
    Json(json!({ "logs": entries }))
}

async fn sync_now(State(server): State<SharedServer>) -> ServerResult<Json<SyncSummary>> {
    let summary = blocking(server, |s| Ok(s.admin().sync_now())).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct ResolveConflictRequest {
    record_type: String,
    record_id: RecordId,
    resolution: String,
    #[serde(default)]
    data: Option<Payload>,
}

impl ResolveConflictRequest {
    fn resolution(&self) -> ServerResult<Resolution> {
        match self.resolution.as_str() {
            "local" => Ok(Resolution::Local),
            "remote" => Ok(Resolution::Remote),
            "merge" => self
                .data
                .clone()
                .map(Resolution::Merge)
                .ok_or_else(|| ServerError::InvalidRequest("merge requires data".into())),
            other => Err(ServerError::InvalidRequest(format!(
                "unknown resolution: {other}"
            ))),
        }
    }
}

async fn resolve_conflict(
    State(server): State<SharedServer>,
    Json(request): Json<ResolveConflictRequest>,
) -> ServerResult<Json<LocalRecord>> {
    let resolution = request.resolution()?;
    let record = blocking(server, move |s| {
        Ok(s.admin()
            .resolve_conflict(&request.record_type, request.record_id, resolution)?)
    })
    .await?;
    Ok(Json(record))
}

async fn clear_queue(State(server): State<SharedServer>) -> ServerResult<Json<Value>> {
    let removed = blocking(server, |s| Ok(s.admin().clear_queue()?)).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
struct PurgeRequest {
    before: DateTime<Utc>,
}

async fn purge(
    State(server): State<SharedServer>,
    Json(request): Json<PurgeRequest>,
) -> ServerResult<Json<Value>> {
    let removed = blocking(server, move |s| Ok(s.admin().purge_processed(request.before)?)).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(resolution: &str, data: Option<Value>) -> ResolveConflictRequest {
        serde_json::from_value(json!({
            "record_type": "inventory.product",
            "record_id": 7,
            "resolution": resolution,
            "data": data,
        }))
        .unwrap()
    }

    #[test]
    fn resolution_parsing() {
        assert_eq!(request("local", None).resolution().unwrap(), Resolution::Local);
        assert_eq!(request("remote", None).resolution().unwrap(), Resolution::Remote);
        assert!(matches!(
            request("merge", Some(json!({"qty": 4}))).resolution().unwrap(),
            Resolution::Merge(_)
        ));
        assert!(request("merge", None).resolution().is_err());
        assert!(request("both", None).resolution().is_err());
        assert_eq!(request("local", None).record_id, RecordId::from("7"));
    }
}
