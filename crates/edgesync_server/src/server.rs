//! The receiving side of the wire contract.

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, Utc};
use edgesync_engine::{
    ApplyOutcome, AuditEntry, AuditOperation, AuditStatus, HttpResponse, LoopbackServer,
    Replica, SyncAdmin,
};
use edgesync_protocol::{
    DecodedChanges, DownloadChange, DownloadResponse, UploadRequest, UploadResponse,
};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    /// Upload requests handled.
    pub uploads: u64,
    /// Download requests handled.
    pub downloads: u64,
    /// Changes received through uploads.
    pub changes_received: u64,
    /// Changes sent through downloads.
    pub changes_sent: u64,
    /// Requests refused before reaching the engine.
    pub rejected: u64,
}

/// The sync server.
///
/// Wraps a node's [`SyncAdmin`] and serves the upload and download
/// endpoints on top of its [`Replica`]. Only `cloud` nodes serve uploads
/// and downloads; the administrative operations are available on every
/// node.
///
/// # Example
///
/// ```
/// use edgesync_engine::{NodeRole, Replica, SyncAdmin};
/// use edgesync_protocol::SchemaRegistry;
/// use edgesync_server::{ServerConfig, SyncServer};
/// use std::sync::Arc;
///
/// let replica = Arc::new(Replica::new(SchemaRegistry::new()));
/// let server = SyncServer::new(SyncAdmin::new(replica, NodeRole::Cloud), ServerConfig::default());
/// let response = server.handle_download(None).unwrap();
/// assert!(response.changes.is_empty());
/// ```
pub struct SyncServer {
    admin: SyncAdmin,
    config: ServerConfig,
    auth: Authenticator,
    stats: RwLock<ServerStats>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(admin: SyncAdmin, config: ServerConfig) -> Self {
        let auth = Authenticator::from_config(&config);
        Self {
            admin,
            config,
            auth,
            stats: RwLock::new(ServerStats::default()),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Administrative surface of the node.
    pub fn admin(&self) -> &SyncAdmin {
        &self.admin
    }

    /// The node's replica.
    pub fn replica(&self) -> &Arc<Replica> {
        self.admin.replica()
    }

    /// Request authenticator.
    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// Request counters.
    pub fn stats(&self) -> ServerStats {
        self.stats.read().clone()
    }

    /// Checks a request's bearer token.
    pub fn authenticate(&self, bearer: Option<&str>) -> ServerResult<()> {
        self.auth.authenticate(bearer).inspect_err(|e| {
            self.stats.write().rejected += 1;
            debug!(error = %e, "request rejected");
        })
    }

    fn ensure_cloud(&self) -> ServerResult<()> {
        if self.admin.role().is_cloud() {
            return Ok(());
        }
        self.stats.write().rejected += 1;
        Err(ServerError::NotAuthorized(
            "this endpoint is only available on cloud nodes".into(),
        ))
    }

    /// Applies an uploaded batch.
    ///
    /// Each change is applied on its own: a rejected change is counted as a
    /// conflict and reported in `errors` without affecting the others.
    pub fn handle_upload(&self, request: UploadRequest) -> ServerResult<UploadResponse> {
        self.apply_upload(request.into_changes())
    }

    /// Decodes and applies a raw upload body.
    ///
    /// Entries that cannot be decoded are rejected one by one, like entries
    /// the replica refuses; only a body that is not an upload fails.
    pub fn handle_upload_body(&self, body: &[u8]) -> ServerResult<UploadResponse> {
        let decoded = UploadRequest::decode_changes(body)?;
        self.apply_upload(decoded)
    }

    fn apply_upload(&self, decoded: DecodedChanges) -> ServerResult<UploadResponse> {
        self.ensure_cloud()?;
        if decoded.len() > self.config.max_push_batch {
            return Err(ServerError::InvalidRequest(format!(
                "too many changes: {} > {}",
                decoded.len(),
                self.config.max_push_batch
            )));
        }

        let DecodedChanges { changes, rejected } = decoded;
        let received = changes.len() + rejected.len();
        let replica = self.replica();
        let mut response = UploadResponse::default();
        for message in rejected {
            warn!(error = %message, "uploaded change could not be decoded");
            response.conflicts += 1;
            response.errors.push(message);
        }

        for change in &changes {
            match replica.apply_incoming(change, self.config.conflict_policy) {
                Ok(ApplyOutcome::Applied | ApplyOutcome::Ignored) => response.processed += 1,
                Ok(ApplyOutcome::Conflict(resolution)) => {
                    debug!(
                        record_type = %change.record_type,
                        record_id = %change.record_id,
                        resolution = ?resolution,
                        "uploaded change conflicted"
                    );
                    response.conflicts += 1;
                }
                Ok(ApplyOutcome::Held) => response.conflicts += 1,
                Err(e) => {
                    warn!(
                        record_type = %change.record_type,
                        record_id = %change.record_id,
                        error = %e,
                        "uploaded change rejected"
                    );
                    response.conflicts += 1;
                    response
                        .errors
                        .push(format!("{}/{}: {e}", change.record_type, change.record_id));
                }
            }
        }

        let status = if response.errors.is_empty() {
            AuditStatus::Success
        } else {
            AuditStatus::Partial
        };
        replica.audit().append(
            AuditEntry::new(
                AuditOperation::Upload,
                status,
                format!(
                    "processed {} changes, {} conflicts",
                    response.processed, response.conflicts
                ),
            )
            .with_details(json!({ "errors": response.errors })),
        );
        replica.persist()?;

        {
            let mut stats = self.stats.write();
            stats.uploads += 1;
            stats.changes_received += received as u64;
        }
        info!(
            received,
            processed = response.processed,
            conflicts = response.conflicts,
            "upload handled"
        );
        Ok(response)
    }

    /// Lists every registered record modified after `since`.
    ///
    /// The high-water mark is taken before the records are read, so a
    /// record written while the listing runs is offered again next time
    /// rather than skipped. Downloads that serve changes are audited; the
    /// entry is saved with the next persisted write.
    pub fn handle_download(&self, since: Option<DateTime<Utc>>) -> ServerResult<DownloadResponse> {
        self.ensure_cloud()?;
        let high_water_mark = Utc::now();
        let changes: Vec<DownloadChange> = self
            .replica()
            .changes_since(since)?
            .iter()
            .map(DownloadChange::from)
            .collect();

        if !changes.is_empty() {
            self.replica().audit().append(
                AuditEntry::new(
                    AuditOperation::Download,
                    AuditStatus::Success,
                    format!("served {} changes", changes.len()),
                )
                .with_details(json!({
                    "since": since,
                    "changes": changes.len(),
                    "high_water_mark": high_water_mark,
                })),
            );
        }

        {
            let mut stats = self.stats.write();
            stats.downloads += 1;
            stats.changes_sent += changes.len() as u64;
        }
        debug!(since = ?since, changes = changes.len(), "download handled");
        Ok(DownloadResponse {
            changes,
            high_water_mark: Some(high_water_mark),
        })
    }

    fn route_post(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        match path {
            "/sync/upload" => Ok(self.handle_upload_body(body)?.encode()?),
            other => Err(ServerError::NotFound(other.to_string())),
        }
    }

    fn route_get(&self, path_and_query: &str) -> ServerResult<Vec<u8>> {
        let (path, query) = path_and_query
            .split_once('?')
            .unwrap_or((path_and_query, ""));
        match path {
            "/sync/download" => {
                let since = query
                    .split('&')
                    .find_map(|pair| pair.strip_prefix("since="));
                let since = parse_since(since)?;
                Ok(self.handle_download(since)?.encode()?)
            }
            other => Err(ServerError::NotFound(other.to_string())),
        }
    }
}

/// Parses the `since` query parameter.
///
/// Accepts RFC 3339 timestamps. A `+` offset that arrived form-decoded as a
/// space is restored; an empty value means "from the beginning".
pub fn parse_since(raw: Option<&str>) -> ServerResult<Option<DateTime<Utc>>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let normalized = raw.replace(' ', "+");
    DateTime::parse_from_rfc3339(&normalized)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| ServerError::InvalidRequest(format!("invalid since {raw:?}: {e}")))
}

fn respond(result: ServerResult<Vec<u8>>) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::new(200, body),
        Err(e) => {
            let body = json!({ "error": e.kind(), "message": e.to_string() });
            HttpResponse::new(e.status_code(), body.to_string().into_bytes())
        }
    }
}

impl LoopbackServer for SyncServer {
    fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse {
        respond(
            self.authenticate(bearer)
                .and_then(|()| self.route_post(path, body)),
        )
    }

    fn handle_get(&self, path_and_query: &str, bearer: Option<&str>) -> HttpResponse {
        respond(
            self.authenticate(bearer)
                .and_then(|()| self.route_get(path_and_query)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgesync_engine::{NodeRole, SyncStatus};
    use edgesync_protocol::{
        ChangeRecord, ConflictPolicy, FieldKind, Operation, Payload, RecordId, RecordSchema,
        SchemaRegistry,
    };

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().register(
            RecordSchema::new("inventory.product")
                .field("name", FieldKind::Text)
                .field("qty", FieldKind::Integer),
        )
    }

    fn server_with(role: NodeRole, config: ServerConfig) -> SyncServer {
        let replica = Arc::new(Replica::new(registry()));
        SyncServer::new(SyncAdmin::new(replica, role), config)
    }

    fn cloud() -> SyncServer {
        server_with(NodeRole::Cloud, ServerConfig::default())
    }

    fn change(id: &str, operation: Operation, qty: i64, version: u64) -> ChangeRecord {
        let mut payload = Payload::new();
        payload.insert("name".into(), json!(format!("item {id}")));
        payload.insert("qty".into(), json!(qty));
        ChangeRecord::new("inventory.product", id, operation, payload, version).unwrap()
    }

    fn upload(server: &SyncServer, batch: &[ChangeRecord]) -> UploadResponse {
        server
            .handle_upload(UploadRequest::from_batch(batch))
            .unwrap()
    }

    #[test]
    fn upload_then_download() {
        let server = cloud();
        let response = upload(
            &server,
            &[
                change("1", Operation::Create, 3, 1),
                change("2", Operation::Create, 4, 1),
            ],
        );
        assert_eq!(response.processed, 2);
        assert_eq!(response.conflicts, 0);

        let stored = server
            .replica()
            .get("inventory.product", &RecordId::from("1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);

        let download = server.handle_download(None).unwrap();
        assert_eq!(download.changes.len(), 2);
        assert!(download.high_water_mark.is_some());

        let later = server.handle_download(download.high_water_mark).unwrap();
        assert!(later.changes.is_empty());
        assert_eq!(server.stats().uploads, 1);
    }

    #[test]
    fn retried_upload_is_idempotent() {
        let server = cloud();
        let batch = [change("1", Operation::Create, 3, 1)];
        upload(&server, &batch);
        let again = upload(&server, &batch);
        assert_eq!(again.processed, 1);
        assert_eq!(again.conflicts, 0);
    }

    #[test]
    fn rejected_changes_are_isolated() {
        let server = cloud();
        let mut bad = change("2", Operation::Create, 1, 1);
        bad.record_type = "billing.invoice".into();

        let response = upload(&server, &[change("1", Operation::Create, 3, 1), bad]);
        assert_eq!(response.processed, 1);
        assert_eq!(response.conflicts, 1);
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].starts_with("billing.invoice/2"));

        let log = server.replica().audit().recent(1);
        assert_eq!(log[0].operation, AuditOperation::Upload);
        assert_eq!(log[0].status, AuditStatus::Partial);
    }

    #[test]
    fn undecodable_entries_are_isolated() {
        let server = cloud();
        let body = br#"{"changes":{
            "create":[
                {"model":"inventory.product","id":"1","data":{"name":"item 1","qty":3}},
                {"model":"inventory.product","id":"2","data":{"qty":1},"version":0},
                {"id":"3","data":{}}
            ]
        }}"#;

        let response = server.handle_upload_body(body).unwrap();
        assert_eq!(response.processed, 1);
        assert_eq!(response.conflicts, 2);
        assert_eq!(response.errors.len(), 2);
        assert!(response.errors[0].starts_with("inventory.product/2: invalid version 0"));
        assert!(response.errors[1].starts_with("create[2]"));
        assert!(server
            .replica()
            .get("inventory.product", &RecordId::from("1"))
            .unwrap()
            .is_some());
        assert_eq!(server.stats().changes_received, 3);

        let log = server.replica().audit().recent(1);
        assert_eq!(log[0].status, AuditStatus::Partial);
    }

    #[test]
    fn same_version_divergent_upload_is_a_conflict() {
        let server = cloud();
        upload(&server, &[change("1", Operation::Create, 3, 1)]);

        let response = upload(&server, &[change("1", Operation::Create, 4, 1)]);
        assert_eq!(response.processed, 0);
        assert_eq!(response.conflicts, 1);
        let stored = server
            .replica()
            .get("inventory.product", &RecordId::from("1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.fields["qty"], json!(4));
        assert_eq!(stored.sync_version, 1);
    }

    #[test]
    fn downloads_serving_changes_are_audited() {
        let server = cloud();
        server.handle_download(None).unwrap();
        assert!(server
            .replica()
            .audit()
            .by_operation(AuditOperation::Download)
            .is_empty());

        upload(&server, &[change("1", Operation::Create, 3, 1)]);
        server.handle_download(None).unwrap();
        let served = server.replica().audit().by_operation(AuditOperation::Download);
        assert_eq!(served.len(), 1);
        assert_eq!(served[0].status, AuditStatus::Success);
        assert_eq!(served[0].details["changes"], json!(1));
    }

    #[test]
    fn manual_conflicts_are_counted() {
        // A cloud that also replicates to a sibling keeps a journal lane,
        // so its own unconfirmed edits can collide with uploads.
        let replica = Arc::new(Replica::new(registry()).with_lanes(vec!["sibling".into()]));
        let server = SyncServer::new(
            SyncAdmin::new(replica.clone(), NodeRole::Cloud),
            ServerConfig::default().with_conflict_policy(ConflictPolicy::Manual),
        );
        let mut fields = Payload::new();
        fields.insert("qty".into(), json!(9));
        replica.create("inventory.product", "1", fields.clone()).unwrap();
        replica.update("inventory.product", "1", fields).unwrap();

        let response = upload(&server, &[change("1", Operation::Update, 5, 1)]);
        assert_eq!(response.processed, 0);
        assert_eq!(response.conflicts, 1);
        let stored = replica
            .get("inventory.product", &RecordId::from("1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Conflict);
        assert_eq!(stored.fields["qty"], json!(9));
    }

    #[test]
    fn local_nodes_refuse_wire_endpoints() {
        let server = server_with(NodeRole::Local, ServerConfig::default());
        let err = server.handle_download(None).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(server
            .handle_upload(UploadRequest::from_batch(&[]))
            .is_err());
    }

    #[test]
    fn oversized_batches_are_refused() {
        let server = server_with(
            NodeRole::Cloud,
            ServerConfig::default().with_max_push_batch(1),
        );
        let batch = [
            change("1", Operation::Create, 1, 1),
            change("2", Operation::Create, 1, 1),
        ];
        let err = server
            .handle_upload(UploadRequest::from_batch(&batch))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn since_parsing() {
        assert_eq!(parse_since(None).unwrap(), None);
        assert_eq!(parse_since(Some("")).unwrap(), None);
        let t = parse_since(Some("2024-05-01T10:00:00.000000Z")).unwrap().unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        let offset = parse_since(Some("2024-05-01T12:00:00 02:00")).unwrap().unwrap();
        assert_eq!(offset, t);
        assert!(parse_since(Some("yesterday")).is_err());
    }

    #[test]
    fn loopback_routes_and_auth() {
        let server = server_with(
            NodeRole::Cloud,
            ServerConfig::default().with_api_key("edge-key"),
        );

        let denied = server.handle_get("/sync/download", None);
        assert_eq!(denied.status, 401);

        let ok = server.handle_get("/sync/download?since=2024-05-01T10:00:00Z", Some("edge-key"));
        assert_eq!(ok.status, 200);
        assert!(DownloadResponse::decode(&ok.body).unwrap().changes.is_empty());

        let missing = server.handle_post("/sync/nothing", Some("edge-key"), b"{}");
        assert_eq!(missing.status, 404);

        let malformed = server.handle_post("/sync/upload", Some("edge-key"), b"not json");
        assert_eq!(malformed.status, 400);
        assert_eq!(server.stats().rejected, 1);
    }
}
