//! HTTP transport implementation.
//!
//! [`HttpTransport`] speaks the JSON wire contract:
//! - `POST {base}/sync/upload` with an [`UploadRequest`] body
//! - `GET {base}/sync/download?since=<RFC 3339>`
//!
//! The HTTP client itself is abstracted by [`HttpClient`], so the transport
//! can run over reqwest, an in-process server, or a test double.

use crate::config::PeerConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{PeerTransport, PullBatch, PushReceipt};
use chrono::{DateTime, SecondsFormat, Utc};
use edgesync_protocol::{ChangeRecord, DownloadResponse, UploadRequest, UploadResponse};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations report connection failures and timeouts as errors and
/// every received response, whatever its status, as `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a POST with a JSON body.
    fn post(&self, url: &str, bearer: Option<&str>, body: Vec<u8>) -> SyncResult<HttpResponse>;

    /// Sends a GET.
    fn get(&self, url: &str, bearer: Option<&str>) -> SyncResult<HttpResponse>;
}

/// HTTP-based peer transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    api_key: Option<String>,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport for a configured peer.
    pub fn from_peer(peer: &PeerConfig, client: C) -> Self {
        let transport = Self::new(&peer.base_url, client);
        match &peer.api_key {
            Some(key) => transport.with_api_key(key),
            None => transport,
        }
    }

    /// Sends the given bearer token with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn track<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.to_string()),
        }
        result
    }

    fn check_status(url: &str, response: HttpResponse) -> SyncResult<Vec<u8>> {
        if response.is_success() {
            return Ok(response.body);
        }
        let detail = format!(
            "{url} answered {}: {}",
            response.status,
            String::from_utf8_lossy(&response.body)
        );
        Err(match response.status {
            401 | 403 => SyncError::AuthenticationFailed(detail),
            500..=599 => SyncError::ServerError(detail),
            _ => SyncError::transport_fatal(detail),
        })
    }

    fn upload(&self, batch: &[ChangeRecord]) -> SyncResult<PushReceipt> {
        let url = format!("{}/sync/upload", self.base_url);
        let body = UploadRequest::from_batch(batch).encode()?;
        debug!(url = %url, changes = batch.len(), "uploading batch");

        let response = self.client.post(&url, self.api_key.as_deref(), body)?;
        let body = Self::check_status(&url, response)?;
        let response = UploadResponse::decode(&body)?;
        Ok(PushReceipt {
            accepted_count: response.processed,
            conflict_count: response.conflicts,
            errors: response.errors,
        })
    }

    fn download(&self, since: Option<DateTime<Utc>>) -> SyncResult<PullBatch> {
        let mut url = format!("{}/sync/download", self.base_url);
        if let Some(since) = since {
            url.push_str("?since=");
            url.push_str(&since.to_rfc3339_opts(SecondsFormat::Micros, true));
        }
        debug!(url = %url, "downloading changes");

        let response = self.client.get(&url, self.api_key.as_deref())?;
        let body = Self::check_status(&url, response)?;
        let (decoded, high_water_mark) = DownloadResponse::decode_changes(&body, Utc::now())?;
        Ok(PullBatch {
            changes: decoded.changes,
            rejected: decoded.rejected,
            high_water_mark,
        })
    }
}

impl<C: HttpClient> PeerTransport for HttpTransport<C> {
    fn push(&self, batch: &[ChangeRecord]) -> SyncResult<PushReceipt> {
        self.track(self.upload(batch))
    }

    fn pull(&self, since: Option<DateTime<Utc>>) -> SyncResult<PullBatch> {
        self.track(self.download(since))
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to `path`.
    fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse;

    /// Handles a GET to `path_and_query`.
    fn handle_get(&self, path_and_query: &str, bearer: Option<&str>) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse {
        (**self).handle_post(path, bearer, body)
    }

    fn handle_get(&self, path_and_query: &str, bearer: Option<&str>) -> HttpResponse {
        (**self).handle_get(path_and_query, bearer)
    }
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    fn path(url: &str) -> &str {
        url.find("/sync/").map(|i| &url[i..]).unwrap_or(url)
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, bearer: Option<&str>, body: Vec<u8>) -> SyncResult<HttpResponse> {
        Ok(self.server.handle_post(Self::path(url), bearer, &body))
    }

    fn get(&self, url: &str, bearer: Option<&str>) -> SyncResult<HttpResponse> {
        Ok(self.server.handle_get(Self::path(url), bearer))
    }
}

#[cfg(feature = "reqwest")]
pub use self::blocking::ReqwestClient;

#[cfg(feature = "reqwest")]
mod blocking {
    use super::{HttpClient, HttpResponse};
    use crate::error::{SyncError, SyncResult};
    use reqwest::blocking::{Client, RequestBuilder};
    use reqwest::header::CONTENT_TYPE;
    use std::time::Duration;

    /// Blocking reqwest client with a per-request timeout.
    ///
    /// Must not be called from inside an async runtime.
    #[derive(Clone)]
    pub struct ReqwestClient {
        client: Client,
    }

    impl ReqwestClient {
        /// Builds a client whose requests time out after `timeout`.
        pub fn new(timeout: Duration) -> SyncResult<Self> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| SyncError::InvalidConfig(format!("http client: {e}")))?;
            Ok(Self { client })
        }

        fn send(request: RequestBuilder, bearer: Option<&str>) -> SyncResult<HttpResponse> {
            let request = match bearer {
                Some(token) => request.bearer_auth(token),
                None => request,
            };
            let response = request.send().map_err(map_error)?;
            let status = response.status().as_u16();
            let body = response.bytes().map_err(map_error)?.to_vec();
            Ok(HttpResponse::new(status, body))
        }
    }

    fn map_error(error: reqwest::Error) -> SyncError {
        if error.is_timeout() {
            SyncError::Timeout
        } else {
            SyncError::transport_retryable(error.to_string())
        }
    }

    impl HttpClient for ReqwestClient {
        fn post(&self, url: &str, bearer: Option<&str>, body: Vec<u8>) -> SyncResult<HttpResponse> {
            let request = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body);
            Self::send(request, bearer)
        }

        fn get(&self, url: &str, bearer: Option<&str>) -> SyncResult<HttpResponse> {
            Self::send(self.client.get(url), bearer)
        }
    }
}
