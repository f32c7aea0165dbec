//! Server configuration.

use crate::auth::AuthConfig;
use edgesync_protocol::ConflictPolicy;
use std::net::SocketAddr;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum number of changes accepted in one upload.
    pub max_push_batch: usize,
    /// Policy applied when an uploaded change conflicts with the stored record.
    pub conflict_policy: ConflictPolicy,
    /// Static bearer tokens accepted as-is.
    pub api_keys: Vec<String>,
    /// HMAC settings for signed peer tokens.
    pub auth: Option<AuthConfig>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_push_batch: 1000,
            conflict_policy: ConflictPolicy::ServerWins,
            api_keys: Vec::new(),
            auth: None,
        }
    }

    /// Sets the maximum upload batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the conflict policy for uploads.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Accepts `key` as a bearer token.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_keys.push(key.into());
        self
    }

    /// Accepts HMAC-signed peer tokens.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Whether requests must carry a bearer token.
    pub fn require_auth(&self) -> bool {
        !self.api_keys.is_empty() || self.auth.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
