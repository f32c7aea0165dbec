//! Node configuration file.
//!
//! A node is described by one JSON document:
//!
//! ```json
//! {
//!   "role": "local",
//!   "state_path": "edgesync-state.json",
//!   "conflict_policy": "server-wins",
//!   "sync_interval_secs": 300,
//!   "peers": [
//!     { "key": "cloud", "base_url": "https://cloud.example.com/api", "api_key": "..." }
//!   ],
//!   "record_types": [
//!     { "name": "inventory.product", "fields": [ { "name": "qty", "kind": "integer" } ] }
//!   ],
//!   "server": { "bind": "0.0.0.0:8080", "api_keys": ["..."] }
//! }
//! ```

use anyhow::{Context, Result};
use edgesync_engine::{NodeRole, PeerConfig, RetryConfig, SyncConfig};
use edgesync_protocol::{ConflictPolicy, FieldKind, RecordSchema, SchemaRegistry};
use edgesync_server::{AuthConfig, ServerConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STATE_PATH: &str = "edgesync-state.json";

/// Parsed node configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeFile {
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub state_path: Option<PathBuf>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    pub batch_size: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub sync_interval_secs: Option<u64>,
    #[serde(default)]
    pub retry: RetryFile,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub record_types: Vec<RecordTypeFile>,
    #[serde(default)]
    pub server: ServerFile,
}

fn enabled_by_default() -> bool {
    true
}

/// Backoff settings; unset values keep the engine defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryFile {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

/// A syncable record type and its field decoders.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordTypeFile {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldFile>,
}

/// One declared field.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldFile {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub nullable: bool,
}

/// HTTP server settings, used by `edgesync serve`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerFile {
    pub bind: Option<SocketAddr>,
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// HMAC secret for signed peer tokens.
    pub secret: Option<String>,
    pub token_expiry_secs: Option<u64>,
    pub max_push_batch: Option<usize>,
    pub conflict_policy: Option<ConflictPolicy>,
}

impl NodeFile {
    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Parses a configuration document.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Where journal, checkpoints, audit log and records are persisted.
    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH))
    }

    /// Engine configuration, validated.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        let mut config = SyncConfig::new(self.role)
            .with_enabled(self.enabled)
            .with_conflict_policy(self.conflict_policy)
            .with_retry(self.retry.to_retry_config());
        for peer in &self.peers {
            config = config.with_peer(peer.clone());
        }
        if let Some(size) = self.batch_size {
            config = config.with_push_batch_size(size);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.sync_interval_secs.filter(|s| *s > 0) {
            config = config.with_sync_interval(Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }

    /// Schema registry built from the declared record types.
    pub fn registry(&self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        for record_type in &self.record_types {
            let mut schema = RecordSchema::new(record_type.name.as_str());
            for field in &record_type.fields {
                let kind: FieldKind = field.kind.parse().with_context(|| {
                    format!("field {}.{}", record_type.name, field.name)
                })?;
                schema = if field.nullable {
                    schema.nullable_field(field.name.as_str(), kind)
                } else {
                    schema.field(field.name.as_str(), kind)
                };
            }
            registry = registry.register(schema);
        }
        Ok(registry)
    }

    /// Server configuration. Upload conflicts follow the node policy unless
    /// the server section overrides it.
    pub fn server_config(&self) -> ServerConfig {
        let server = &self.server;
        let mut config = match server.bind {
            Some(addr) => ServerConfig::new(addr),
            None => ServerConfig::default(),
        }
        .with_conflict_policy(server.conflict_policy.unwrap_or(self.conflict_policy));

        if let Some(size) = server.max_push_batch {
            config = config.with_max_push_batch(size);
        }
        for key in &server.api_keys {
            config = config.with_api_key(key.as_str());
        }
        if let Some(secret) = &server.secret {
            let mut auth = AuthConfig::new(secret.as_bytes().to_vec());
            if let Some(secs) = server.token_expiry_secs {
                auth = auth.with_expiry(Duration::from_secs(secs));
            }
            config = config.with_auth(auth);
        }
        config
    }
}

impl RetryFile {
    fn to_retry_config(&self) -> RetryConfig {
        let mut retry = RetryConfig::new();
        if let Some(attempts) = self.max_attempts {
            retry = retry.with_max_attempts(attempts);
        }
        if let Some(ms) = self.initial_delay_ms {
            retry = retry.with_initial_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_delay_ms {
            retry = retry.with_max_delay(Duration::from_millis(ms));
        }
        if let Some(multiplier) = self.backoff_multiplier {
            retry = retry.with_backoff_multiplier(multiplier);
        }
        retry
    }
}
