//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use edgesync_protocol::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Role of a node in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Edge instance that uploads to and downloads from a cloud.
    #[default]
    Local,
    /// Cloud instance; serves upload/download and may fan out to peer clouds.
    Cloud,
}

impl NodeRole {
    /// Returns the configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Local => "local",
            NodeRole::Cloud => "cloud",
        }
    }

    /// Returns true for cloud nodes.
    pub fn is_cloud(&self) -> bool {
        matches!(self, NodeRole::Cloud)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(NodeRole::Local),
            "cloud" => Ok(NodeRole::Cloud),
            other => Err(SyncError::InvalidConfig(format!("unknown node role: {other}"))),
        }
    }
}

/// A remote endpoint this node synchronizes with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Checkpoint and journal lane key.
    pub key: String,
    /// Base URL, e.g. `https://cloud.example.com/api`.
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl PeerConfig {
    /// Creates a peer descriptor.
    pub fn new(key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    /// Sets the bearer token.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Node role.
    pub role: NodeRole,
    /// Whether mutations are journaled and passes may run.
    pub enabled: bool,
    /// Peers, processed in order.
    pub peers: Vec<PeerConfig>,
    /// Maximum number of journal entries per upload request.
    pub push_batch_size: usize,
    /// Policy applied when the resolver reports a conflict.
    pub conflict_policy: ConflictPolicy,
    /// Per-call transport timeout.
    pub timeout: Duration,
    /// Backoff and escalation for failed deliveries.
    pub retry: RetryConfig,
    /// Interval for scheduled passes.
    pub sync_interval: Option<Duration>,
}

impl SyncConfig {
    /// Creates a configuration for a node role with no peers.
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            enabled: true,
            peers: Vec::new(),
            push_batch_size: 100,
            conflict_policy: ConflictPolicy::ServerWins,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            sync_interval: None,
        }
    }

    /// Enables or disables sync.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adds a peer.
    pub fn with_peer(mut self, peer: PeerConfig) -> Self {
        self.peers.push(peer);
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the interval for scheduled passes.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Journal lane keys, one per peer.
    pub fn peer_keys(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.key.clone()).collect()
    }

    /// Checks values the builders accept but the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.push_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "push batch size must be at least 1".into(),
            ));
        }
        self.retry.validate()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(NodeRole::Local)
    }
}

/// Backoff and escalation for journal entries whose delivery failed.
///
/// Backoff is measured from an entry's last failed attempt. Escalation
/// never drops an entry; it only records that an operator should look.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Failed attempts after which an entry is escalated.
    pub max_attempts: Option<u32>,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with default backoff and no escalation.
    pub fn new() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }

    /// Retries on every pass, with no delay.
    pub fn no_backoff() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the escalation threshold.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay required after `failures` failed attempts.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(failures.saturating_sub(1).min(64) as i32);

        Duration::try_from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }

    /// Rejects a multiplier that would shrink or break the backoff.
    pub fn validate(&self) -> SyncResult<()> {
        let multiplier = self.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(format!(
                "backoff multiplier must be a finite number of at least 1, got {multiplier}"
            )));
        }
        Ok(())
    }

    /// Returns true once `failures` reaches the escalation threshold.
    pub fn should_escalate(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
