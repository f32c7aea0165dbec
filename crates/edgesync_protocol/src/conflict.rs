//! Conflict resolution policy.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of applying a policy to a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Incoming payload and version were applied.
    AppliedRemote,
    /// Local state kept and left pending for re-upload.
    KeptLocalPending,
    /// Record marked `conflict` for out-of-band review.
    MarkedForReview,
}

/// Policy for resolving conflicts, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Incoming (authoritative peer) wins.
    #[default]
    ServerWins,
    /// Local wins and is re-offered on the next upload.
    ClientWins,
    /// Neither side is touched; a human resolves it.
    Manual,
}

impl ConflictPolicy {
    /// Returns the resolution this policy produces.
    pub fn resolution(&self) -> ConflictResolution {
        match self {
            ConflictPolicy::ServerWins => ConflictResolution::AppliedRemote,
            ConflictPolicy::ClientWins => ConflictResolution::KeptLocalPending,
            ConflictPolicy::Manual => ConflictResolution::MarkedForReview,
        }
    }

    /// Returns the configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::ServerWins => "server-wins",
            ConflictPolicy::ClientWins => "client-wins",
            ConflictPolicy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "server-wins" => Ok(ConflictPolicy::ServerWins),
            "client-wins" => Ok(ConflictPolicy::ClientWins),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(ProtocolError::UnknownPolicy(other.to_string())),
        }
    }
}
