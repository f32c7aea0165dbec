//! Bearer-token authentication for the sync server.
//!
//! Two kinds of token are accepted:
//! - Static API keys, compared as-is
//! - Signed peer tokens issued by [`TokenValidator::create_token`]
//!
//! ## Token Format
//!
//! `<peer_key>.<issued_at_millis>.<hex hmac-sha256>`
//!
//! The signature covers `<peer_key>|<issued_at_millis>`. The peer key may
//! itself contain dots; the token is split from the right.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration for signed tokens.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates signed peer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for `peer_key`, valid from now.
    pub fn create_token(&self, peer_key: &str) -> ServerResult<String> {
        self.create_token_at(peer_key, now_millis())
    }

    fn create_token_at(&self, peer_key: &str, issued_at: u64) -> ServerResult<String> {
        let mac = self.mac(peer_key, issued_at)?;
        Ok(format!(
            "{peer_key}.{issued_at}.{}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Validates a token and returns the peer key it was issued to.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(issued_at), Some(peer_key)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ServerError::AuthenticationFailed("malformed token".into()));
        };
        if peer_key.is_empty() {
            return Err(ServerError::AuthenticationFailed("malformed token".into()));
        }

        let issued_at: u64 = issued_at
            .parse()
            .map_err(|_| ServerError::AuthenticationFailed("malformed token".into()))?;
        let signature = hex::decode(signature)
            .map_err(|_| ServerError::AuthenticationFailed("malformed token".into()))?;

        self.mac(peer_key, issued_at)?
            .verify_slice(&signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        Ok(peer_key.to_string())
    }

    fn mac(&self, peer_key: &str, issued_at: u64) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key rejected: {e}")))?;
        mac.update(peer_key.as_bytes());
        mac.update(b"|");
        mac.update(issued_at.to_string().as_bytes());
        Ok(mac)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Static set of accepted API keys.
#[derive(Clone, Default)]
pub struct ApiKeyValidator {
    keys: HashSet<String>,
}

impl ApiKeyValidator {
    /// Creates a validator accepting `keys`.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Whether no keys are configured.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Validates that the token is one of the configured keys.
    pub fn validate(&self, token: &str) -> ServerResult<()> {
        if self.keys.contains(token) {
            Ok(())
        } else {
            Err(ServerError::AuthenticationFailed("invalid token".into()))
        }
    }
}

/// Checks bearer tokens against API keys and signed peer tokens.
#[derive(Clone, Default)]
pub struct Authenticator {
    api_keys: ApiKeyValidator,
    tokens: Option<TokenValidator>,
}

impl Authenticator {
    /// Builds the authenticator described by the server configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            api_keys: ApiKeyValidator::new(config.api_keys.iter().cloned()),
            tokens: config.auth.clone().map(TokenValidator::new),
        }
    }

    /// Whether any credential is required.
    pub fn is_required(&self) -> bool {
        !self.api_keys.is_empty() || self.tokens.is_some()
    }

    /// The signed-token validator, if HMAC auth is configured.
    pub fn tokens(&self) -> Option<&TokenValidator> {
        self.tokens.as_ref()
    }

    /// Authenticates a request's bearer token.
    ///
    /// Requests pass unchecked when no credential is configured.
    pub fn authenticate(&self, bearer: Option<&str>) -> ServerResult<()> {
        if !self.is_required() {
            return Ok(());
        }
        let token = bearer
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServerError::AuthenticationFailed("missing bearer token".into()))?;

        if self.api_keys.validate(token).is_ok() {
            return Ok(());
        }
        match &self.tokens {
            Some(tokens) => {
                let peer = tokens.validate_token(token)?;
                debug!(peer = %peer, "peer token accepted");
                Ok(())
            }
            None => Err(ServerError::AuthenticationFailed("invalid token".into())),
        }
    }
}
