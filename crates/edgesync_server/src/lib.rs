//! # EdgeSync Server
//!
//! Reference receiving side for EdgeSync nodes.
//!
//! This crate provides:
//! - Upload and download handlers on top of an engine [`Replica`](edgesync_engine::Replica)
//! - Bearer-token authentication (static API keys or HMAC-signed peer tokens)
//! - An axum router exposing the wire contract and the administrative surface
//!
//! ## Endpoints
//!
//! | Method | Path | |
//! |---|---|---|
//! | POST | `/sync/upload` | cloud nodes only |
//! | GET | `/sync/download?since=` | cloud nodes only |
//! | GET | `/sync/status` | |
//! | GET | `/sync/queue?limit=` | |
//! | GET | `/sync/logs?limit=` | |
//! | POST | `/sync/sync-now` | |
//! | POST | `/sync/resolve-conflict` | |
//! | DELETE | `/sync/clear-queue` | |
//! | POST | `/sync/purge` | |
//! | GET | `/health` | no auth |
//!
//! [`SyncServer`] also implements the engine's loopback server trait, so an
//! engine can sync against it in-process without a socket.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod routes;
mod server;

pub use auth::{ApiKeyValidator, AuthConfig, Authenticator, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use routes::{router, serve};
pub use server::{parse_since, ServerStats, SyncServer};
