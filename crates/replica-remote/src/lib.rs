//! `replica-remote`: client for the vendor's object API.
//!
//! Reads and writes configuration objects on tenants with bearer-token auth
//! and capped exponential back-off. All retry history is surfaced to the
//! caller so it can be written to the run ledger.
//!
//! # Architecture
//!
//! ```text
//! RemoteClient          ← list / create / update per (tenant, kind)
//!     │                   retry loop, one token refresh on 401
//!     ├── TokenCache    ← bearer tokens keyed by tenant id, refreshed early
//!     ▼
//! dyn Transport         ← one raw request per call, errors classified
//!     │
//!     ▼
//! HttpTransport         ← reqwest; tests substitute scripted transports
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use replica_remote::{HttpTransport, RemoteClient, TenantEndpoint};
//!
//! let transport = Arc::new(HttpTransport::new(&config.remote)?);
//! let client = RemoteClient::new(transport, endpoints, config.retry.clone(), config.remote.clone());
//! let groups = client.list("acme-prod", ObjectKind::Group).await?;
//! println!("{} groups after {} attempt(s)", groups.value.len(), groups.attempts);
//! ```

pub mod client;
pub mod error;
pub mod http;
pub mod retry;
pub mod token;
pub mod transport;

pub use client::RemoteClient;
pub use error::{CallFailure, RemoteError};
pub use http::HttpTransport;
pub use retry::Retried;
pub use token::TokenCache;
pub use transport::{AccessToken, Page, TenantEndpoint, Transport};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, RemoteError>;
