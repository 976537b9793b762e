//! Error types for the proxy-rotator crate.
//!
//! Probe failures, pool exhaustion and eviction are not errors: they surface as
//! [`ProbeResult`](crate::prober::ProbeResult) values, `None` from
//! [`ProxyPool::get`](crate::pool::ProxyPool::get) and pool membership.

use thiserror::Error;

/// Errors raised by pool persistence, proxy list import and client construction.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading or writing a pool file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pool file could not be encoded or decoded.
    #[error("invalid pool document: {0}")]
    Json(#[from] serde_json::Error),

    /// Downloading a proxy list failed.
    #[error("failed to fetch proxy list: {0}")]
    Fetch(#[source] reqwest::Error),

    /// A proxy string could not be parsed.
    #[error("invalid proxy `{0}`")]
    InvalidProxy(String),

    /// An HTTP client for a proxy could not be built.
    #[error("failed to build client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
