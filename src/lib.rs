//! # proxy-rotator
//!
//! Keeps outbound traffic of a long-running job flowing through a rotating set
//! of forward proxies.
//!
//! A [`ProxyPool`] probes candidate proxies and answers "which one is best
//! now", a [`RotationScheduler`] re-validates the active proxy in the
//! background and hot-swaps it through an [`ApplyProxy`] consumer when it
//! fails, and a [`ProxyWatchdog`] reports the health of one fixed proxy.
//! [`ActiveProxy`] holds the configuration request code reads, and
//! [`ActiveProxyMiddleware`] plugs it into a reqwest client.

pub mod config;
pub mod error;
pub mod middleware;
pub mod network;
pub mod pool;
pub mod prober;
pub mod proxy;
pub mod scheduler;
pub mod watchdog;
mod task;
mod utils;

#[cfg(test)]
mod testing;

pub use config::{ProbeConfig, RotationConfig, RotationConfigBuilder};
pub use error::{Error, Result};
pub use middleware::ActiveProxyMiddleware;
pub use network::ActiveProxy;
pub use pool::{PoolSnapshot, PoolStats, ProxyPool, EVICTION_THRESHOLD};
pub use prober::{probe_proxy, HttpProber, ProbeError, ProbeResult, Prober};
pub use proxy::{ProxyAuth, ProxyDescriptor, ProxyKey, ProxyScheme};
pub use scheduler::{ApplyProxy, RotationOutcome, RotationScheduler};
pub use watchdog::{ProxyWatchdog, StatusCallback};
