//! The active outbound network configuration.
//!
//! Request-issuing code asks [`ActiveProxy`] for a client on every request
//! instead of reading proxy settings from process-wide state, so a proxy swap
//! applies to the next request without restarting anything.

use crate::error::{Error, Result};
use crate::proxy::ProxyDescriptor;
use crate::scheduler::ApplyProxy;

use log::info;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

struct ActiveState {
    proxy: Option<ProxyDescriptor>,
    client: reqwest::Client,
    generation: u64,
}

/// Lock-guarded proxy configuration shared between the rotation scheduler
/// and the code issuing requests.
pub struct ActiveProxy {
    state: RwLock<ActiveState>,
    timeout: Option<Duration>,
}

impl ActiveProxy {
    /// Start with a direct connection.
    pub fn new() -> Result<Arc<Self>> {
        Self::build(None)
    }

    /// Start with a direct connection; clients built for this configuration
    /// use `timeout` per request.
    pub fn with_timeout(timeout: Duration) -> Result<Arc<Self>> {
        Self::build(Some(timeout))
    }

    fn build(timeout: Option<Duration>) -> Result<Arc<Self>> {
        let client = build_client(None, timeout)?;
        Ok(Arc::new(Self {
            state: RwLock::new(ActiveState {
                proxy: None,
                client,
                generation: 0,
            }),
            timeout,
        }))
    }

    /// Route subsequent requests through `proxy`. Returns false and changes
    /// nothing if `proxy` routes identically to the active one.
    pub fn apply(&self, proxy: &ProxyDescriptor) -> Result<bool> {
        if self.is_active(proxy) {
            return Ok(false);
        }

        // Built outside the lock; building a client does no network I/O.
        let client = build_client(Some(proxy), self.timeout)?;

        let mut state = self.state.write();
        if state.proxy.as_ref().is_some_and(|p| p.same_endpoint(proxy)) {
            return Ok(false);
        }
        state.proxy = Some(proxy.clone());
        state.client = client;
        state.generation += 1;
        info!("Outbound traffic now routed through {}", proxy);
        Ok(true)
    }

    /// Revert to a direct connection. Returns false if already direct.
    pub fn clear(&self) -> Result<bool> {
        if self.state.read().proxy.is_none() {
            return Ok(false);
        }
        let client = build_client(None, self.timeout)?;

        let mut state = self.state.write();
        if state.proxy.take().is_none() {
            return Ok(false);
        }
        state.client = client;
        state.generation += 1;
        info!("Outbound traffic now uses a direct connection");
        Ok(true)
    }

    /// Whether `proxy` is the active configuration.
    pub fn is_active(&self, proxy: &ProxyDescriptor) -> bool {
        self.state
            .read()
            .proxy
            .as_ref()
            .is_some_and(|p| p.same_endpoint(proxy))
    }

    /// The active proxy, `None` for a direct connection.
    pub fn proxy(&self) -> Option<ProxyDescriptor> {
        self.state.read().proxy.clone()
    }

    /// The client and the proxy it routes through, read together.
    pub fn current(&self) -> (reqwest::Client, Option<ProxyDescriptor>) {
        let state = self.state.read();
        (state.client.clone(), state.proxy.clone())
    }

    /// A client for the active configuration. Cheap to call per request.
    pub fn client(&self) -> reqwest::Client {
        self.state.read().client.clone()
    }

    /// Number of configuration changes so far.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }
}

impl ApplyProxy for ActiveProxy {
    fn apply_proxy(&self, proxy: &ProxyDescriptor) -> anyhow::Result<()> {
        self.apply(proxy)?;
        Ok(())
    }
}

fn build_client(proxy: Option<&ProxyDescriptor>, timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    builder = match proxy {
        Some(proxy) => builder.proxy(proxy.to_reqwest_proxy()?),
        None => builder.no_proxy(),
    };
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(Error::Client)
}
