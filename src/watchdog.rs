//! Status monitoring of one fixed proxy.

use crate::config::RotationConfig;
use crate::prober::{ProbeResult, Prober};
use crate::proxy::ProxyDescriptor;
use crate::task::BackgroundLoop;

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Receives every probe result of a watchdog.
pub type StatusCallback = Arc<dyn Fn(&ProbeResult) + Send + Sync>;

struct Watch {
    proxy: ProxyDescriptor,
    prober: Arc<dyn Prober>,
    callback: StatusCallback,
}

impl Watch {
    async fn check_once(&self) -> ProbeResult {
        let result = self.prober.probe(&self.proxy).await;
        if result.available {
            debug!("Watched proxy {} up ({:.3}s)", self.proxy, result.latency);
        } else {
            warn!("Watched proxy {} down: {}", self.proxy, result.error);
        }
        (self.callback)(&result);
        result
    }
}

/// Probes one externally configured proxy on a fixed interval and reports
/// `{available, error, latency}` to a callback. Never changes which proxy is
/// in use.
pub struct ProxyWatchdog {
    watch: Arc<Watch>,
    background: BackgroundLoop,
    interval: Duration,
    stop_timeout: Duration,
}

impl ProxyWatchdog {
    /// Create a watchdog probing every 30 seconds.
    pub fn new(proxy: ProxyDescriptor, prober: Arc<dyn Prober>, callback: StatusCallback) -> Self {
        Self::from_config(proxy, prober, callback, &RotationConfig::default())
    }

    /// Create a watchdog using the watchdog interval and stop timeout of `config`.
    pub fn from_config(
        proxy: ProxyDescriptor,
        prober: Arc<dyn Prober>,
        callback: StatusCallback,
        config: &RotationConfig,
    ) -> Self {
        Self {
            watch: Arc::new(Watch {
                proxy,
                prober,
                callback,
            }),
            background: BackgroundLoop::new("Proxy watchdog"),
            interval: config.watchdog_interval,
            stop_timeout: config.stop_timeout,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start probing. Returns false if already running.
    pub fn start(&self) -> bool {
        let watch = Arc::clone(&self.watch);
        let started = self.background.start(self.interval, move || {
            let watch = Arc::clone(&watch);
            async move {
                watch.check_once().await;
            }
        });
        if started {
            info!("Watching proxy {} every {:?}", self.watch.proxy, self.interval);
        }
        started
    }

    /// Stop probing. Safe to call repeatedly and from any task.
    pub async fn stop(&self) {
        self.background.stop(self.stop_timeout).await;
    }

    pub fn is_running(&self) -> bool {
        self.background.is_running()
    }

    /// Probe once now and report the result.
    pub async fn check_once(&self) -> ProbeResult {
        self.watch.check_once().await
    }

    pub fn proxy(&self) -> &ProxyDescriptor {
        &self.watch.proxy
    }
}
