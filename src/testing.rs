//! Scripted prober shared by the unit tests.

use crate::prober::{ProbeError, ProbeResult, Prober};
use crate::proxy::{ProxyDescriptor, ProxyKey, ProxyScheme};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Answers probes from a table: `Some(latency)` is healthy, anything else is
/// unreachable. Hung proxies never answer.
#[derive(Default)]
pub(crate) struct ScriptedProber {
    latencies: Mutex<HashMap<ProxyKey, Option<f64>>>,
    hung: Mutex<HashSet<ProxyKey>>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub(crate) fn up(&self, proxy: &ProxyDescriptor, latency: f64) {
        self.latencies.lock().insert(proxy.key(), Some(latency));
    }

    pub(crate) fn down(&self, proxy: &ProxyDescriptor) {
        self.latencies.lock().insert(proxy.key(), None);
    }

    pub(crate) fn hang(&self, proxy: &ProxyDescriptor) {
        self.hung.lock().insert(proxy.key());
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, proxy: &ProxyDescriptor) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hung = self.hung.lock().contains(&proxy.key());
        if hung {
            std::future::pending::<()>().await;
        }
        match self.latencies.lock().get(&proxy.key()).copied().flatten() {
            Some(latency) => ProbeResult::success(latency),
            None => ProbeResult::failure(&ProbeError::ConnectFailed("connection refused".into())),
        }
    }
}

pub(crate) fn proxy(host: &str) -> ProxyDescriptor {
    ProxyDescriptor::new(ProxyScheme::Http, host, 8080)
}
