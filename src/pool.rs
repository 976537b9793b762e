//! Core proxy pool implementation.

use crate::config::ProbeConfig;
use crate::error::{Error, Result};
use crate::prober::{HttpProber, Prober};
use crate::proxy::{ProxyDescriptor, ProxyKey};
use crate::utils;

use chrono::Utc;
use futures::future;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Consecutive failures after which a proxy is evicted.
pub const EVICTION_THRESHOLD: u32 = 3;

/// Counts over the pool and the average latency of the working set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub working: usize,
    pub failed: usize,
    pub avg_latency: f64,
}

/// Owned copy of the pool's collections.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    pub all: Vec<ProxyDescriptor>,
    /// Working proxies, in insertion order.
    pub working: Vec<ProxyDescriptor>,
    pub failed: Vec<ProxyDescriptor>,
}

/// On-disk layout of a saved pool.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolDocument {
    #[serde(default)]
    proxies: Vec<ProxyDescriptor>,
    #[serde(default)]
    failed_proxies: Vec<ProxyDescriptor>,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Every known, non-evicted proxy, in insertion order.
    all: Vec<ProxyDescriptor>,
    /// Keys of the members of `all` currently believed reachable.
    working: HashSet<ProxyKey>,
    /// Evicted proxies. Never retried automatically.
    failed: Vec<ProxyDescriptor>,
    current: Option<ProxyKey>,
}

impl PoolState {
    fn position(&self, key: &ProxyKey) -> Option<usize> {
        self.all.iter().position(|p| p.key() == *key)
    }

    /// Apply a successful probe. Returns false if the proxy is no longer known.
    fn record_success(&mut self, key: &ProxyKey, latency: f64) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        let proxy = &mut self.all[idx];
        proxy.latency = latency;
        proxy.fail_count = 0;
        if self.working.insert(key.clone()) {
            info!("Proxy {} is working again ({:.3}s)", key, latency);
        }
        true
    }

    /// Apply a failure. Returns true if the proxy got evicted.
    fn record_failure(&mut self, key: &ProxyKey) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        let proxy = &mut self.all[idx];
        proxy.fail_count += 1;
        let fail_count = proxy.fail_count;
        self.working.remove(key);

        if fail_count < EVICTION_THRESHOLD {
            debug!("Proxy {} failed ({}/{})", key, fail_count, EVICTION_THRESHOLD);
            return false;
        }

        let proxy = self.all.remove(idx);
        if self.current.as_ref() == Some(key) {
            self.current = None;
        }
        warn!("Proxy {} evicted after {} consecutive failures", key, fail_count);
        self.failed.push(proxy);
        true
    }

    fn stats(&self) -> PoolStats {
        let latencies: Vec<f64> = self
            .all
            .iter()
            .filter(|p| self.working.contains(&p.key()))
            .map(|p| p.latency)
            .collect();
        let avg_latency = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        PoolStats {
            total: self.all.len(),
            working: latencies.len(),
            failed: self.failed.len(),
            avg_latency,
        }
    }
}

/// Inventory of known proxies, split into working and evicted ones.
///
/// All bookkeeping goes through one lock. Probes run with the lock released, so
/// a hung probe never blocks other pool operations.
pub struct ProxyPool {
    state: RwLock<PoolState>,
    prober: Arc<dyn Prober>,
}

impl ProxyPool {
    /// Create an empty pool validating proxies with `prober`.
    pub fn new(prober: Arc<dyn Prober>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(PoolState::default()),
            prober,
        })
    }

    /// Create an empty pool probing over HTTP with `config`.
    pub fn with_config(config: ProbeConfig) -> Arc<Self> {
        Self::new(Arc::new(HttpProber::new(config)))
    }

    /// The prober this pool validates proxies with.
    pub fn prober(&self) -> Arc<dyn Prober> {
        Arc::clone(&self.prober)
    }

    /// Probe and add a proxy. Returns whether it is usable now.
    ///
    /// A proxy already in the pool (same scheme, host and port) is rejected
    /// without probing. A proxy failing its first probe goes straight to the
    /// failed list.
    pub async fn add(&self, mut proxy: ProxyDescriptor) -> bool {
        let key = proxy.key();
        if self.state.read().position(&key).is_some() {
            debug!("Proxy {} already in pool", key);
            return false;
        }

        let result = self.prober.probe(&proxy).await;

        let mut state = self.state.write();
        if state.position(&key).is_some() {
            debug!("Proxy {} was added concurrently", key);
            return false;
        }
        state.failed.retain(|p| p.key() != key);

        if result.available {
            proxy.latency = result.latency;
            proxy.fail_count = 0;
            proxy.last_used = None;
            info!("Added proxy {} ({:.3}s)", key, result.latency);
            state.working.insert(key);
            state.all.push(proxy);
            true
        } else {
            warn!("Proxy {} failed its first probe: {}", key, result.error);
            state.failed.push(proxy);
            false
        }
    }

    /// Add several proxies concurrently. Returns how many became usable.
    pub async fn add_all(&self, proxies: impl IntoIterator<Item = ProxyDescriptor>) -> usize {
        let results = future::join_all(proxies.into_iter().map(|p| self.add(p))).await;
        results.into_iter().filter(|usable| *usable).count()
    }

    /// Load a proxy list from an `http(s)` URL or a file and add its entries.
    pub async fn import(&self, source: &str) -> Result<usize> {
        let proxies = utils::fetch_proxies_from_source(source).await?;
        info!("Fetched {} proxies from {}", proxies.len(), source);
        let usable = self.add_all(proxies).await;
        info!("{} proxies from {} are usable", usable, source);
        Ok(usable)
    }

    /// The working proxy with the lowest latency, earliest-added first on ties.
    /// Marks it used and records it as current. `None` when nothing works.
    pub fn get(&self) -> Option<ProxyDescriptor> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let mut best: Option<usize> = None;
        for (idx, proxy) in state.all.iter().enumerate() {
            if !state.working.contains(&proxy.key()) {
                continue;
            }
            match best {
                Some(b) if state.all[b].latency <= proxy.latency => {}
                _ => best = Some(idx),
            }
        }

        let proxy = &mut state.all[best?];
        proxy.last_used = Some(Utc::now());
        state.current = Some(proxy.key());
        Some(proxy.clone())
    }

    /// Count a failure against `proxy`. It leaves the working set at once and
    /// is evicted on the third consecutive failure. Returns true on eviction.
    pub fn mark_failed(&self, proxy: &ProxyDescriptor) -> bool {
        self.state.write().record_failure(&proxy.key())
    }

    /// Delete a proxy from every collection, regardless of its failures.
    pub fn remove(&self, key: &ProxyKey) -> bool {
        let mut state = self.state.write();
        let before = state.all.len() + state.failed.len();
        state.all.retain(|p| p.key() != *key);
        state.failed.retain(|p| p.key() != *key);
        state.working.remove(key);
        if state.current.as_ref() == Some(key) {
            state.current = None;
        }
        let removed = state.all.len() + state.failed.len() != before;
        if removed {
            info!("Removed proxy {}", key);
        }
        removed
    }

    /// Re-probe every known proxy. Healthy ones get fresh latencies and rejoin
    /// the working set, unhealthy ones go through [`mark_failed`](Self::mark_failed).
    pub async fn refresh(&self) -> PoolStats {
        let proxies = self.state.read().all.clone();
        info!("Refreshing {} proxies", proxies.len());

        let results = future::join_all(proxies.iter().map(|p| self.prober.probe(p))).await;

        let mut state = self.state.write();
        let mut healthy = 0;
        let mut unhealthy = 0;
        let mut evicted = 0;
        for (proxy, result) in proxies.iter().zip(results) {
            let key = proxy.key();
            if result.available {
                if state.record_success(&key, result.latency) {
                    healthy += 1;
                }
            } else {
                unhealthy += 1;
                debug!("Proxy {} unreachable: {}", key, result.error);
                if state.record_failure(&key) {
                    evicted += 1;
                }
            }
        }

        info!(
            "Refresh completed: {} healthy, {} unhealthy, {} evicted",
            healthy, unhealthy, evicted
        );
        state.stats()
    }

    /// Counts and average working latency.
    pub fn stats(&self) -> PoolStats {
        self.state.read().stats()
    }

    /// The proxy last handed out by [`get`](Self::get), if still in the pool.
    pub fn current(&self) -> Option<ProxyDescriptor> {
        let state = self.state.read();
        let key = state.current.as_ref()?;
        state.position(key).map(|idx| state.all[idx].clone())
    }

    pub fn contains(&self, key: &ProxyKey) -> bool {
        self.state.read().position(key).is_some()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.read();
        PoolSnapshot {
            all: state.all.clone(),
            working: state
                .all
                .iter()
                .filter(|p| state.working.contains(&p.key()))
                .cloned()
                .collect(),
            failed: state.failed.clone(),
        }
    }

    /// Serialize known and failed proxies as `{"proxies": [..], "failed_proxies": [..]}`.
    pub fn to_json(&self) -> Result<String> {
        let document = {
            let state = self.state.read();
            PoolDocument {
                proxies: state.all.clone(),
                failed_proxies: state.failed.clone(),
            }
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Replace the pool's contents with a saved document, then refresh so every
    /// entry is reclassified.
    pub async fn load_json(&self, json: &str) -> Result<PoolStats> {
        let document: PoolDocument = serde_json::from_str(json)?;
        {
            let mut state = self.state.write();
            let mut seen = HashSet::new();
            state.all = document
                .proxies
                .into_iter()
                .filter(|p| seen.insert(p.key()))
                .collect();
            state.failed = document
                .failed_proxies
                .into_iter()
                .filter(|p| seen.insert(p.key()))
                .collect();
            state.working.clear();
            state.current = None;
            info!(
                "Loaded {} proxies and {} failed proxies",
                state.all.len(),
                state.failed.len()
            );
        }
        Ok(self.refresh().await)
    }

    /// Write the pool to `path`. The document goes to a sibling `.tmp` file
    /// first and is renamed over `path`, so a partial write never replaces a
    /// good file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!("Saved proxy pool to {}", path.display());
        Ok(())
    }

    /// Load the pool from `path`. A missing file leaves the pool untouched.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<PoolStats> {
        let path = path.as_ref();
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No saved pool at {}", path.display());
                return Ok(self.stats());
            }
            Err(e) => return Err(Error::Io(e)),
        };
        self.load_json(&json).await
    }
}
