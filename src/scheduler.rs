//! Background rotation of the active proxy.

use crate::config::RotationConfig;
use crate::pool::ProxyPool;
use crate::prober::Prober;
use crate::proxy::ProxyDescriptor;
use crate::task::BackgroundLoop;

use anyhow::Context;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Receives the proxy the scheduler switched to.
///
/// Called from the scheduler's task; implementations must not block on
/// network I/O.
pub trait ApplyProxy: Send + Sync {
    fn apply_proxy(&self, proxy: &ProxyDescriptor) -> anyhow::Result<()>;
}

impl<F> ApplyProxy for F
where
    F: Fn(&ProxyDescriptor) -> anyhow::Result<()> + Send + Sync,
{
    fn apply_proxy(&self, proxy: &ProxyDescriptor) -> anyhow::Result<()> {
        self(proxy)
    }
}

/// What a single rotation check did.
#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    /// The current proxy is still healthy.
    Kept,
    /// A new proxy was selected and applied.
    Switched(ProxyDescriptor),
    /// Nothing in the pool works; the last applied proxy stays in place.
    Exhausted,
}

struct Rotation {
    pool: Arc<ProxyPool>,
    prober: Arc<dyn Prober>,
    consumer: Arc<dyn ApplyProxy>,
    current: Mutex<Option<ProxyDescriptor>>,
}

impl Rotation {
    async fn check_and_rotate(&self) -> anyhow::Result<RotationOutcome> {
        let current = self.current.lock().clone();

        if let Some(current) = &current {
            let result = self.prober.probe(current).await;
            if result.available {
                debug!("Active proxy {} healthy ({:.3}s)", current, result.latency);
                return Ok(RotationOutcome::Kept);
            }
            warn!("Active proxy {} failed: {}", current, result.error);
            self.pool.mark_failed(current);
        }

        let Some(next) = self.pool.get() else {
            warn!("No working proxy left, keeping the last applied configuration");
            return Ok(RotationOutcome::Exhausted);
        };

        info!("Switching to proxy {} ({:.3}s)", next, next.latency);
        *self.current.lock() = Some(next.clone());
        if let Err(e) = self.consumer.apply_proxy(&next) {
            // Select again on the next tick rather than treating `next` as applied.
            *self.current.lock() = None;
            return Err(e).with_context(|| format!("failed to apply proxy {}", next));
        }
        Ok(RotationOutcome::Switched(next))
    }
}

/// Periodically re-validates the active proxy and swaps in the best pool
/// member when it fails.
///
/// Selection is sticky: a healthy current proxy is kept even if the pool knows
/// a faster one.
pub struct RotationScheduler {
    rotation: Arc<Rotation>,
    background: BackgroundLoop,
    interval: Duration,
    stop_timeout: Duration,
}

impl RotationScheduler {
    /// Create a scheduler ticking every 30 seconds.
    pub fn new(pool: Arc<ProxyPool>, consumer: Arc<dyn ApplyProxy>) -> Self {
        Self::from_config(pool, consumer, &RotationConfig::default())
    }

    /// Create a scheduler using the interval and stop timeout of `config`.
    pub fn from_config(pool: Arc<ProxyPool>, consumer: Arc<dyn ApplyProxy>, config: &RotationConfig) -> Self {
        let prober = pool.prober();
        Self {
            rotation: Arc::new(Rotation {
                pool,
                prober,
                consumer,
                current: Mutex::new(None),
            }),
            background: BackgroundLoop::new("Proxy rotation"),
            interval: config.check_interval,
            stop_timeout: config.stop_timeout,
        }
    }

    /// Set the interval between checks. Takes effect on the next `start`.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the background loop. The first check runs immediately. Returns
    /// false if already running. Must be called within a tokio runtime.
    pub fn start(&self) -> bool {
        let rotation = Arc::clone(&self.rotation);
        let started = self.background.start(self.interval, move || {
            let rotation = Arc::clone(&rotation);
            async move {
                if let Err(e) = rotation.check_and_rotate().await {
                    error!("Proxy rotation check failed: {:#}", e);
                }
            }
        });
        if started {
            info!("Proxy rotation started, checking every {:?}", self.interval);
        }
        started
    }

    /// Stop the background loop. An in-flight check is cancelled. Safe to call
    /// repeatedly and from any task.
    pub async fn stop(&self) {
        self.background.stop(self.stop_timeout).await;
    }

    pub fn is_running(&self) -> bool {
        self.background.is_running()
    }

    /// Run one check now, outside the background loop.
    pub async fn check_and_rotate(&self) -> anyhow::Result<RotationOutcome> {
        self.rotation.check_and_rotate().await
    }

    /// The proxy last applied to the consumer.
    pub fn current(&self) -> Option<ProxyDescriptor> {
        self.rotation.current.lock().clone()
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.rotation.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{proxy, ScriptedProber};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        applied: Mutex<Vec<ProxyDescriptor>>,
    }

    impl ApplyProxy for Recorder {
        fn apply_proxy(&self, proxy: &ProxyDescriptor) -> anyhow::Result<()> {
            self.applied.lock().push(proxy.clone());
            Ok(())
        }
    }

    impl Recorder {
        fn hosts(&self) -> Vec<String> {
            self.applied.lock().iter().map(|p| p.host.clone()).collect()
        }
    }

    async fn setup(
        proxies: &[(&str, Option<f64>)],
    ) -> (Arc<ScriptedProber>, Arc<Recorder>, RotationScheduler) {
        let prober = Arc::new(ScriptedProber::default());
        let pool = ProxyPool::new(Arc::clone(&prober) as Arc<dyn Prober>);
        for (host, latency) in proxies {
            let p = proxy(host);
            match latency {
                Some(latency) => prober.up(&p, *latency),
                None => prober.down(&p),
            }
            pool.add(p).await;
        }
        let recorder = Arc::new(Recorder::default());
        let scheduler = RotationScheduler::new(pool, Arc::clone(&recorder) as Arc<dyn ApplyProxy>);
        (prober, recorder, scheduler)
    }

    #[tokio::test]
    async fn test_first_check_applies_best_proxy() {
        let (_, recorder, scheduler) = setup(&[("a", Some(0.2)), ("b", Some(0.1))]).await;

        let outcome = scheduler.check_and_rotate().await.unwrap();
        assert!(matches!(outcome, RotationOutcome::Switched(ref p) if p.host == "b"));
        assert_eq!(recorder.hosts(), vec!["b"]);
        assert_eq!(scheduler.current().unwrap().host, "b");
        assert_eq!(scheduler.current().unwrap().latency, 0.1);
    }

    #[tokio::test]
    async fn test_healthy_current_is_sticky() {
        let (prober, recorder, scheduler) = setup(&[("a", Some(0.2))]).await;
        scheduler.check_and_rotate().await.unwrap();

        // A faster proxy joins; the healthy current one is kept anyway.
        let b = proxy("b");
        prober.up(&b, 0.01);
        scheduler.pool().add(b).await;

        let probes_before = prober.calls();
        assert_eq!(scheduler.check_and_rotate().await.unwrap(), RotationOutcome::Kept);
        assert_eq!(prober.calls(), probes_before + 1);
        assert_eq!(recorder.hosts(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_failed_current_is_marked_once_and_replaced() {
        let (prober, recorder, scheduler) = setup(&[("a", Some(0.1)), ("c", Some(0.3))]).await;
        scheduler.check_and_rotate().await.unwrap();
        assert_eq!(recorder.hosts(), vec!["a"]);

        prober.down(&proxy("a"));
        let outcome = scheduler.check_and_rotate().await.unwrap();
        assert!(matches!(outcome, RotationOutcome::Switched(ref p) if p.host == "c"));
        assert_eq!(recorder.hosts(), vec!["a", "c"]);

        let snapshot = scheduler.pool().snapshot();
        let a = snapshot.all.iter().find(|p| p.host == "a").unwrap();
        assert_eq!(a.fail_count, 1);
        assert!(snapshot.working.iter().all(|p| p.host != "a"));
    }

    #[tokio::test]
    async fn test_exhausted_pool_keeps_last_applied() {
        let (prober, recorder, scheduler) = setup(&[("a", Some(0.1))]).await;
        scheduler.check_and_rotate().await.unwrap();

        prober.down(&proxy("a"));
        assert_eq!(scheduler.check_and_rotate().await.unwrap(), RotationOutcome::Exhausted);
        assert_eq!(recorder.hosts(), vec!["a"]);
        assert_eq!(scheduler.current().unwrap().host, "a");
    }

    #[tokio::test]
    async fn test_empty_pool_never_applies() {
        let (_, recorder, scheduler) = setup(&[]).await;
        assert_eq!(scheduler.check_and_rotate().await.unwrap(), RotationOutcome::Exhausted);
        assert!(recorder.hosts().is_empty());
        assert!(scheduler.current().is_none());
    }

    #[tokio::test]
    async fn test_failing_consumer_does_not_stop_loop() {
        let prober = Arc::new(ScriptedProber::default());
        let pool = ProxyPool::new(Arc::clone(&prober) as Arc<dyn Prober>);
        let a = proxy("a");
        prober.up(&a, 0.1);
        pool.add(a).await;

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let consumer = move |_: &ProxyDescriptor| -> anyhow::Result<()> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("scan engine rejected the proxy");
            }
            Ok(())
        };

        let scheduler =
            RotationScheduler::new(pool, Arc::new(consumer)).with_interval(Duration::from_millis(10));
        assert!(scheduler.start());
        assert!(!scheduler.start());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.is_running());
        scheduler.stop().await;
        scheduler.stop().await;

        assert!(!scheduler.is_running());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.current().unwrap().host, "a");
    }
}
