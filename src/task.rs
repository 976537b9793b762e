//! Start/stop lifecycle shared by the scheduler and the watchdog.

use futures::FutureExt;
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// A periodic background loop that can be stopped from any task.
pub(crate) struct BackgroundLoop {
    name: &'static str,
    handle: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl BackgroundLoop {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Spawn a loop calling `tick` immediately and then every `period`.
    ///
    /// A tick that panics is logged and the loop carries on. A tick in flight
    /// when the loop is stopped is dropped. Returns false if the loop was
    /// already running.
    pub(crate) fn start<F, Fut>(&self, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|(_, h)| !h.is_finished()) {
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let name = self.name;
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    outcome = AssertUnwindSafe(tick()).catch_unwind() => {
                        if outcome.is_err() {
                            error!("{} tick panicked, continuing", name);
                        }
                    }
                }
            }
            debug!("{} loop exited", name);
        });

        *handle = Some((shutdown_tx, task));
        true
    }

    /// Signal the loop to stop and wait up to `wait` for it, aborting it if
    /// it does not finish in time. Calling it again is a no-op.
    pub(crate) async fn stop(&self, wait: Duration) {
        let taken = self.handle.lock().take();
        let Some((shutdown_tx, mut task)) = taken else {
            return;
        };
        let _ = shutdown_tx.send(true);

        if time::timeout(wait, &mut task).await.is_err() {
            warn!("{} did not stop within {:?}, aborting", self.name, wait);
            task.abort();
        }
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        if let Some((_, task)) = self.handle.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_twice_is_fine() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let background = BackgroundLoop::new("test");

        let counter = Arc::clone(&ticks);
        assert!(background.start(Duration::from_secs(3600), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        assert!(!background.start(Duration::from_secs(3600), || async {}));
        assert!(background.is_running());

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        background.stop(Duration::from_secs(1)).await;
        background.stop(Duration::from_secs(1)).await;
        assert!(!background.is_running());
    }

    #[tokio::test]
    async fn test_panicking_tick_keeps_loop_alive() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let background = BackgroundLoop::new("test");

        let counter = Arc::clone(&ticks);
        background.start(Duration::from_millis(10), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    panic!("first tick blows up");
                }
            }
        });

        time::sleep(Duration::from_millis(100)).await;
        background.stop(Duration::from_secs(1)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_stop_cancels_hung_tick() {
        let background = BackgroundLoop::new("test");
        background.start(Duration::from_secs(3600), || async {
            time::sleep(Duration::from_secs(3600)).await;
        });
        time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        background.stop(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!background.is_running());
    }
}
