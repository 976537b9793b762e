//! Configuration for probing and rotation.

use std::time::Duration;

/// Default URL probed through each proxy.
pub const DEFAULT_PROBE_URL: &str = "http://www.baidu.com";

/// Settings used by the health prober.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Plain HTTP URL requested through the proxy.
    pub url: String,
    /// Timeout for a single attempt.
    pub timeout: Duration,
    /// Number of attempts before the proxy is reported unavailable.
    pub max_retries: usize,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROBE_URL.to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Configuration for the pool, the rotation scheduler and the watchdog.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// URL used for health probes.
    pub probe_url: String,
    /// Timeout for a single probe attempt.
    pub probe_timeout: Duration,
    /// Attempts per probe.
    pub probe_retries: usize,
    /// Pause between probe attempts.
    pub retry_delay: Duration,
    /// Interval between scheduler ticks.
    pub check_interval: Duration,
    /// Interval between watchdog probes.
    pub watchdog_interval: Duration,
    /// How long `stop()` waits for a background loop before aborting it.
    pub stop_timeout: Duration,
}

impl RotationConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RotationConfigBuilder {
        RotationConfigBuilder::new()
    }

    /// The probe settings of this configuration.
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            url: self.probe_url.clone(),
            timeout: self.probe_timeout,
            max_retries: self.probe_retries,
            retry_delay: self.retry_delay,
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfigBuilder::new().build()
    }
}

/// Builder for `RotationConfig`.
pub struct RotationConfigBuilder {
    probe_url: Option<String>,
    probe_timeout: Option<Duration>,
    probe_retries: Option<usize>,
    retry_delay: Option<Duration>,
    check_interval: Option<Duration>,
    watchdog_interval: Option<Duration>,
    stop_timeout: Option<Duration>,
}

impl RotationConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            probe_url: None,
            probe_timeout: None,
            probe_retries: None,
            retry_delay: None,
            check_interval: None,
            watchdog_interval: None,
            stop_timeout: None,
        }
    }

    /// Set the URL used for health probes.
    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = Some(url.into());
        self
    }

    /// Set the timeout for a single probe attempt.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Set the number of attempts per probe.
    pub fn probe_retries(mut self, retries: usize) -> Self {
        self.probe_retries = Some(retries);
        self
    }

    /// Set the pause between probe attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set the interval between scheduler ticks.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    /// Set the interval between watchdog probes.
    pub fn watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = Some(interval);
        self
    }

    /// Set how long `stop()` waits for a background loop.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RotationConfig {
        let probe = ProbeConfig::default();
        RotationConfig {
            probe_url: self.probe_url.unwrap_or(probe.url),
            probe_timeout: self.probe_timeout.unwrap_or(probe.timeout),
            probe_retries: self.probe_retries.unwrap_or(probe.max_retries),
            retry_delay: self.retry_delay.unwrap_or(probe.retry_delay),
            check_interval: self.check_interval.unwrap_or(Duration::from_secs(30)),
            watchdog_interval: self.watchdog_interval.unwrap_or(Duration::from_secs(30)),
            stop_timeout: self.stop_timeout.unwrap_or(Duration::from_secs(1)),
        }
    }
}

impl Default for RotationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
