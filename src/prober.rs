//! Health probing of single proxies.

use crate::config::ProbeConfig;
use crate::proxy::ProxyDescriptor;

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;

/// Outcome of probing one proxy. Also the status payload reported by the
/// watchdog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    /// Whether the probe request went through.
    pub available: bool,
    /// Message of the last failed attempt, empty on success.
    pub error: String,
    /// Seconds the successful attempt took, 0 on failure.
    pub latency: f64,
}

impl ProbeResult {
    pub fn success(latency: f64) -> Self {
        Self {
            available: true,
            error: String::new(),
            latency,
        }
    }

    pub fn failure(error: &ProbeError) -> Self {
        Self {
            available: false,
            error: error.to_string(),
            latency: 0.0,
        }
    }
}

/// Why a probe attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("proxy connection failed: {0}")]
    ConnectFailed(String),
    #[error("connection timed out")]
    Timeout,
    #[error("probe target answered with status {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else if err.is_connect() {
            ProbeError::ConnectFailed(err.to_string())
        } else {
            ProbeError::Other(err.to_string())
        }
    }
}

/// Something that can tell whether a proxy is usable right now.
///
/// Implementations must not touch pool state, so distinct proxies can be probed
/// concurrently.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, proxy: &ProxyDescriptor) -> ProbeResult;
}

/// Prober issuing a real HTTP GET through the proxy.
#[derive(Debug, Clone, Default)]
pub struct HttpProber {
    config: ProbeConfig,
}

impl HttpProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, proxy: &ProxyDescriptor) -> ProbeResult {
        probe_proxy(proxy, &self.config).await
    }
}

/// Probe `proxy` against `config.url`, retrying up to `config.max_retries`
/// attempts with `config.retry_delay` between them. Only the last attempt's
/// error is reported.
pub async fn probe_proxy(proxy: &ProxyDescriptor, config: &ProbeConfig) -> ProbeResult {
    let attempts = config.max_retries.max(1);
    let mut last_error = ProbeError::Other("no probe attempted".to_string());

    for attempt in 1..=attempts {
        match probe_once(proxy, config).await {
            Ok(latency) => {
                debug!("Proxy {} answered in {:.3}s", proxy, latency);
                return ProbeResult::success(latency);
            }
            Err(e) => {
                debug!("Probe of {} failed (attempt {}/{}): {}", proxy, attempt, attempts, e);
                last_error = e;
            }
        }

        if attempt < attempts {
            tokio::time::sleep(config.retry_delay).await;
        }
    }

    ProbeResult::failure(&last_error)
}

async fn probe_once(proxy: &ProxyDescriptor, config: &ProbeConfig) -> Result<f64, ProbeError> {
    let start = Instant::now();

    let reqwest_proxy = proxy
        .to_reqwest_proxy()
        .map_err(|e| ProbeError::Other(e.to_string()))?;
    let client = reqwest::Client::builder()
        .proxy(reqwest_proxy)
        .timeout(config.timeout)
        .build()?;

    let response = client.get(&config.url).send().await?;
    if !response.status().is_success() {
        return Err(ProbeError::Status(response.status().as_u16()));
    }

    Ok(start.elapsed().as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_result_carries_message_and_zero_latency() {
        let result = ProbeResult::failure(&ProbeError::Timeout);
        assert!(!result.available);
        assert_eq!(result.error, "connection timed out");
        assert_eq!(result.latency, 0.0);

        let result = ProbeResult::failure(&ProbeError::Status(502));
        assert_eq!(result.error, "probe target answered with status 502");
    }

    #[test]
    fn test_result_serializes_as_status_payload() {
        let value = serde_json::to_value(ProbeResult::success(0.25)).unwrap();
        assert_eq!(value["available"], true);
        assert_eq!(value["error"], "");
        assert_eq!(value["latency"], 0.25);
    }
}
