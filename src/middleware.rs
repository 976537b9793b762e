//! Middleware routing reqwest requests through the active proxy.

use crate::network::ActiveProxy;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;

/// Sends every request with the client of the currently active proxy
/// configuration, so a rotation takes effect on the next request.
#[derive(Clone)]
pub struct ActiveProxyMiddleware {
    active: Arc<ActiveProxy>,
}

impl ActiveProxyMiddleware {
    pub fn new(active: Arc<ActiveProxy>) -> Self {
        Self { active }
    }
}

#[async_trait]
impl Middleware for ActiveProxyMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let (client, proxy) = self.active.current();
        let via = proxy
            .map(|p| p.to_string())
            .unwrap_or_else(|| "direct connection".to_string());
        debug!("{} {} via {}", req.method(), req.url(), via);

        client.execute(req).await.map_err(|e| {
            warn!("Request via {} failed: {}", via, e);
            Error::Reqwest(e)
        })
    }
}
