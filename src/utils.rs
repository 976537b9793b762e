//! Utility functions for importing proxy lists.

use crate::error::{Error, Result};
use crate::proxy::ProxyDescriptor;

use log::debug;
use reqwest::Client;

/// Fetch and parse a list of proxies from a URL or file path.
pub(crate) async fn fetch_proxies_from_source(source: &str) -> Result<Vec<ProxyDescriptor>> {
    let content = if source.starts_with("http://") || source.starts_with("https://") {
        let client = Client::new();
        let response = client
            .get(source)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(Error::Fetch)?;
        response.text().await.map_err(Error::Fetch)?
    } else {
        tokio::fs::read_to_string(source).await?
    };
    Ok(parse_proxy_list(&content))
}

/// Parse one proxy per line, either `scheme://[user:pass@]host:port` or a bare
/// `host:port` (HTTP). Blank lines, `#` comments and unparsable lines are skipped.
pub(crate) fn parse_proxy_list(content: &str) -> Vec<ProxyDescriptor> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.parse() {
            Ok(proxy) => Some(proxy),
            Err(e) => {
                debug!("Skipping proxy list entry: {}", e);
                None
            }
        })
        .collect()
}
