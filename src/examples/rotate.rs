//! Keep a long-running job's traffic on a healthy proxy.
//!
//! Usage: `cargo run --example rotate -- <proxy list file or URL> [pool.json]`

use proxy_rotator::{
    ActiveProxy, ActiveProxyMiddleware, ApplyProxy, HttpProber, ProbeResult, Prober, ProxyPool, ProxyWatchdog,
    RotationConfig, RotationScheduler,
};
use reqwest_middleware::ClientBuilder;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let source = args.next().ok_or("usage: rotate <proxy list> [pool.json]")?;
    let pool_file = args.next().unwrap_or_else(|| "proxy_pool.json".to_string());

    let config = RotationConfig::builder()
        .probe_url("http://httpbin.org/ip")
        .probe_timeout(Duration::from_secs(5))
        .check_interval(Duration::from_secs(30))
        .build();

    let pool = ProxyPool::with_config(config.probe_config());
    pool.load(&pool_file).await?;
    let usable = pool.import(&source).await?;
    println!("{} proxies usable, stats: {:?}", usable, pool.stats());

    let active = ActiveProxy::with_timeout(Duration::from_secs(10))?;
    let scheduler = RotationScheduler::from_config(
        Arc::clone(&pool),
        Arc::clone(&active) as Arc<dyn ApplyProxy>,
        &config,
    );
    println!("first check: {:?}", scheduler.check_and_rotate().await?);
    scheduler.start();

    // Watch the proxy picked first, for display only.
    let watchdog = scheduler.current().map(|proxy| {
        let prober: Arc<dyn Prober> = Arc::new(HttpProber::new(config.probe_config()));
        ProxyWatchdog::from_config(
            proxy,
            prober,
            Arc::new(|status: &ProbeResult| println!("watchdog: {}", serde_json::json!(status))),
            &config,
        )
    });
    if let Some(watchdog) = &watchdog {
        watchdog.start();
    }

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(ActiveProxyMiddleware::new(Arc::clone(&active)))
        .build();

    for _ in 0..10 {
        match client.get("http://httpbin.org/ip").send().await {
            Ok(response) => println!("{} via {:?}", response.status(), active.proxy().map(|p| p.to_string())),
            Err(e) => println!("request failed: {}", e),
        }
        tokio::time::sleep(Duration::from_secs(15)).await;
    }

    if let Some(watchdog) = &watchdog {
        watchdog.stop().await;
    }
    scheduler.stop().await;
    pool.save(&pool_file).await?;
    Ok(())
}
