//! A minimal forward HTTP proxy for tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use proxy_rotator::{ProxyDescriptor, ProxyScheme};

/// Answers every request with a fixed status and records the request heads.
pub struct FakeProxy {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    listener: JoinHandle<()>,
}

impl FakeProxy {
    pub async fn start(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&requests);
        let listener = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    seen.lock().push(String::from_utf8_lossy(&head).into_owned());

                    let response = format!(
                        "HTTP/1.1 {} Fake\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                        status
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            addr,
            requests,
            listener,
        }
    }

    /// Stop accepting connections; later connects are refused.
    pub async fn shut_down(&self) {
        self.listener.abort();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    pub fn descriptor(&self) -> ProxyDescriptor {
        ProxyDescriptor::new(ProxyScheme::Http, self.addr.ip().to_string(), self.addr.port())
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

/// A descriptor for a local port nothing listens on.
pub async fn dead_proxy() -> ProxyDescriptor {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    ProxyDescriptor::new(ProxyScheme::Http, addr.ip().to_string(), addr.port())
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
