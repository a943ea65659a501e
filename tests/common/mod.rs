//! Shared utilities for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use traffic_dispatcher::config::{Algorithm, DispatchConfig, EndpointConfig};
use traffic_dispatcher::health::{Probe, ProbeError};
use traffic_dispatcher::Endpoint;

/// Config with endpoints `ep0..epN` of the given weights.
pub fn dispatch_config(algorithm: Algorithm, weights: &[u32]) -> DispatchConfig {
    DispatchConfig {
        algorithm,
        endpoints: weights
            .iter()
            .enumerate()
            .map(|(i, w)| EndpointConfig::new(format!("ep{}", i), *w))
            .collect(),
        ..Default::default()
    }
}

/// Probe whose verdict per endpoint id is set by the test.
#[derive(Debug, Default)]
pub struct MockProbe {
    down: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl MockProbe {
    pub fn set_down(&self, id: &str, down: bool) {
        let mut set = self.down.lock().unwrap();
        if down {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }
}

#[async_trait]
impl Probe for MockProbe {
    async fn probe(&self, endpoint: &Endpoint) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.lock().unwrap().contains(&endpoint.id) {
            Err(ProbeError::Status(503))
        } else {
            Ok(())
        }
    }
}

/// Mock HTTP backend on an ephemeral port answering every request with the
/// current value of `status`.
pub async fn start_programmable_backend(status: Arc<AtomicU16>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let status = status.load(Ordering::SeqCst);
                    tokio::spawn(async move {
                        // Consume the request head before answering.
                        let mut buf = [0u8; 1024];
                        let _ = socket.read(&mut buf).await;

                        let reason = match status {
                            200 => "OK",
                            500 => "Internal Server Error",
                            503 => "Service Unavailable",
                            _ => "Unknown",
                        };
                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                            status, reason
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
