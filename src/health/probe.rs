//! Probe implementations used by the health monitor.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::{HealthCheckConfig, ProbeKind};
use crate::load_balancer::endpoint::Endpoint;

/// Why a probe failed. Logged and counted, never propagated to dispatch.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unhealthy status {0}")]
    Status(u16),

    #[error("endpoint has no probe address")]
    MissingAddress,

    #[error("invalid probe request: {0}")]
    Request(String),
}

impl ProbeError {
    /// Label for the `health_probes_total` counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            ProbeError::Timeout(_) => "timeout",
            ProbeError::Connect(_) => "connect_error",
            ProbeError::Status(_) => "bad_status",
            ProbeError::MissingAddress => "no_address",
            ProbeError::Request(_) => "request_error",
        }
    }
}

/// One health check against one endpoint.
///
/// The monitor bounds every call with its own timeout and drops the future
/// when it expires, so implementations need no timeout of their own.
#[async_trait]
pub trait Probe: Send + Sync + Debug {
    async fn probe(&self, endpoint: &Endpoint) -> Result<(), ProbeError>;
}

/// `GET {url}{path}`; any 2xx is healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
    path: String,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            path: path.into(),
        }
    }

    fn target(&self, endpoint: &Endpoint) -> Result<String, ProbeError> {
        let url = endpoint.url.as_ref().ok_or(ProbeError::MissingAddress)?;
        Ok(format!("{}{}", url.as_str().trim_end_matches('/'), self.path))
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, endpoint: &Endpoint) -> Result<(), ProbeError> {
        let request = Request::builder()
            .method("GET")
            .uri(self.target(endpoint)?)
            .header("user-agent", "traffic-dispatcher-health-check")
            .body(Body::empty())
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(response.status().as_u16()))
        }
    }
}

/// TCP connect to the endpoint's host and port.
#[derive(Debug, Clone, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, endpoint: &Endpoint) -> Result<(), ProbeError> {
        let url = endpoint.url.as_ref().ok_or(ProbeError::MissingAddress)?;
        let host = url.host_str().ok_or(ProbeError::MissingAddress)?;
        let port = url.port_or_known_default().ok_or(ProbeError::MissingAddress)?;

        TcpStream::connect((host, port))
            .await
            .map(drop)
            .map_err(|e| ProbeError::Connect(e.to_string()))
    }
}

/// Probe named by `config.probe`.
pub fn build_probe(config: &HealthCheckConfig) -> Arc<dyn Probe> {
    match config.probe {
        ProbeKind::Http => Arc::new(HttpProbe::new(config.path.clone())),
        ProbeKind::Tcp => Arc::new(TcpProbe),
    }
}
