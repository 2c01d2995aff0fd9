//! Remote authority transport.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use offsync_common::{Error, Result};

use crate::config::SyncConfig;
use crate::protocol::{BatchRequest, BatchResponse};

/// The remote side of a sync exchange.
///
/// Implementations report transport-level failures as `Err`; per-item
/// failures belong in the `BatchResponse`.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Short name for logs (e.g. "http").
    fn name(&self) -> &str;

    /// Liveness check.
    ///
    /// # Errors
    /// - Unreachable, refused, or non-success answer
    async fn ping(&self) -> Result<()>;

    /// Exchange one batch.
    ///
    /// # Errors
    /// - Network failure, non-success status, or undecodable body
    async fn push_batch(&self, request: &BatchRequest) -> Result<BatchResponse>;
}

/// HTTP/JSON remote authority.
///
/// `GET {endpoint}/health` answers the probe, `POST {endpoint}/sync/batch`
/// takes batches.
pub struct HttpRemote {
    http: Client,
    health_url: Url,
    batch_url: Url,
    probe_timeout: Duration,
    batch_timeout: Duration,
}

impl HttpRemote {
    /// Create a client for the configured endpoint.
    ///
    /// # Errors
    /// - Invalid endpoint
    /// - HTTP client construction failure
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let base = config.endpoint_url()?;
        let health_url = base
            .join("health")
            .map_err(|e| Error::Config(e.to_string()))?;
        let batch_url = base
            .join("sync/batch")
            .map_err(|e| Error::Config(e.to_string()))?;

        let http = Client::builder()
            .user_agent(concat!("offsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            health_url,
            batch_url,
            probe_timeout: config.probe_timeout,
            batch_timeout: config.batch_timeout,
        })
    }

    /// Batch endpoint URL.
    pub fn batch_url(&self) -> &Url {
        &self.batch_url
    }
}

fn request_error(context: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("{}: {}", context, err))
    } else {
        Error::Network(format!("{}: {}", context, err))
    }
}

fn status_error(context: &str, status: StatusCode, body: &str) -> Error {
    let detail = body.trim();
    if detail.is_empty() {
        Error::Network(format!("{}: HTTP {}", context, status))
    } else {
        Error::Network(format!("{}: HTTP {}: {}", context, status, detail))
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    fn name(&self) -> &str {
        "http"
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .get(self.health_url.clone())
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| request_error("Health check failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error("Health check failed", status, ""));
        }
        Ok(())
    }

    async fn push_batch(&self, request: &BatchRequest) -> Result<BatchResponse> {
        debug!("POST {} ({} items)", self.batch_url, request.items.len());

        let response = self
            .http
            .post(self.batch_url.clone())
            .timeout(self.batch_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| request_error("Batch request failed", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| request_error("Failed to read batch response", e))?;

        if !status.is_success() {
            return Err(status_error("Batch rejected", status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("Malformed batch response: {}", e)))
    }
}
