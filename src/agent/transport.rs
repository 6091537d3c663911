//! Delivery of encoded payloads to the server.

use crate::core::{AgentConfig, MetricsError, Result, REAL_IP_HEADER};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::net::{IpAddr, Ipv4Addr};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Wire used by the sender.
///
/// Bodies arrive fully encoded (JSON, optionally encrypted, gzip-compressed).
/// Any failure, including a non-success response, is an error.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one metric
    async fn send_metric(&self, body: Vec<u8>) -> Result<()>;

    /// Deliver a JSON array of metrics
    async fn send_batch(&self, body: Vec<u8>) -> Result<()>;
}

/// HTTP transport posting to `/update/` and `/updates/`.
pub struct HttpTransport {
    client: reqwest::Client,
    update_url: String,
    updates_url: String,
    host_address: String,
}

impl HttpTransport {
    /// Build the client from the agent configuration.
    pub fn new(config: &AgentConfig, host_address: IpAddr) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let base = config.server_url();
        Ok(Self {
            client,
            update_url: format!("{}/update/", base),
            updates_url: format!("{}/updates/", base),
            host_address: host_address.to_string(),
        })
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(REAL_IP_HEADER, &self.host_address)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        response.error_for_status()?;
        debug!("POST {} -> {}", url, status);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send_metric(&self, body: Vec<u8>) -> Result<()> {
        self.post(&self.update_url, body).await
    }

    async fn send_batch(&self, body: Vec<u8>) -> Result<()> {
        self.post(&self.updates_url, body).await
    }
}

/// Local address of the interface that routes to `server`.
///
/// Connecting a UDP socket sends nothing; it only selects the route.
pub async fn discover_host_address(server: &str) -> Result<IpAddr> {
    let target = server
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket
        .connect(target)
        .await
        .map_err(|e| MetricsError::network(format!("cannot route to {}: {}", target, e)))?;
    Ok(socket.local_addr()?.ip())
}

/// Configured host address, else the discovered one, else loopback.
pub async fn resolve_host_address(config: &AgentConfig) -> IpAddr {
    if let Some(addr) = config.host_address {
        return addr;
    }
    match discover_host_address(&config.address).await {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Could not discover local address, reporting loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        },
    }
}
