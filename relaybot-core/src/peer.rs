use crate::types::{FleetMember, ObjectRequest};
use crate::{BotError, Result};
use async_trait::async_trait;
use std::time::Duration;

pub const HEALTH_ENDPOINT: &str = "/health";
pub const INFO_ENDPOINT: &str = "/info";
pub const TRANSFER_ENDPOINT: &str = "/transfer";

/// Calls into the HTTP surface every fleet member exposes.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Succeeds only when the peer reports itself ready.
    async fn health(&self, address: &str) -> Result<()>;

    async fn info(&self, address: &str) -> Result<FleetMember>;

    /// Hands `request` to the peer's ingress. Success means enqueued there,
    /// not transferred.
    async fn forward(&self, address: &str, request: &ObjectRequest) -> Result<()>;
}

pub struct HttpPeerClient {
    client: reqwest::Client,
    port: u16,
    probe_timeout: Duration,
    forward_timeout: Duration,
}

impl HttpPeerClient {
    pub fn new(port: u16, probe_timeout: Duration, forward_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            port,
            probe_timeout,
            forward_timeout,
        }
    }

    fn url(&self, address: &str, endpoint: &str) -> String {
        format!("http://{}:{}{}", address, self.port, endpoint)
    }

    fn check_status(response: &reqwest::Response, url: &str) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Http(format!("{} returned {}", url, status)));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn health(&self, address: &str) -> Result<()> {
        let url = self.url(address, HEALTH_ENDPOINT);
        let response = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        Self::check_status(&response, &url)
    }

    async fn info(&self, address: &str) -> Result<FleetMember> {
        let url = self.url(address, INFO_ENDPOINT);
        let response = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        Self::check_status(&response, &url)?;

        let member: FleetMember = response.json().await?;
        if member.name.trim().is_empty() {
            return Err(BotError::InvalidRequest(format!(
                "peer {} reported an empty name",
                address
            )));
        }
        Ok(member)
    }

    async fn forward(&self, address: &str, request: &ObjectRequest) -> Result<()> {
        let url = self.url(address, TRANSFER_ENDPOINT);
        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(self.forward_timeout)
            .send()
            .await?;
        Self::check_status(&response, &url)
    }
}
