//! Fleet membership synchronization.
//!
//! The proxy hostname is the only source of truth: every cycle re-resolves
//! it, health-probes unknown addresses, and reconciles the membership pool
//! and the hash ring with what it finds.

use crate::config::MembershipConfig;
use crate::hashring::HashRing;
use crate::peer::PeerClient;
use crate::pool::MembershipPool;
use crate::types::FleetMember;
use crate::{BotError, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Distinct addresses `host` currently resolves to.
    async fn resolve(&self, host: &str) -> Result<Vec<String>>;
}

/// System resolver through `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<String>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| BotError::Dns(format!("{}: {}", host, e)))?;

        let distinct: BTreeSet<String> = addrs.map(|addr| addr.ip().to_string()).collect();
        Ok(distinct.into_iter().collect())
    }
}

/// Changes applied by one synchronization cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<FleetMember>,
    pub removed: Vec<FleetMember>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct MembershipSynchronizer {
    name: String,
    address: String,
    config: MembershipConfig,
    ring: Arc<HashRing>,
    members: Arc<MembershipPool>,
    resolver: Arc<dyn Resolver>,
    peers: Arc<dyn PeerClient>,
}

impl MembershipSynchronizer {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        config: MembershipConfig,
        ring: Arc<HashRing>,
        members: Arc<MembershipPool>,
        resolver: Arc<dyn Resolver>,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            config,
            ring,
            members,
            resolver,
            peers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_own_host_resolvable(&self) -> Result<bool> {
        let addresses = self.resolver.resolve(&self.config.proxy).await?;
        Ok(addresses.iter().any(|address| *address == self.address))
    }

    /// Polls the proxy until it resolves to this instance's address.
    ///
    /// Returns `false` if shutdown was signalled first.
    pub async fn wait_for_own_host(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            match self.is_own_host_resolvable().await {
                Ok(true) => {
                    tracing::info!(
                        "Found own host {} in {} proxy host resolution",
                        self.address,
                        self.config.proxy
                    );
                    return true;
                }
                Ok(false) => tracing::warn!(
                    "Own host {} not yet in {} proxy host resolution",
                    self.address,
                    self.config.proxy
                ),
                Err(e) => tracing::warn!(
                    "Unable to look up {} proxy host: {}",
                    self.config.proxy,
                    e
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.own_host_backoff()) => {}
                _ = shutdown.changed() => return false,
            }
        }
    }

    /// Puts this instance on the ring so ownership never excludes it.
    pub fn join(&self) {
        self.ring.add_nodes(&[self.name.as_str()]);
        tracing::info!("Node {} joined the hash ring", self.name);
    }

    async fn verify_candidate(&self, address: &str) -> Option<FleetMember> {
        if let Err(e) = self.peers.health(address).await {
            tracing::warn!("Health probe of peer {} failed: {}", address, e);
            return None;
        }

        match self.peers.info(address).await {
            Ok(info) if info.name == self.name => {
                tracing::warn!("Peer {} claims our own name {}, skipping", address, info.name);
                None
            }
            // The pool is keyed by the resolved address, whatever the peer advertises.
            Ok(info) => Some(FleetMember {
                name: info.name,
                address: address.to_string(),
            }),
            Err(e) => {
                tracing::warn!("Unable to fetch info of peer {}: {}", address, e);
                None
            }
        }
    }

    /// Runs one discover, probe and apply cycle.
    ///
    /// A DNS failure leaves membership untouched; unhealthy candidates are
    /// retried next cycle.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let resolved: BTreeSet<String> = self
            .resolver
            .resolve(&self.config.proxy)
            .await?
            .into_iter()
            .filter(|address| *address != self.address)
            .collect();

        let stored = self.members.snapshot();

        let removed: Vec<FleetMember> = stored
            .values()
            .filter(|member| !resolved.contains(&member.address))
            .cloned()
            .collect();

        let mut added = Vec::new();
        for address in resolved.iter().filter(|a| !stored.contains_key(a.as_str())) {
            if let Some(member) = self.verify_candidate(address).await {
                added.push(member);
            }
        }

        let report = SyncReport { added, removed };
        if report.is_empty() {
            return Ok(report);
        }

        let removed_addresses: Vec<&str> =
            report.removed.iter().map(|m| m.address.as_str()).collect();
        self.members.remove_all(&removed_addresses);
        self.members.add_all(report.added.iter().cloned());

        // A name may still be served from another address.
        let departed: Vec<&str> = report
            .removed
            .iter()
            .map(|m| m.name.as_str())
            .filter(|name| self.members.find_by_name(name).is_none())
            .collect();
        let joined: Vec<&str> = report.added.iter().map(|m| m.name.as_str()).collect();

        self.ring.remove_nodes(&departed);
        self.ring.add_nodes(&joined);

        tracing::info!(
            "Membership updated: +{} -{}, ring nodes {:?}",
            report.added.len(),
            report.removed.len(),
            self.ring.node_names()
        );

        Ok(report)
    }

    /// Synchronizes on a fixed interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.sync_once().await {
                tracing::error!(
                    "Unable to discover servers behind {} proxy host: {}",
                    self.config.proxy,
                    e
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.sync_interval()) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!("Membership synchronizer stopped");
    }
}
