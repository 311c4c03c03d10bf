//! The per-process context every component is constructed from.

use crate::config::{DatabaseWorkerConfig, MembershipConfig, ObjectWorkerConfig};
use crate::database::{Database, build_database};
use crate::hashring::HashRing;
use crate::membership::{DnsResolver, MembershipSynchronizer, Resolver};
use crate::operations::TransferObjectOperation;
use crate::peer::{HttpPeerClient, PeerClient};
use crate::pool::{DatabaseRequestPool, MembershipPool, ObjectRequestPool};
use crate::readiness::Readiness;
use crate::routing::RoutingTable;
use crate::storage::StorageRegistry;
use crate::types::{FleetMember, ObjectRequest};
use crate::workers::{DatabaseWorker, ObjectWorker};
use crate::{BotError, Result};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Bot {
    name: String,
    address: String,
    membership_enabled: bool,
    readiness: Arc<Readiness>,
    ring: Arc<HashRing>,
    members: Arc<MembershipPool>,
    object_pool: Arc<ObjectRequestPool>,
    database_pool: Arc<DatabaseRequestPool>,
    synchronizer: Arc<MembershipSynchronizer>,
    object_worker: Arc<ObjectWorker>,
    database_worker: Arc<DatabaseWorker>,
}

pub struct BotBuilder {
    name: String,
    address: String,
    api_port: u16,
    object_worker: Option<ObjectWorkerConfig>,
    database_worker: Option<DatabaseWorkerConfig>,
    membership: MembershipConfig,
    storage: Option<StorageRegistry>,
    database: Option<Arc<dyn Database>>,
    peers: Option<Arc<dyn PeerClient>>,
    resolver: Option<Arc<dyn Resolver>>,
}

impl BotBuilder {
    /// `address` is the one peers reach this bot on and the one the proxy
    /// hostname is expected to resolve to.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            api_port: 8080,
            object_worker: None,
            database_worker: None,
            membership: MembershipConfig::default(),
            storage: None,
            database: None,
            peers: None,
            resolver: None,
        }
    }

    pub fn api_port(mut self, port: u16) -> Self {
        self.api_port = port;
        self
    }

    pub fn object_worker(mut self, config: ObjectWorkerConfig) -> Self {
        self.object_worker = Some(config);
        self
    }

    pub fn database_worker(mut self, config: DatabaseWorkerConfig) -> Self {
        self.database_worker = Some(config);
        self
    }

    pub fn membership(mut self, config: MembershipConfig) -> Self {
        self.membership = config;
        self
    }

    /// Replaces the registry otherwise built from the configured sources.
    pub fn storage(mut self, storage: StorageRegistry) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn peers(mut self, peers: Arc<dyn PeerClient>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Result<Bot> {
        if self.name.trim().is_empty() {
            return Err(BotError::Config("bot name cannot be empty".to_string()));
        }

        let object_config = self
            .object_worker
            .ok_or_else(|| BotError::Config("object_worker configuration is required".to_string()))?;
        let database_config = self.database_worker.ok_or_else(|| {
            BotError::Config("database_worker configuration is required".to_string())
        })?;
        let mut membership_config = self.membership;

        object_config.validate()?;
        database_config.validate()?;
        membership_config.validate()?;

        // Peers are discovered as resolved IPs and matched against this address.
        let address = if membership_config.enabled {
            self.address
                .parse::<IpAddr>()
                .map_err(|_| {
                    BotError::Config(format!(
                        "address '{}' must be an IP address when membership is enabled",
                        self.address
                    ))
                })?
                .to_string()
        } else {
            self.address
        };

        let storage = match self.storage {
            Some(storage) => storage,
            None => StorageRegistry::from_sources(&object_config.sources)?,
        };
        let database = match self.database {
            Some(database) => database,
            None => build_database(&database_config.database)?,
        };
        let peers = self.peers.unwrap_or_else(|| {
            Arc::new(HttpPeerClient::new(
                self.api_port,
                membership_config.probe_timeout(),
                object_config.forward_timeout(),
            ))
        });
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(DnsResolver));

        let routing = Arc::new(RoutingTable::new(
            &object_config.routing,
            &object_config.modifiers,
        )?);

        let readiness = Arc::new(Readiness::new());
        let ring = Arc::new(HashRing::new(membership_config.vnodes));
        let members = Arc::new(MembershipPool::new());
        let object_pool = Arc::new(ObjectRequestPool::new());
        let database_pool = Arc::new(DatabaseRequestPool::new());

        let transfer = TransferObjectOperation::new(
            routing,
            storage,
            database_pool.clone(),
            object_config.storage_timeout(),
        );

        let object_worker = Arc::new(ObjectWorker::new(
            self.name.clone(),
            &object_config,
            object_pool.clone(),
            ring.clone(),
            members.clone(),
            peers.clone(),
            transfer,
        ));
        let database_worker = Arc::new(DatabaseWorker::new(
            &database_config,
            database_pool.clone(),
            database,
        ));

        let membership_enabled = membership_config.enabled;
        let synchronizer = Arc::new(MembershipSynchronizer::new(
            self.name.clone(),
            address.clone(),
            membership_config,
            ring.clone(),
            members.clone(),
            resolver,
            peers,
        ));

        Ok(Bot {
            name: self.name,
            address,
            membership_enabled,
            readiness,
            ring,
            members,
            object_pool,
            database_pool,
            synchronizer,
            object_worker,
            database_worker,
        })
    }
}

impl Bot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> FleetMember {
        FleetMember {
            name: self.name.clone(),
            address: self.address.clone(),
        }
    }

    pub fn readiness(&self) -> Arc<Readiness> {
        self.readiness.clone()
    }

    pub fn ring(&self) -> Arc<HashRing> {
        self.ring.clone()
    }

    pub fn members(&self) -> Arc<MembershipPool> {
        self.members.clone()
    }

    pub fn object_pool(&self) -> Arc<ObjectRequestPool> {
        self.object_pool.clone()
    }

    pub fn database_pool(&self) -> Arc<DatabaseRequestPool> {
        self.database_pool.clone()
    }

    pub fn synchronizer(&self) -> Arc<MembershipSynchronizer> {
        self.synchronizer.clone()
    }

    pub fn object_worker(&self) -> Arc<ObjectWorker> {
        self.object_worker.clone()
    }

    pub fn database_worker(&self) -> Arc<DatabaseWorker> {
        self.database_worker.clone()
    }

    /// Ingress: enqueue a transfer, replacing any pending one for the path.
    pub fn submit(&self, request: ObjectRequest) {
        tracing::debug!("Accepted transfer request {}", request);
        self.object_pool.add(request);
    }

    /// Starts the background components in dependency order, flipping each
    /// readiness gate as its component comes up.
    ///
    /// Returns early with no tasks when shutdown arrives while still waiting
    /// for the proxy to list this bot.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if self.membership_enabled {
            if !self.synchronizer.wait_for_own_host(&mut shutdown).await {
                return tasks;
            }
            self.synchronizer.join();
            tasks.push(tokio::spawn(
                self.synchronizer.clone().run(shutdown.clone()),
            ));
        } else {
            tracing::info!("Membership disabled, {} owns every request", self.name);
            self.synchronizer.join();
        }
        self.readiness.set_membership_ready();

        tasks.push(tokio::spawn(self.object_worker.clone().run(shutdown.clone())));
        self.readiness.set_object_ready();

        tasks.push(tokio::spawn(self.database_worker.clone().run(shutdown)));
        self.readiness.set_database_ready();

        tasks
    }
}
