//! Relaybot Core - peer-to-peer object migration fleet
//!
//! Every bot sits behind one proxy hostname and owns a share of the object
//! key space through a consistent-hash ring:
//! - DNS + health probes keep the ring in sync, no coordinator
//! - bounded batch rounds drain pending transfers
//! - requests owned by a peer are forwarded, falling back to local execution
//! - provenance rows are written with a dedup insert

pub mod bot;
pub mod config;
pub mod database;
pub mod error;
pub mod hashring;
pub mod membership;
pub mod operations;
pub mod peer;
pub mod pool;
pub mod readiness;
pub mod routing;
pub mod storage;
pub mod types;
pub mod workers;

pub use bot::{Bot, BotBuilder};
pub use config::{
    DatabaseConfig, DatabaseWorkerConfig, GcsConfig, MembershipConfig, ModifierConfig,
    ObjectWorkerConfig, RouteConfig, RouteEndpointConfig, RoutingConfig, RoutingMode, S3Config,
    SourceConfig,
};
pub use database::{Database, SqliteDatabase, build_database};
pub use error::{BotError, Result};
pub use hashring::{HashRing, VirtualNode, hash_key};
pub use membership::{DnsResolver, MembershipSynchronizer, Resolver};
pub use operations::{
    TransferObjectOperation, TransferObjectOperationOutcome, TransferObjectOperationRequest,
    TransferObjectOperationResult,
};
pub use peer::{HttpPeerClient, PeerClient};
pub use pool::{DatabaseRequestPool, KeyedPool, MembershipPool, ObjectRequestPool, PoolKey};
pub use readiness::{Readiness, ReadinessFlags};
pub use routing::{Modifier, ResolvedTransfer, RoutingTable};
pub use storage::{ObjectHead, ObjectStorage, StorageBuilder, StorageRegistry, StoredObject};
pub use types::{DatabaseRequest, FleetMember, ObjectLocation, ObjectRequest};
pub use workers::{DatabaseWorker, ObjectWorker};
