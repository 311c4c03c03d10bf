use super::{claim_batches, idle_or_shutdown};
use crate::config::ObjectWorkerConfig;
use crate::hashring::HashRing;
use crate::operations::{TransferObjectOperation, TransferObjectOperationRequest};
use crate::peer::PeerClient;
use crate::pool::{MembershipPool, ObjectRequestPool};
use crate::types::ObjectRequest;
use crate::{BotError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// How a single claimed request was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Enqueued on the owning peer.
    Forwarded(String),
    Executed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub batches: usize,
    pub claimed: usize,
    pub forwarded: usize,
    pub executed: usize,
    pub failed: usize,
}

impl RoundReport {
    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Forwarded(_) => self.forwarded += 1,
            Disposition::Executed => self.executed += 1,
            Disposition::Failed => self.failed += 1,
        }
    }
}

/// Drains the object request pool, forwarding each request to its ring
/// owner or transferring it locally.
pub struct ObjectWorker {
    name: String,
    max_workers: usize,
    batch_size: usize,
    idle_interval: Duration,
    forward_timeout: Duration,
    pool: Arc<ObjectRequestPool>,
    ring: Arc<HashRing>,
    members: Arc<MembershipPool>,
    peers: Arc<dyn PeerClient>,
    transfer: TransferObjectOperation,
}

impl ObjectWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        config: &ObjectWorkerConfig,
        pool: Arc<ObjectRequestPool>,
        ring: Arc<HashRing>,
        members: Arc<MembershipPool>,
        peers: Arc<dyn PeerClient>,
        transfer: TransferObjectOperation,
    ) -> Self {
        Self {
            name: name.into(),
            max_workers: config.max_workers,
            batch_size: config.batch_size,
            idle_interval: config.idle_interval(),
            forward_timeout: config.forward_timeout(),
            pool,
            ring,
            members,
            peers,
            transfer,
        }
    }

    /// Runs one round. An empty pool yields an empty report without waiting.
    pub async fn run_round(self: &Arc<Self>) -> RoundReport {
        let batches = claim_batches(&self.pool, self.max_workers, self.batch_size);
        let mut report = RoundReport {
            batches: batches.len(),
            claimed: batches.iter().map(Vec::len).sum(),
            ..Default::default()
        };
        if batches.is_empty() {
            return report;
        }

        tracing::debug!(
            "Claimed {} object requests in {} batches, {} left in pool",
            report.claimed,
            report.batches,
            self.pool.len()
        );

        let mut tasks = JoinSet::new();
        for batch in batches {
            let worker = self.clone();
            tasks.spawn(async move {
                let mut dispositions = Vec::with_capacity(batch.len());
                for request in batch {
                    dispositions.push(worker.handle(request).await);
                }
                dispositions
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(dispositions) => dispositions.iter().for_each(|d| report.record(d)),
                Err(e) => tracing::error!("Object batch task failed: {}", e),
            }
        }

        report
    }

    /// Forward-or-execute decision for one request. Never fails the batch.
    pub async fn handle(&self, request: ObjectRequest) -> Disposition {
        match self.ring.get_node(&request.path) {
            Some(owner) if owner != self.name => match self.forward(&owner, &request).await {
                Ok(address) => {
                    tracing::debug!("Forwarded {} to {} ({})", request, owner, address);
                    return Disposition::Forwarded(owner);
                }
                Err(e) => tracing::warn!(
                    "Unable to forward {} to owner {}, executing locally: {}",
                    request,
                    owner,
                    e
                ),
            },
            Some(_) => {}
            None => tracing::debug!("Hash ring is empty, executing {} locally", request),
        }

        self.execute(request).await
    }

    async fn forward(&self, owner: &str, request: &ObjectRequest) -> Result<String> {
        let member = self
            .members
            .find_by_name(owner)
            .ok_or_else(|| BotError::Internal(format!("no address known for node {}", owner)))?;

        tokio::time::timeout(self.forward_timeout, self.peers.forward(&member.address, request))
            .await
            .map_err(|_| {
                BotError::Timeout(format!(
                    "forward to {} exceeded {:?}",
                    member.address, self.forward_timeout
                ))
            })??;

        Ok(member.address)
    }

    async fn execute(&self, request: ObjectRequest) -> Disposition {
        let description = request.to_string();
        match self
            .transfer
            .run(TransferObjectOperationRequest { request })
            .await
        {
            Ok(_) => Disposition::Executed,
            Err(e) if e.is_transient() => {
                tracing::warn!("Transfer of {} failed, dropping request: {}", description, e);
                Disposition::Failed
            }
            Err(e) => {
                tracing::error!("Transfer of {} failed, dropping request: {}", description, e);
                Disposition::Failed
            }
        }
    }

    /// Runs rounds until shutdown; idles when the pool is empty.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Object worker started: {} workers x {} requests per round",
            self.max_workers,
            self.batch_size
        );

        while !*shutdown.borrow() {
            let report = self.run_round().await;
            if report.claimed == 0 {
                if idle_or_shutdown(self.idle_interval, &mut shutdown).await {
                    break;
                }
                continue;
            }

            tracing::debug!(
                "Object round done: {} executed, {} forwarded, {} failed",
                report.executed,
                report.forwarded,
                report.failed
            );
        }

        tracing::info!("Object worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::transfer_object::tests::{Fixture, fixture};
    use crate::storage::{ObjectStorage, StoredObject};
    use crate::types::FleetMember;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPeers {
        reachable: bool,
        forwarded: Mutex<Vec<(String, ObjectRequest)>>,
    }

    #[async_trait]
    impl PeerClient for RecordingPeers {
        async fn health(&self, _address: &str) -> Result<()> {
            Ok(())
        }

        async fn info(&self, address: &str) -> Result<FleetMember> {
            Err(BotError::Http(format!("{} has no info", address)))
        }

        async fn forward(&self, address: &str, request: &ObjectRequest) -> Result<()> {
            if !self.reachable {
                return Err(BotError::Http(format!("{} refused connection", address)));
            }
            self.forwarded
                .lock()
                .unwrap()
                .push((address.to_string(), request.clone()));
            Ok(())
        }
    }

    fn config(max_workers: usize, batch_size: usize) -> ObjectWorkerConfig {
        serde_json::from_value(serde_json::json!({
            "max_workers": max_workers,
            "batch_size": batch_size,
            "sources": [],
        }))
        .unwrap()
    }

    fn worker(
        fx: &Fixture,
        ring_nodes: &[&str],
        peers: Arc<RecordingPeers>,
        max_workers: usize,
        batch_size: usize,
    ) -> (Arc<ObjectWorker>, Arc<ObjectRequestPool>) {
        let pool = Arc::new(ObjectRequestPool::new());
        let ring = Arc::new(HashRing::new(16));
        ring.add_nodes(ring_nodes);

        let members = Arc::new(MembershipPool::new());
        for name in ring_nodes.iter().filter(|n| **n != "bot-a") {
            members.add(FleetMember {
                name: name.to_string(),
                address: format!("addr-{}", name),
            });
        }

        let worker = Arc::new(ObjectWorker::new(
            "bot-a",
            &config(max_workers, batch_size),
            pool.clone(),
            ring,
            members,
            peers,
            fx.operation.clone(),
        ));
        (worker, pool)
    }

    /// First key of the form `obj/N` the ring assigns to `owner`.
    fn key_owned_by(ring_nodes: &[&str], owner: &str) -> String {
        let ring = HashRing::new(16);
        ring.add_nodes(ring_nodes);
        (0..1000)
            .map(|i| format!("obj/{}", i))
            .find(|key| ring.get_node(key).as_deref() == Some(owner))
            .unwrap()
    }

    async fn seed(fx: &Fixture, path: &str) {
        fx.source
            .put(
                "archive-bucket",
                &format!("in/{}", path),
                &StoredObject::from(Bytes::from_static(b"data")),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_round_claims_bounded_batches() {
        let fx = fixture();
        let (worker, pool) = worker(&fx, &["bot-a"], Arc::new(RecordingPeers::default()), 2, 3);
        for i in 0..10 {
            pool.add(ObjectRequest::new("archive", format!("obj/{}", i)));
        }

        let report = worker.run_round().await;
        assert_eq!(report.batches, 2);
        assert_eq!(report.claimed, 6);
        // Sources were never seeded, so every local transfer fails.
        assert_eq!(report.failed, 6);
        assert_eq!(pool.len(), 4);

        let report = worker.run_round().await;
        assert_eq!(report.claimed, 4);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_owned_request_executes_locally() {
        let fx = fixture();
        let nodes = ["bot-a", "bot-b"];
        let key = key_owned_by(&nodes, "bot-a");
        seed(&fx, &key).await;

        let peers = Arc::new(RecordingPeers {
            reachable: true,
            ..Default::default()
        });
        let (worker, pool) = worker(&fx, &nodes, peers.clone(), 2, 3);
        pool.add(ObjectRequest::new("archive", key.clone()));

        let report = worker.run_round().await;
        assert_eq!(report.executed, 1);
        assert!(peers.forwarded.lock().unwrap().is_empty());
        assert!(fx.database_pool.get(&format!("out/{}", key)).is_some());
    }

    #[tokio::test]
    async fn test_foreign_request_is_forwarded() {
        let fx = fixture();
        let nodes = ["bot-a", "bot-b", "bot-c"];
        let key = key_owned_by(&nodes, "bot-b");

        let peers = Arc::new(RecordingPeers {
            reachable: true,
            ..Default::default()
        });
        let (worker, pool) = worker(&fx, &nodes, peers.clone(), 2, 3);
        pool.add(ObjectRequest::new("archive", key.clone()));

        let report = worker.run_round().await;
        assert_eq!(report.forwarded, 1);

        let forwarded = peers.forwarded.lock().unwrap();
        assert_eq!(forwarded[0].0, "addr-bot-b");
        assert_eq!(forwarded[0].1.path, key);
        assert!(fx.database_pool.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_owner_falls_back_to_local() {
        let fx = fixture();
        let nodes = ["bot-a", "bot-b"];
        let key = key_owned_by(&nodes, "bot-b");
        seed(&fx, &key).await;

        let (worker, pool) = worker(&fx, &nodes, Arc::new(RecordingPeers::default()), 1, 1);
        pool.add(ObjectRequest::new("archive", key.clone()));

        let report = worker.run_round().await;
        assert_eq!(report.executed, 1);
        assert!(fx.database_pool.get(&format!("out/{}", key)).is_some());
    }

    #[tokio::test]
    async fn test_empty_ring_executes_locally() {
        let fx = fixture();
        seed(&fx, "obj/9").await;

        let (worker, _) = worker(&fx, &[], Arc::new(RecordingPeers::default()), 1, 1);
        let disposition = worker.handle(ObjectRequest::new("archive", "obj/9")).await;
        assert_eq!(disposition, Disposition::Executed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fx = fixture();
        let (worker, _) = worker(&fx, &["bot-a"], Arc::new(RecordingPeers::default()), 1, 1);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
