use crate::pool::DatabaseRequestPool;
use crate::routing::RoutingTable;
use crate::storage::{StorageRegistry, StoredObject};
use crate::types::{DatabaseRequest, ObjectLocation, ObjectRequest};
use crate::{BotError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Copies one object from its route's source side to its destination side
/// and queues the provenance record.
#[derive(Clone)]
pub struct TransferObjectOperation {
    routing: Arc<RoutingTable>,
    storage: StorageRegistry,
    database_pool: Arc<DatabaseRequestPool>,
    storage_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TransferObjectOperationRequest {
    pub request: ObjectRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferObjectOperationResult {
    pub source: ObjectLocation,
    pub destination: ObjectLocation,
    pub size: u64,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferObjectOperationOutcome {
    Copied(TransferObjectOperationResult),
    /// Destination already held the object; only the record was queued.
    AlreadyPresent(TransferObjectOperationResult),
}

impl TransferObjectOperationOutcome {
    pub fn result(&self) -> &TransferObjectOperationResult {
        match self {
            Self::Copied(result) | Self::AlreadyPresent(result) => result,
        }
    }
}

impl TransferObjectOperation {
    pub fn new(
        routing: Arc<RoutingTable>,
        storage: StorageRegistry,
        database_pool: Arc<DatabaseRequestPool>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            routing,
            storage,
            database_pool,
            storage_timeout,
        }
    }

    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.storage_timeout, call)
            .await
            .map_err(|_| {
                BotError::Timeout(format!("{} exceeded {:?}", what, self.storage_timeout))
            })?
    }

    pub async fn run(
        &self,
        request: TransferObjectOperationRequest,
    ) -> Result<TransferObjectOperationOutcome> {
        let TransferObjectOperationRequest { request } = request;

        let resolved = self.routing.resolve(&request)?;
        let source = resolved.source;
        let destination = resolved.destination;

        let source_storage = self.storage.get(&source.source)?;
        let destination_storage = self.storage.get(&destination.source)?;

        let head = self
            .bounded(
                "destination head",
                destination_storage.head(&destination.bucket, &destination.path),
            )
            .await?;

        if let Some(head) = head {
            let content_hash = match head.content_hash {
                Some(hash) => hash,
                None => {
                    self.bounded(
                        "destination read",
                        destination_storage.get(&destination.bucket, &destination.path),
                    )
                    .await?
                    .content_hash
                }
            };

            tracing::debug!("Object {} already present, skipping copy", destination);
            let result = self.enqueue_record(source, destination, head.size, content_hash);
            return Ok(TransferObjectOperationOutcome::AlreadyPresent(result));
        }

        let object: StoredObject = self
            .bounded("source read", source_storage.get(&source.bucket, &source.path))
            .await?;

        self.bounded(
            "destination write",
            destination_storage.put(&destination.bucket, &destination.path, &object),
        )
        .await?;

        tracing::info!(
            "Transferred {} to {} ({} bytes, md5 {})",
            source,
            destination,
            object.size,
            object.content_hash
        );

        let result = self.enqueue_record(source, destination, object.size, object.content_hash);
        Ok(TransferObjectOperationOutcome::Copied(result))
    }

    fn enqueue_record(
        &self,
        source: ObjectLocation,
        destination: ObjectLocation,
        size: u64,
        content_hash: String,
    ) -> TransferObjectOperationResult {
        self.database_pool.add(DatabaseRequest {
            bucket: destination.bucket.clone(),
            path: destination.path.clone(),
            content_hash: content_hash.clone(),
        });

        TransferObjectOperationResult {
            source,
            destination,
            size,
            content_hash,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{ModifierConfig, RouteConfig, RouteEndpointConfig, RoutingConfig};
    use crate::storage::{BucketStore, ObjectStorage, compute_md5};
    use bytes::Bytes;
    use std::collections::HashMap;

    /// Route `archive` requests from `src:archive-bucket/in/..` to
    /// `dst:serving-bucket/out/..`.
    pub fn routing_table() -> RoutingTable {
        let mut routes = HashMap::new();
        routes.insert(
            "archive".to_string(),
            RouteConfig {
                frontend: RouteEndpointConfig {
                    source: "dst".to_string(),
                    modifiers: vec!["publish".to_string()],
                },
                backend: RouteEndpointConfig {
                    source: "src".to_string(),
                    modifiers: vec!["archive".to_string()],
                },
            },
        );
        let config = RoutingConfig {
            routes,
            ..Default::default()
        };
        let modifiers = vec![
            ModifierConfig {
                name: "archive".to_string(),
                bucket: "archive-bucket".to_string(),
                add_prefix: "in/".to_string(),
                remove_prefix: String::new(),
            },
            ModifierConfig {
                name: "publish".to_string(),
                bucket: "serving-bucket".to_string(),
                add_prefix: "out/".to_string(),
                remove_prefix: String::new(),
            },
        ];
        RoutingTable::new(&config, &modifiers).unwrap()
    }

    pub struct Fixture {
        pub source: Arc<BucketStore>,
        pub destination: Arc<BucketStore>,
        pub database_pool: Arc<DatabaseRequestPool>,
        pub operation: TransferObjectOperation,
    }

    pub fn fixture() -> Fixture {
        let source = Arc::new(BucketStore::memory());
        let destination = Arc::new(BucketStore::memory());
        let mut storage = StorageRegistry::new();
        storage.register("src", source.clone());
        storage.register("dst", destination.clone());

        let database_pool = Arc::new(DatabaseRequestPool::new());
        let operation = TransferObjectOperation::new(
            Arc::new(routing_table()),
            storage,
            database_pool.clone(),
            Duration::from_secs(5),
        );

        Fixture {
            source,
            destination,
            database_pool,
            operation,
        }
    }

    fn transfer(bucket: &str, path: &str) -> TransferObjectOperationRequest {
        TransferObjectOperationRequest {
            request: ObjectRequest::new(bucket, path),
        }
    }

    #[tokio::test]
    async fn test_transfer_copies_and_queues_record() {
        let fx = fixture();
        let mut object = StoredObject::from(Bytes::from_static(b"payload"));
        object.content_type = Some("application/octet-stream".to_string());
        fx.source
            .put("archive-bucket", "in/obj/1", &object)
            .await
            .unwrap();

        let outcome = fx.operation.run(transfer("archive", "obj/1")).await.unwrap();
        let TransferObjectOperationOutcome::Copied(result) = outcome else {
            panic!("expected a copy");
        };
        assert_eq!(result.destination.path, "out/obj/1");
        assert_eq!(result.size, 7);

        let copied = fx.destination.get("serving-bucket", "out/obj/1").await.unwrap();
        assert_eq!(copied.body, object.body);
        assert_eq!(copied.content_type.as_deref(), Some("application/octet-stream"));

        let record = fx.database_pool.get("out/obj/1").unwrap();
        assert_eq!(record.bucket, "serving-bucket");
        assert_eq!(record.content_hash, object.content_hash);
    }

    #[tokio::test]
    async fn test_transfer_twice_skips_second_copy() {
        let fx = fixture();
        fx.source
            .put("archive-bucket", "in/obj/2", &StoredObject::from(Bytes::from_static(b"x")))
            .await
            .unwrap();

        let first = fx.operation.run(transfer("archive", "obj/2")).await.unwrap();
        assert!(matches!(first, TransferObjectOperationOutcome::Copied(_)));

        let second = fx.operation.run(transfer("archive", "obj/2")).await.unwrap();
        assert!(matches!(second, TransferObjectOperationOutcome::AlreadyPresent(_)));
        assert_eq!(second.result().size, 1);

        assert_eq!(fx.database_pool.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_destination_records_body_md5() {
        let fx = fixture();
        let existing = StoredObject::from(Bytes::from_static(b"already served"));
        fx.destination
            .put("serving-bucket", "out/obj/7", &existing)
            .await
            .unwrap();

        let outcome = fx.operation.run(transfer("archive", "obj/7")).await.unwrap();
        assert!(matches!(outcome, TransferObjectOperationOutcome::AlreadyPresent(_)));

        let record = fx.database_pool.get("out/obj/7").unwrap();
        assert_eq!(record.content_hash, compute_md5(b"already served"));
        assert_eq!(outcome.result().content_hash, record.content_hash);
    }

    #[tokio::test]
    async fn test_missing_source_object() {
        let fx = fixture();
        let result = fx.operation.run(transfer("archive", "obj/missing")).await;
        assert!(matches!(result, Err(BotError::ObjectNotFound(_))));
        assert!(fx.database_pool.is_empty());
    }

    #[tokio::test]
    async fn test_unrouted_request() {
        let fx = fixture();
        let result = fx.operation.run(transfer("unknown", "obj/1")).await;
        assert!(matches!(result, Err(BotError::NoRoute(_))));
    }
}
