//! Object storage collaborators.
//!
//! Sources are registered by name; the backend type selects the constructor
//! (`s3`, `gcs` or `memory`).

pub mod bucket_store;
pub mod factory;

pub use bucket_store::{BackendKind, BucketStore, compute_md5};
pub use factory::{StorageBuilder, StorageRegistry};

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Object body plus the attributes carried over to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub size: u64,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    /// Hex md5 when the backend reports one; `None` means read the body.
    pub content_hash: Option<String>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    fn backend(&self) -> &str;

    /// Reads the whole object; a missing object is `BotError::ObjectNotFound`.
    async fn get(&self, bucket: &str, path: &str) -> Result<StoredObject>;

    async fn put(&self, bucket: &str, path: &str, object: &StoredObject) -> Result<()>;

    /// Returns `None` when the object does not exist.
    async fn head(&self, bucket: &str, path: &str) -> Result<Option<ObjectHead>>;
}
