use super::{ObjectHead, ObjectStorage, StoredObject};
use crate::config::{GcsConfig, S3Config};
use crate::{BotError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum BackendKind {
    S3(S3Config),
    Gcs(GcsConfig),
    Memory,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::S3(_) => "s3",
            Self::Gcs(_) => "gcs",
            Self::Memory => "memory",
        }
    }
}

/// `object_store` backed storage addressing any bucket of one backend.
///
/// `object_store` clients are bound to a single bucket, so one client per
/// bucket is built on first use and cached.
pub struct BucketStore {
    kind: BackendKind,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl BucketStore {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory() -> Self {
        Self::new(BackendKind::Memory)
    }

    fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self
            .stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStore> = match &self.kind {
            BackendKind::S3(config) => {
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_region(&config.region)
                    .with_access_key_id(&config.access_key_id)
                    .with_secret_access_key(&config.secret_access_key)
                    .with_allow_http(config.allow_http);
                if let Some(endpoint) = config.endpoint.as_deref() {
                    builder = builder.with_endpoint(endpoint);
                }
                Arc::new(builder.build()?)
            }
            BackendKind::Gcs(config) => Arc::new(
                GoogleCloudStorageBuilder::new()
                    .with_bucket_name(bucket)
                    .with_service_account_path(&config.credentials_file)
                    .build()?,
            ),
            BackendKind::Memory => Arc::new(InMemory::new()),
        };

        tracing::debug!("Created {} client for bucket {}", self.kind.name(), bucket);
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }

    /// The md5 carried by an etag, if this backend's etags are md5 digests.
    ///
    /// Only single-part S3 uploads qualify; multipart S3 etags carry a
    /// `-N` suffix, and GCS and in-memory etags are opaque.
    fn etag_md5(&self, etag: &str) -> Option<String> {
        if !matches!(self.kind, BackendKind::S3(_)) {
            return None;
        }
        let tag = etag.trim_matches('"');
        (tag.len() == 32 && tag.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| tag.to_ascii_lowercase())
    }
}

#[async_trait]
impl ObjectStorage for BucketStore {
    fn backend(&self) -> &str {
        self.kind.name()
    }

    async fn get(&self, bucket: &str, path: &str) -> Result<StoredObject> {
        let store = self.store_for(bucket)?;
        let location = ObjectPath::from(path);

        let result = store.get(&location).await.map_err(|error| match error {
            object_store::Error::NotFound { .. } => {
                BotError::ObjectNotFound(format!("{}/{}", bucket, path))
            }
            other => BotError::from(other),
        })?;

        let content_type = result.attributes.get(&Attribute::ContentType).map(|value| {
            let value: &str = value.as_ref();
            value.to_string()
        });
        let body = result.bytes().await?;

        Ok(StoredObject {
            size: body.len() as u64,
            content_hash: compute_md5(&body),
            content_type,
            body,
        })
    }

    async fn put(&self, bucket: &str, path: &str, object: &StoredObject) -> Result<()> {
        let store = self.store_for(bucket)?;
        let location = ObjectPath::from(path);

        let mut attributes = Attributes::new();
        if let Some(content_type) = object.content_type.clone() {
            attributes.insert(Attribute::ContentType, content_type.into());
        }

        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        store
            .put_opts(&location, PutPayload::from(object.body.clone()), options)
            .await?;

        tracing::debug!(
            "Stored {} bytes at {}://{}/{}",
            object.size,
            self.kind.name(),
            bucket,
            path
        );
        Ok(())
    }

    async fn head(&self, bucket: &str, path: &str) -> Result<Option<ObjectHead>> {
        let store = self.store_for(bucket)?;
        match store.head(&ObjectPath::from(path)).await {
            Ok(meta) => Ok(Some(ObjectHead {
                size: meta.size as u64,
                content_hash: meta.e_tag.and_then(|tag| self.etag_md5(&tag)),
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

/// Hex md5 of `data`.
pub fn compute_md5(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Wraps bytes as an object with its md5 filled in.
impl From<Bytes> for StoredObject {
    fn from(body: Bytes) -> Self {
        Self {
            size: body.len() as u64,
            content_hash: compute_md5(&body),
            content_type: None,
            body,
        }
    }
}
