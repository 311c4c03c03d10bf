use super::{BackendKind, BucketStore, ObjectStorage};
use crate::config::{GcsConfig, S3Config, SourceConfig};
use crate::{BotError, Result};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct StorageBuilder {
    backend: Option<String>,
    s3: Option<S3Config>,
    gcs: Option<GcsConfig>,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn s3(mut self, config: S3Config) -> Self {
        self.s3 = Some(config);
        self
    }

    pub fn gcs(mut self, config: GcsConfig) -> Self {
        self.gcs = Some(config);
        self
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(BotError::Config(
                "storage backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    pub fn build(&self) -> Result<Arc<dyn ObjectStorage>> {
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "s3" => {
                let config = self.s3.clone().ok_or_else(|| {
                    BotError::Config("s3 configuration is required for s3 backend".to_string())
                })?;

                if config.access_key_id.trim().is_empty() {
                    return Err(BotError::Config(
                        "s3 access_key_id cannot be empty".to_string(),
                    ));
                }

                Ok(Arc::new(BucketStore::new(BackendKind::S3(config))))
            }
            "gcs" => {
                let config = self.gcs.clone().ok_or_else(|| {
                    BotError::Config("gcs configuration is required for gcs backend".to_string())
                })?;

                if config.credentials_file.trim().is_empty() {
                    return Err(BotError::Config(
                        "gcs credentials_file cannot be empty".to_string(),
                    ));
                }

                Ok(Arc::new(BucketStore::new(BackendKind::Gcs(config))))
            }
            "memory" => Ok(Arc::new(BucketStore::memory())),
            other => Err(BotError::Config(format!(
                "unsupported storage backend: {}",
                other
            ))),
        }
    }
}

/// Named storage sources referenced by routes.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    sources: HashMap<String, Arc<dyn ObjectStorage>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(sources: &[SourceConfig]) -> Result<Self> {
        let mut registry = Self::new();

        for source in sources {
            let mut builder = StorageBuilder::new().backend(&source.backend);
            if let Some(s3) = source.s3.clone() {
                builder = builder.s3(s3);
            }
            if let Some(gcs) = source.gcs.clone() {
                builder = builder.gcs(gcs);
            }

            let storage = builder.build().map_err(|error| {
                BotError::Config(format!("source '{}': {}", source.name, error))
            })?;
            tracing::info!("Registered {} source {}", storage.backend(), source.name);
            registry.register(&source.name, storage);
        }

        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, storage: Arc<dyn ObjectStorage>) {
        self.sources.insert(name.into(), storage);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ObjectStorage>> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| BotError::Config(format!("unknown storage source '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }
}
