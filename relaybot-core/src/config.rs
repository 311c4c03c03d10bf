use crate::error::{BotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Object transfer pipeline tunables plus its storage/routing tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectWorkerConfig {
    pub max_workers: usize,
    pub batch_size: usize,
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub modifiers: Vec<ModifierConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl ObjectWorkerConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("object_worker.max_workers", self.max_workers)?;
        check_positive("object_worker.batch_size", self.batch_size)?;

        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(BotError::Config("source name cannot be empty".to_string()));
            }
        }

        if self.routing.mode == RoutingMode::Metadata
            && self
                .routing
                .metadata_key
                .as_deref()
                .is_none_or(|key| key.trim().is_empty())
        {
            return Err(BotError::Config(
                "routing.metadata_key is required for metadata routing".to_string(),
            ));
        }

        for (key, route) in &self.routing.routes {
            for endpoint in [&route.frontend, &route.backend] {
                if !self.sources.iter().any(|s| s.name == endpoint.source) {
                    return Err(BotError::Config(format!(
                        "route '{}' references unknown source '{}'",
                        key, endpoint.source
                    )));
                }
                if endpoint.modifiers.is_empty() {
                    return Err(BotError::Config(format!(
                        "route '{}' has no modifiers for source '{}'",
                        key, endpoint.source
                    )));
                }
                for modifier in &endpoint.modifiers {
                    if !self.modifiers.iter().any(|m| &m.name == modifier) {
                        return Err(BotError::Config(format!(
                            "route '{}' references unknown modifier '{}'",
                            key, modifier
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub backend: String,
    #[serde(default)]
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub gcs: Option<GcsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub allow_http: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    pub credentials_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierConfig {
    pub name: String,
    pub bucket: String,
    #[serde(default)]
    pub add_prefix: String,
    #[serde(default)]
    pub remove_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    #[default]
    Bucket,
    Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutingConfig {
    #[serde(default)]
    pub mode: RoutingMode,
    #[serde(default)]
    pub metadata_key: Option<String>,
    #[serde(default)]
    pub routes: HashMap<String, RouteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub frontend: RouteEndpointConfig,
    pub backend: RouteEndpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEndpointConfig {
    pub source: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseWorkerConfig {
    pub max_workers: usize,
    pub batch_size: usize,
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    #[serde(default = "default_database_timeout_ms")]
    pub timeout_ms: u64,
    pub database: DatabaseConfig,
}

impl DatabaseWorkerConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("database_worker.max_workers", self.max_workers)?;
        check_positive("database_worker.batch_size", self.batch_size)?;

        if self.database.table.trim().is_empty() {
            return Err(BotError::Config("database table cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_backend")]
    pub backend: String,
    pub path: PathBuf,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub proxy: String,
    #[serde(default = "default_vnodes")]
    pub vnodes: usize,
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    #[serde(default = "default_own_host_backoff_ms")]
    pub own_host_backoff_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            proxy: String::new(),
            vnodes: default_vnodes(),
            sync_interval_ms: default_sync_interval_ms(),
            own_host_backoff_ms: default_own_host_backoff_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl MembershipConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn own_host_backoff(&self) -> Duration {
        Duration::from_millis(self.own_host_backoff_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Coerces a zero vnode count to one and checks the proxy host.
    pub fn validate(&mut self) -> Result<()> {
        if self.vnodes == 0 {
            self.vnodes = 1;
        }

        if self.enabled && self.proxy.trim().is_empty() {
            return Err(BotError::Config(
                "membership.proxy is required when membership is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_positive(option: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(BotError::Config(format!(
            "config option {} must be a number > 0",
            option
        )));
    }
    Ok(())
}

fn default_idle_interval_ms() -> u64 {
    2_000
}

fn default_forward_timeout_ms() -> u64 {
    200
}

fn default_storage_timeout_ms() -> u64 {
    60_000
}

fn default_database_timeout_ms() -> u64 {
    10_000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_database_backend() -> String {
    "sqlite".to_string()
}

fn default_vnodes() -> usize {
    1
}

fn default_sync_interval_ms() -> u64 {
    2_000
}

fn default_own_host_backoff_ms() -> u64 {
    4_000
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}
