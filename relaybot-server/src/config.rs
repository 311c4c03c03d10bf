use relaybot_core::{
    BotError, DatabaseWorkerConfig, MembershipConfig, ObjectWorkerConfig, Result,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub api: ApiConfig,
    pub object_worker: ObjectWorkerConfig,
    pub database_worker: DatabaseWorkerConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_address")]
    pub address: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Address peers and the proxy know this bot by.
    #[serde(default)]
    pub advertise_address: Option<String>,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: default_api_address(),
            port: default_api_port(),
            advertise_address: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ApiConfig {
    pub fn effective_address(&self) -> String {
        self.advertise_address
            .clone()
            .filter(|address| !address.trim().is_empty())
            .unwrap_or_else(|| self.address.clone())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_api_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl Config {
    /// Loads `path`, overlaid with `RELAYBOT__*` environment variables
    /// (e.g. `RELAYBOT__API__PORT`), and validates the result.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("RELAYBOT").separator("__"))
            .build()
            .map_err(|e| BotError::Config(e.to_string()))?;

        let mut config: Config = settings
            .try_deserialize()
            .map_err(|e| BotError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BotError::Config("name cannot be empty".to_string()));
        }

        if self.membership.enabled {
            let address = self.api.effective_address();
            // Peers and the proxy cannot reach a wildcard address.
            if address == "0.0.0.0" {
                return Err(BotError::Config(
                    "api.advertise_address is required when membership is enabled".to_string(),
                ));
            }
            if address.parse::<IpAddr>().is_err() {
                return Err(BotError::Config(format!(
                    "api.advertise_address '{}' must be an IP address the proxy resolves to",
                    address
                )));
            }
        }

        self.object_worker.validate()?;
        self.database_worker.validate()?;
        self.membership.validate()?;
        Ok(())
    }
}
