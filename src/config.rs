use serde::Deserialize;
use std::time::Duration;

use crate::idempotency::IdempotencyConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub metrics_enabled: bool,
}

/// Which expense store backs the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub max_entries: Option<usize>,
    pub max_body_bytes: usize,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 86_400,
            sweep_interval_seconds: 300,
            max_entries: None,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl IdempotencySettings {
    pub fn to_cache_config(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            retention: Duration::from_secs(self.ttl_seconds),
            max_entries: self.max_entries,
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_backend() -> StorageBackend {
    StorageBackend::Postgres
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }
}
