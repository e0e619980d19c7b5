//! Configuration management
//!
//! Layers, lowest priority first: built-in defaults, an optional
//! `sbgate.toml` (or the file given with `--config`), then
//! `SBGATE_<SECTION>__<KEY>` environment variables. Command-line flags are
//! applied on top by `main`.

use sbgate_broker::ClientSettings;
use sbgate_facade::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Required before startup; may come from the file, env or CLI
    pub connection_string: Option<String>,

    /// Longest a receive waits for its first message
    #[serde(default = "default_receive_wait_ms")]
    pub receive_wait_ms: u64,

    /// Page size used when listing entities
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_sas_token_ttl_secs")]
    pub sas_token_ttl_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            receive_wait_ms: default_receive_wait_ms(),
            list_page_size: default_list_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            sas_token_ttl_secs: default_sas_token_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_receive_wait_ms() -> u64 {
    5000
}

fn default_list_page_size() -> usize {
    100
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_sas_token_ttl_secs() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2000
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("sbgate").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("SBGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.broker.receive_wait_ms)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            request_timeout: Duration::from_secs(self.broker.request_timeout_secs),
            sas_token_ttl: Duration::from_secs(self.broker.sas_token_ttl_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}
