use config::{Config, File};
pub use config::ConfigError;
use serde::Deserialize;

use crate::grid::{
    GridResult, RunnerConfig, TraderConfig, MAINNET_API_URL, TESTNET_API_URL,
};

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Network configuration (mode, credentials)
    pub network: NetworkConfig,
    /// Grid parameters
    pub trader: TraderConfig,
    /// Poll cadence and backoff
    #[serde(default)]
    pub poll: PollConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    /// Sandbox (testnet) instead of live trading
    #[serde(default = "default_testnet")]
    pub testnet: bool,
    /// In production, load these from ENV variables only
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// Overrides the endpoint implied by `testnet`
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_testnet() -> bool {
    true
}

fn default_recv_window_ms() -> u64 {
    10_000
}

impl NetworkConfig {
    pub fn base_url(&self) -> &str {
        match &self.base_url {
            Some(url) => url,
            None if self.testnet => TESTNET_API_URL,
            None => MAINNET_API_URL,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Consecutive failed ticks before backing off
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            failure_threshold: default_failure_threshold(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_max_backoff_secs() -> u64 {
    60
}

impl From<&PollConfig> for RunnerConfig {
    fn from(poll: &PollConfig) -> Self {
        RunnerConfig {
            poll_interval_ms: poll.interval_ms,
            failure_threshold: poll.failure_threshold,
            max_backoff_secs: poll.max_backoff_secs,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a configuration file
    pub fn new(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(config_path))
            // Environment overrides the file
            // e.g. APP__NETWORK__API_SECRET=...
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Validated trader parameters
    pub fn trader_config(&self) -> GridResult<TraderConfig> {
        self.trader.validate()?;
        Ok(self.trader.clone())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::from(&self.poll)
    }
}
