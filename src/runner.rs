use std::path::Path;

use log::info;

use crate::config::Settings;
use crate::grid::{BinanceFuturesExchange, GridError, PollLoop};

/// Process bootstrap: settings -> logging -> gateway -> poll loop
pub struct TraderRunner {
    config: Settings,
}

impl TraderRunner {
    /// Create a new runner from a configuration file
    pub fn new(config_path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let path = config_path.as_ref().to_str().ok_or_else(|| {
            config::ConfigError::Message(format!(
                "config path {} is not valid UTF-8",
                config_path.as_ref().display()
            ))
        })?;
        let config = Settings::new(path)?;
        Ok(Self { config })
    }

    pub fn settings(&self) -> &Settings {
        &self.config
    }

    /// Run until Ctrl-C
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        // RUST_LOG wins over the configured level
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.config.log.level.as_str()),
        )
        .try_init()
        .ok();

        let trader = self.config.trader_config()?;
        let network = &self.config.network;
        if network.api_key.is_empty() || network.api_secret.is_empty() {
            return Err(GridError::InvalidConfig("api_key and api_secret are required".into()).into());
        }

        info!(
            "Connecting to {} ({})",
            network.base_url(),
            if network.testnet { "testnet" } else { "live" }
        );

        let exchange = BinanceFuturesExchange::new(
            network.base_url(),
            trader.exchange_symbol(),
            network.api_key.as_str(),
            network.api_secret.as_str(),
        )?
        .with_recv_window(network.recv_window_ms);

        let mut poll_loop = PollLoop::new(trader, exchange, self.config.runner_config())?;
        poll_loop.run().await?;
        Ok(())
    }
}
