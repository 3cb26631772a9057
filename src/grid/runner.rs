//! Poll loop - fixed-cadence driver for the cycle controller

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::time::{interval, sleep, MissedTickBehavior};

use super::backoff::Backoff;
use super::config::TraderConfig;
use super::controller::CycleController;
use super::errors::GridResult;
use super::executor::GridExchange;

/// Poll loop configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub poll_interval_ms: u64,
    /// Consecutive failed ticks before the cadence is stretched
    pub failure_threshold: u32,
    pub max_backoff_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            failure_threshold: 5,
            max_backoff_secs: 60,
        }
    }
}

impl RunnerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

/// Drives [`CycleController::tick`] until shutdown
pub struct PollLoop<E: GridExchange> {
    controller: CycleController,
    exchange: Arc<E>,
    runner_config: RunnerConfig,
}

impl<E: GridExchange + 'static> PollLoop<E> {
    pub fn new(config: TraderConfig, exchange: E, runner_config: RunnerConfig) -> GridResult<Self> {
        let controller = CycleController::new(config)?;
        Ok(Self {
            controller,
            exchange: Arc::new(exchange),
            runner_config,
        })
    }

    pub fn controller(&self) -> &CycleController {
        &self.controller
    }

    pub fn exchange(&self) -> &Arc<E> {
        &self.exchange
    }

    /// Push the configured leverage to the exchange; failure is logged only
    pub async fn apply_leverage(&self) {
        let config = self.controller.config();
        if !config.apply_leverage {
            return;
        }

        if let Err(e) = self.exchange.update_leverage(config.leverage).await {
            warn!(
                "step=startup order=- cause={} detail=could not set leverage {}x: {}",
                e.kind(),
                config.leverage,
                e
            );
        }
    }

    /// Run until Ctrl-C
    pub async fn run(&mut self) -> GridResult<()> {
        info!(
            "Starting grid trader for {} (poll every {}ms)",
            self.controller.config().exchange_symbol(),
            self.runner_config.poll_interval_ms
        );
        self.apply_leverage().await;

        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves. Open orders are left on the exchange.
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) -> GridResult<()> {
        let mut ticker = interval(self.runner_config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut backoff = Backoff::new(
            self.runner_config.poll_interval(),
            self.runner_config.failure_threshold,
            self.runner_config.max_backoff(),
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let report = self.controller.tick(self.exchange.as_ref()).await;
            if let Some(delay) = backoff.record(report.is_clean()) {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = sleep(delay) => {}
                }
            }
        }

        let book = self.controller.book();
        info!(
            "Grid trader stopped in phase {}: leaving {} buys and {} sells open",
            self.controller.phase().name(),
            book.buy_count(),
            book.sell_count()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::executor::mock::MockExchange;

    fn runner_config() -> RunnerConfig {
        RunnerConfig {
            poll_interval_ms: 10,
            failure_threshold: 2,
            max_backoff_secs: 1,
        }
    }

    fn trader_config() -> TraderConfig {
        TraderConfig::new("BNB/USDT", 10, 180.0, 0.001, 0.001, 2)
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let mut poll_loop =
            PollLoop::new(trader_config(), MockExchange::new(600.0), runner_config()).unwrap();

        poll_loop
            .run_until(sleep(Duration::from_millis(80)))
            .await
            .unwrap();

        // Ladder placed once, never duplicated across ticks
        assert_eq!(poll_loop.exchange().placed.lock().await.len(), 2);
        assert_eq!(poll_loop.controller().book().buy_count(), 2);
        assert!(poll_loop.exchange().cancelled_ids.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failures_never_stop_the_loop() {
        let exchange = MockExchange::new(600.0);
        exchange.set_last_price(None).await;
        let mut poll_loop = PollLoop::new(trader_config(), exchange, runner_config()).unwrap();

        poll_loop
            .run_until(sleep(Duration::from_millis(60)))
            .await
            .unwrap();
        assert_eq!(poll_loop.controller().phase().name(), "cold_start");
        assert!(poll_loop.exchange().attempts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_leverage() {
        let poll_loop =
            PollLoop::new(trader_config(), MockExchange::new(600.0), runner_config()).unwrap();
        poll_loop.apply_leverage().await;
        assert_eq!(*poll_loop.exchange().leverage.lock().await, Some(10));

        let config = trader_config().with_apply_leverage(false);
        let poll_loop = PollLoop::new(config, MockExchange::new(600.0), runner_config()).unwrap();
        poll_loop.apply_leverage().await;
        assert_eq!(*poll_loop.exchange().leverage.lock().await, None);
    }

    #[test]
    fn test_invalid_trader_config() {
        let config = TraderConfig::new("BNBUSDT", 0, 180.0, 0.001, 0.001, 2);
        assert!(PollLoop::new(config, MockExchange::new(600.0), runner_config()).is_err());
    }
}
