//! Grid Trading Module for Binance USDⓈ-M futures
//!
//! A single-pair grid: a ladder of limit buys below a base price, a sell
//! above every filled buy, and a replacement buy below every filled sell.
//! The cycle restarts once every sell has filled or the untouched ladder
//! has gone stale.
//!
//! # Architecture
//!
//! - [`config`] - Trader configuration and symbol precision
//! - [`types`] - Core data types (Order, OrderSide, OrderStatus, ...)
//! - [`errors`] - Grid-specific error types
//! - [`book`] - In-memory tracking of open buys and sells
//! - [`cycle`] - Cycle phases and the buy ladder plan
//! - [`controller`] - The per-tick order-lifecycle state machine
//! - [`executor`] - Exchange abstraction (mockable for testing)
//! - [`binance`] - Binance futures REST gateway
//! - [`backoff`] - Bounded backoff over failed ticks
//! - [`runner`] - Poll loop
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use binance_grid_trader::grid::{
//!     BinanceFuturesExchange, PollLoop, RunnerConfig, TraderConfig, TESTNET_API_URL,
//! };
//!
//! // $1000 margin at 10x, 4 rungs spaced 0.11% apart, sells 0.1% above fills
//! let config = TraderConfig::new("BNB/USDT", 10, 1000.0, 0.0011, 0.001, 4);
//!
//! let exchange = BinanceFuturesExchange::new(
//!     TESTNET_API_URL,
//!     config.exchange_symbol(),
//!     api_key,
//!     api_secret,
//! )?;
//!
//! let mut poll_loop = PollLoop::new(config, exchange, RunnerConfig::default())?;
//! poll_loop.run().await?;
//! ```
//!
//! # Testing
//!
//! ```rust,ignore
//! use binance_grid_trader::grid::executor::mock::MockExchange;
//!
//! let exchange = MockExchange::new(600.0);
//! let report = controller.tick(&exchange).await;
//! ```

pub mod backoff;
pub mod binance;
pub mod book;
pub mod config;
pub mod controller;
pub mod cycle;
pub mod errors;
pub mod executor;
pub mod runner;
pub mod types;

// Re-export commonly used types
pub use backoff::Backoff;
pub use binance::{BinanceFuturesExchange, MAINNET_API_URL, TESTNET_API_URL};
pub use book::OrderBook;
pub use config::{SymbolPrecision, TraderConfig};
pub use controller::{CycleController, StepFailure, TickReport, TickStep};
pub use cycle::{CyclePhase, Ladder};
pub use errors::{GridError, GridResult};
pub use executor::GridExchange;
pub use runner::{PollLoop, RunnerConfig};
pub use types::{Order, OrderId, OrderQuery, OrderRequest, OrderSide, OrderStatus};
