//! Trader configuration and symbol precision

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::helpers::{floor_to_tick, format_decimals, round_to_decimals};

use super::errors::{GridError, GridResult};

/// Binance caps futures leverage at 125x
const MAX_LEVERAGE: u32 = 125;

/// Upper bound on a single in-tick retry delay
const MAX_RETRY_DELAY_MS: u64 = 10_000;

/// Symbol precision fetched from exchange metadata
///
/// Binance futures publish three values per symbol:
/// - `pricePrecision`: decimals accepted on the price field
/// - `quantityPrecision`: decimals accepted on the quantity field
/// - `PRICE_FILTER.tickSize`: minimum price increment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolPrecision {
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub tick_size: f64,
}

impl SymbolPrecision {
    pub fn new(price_precision: u32, quantity_precision: u32, tick_size: f64) -> Self {
        Self {
            price_precision,
            quantity_precision,
            tick_size,
        }
    }

    /// Floor to the tick size, then round to the price precision
    pub fn normalize_price(&self, price: f64) -> f64 {
        round_to_decimals(floor_to_tick(price, self.tick_size), self.price_precision)
    }

    /// Round to the quantity precision
    pub fn normalize_quantity(&self, quantity: f64) -> f64 {
        round_to_decimals(quantity, self.quantity_precision)
    }

    /// Wire representation of a normalised price
    pub fn format_price(&self, price: f64) -> String {
        format_decimals(self.normalize_price(price), self.price_precision)
    }

    /// Wire representation of a normalised quantity
    pub fn format_quantity(&self, quantity: f64) -> String {
        format_decimals(self.normalize_quantity(quantity), self.quantity_precision)
    }
}

/// Immutable trading parameters for one grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderConfig {
    /// Trading pair, with or without a slash (e.g. "BNB/USDT", "BNBUSDT")
    pub symbol: String,

    /// Leverage multiplier applied to the margin budget
    pub leverage: u32,

    /// Total margin budget spread evenly over the ladder rungs
    pub total_margin: f64,

    /// Per-rung drop fraction below the base price
    pub drop_to_buy: f64,

    /// Markup fraction for the sell placed over a filled buy
    pub rise_to_sell: f64,

    /// Number of rungs in the buy ladder
    pub max_buy_times: u32,

    /// Attempts for a buy-to-sell conversion within one tick
    #[serde(default = "default_sell_attempts")]
    pub sell_placement_attempts: u32,

    /// Base delay between in-tick placement attempts (milliseconds)
    #[serde(default)]
    pub retry_base_delay_ms: u64,

    /// Push the leverage setting to the exchange on startup
    #[serde(default = "default_apply_leverage")]
    pub apply_leverage: bool,
}

fn default_sell_attempts() -> u32 {
    3
}

fn default_apply_leverage() -> bool {
    true
}

impl TraderConfig {
    /// Create a new trader configuration with required parameters
    pub fn new(
        symbol: impl Into<String>,
        leverage: u32,
        total_margin: f64,
        drop_to_buy: f64,
        rise_to_sell: f64,
        max_buy_times: u32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            leverage,
            total_margin,
            drop_to_buy,
            rise_to_sell,
            max_buy_times,
            sell_placement_attempts: default_sell_attempts(),
            retry_base_delay_ms: 0,
            apply_leverage: default_apply_leverage(),
        }
    }

    /// Builder: set in-tick retry parameters for sell conversion
    pub fn with_retry_config(mut self, attempts: u32, base_delay_ms: u64) -> Self {
        self.sell_placement_attempts = attempts;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Builder: toggle leverage application on startup
    pub fn with_apply_leverage(mut self, apply: bool) -> Self {
        self.apply_leverage = apply;
        self
    }

    /// Delay after failed attempt `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let delay_ms = self.retry_base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(MAX_RETRY_DELAY_MS))
    }

    /// Validate the configuration
    pub fn validate(&self) -> GridResult<()> {
        if self.exchange_symbol().is_empty() {
            return Err(GridError::InvalidConfig("symbol cannot be empty".into()));
        }

        if self.max_buy_times == 0 {
            return Err(GridError::InvalidConfig(
                "max_buy_times must be greater than 0".into(),
            ));
        }

        if !(self.drop_to_buy > 0.0 && self.drop_to_buy < 1.0) {
            return Err(GridError::InvalidConfig(
                "drop_to_buy must be within (0, 1)".into(),
            ));
        }

        if !(self.rise_to_sell > 0.0 && self.rise_to_sell < 1.0) {
            return Err(GridError::InvalidConfig(
                "rise_to_sell must be within (0, 1)".into(),
            ));
        }

        if self.drop_to_buy * self.max_buy_times as f64 >= 1.0 {
            return Err(GridError::InvalidConfig(
                "drop_to_buy * max_buy_times must stay below 1 so every rung price is positive"
                    .into(),
            ));
        }

        if self.leverage == 0 || self.leverage > MAX_LEVERAGE {
            return Err(GridError::InvalidConfig(format!(
                "leverage must be between 1 and {}",
                MAX_LEVERAGE
            )));
        }

        if self.total_margin <= 0.0 || !self.total_margin.is_finite() {
            return Err(GridError::InvalidConfig(
                "total_margin must be positive".into(),
            ));
        }

        if self.sell_placement_attempts == 0 {
            return Err(GridError::InvalidConfig(
                "sell_placement_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Symbol as the exchange expects it ("BNB/USDT" -> "BNBUSDT")
    pub fn exchange_symbol(&self) -> String {
        self.symbol.replace('/', "").trim().to_uppercase()
    }

    /// Margin allotted to each rung
    pub fn margin_per_rung(&self) -> f64 {
        self.total_margin / self.max_buy_times as f64
    }

    /// Quantity for each rung: (total_margin / N) * leverage / base_price
    pub fn rung_quantity(&self, base_price: f64) -> f64 {
        self.margin_per_rung() * self.leverage as f64 / base_price
    }

    /// Buy price of rung `i` (1-based): base * (1 - drop * i)
    pub fn rung_price(&self, base_price: f64, rung: u32) -> f64 {
        base_price * (1.0 - self.drop_to_buy * rung as f64)
    }

    /// Sell price over a filled buy
    pub fn sell_price(&self, buy_fill_price: f64) -> f64 {
        buy_fill_price * (1.0 + self.rise_to_sell)
    }

    /// Replacement buy price under a filled sell
    pub fn replenish_price(&self, sell_fill_price: f64) -> f64 {
        sell_fill_price * (1.0 - self.drop_to_buy)
    }

    /// Price above which an untouched ladder is considered stale
    pub fn restart_threshold(&self, base_price: f64) -> f64 {
        base_price * (1.0 + self.rise_to_sell)
    }
}
