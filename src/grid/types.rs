//! Core data types for grid trading

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exchange-assigned order identifier
pub type OrderId = u64;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Convert to exchange side string
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Resting on the book, nothing executed
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    /// Anything the exchange reports that we do not model
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Some quantity has executed
    pub fn has_fill(&self) -> bool {
        matches!(self, OrderStatus::PartiallyFilled | OrderStatus::Filled)
    }

    /// The order can never fill any further and was not completed
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected
        )
    }
}

/// Request to place a limit order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: OrderSide,
    /// Limit price before tick-size normalisation
    pub price: f64,
    /// Quantity before precision normalisation
    pub quantity: f64,
    /// Client order id, reused by every resubmission of this request
    pub client_order_id: String,
}

impl OrderRequest {
    /// Create a new order request with a fresh client order id
    pub fn new(side: OrderSide, price: f64, quantity: f64) -> Self {
        Self {
            side,
            price,
            quantity,
            client_order_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn buy(price: f64, quantity: f64) -> Self {
        Self::new(OrderSide::Buy, price, quantity)
    }

    pub fn sell(price: f64, quantity: f64) -> Self {
        Self::new(OrderSide::Sell, price, quantity)
    }
}

/// A tracked order as acknowledged by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: OrderSide,
    /// Price echoed by the exchange (normalised)
    pub price: f64,
    /// Quantity echoed by the exchange (normalised)
    pub quantity: f64,
    /// Latest status reported by the exchange
    pub status: OrderStatus,
    /// Latest executed quantity reported by the exchange
    pub filled_quantity: f64,
}

impl Order {
    /// Create a freshly acknowledged order
    pub fn new(id: OrderId, side: OrderSide, price: f64, quantity: f64) -> Self {
        Self {
            id,
            side,
            price,
            quantity,
            status: OrderStatus::New,
            filled_quantity: 0.0,
        }
    }

    /// Reported executed quantity equals the full requested quantity
    pub fn is_fully_filled(&self) -> bool {
        self.quantity > 0.0 && (self.filled_quantity - self.quantity).abs() <= self.quantity * 1e-9
    }

    /// Record the latest exchange report
    pub fn apply_query(&mut self, query: &OrderQuery) {
        self.status = query.status;
        self.filled_quantity = query.filled_quantity;
    }
}

/// Result of an order status query
#[derive(Debug, Clone, PartialEq)]
pub struct OrderQuery {
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub remaining_quantity: f64,
    /// Average execution price, when the exchange reports one
    pub avg_price: Option<f64>,
}

impl OrderQuery {
    /// Execution price, falling back to the order's limit price
    pub fn fill_price(&self, limit_price: f64) -> f64 {
        self.avg_price.filter(|p| *p > 0.0).unwrap_or(limit_price)
    }
}
