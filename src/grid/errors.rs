//! Grid-specific error types

use thiserror::Error;

use super::types::{OrderId, OrderSide};

/// Errors that can occur in grid trading operations
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("Invalid trader configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Order rejected by exchange (code {code}): {msg}")]
    Rejected { code: i64, msg: String },

    #[error("Market data unavailable: {0}")]
    MissingMarketData(String),

    #[error("Order not found: id {0}")]
    OrderNotFound(OrderId),

    #[error("No order with client id {0}")]
    UnknownClientOrder(String),

    #[error("Order already tracked: id {0}")]
    DuplicateOrder(OrderId),

    #[error("Order {id} cannot be tracked on the {expected} side")]
    SideMismatch { id: OrderId, expected: OrderSide },

    #[error("Order placement failed after {attempts} attempts: {reason}")]
    OrderPlacementFailed { attempts: u32, reason: String },

    #[error("Settings error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),
}

impl GridError {
    /// Stable cause tag for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            GridError::InvalidConfig(_) => "invalid_config",
            GridError::Transport(_) => "transport",
            GridError::Rejected { .. } => "rejected",
            GridError::MissingMarketData(_) => "missing_market_data",
            GridError::OrderNotFound(_) => "order_not_found",
            GridError::UnknownClientOrder(_) => "unknown_client_order",
            GridError::DuplicateOrder(_) => "duplicate_order",
            GridError::SideMismatch { .. } => "side_mismatch",
            GridError::OrderPlacementFailed { .. } => "placement_exhausted",
            GridError::Config(_) => "settings",
            GridError::JsonParse(_) => "json_parse",
        }
    }

    /// Rejections caused by stale tick size or precision metadata
    pub fn is_precision_rejection(&self) -> bool {
        // -1111: precision over maximum, -4014: price not a multiple of tick size
        matches!(self, GridError::Rejected { code, .. } if *code == -1111 || *code == -4014)
    }

    /// The client order id was already accepted, e.g. after a lost acknowledgement
    pub fn is_duplicate_client_order(&self) -> bool {
        matches!(self, GridError::Rejected { code: -4116, .. })
    }
}

impl From<reqwest::Error> for GridError {
    fn from(err: reqwest::Error) -> Self {
        GridError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::JsonParse(err.to_string())
    }
}

impl From<config::ConfigError> for GridError {
    fn from(err: config::ConfigError) -> Self {
        GridError::Config(err.to_string())
    }
}

/// Result type for grid operations
pub type GridResult<T> = std::result::Result<T, GridError>;
