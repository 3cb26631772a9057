//! Binance USDⓈ-M futures REST gateway

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::config::SymbolPrecision;
use super::errors::{GridError, GridResult};
use super::executor::GridExchange;
use super::types::{Order, OrderId, OrderQuery, OrderRequest, OrderSide, OrderStatus};

pub const MAINNET_API_URL: &str = "https://fapi.binance.com";
pub const TESTNET_API_URL: &str = "https://testnet.binancefuture.com";

const DEFAULT_RECV_WINDOW_MS: u64 = 10_000;
const HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    price_precision: u32,
    quantity_precision: u32,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER")]
    Price {
        #[serde(rename = "tickSize")]
        tick_size: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: OrderId,
    side: OrderSide,
    status: OrderStatus,
    price: String,
    orig_qty: String,
    executed_qty: String,
    #[serde(default)]
    avg_price: Option<String>,
}

impl OrderResponse {
    fn into_order(self) -> GridResult<Order> {
        let mut order = Order::new(
            self.order_id,
            self.side,
            parse_decimal(&self.price, "price")?,
            parse_decimal(&self.orig_qty, "origQty")?,
        );
        order.status = self.status;
        order.filled_quantity = parse_decimal(&self.executed_qty, "executedQty")?;
        Ok(order)
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

fn parse_decimal(value: &str, field: &str) -> GridResult<f64> {
    value
        .parse::<f64>()
        .map_err(|e| GridError::JsonParse(format!("{} '{}': {}", field, value, e)))
}

/// Binance futures gateway bound to one symbol
pub struct BinanceFuturesExchange {
    client: Client,
    base_url: String,
    symbol: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    /// Cached until the exchange rejects an order on precision grounds
    precision_cache: Arc<Mutex<Option<SymbolPrecision>>>,
}

impl BinanceFuturesExchange {
    pub fn new(
        base_url: impl Into<String>,
        symbol: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> GridResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            symbol: symbol.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
            precision_cache: Arc::new(Mutex::new(None)),
        })
    }

    /// Builder: set the signed-request receive window
    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Hex-encoded HMAC-SHA256 of a query string
    pub fn sign(&self, payload: &str) -> String {
        hex::encode(hmac_sha256::HMAC::mac(
            payload.as_bytes(),
            self.api_secret.as_bytes(),
        ))
    }

    fn url(&self, path: &str) -> GridResult<Url> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| GridError::InvalidConfig(format!("bad base url {}: {}", self.base_url, e)))
    }

    /// Append timestamp and recvWindow, then sign the full query string
    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> GridResult<Url> {
        let mut url = self.url(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("timestamp", &Utc::now().timestamp_millis().to_string());
            pairs.append_pair("recvWindow", &self.recv_window_ms.to_string());
        }

        let signature = self.sign(url.query().unwrap_or_default());
        url.query_pairs_mut().append_pair("signature", &signature);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> GridResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| GridError::Transport(format!("undecodable response: {}", e)));
        }

        if status.is_client_error() {
            if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
                return Err(GridError::Rejected {
                    code: err.code,
                    msg: err.msg,
                });
            }
        }

        Err(GridError::Transport(format!("HTTP {}: {}", status, body)))
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> GridResult<T> {
        let url = self.signed_url(path, params)?;
        let request = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key);
        self.send(request).await
    }

    async fn fetch_precision(&self) -> GridResult<SymbolPrecision> {
        let url = self.url("/fapi/v1/exchangeInfo")?;
        let info: ExchangeInfo = self.send(self.client.get(url)).await?;

        let symbol = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == self.symbol)
            .ok_or_else(|| {
                GridError::MissingMarketData(format!("symbol {} not listed", self.symbol))
            })?;

        let tick_size = symbol
            .filters
            .iter()
            .find_map(|f| match f {
                SymbolFilter::Price { tick_size } => Some(tick_size.as_str()),
                SymbolFilter::Other => None,
            })
            .ok_or_else(|| {
                GridError::MissingMarketData(format!("no PRICE_FILTER for {}", self.symbol))
            })?;

        Ok(SymbolPrecision::new(
            symbol.price_precision,
            symbol.quantity_precision,
            parse_decimal(tick_size, "tickSize")?,
        ))
    }

    async fn invalidate_precision(&self) {
        *self.precision_cache.lock().await = None;
    }
}

#[async_trait]
impl GridExchange for BinanceFuturesExchange {
    async fn place_order(&self, request: &OrderRequest) -> GridResult<Order> {
        let precision = self.symbol_precision().await?;
        let quantity = precision.format_quantity(request.quantity);
        let price = precision.format_price(request.price);

        debug!(
            "Submitting {} {} @ {} (client id {})",
            request.side, quantity, price, request.client_order_id
        );

        let params = [
            ("symbol", self.symbol.clone()),
            ("side", request.side.as_str().to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", quantity),
            ("price", price),
            ("newClientOrderId", request.client_order_id.clone()),
        ];

        let response: OrderResponse = match self.signed(Method::POST, "/fapi/v1/order", &params).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_precision_rejection() {
                    warn!("Precision rejected for {}, refreshing symbol metadata", self.symbol);
                    self.invalidate_precision().await;
                }
                return Err(e);
            }
        };

        response.into_order()
    }

    async fn order_by_client_id(&self, client_order_id: &str) -> GridResult<Order> {
        let params = [
            ("symbol", self.symbol.clone()),
            ("origClientOrderId", client_order_id.to_string()),
        ];
        match self.signed::<OrderResponse>(Method::GET, "/fapi/v1/order", &params).await {
            Ok(response) => response.into_order(),
            // -2013: order does not exist
            Err(GridError::Rejected { code: -2013, .. }) => {
                Err(GridError::UnknownClientOrder(client_order_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn query_order(&self, id: OrderId) -> GridResult<OrderQuery> {
        let params = [("symbol", self.symbol.clone()), ("orderId", id.to_string())];
        let response: OrderResponse = self.signed(Method::GET, "/fapi/v1/order", &params).await?;

        let orig_qty = parse_decimal(&response.orig_qty, "origQty")?;
        let filled_quantity = parse_decimal(&response.executed_qty, "executedQty")?;
        let avg_price = match response.avg_price.as_deref() {
            Some(raw) => Some(parse_decimal(raw, "avgPrice")?),
            None => None,
        };

        Ok(OrderQuery {
            status: response.status,
            filled_quantity,
            remaining_quantity: orig_qty - filled_quantity,
            avg_price,
        })
    }

    async fn cancel_order(&self, id: OrderId) -> GridResult<()> {
        let params = [("symbol", self.symbol.clone()), ("orderId", id.to_string())];
        let _: serde_json::Value = self.signed(Method::DELETE, "/fapi/v1/order", &params).await?;
        info!("Order {} cancelled", id);
        Ok(())
    }

    async fn last_price(&self) -> GridResult<f64> {
        let mut url = self.url("/fapi/v1/ticker/price")?;
        url.query_pairs_mut().append_pair("symbol", &self.symbol);

        let ticker: TickerPrice = self.send(self.client.get(url)).await?;
        match ticker.price.parse::<f64>() {
            Ok(price) if price > 0.0 => Ok(price),
            _ => Err(GridError::MissingMarketData(format!(
                "unusable last price '{}' for {}",
                ticker.price, self.symbol
            ))),
        }
    }

    async fn symbol_precision(&self) -> GridResult<SymbolPrecision> {
        {
            let cache = self.precision_cache.lock().await;
            if let Some(precision) = *cache {
                return Ok(precision);
            }
        }

        let precision = self.fetch_precision().await?;
        info!(
            "Fetched precision for {}: price_precision={}, quantity_precision={}, tick_size={}",
            self.symbol, precision.price_precision, precision.quantity_precision, precision.tick_size
        );
        *self.precision_cache.lock().await = Some(precision);
        Ok(precision)
    }

    async fn update_leverage(&self, leverage: u32) -> GridResult<()> {
        let params = [("symbol", self.symbol.clone()), ("leverage", leverage.to_string())];
        let _: serde_json::Value = self.signed(Method::POST, "/fapi/v1/leverage", &params).await?;
        info!("Leverage for {} set to {}x", self.symbol, leverage);
        Ok(())
    }
}
