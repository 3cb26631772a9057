//! Exchange abstraction for grid trading - enables mocking for tests

use async_trait::async_trait;

use super::config::SymbolPrecision;
use super::errors::GridResult;
use super::types::{Order, OrderId, OrderQuery, OrderRequest};

/// Exchange operations for a single trading pair - can be mocked for testing
///
/// Implementations normalise price to the symbol's tick size and quantity to
/// its precision before submission. Every failure comes back as an `Err`
/// value; callers decide whether to retry.
#[async_trait]
pub trait GridExchange: Send + Sync {
    /// Place a GTC limit order
    async fn place_order(&self, request: &OrderRequest) -> GridResult<Order>;

    /// Look up an order by the client id it was submitted with
    async fn order_by_client_id(&self, client_order_id: &str) -> GridResult<Order>;

    /// Query the latest status of an order
    async fn query_order(&self, id: OrderId) -> GridResult<OrderQuery>;

    /// Cancel an open order
    async fn cancel_order(&self, id: OrderId) -> GridResult<()>;

    /// Last traded price of the pair
    async fn last_price(&self) -> GridResult<f64>;

    /// Price and quantity precision of the pair
    async fn symbol_precision(&self) -> GridResult<SymbolPrecision>;

    /// Set the leverage used for new positions on the pair
    async fn update_leverage(&self, leverage: u32) -> GridResult<()>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock exchange for testing the cycle controller without a real connection.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use crate::grid::errors::GridError;
    use crate::grid::types::{OrderSide, OrderStatus};

    #[derive(Debug, Clone)]
    struct MockOrder {
        order: Order,
        avg_price: Option<f64>,
    }

    /// Mock exchange for testing
    pub struct MockExchange {
        /// Every submission attempt, successful or not
        pub attempts: Arc<Mutex<Vec<OrderRequest>>>,
        /// Submissions the mock accepted, including those whose ack was lost
        pub placed: Arc<Mutex<Vec<OrderRequest>>>,
        pub cancelled_ids: Arc<Mutex<Vec<OrderId>>>,
        pub leverage: Arc<Mutex<Option<u32>>>,
        orders: Arc<Mutex<HashMap<OrderId, MockOrder>>>,
        client_ids: Arc<Mutex<HashMap<String, OrderId>>>,
        last_price: Arc<Mutex<Option<f64>>>,
        precision: Arc<Mutex<Option<SymbolPrecision>>>,
        /// Scripted placement outcomes, `true` = fail; empty = succeed
        placement_script: Arc<Mutex<VecDeque<bool>>>,
        /// Scripted acknowledgements for accepted orders, `true` = lost
        ack_script: Arc<Mutex<VecDeque<bool>>>,
        fail_placements: Arc<Mutex<bool>>,
        fail_queries: Arc<Mutex<bool>>,
        failing_queries: Arc<Mutex<HashSet<OrderId>>>,
        fail_cancels: Arc<Mutex<bool>>,
        next_id: AtomicU64,
    }

    impl MockExchange {
        pub fn new(last_price: f64) -> Self {
            Self {
                attempts: Arc::new(Mutex::new(Vec::new())),
                placed: Arc::new(Mutex::new(Vec::new())),
                cancelled_ids: Arc::new(Mutex::new(Vec::new())),
                leverage: Arc::new(Mutex::new(None)),
                orders: Arc::new(Mutex::new(HashMap::new())),
                client_ids: Arc::new(Mutex::new(HashMap::new())),
                last_price: Arc::new(Mutex::new(Some(last_price))),
                precision: Arc::new(Mutex::new(None)),
                placement_script: Arc::new(Mutex::new(VecDeque::new())),
                ack_script: Arc::new(Mutex::new(VecDeque::new())),
                fail_placements: Arc::new(Mutex::new(false)),
                fail_queries: Arc::new(Mutex::new(false)),
                failing_queries: Arc::new(Mutex::new(HashSet::new())),
                fail_cancels: Arc::new(Mutex::new(false)),
                next_id: AtomicU64::new(1),
            }
        }

        /// `None` makes `last_price` report missing market data
        pub async fn set_last_price(&self, price: Option<f64>) {
            *self.last_price.lock().await = price;
        }

        /// Normalise submissions like a real venue would
        pub async fn set_precision(&self, precision: SymbolPrecision) {
            *self.precision.lock().await = Some(precision);
        }

        /// Queue outcomes for the next placements (`true` = fail)
        pub async fn script_placements(&self, outcomes: impl IntoIterator<Item = bool>) {
            self.placement_script.lock().await.extend(outcomes);
        }

        /// Queue acknowledgement outcomes for the next accepted orders
        /// (`true` = the order rests on the exchange but the caller sees a timeout)
        pub async fn script_lost_acks(&self, outcomes: impl IntoIterator<Item = bool>) {
            self.ack_script.lock().await.extend(outcomes);
        }

        pub async fn set_fail_placements(&self, fail: bool) {
            *self.fail_placements.lock().await = fail;
        }

        pub async fn set_fail_queries(&self, fail: bool) {
            *self.fail_queries.lock().await = fail;
        }

        /// Fail queries for one order only
        pub async fn set_fail_query_for(&self, id: OrderId, fail: bool) {
            let mut failing = self.failing_queries.lock().await;
            if fail {
                failing.insert(id);
            } else {
                failing.remove(&id);
            }
        }

        pub async fn set_fail_cancels(&self, fail: bool) {
            *self.fail_cancels.lock().await = fail;
        }

        /// Overwrite the exchange-side state of an order
        pub async fn set_order_state(
            &self,
            id: OrderId,
            status: OrderStatus,
            filled_quantity: f64,
            avg_price: Option<f64>,
        ) {
            if let Some(entry) = self.orders.lock().await.get_mut(&id) {
                entry.order.status = status;
                entry.order.filled_quantity = filled_quantity;
                entry.avg_price = avg_price;
            }
        }

        /// Fill an order completely at its limit price
        pub async fn fill(&self, id: OrderId) {
            let order = self.order(id).await;
            if let Some(order) = order {
                self.set_order_state(id, OrderStatus::Filled, order.quantity, Some(order.price))
                    .await;
            }
        }

        /// Fill an order completely at a given average price
        pub async fn fill_at(&self, id: OrderId, avg_price: f64) {
            let order = self.order(id).await;
            if let Some(order) = order {
                self.set_order_state(id, OrderStatus::Filled, order.quantity, Some(avg_price))
                    .await;
            }
        }

        /// Exchange-side view of an order
        pub async fn order(&self, id: OrderId) -> Option<Order> {
            self.orders.lock().await.get(&id).map(|e| e.order.clone())
        }

        /// Orders resting on the exchange for one side, by id
        pub async fn live_orders(&self, side: OrderSide) -> Vec<Order> {
            let mut live: Vec<Order> = self
                .orders
                .lock()
                .await
                .values()
                .map(|e| e.order.clone())
                .filter(|o| o.side == side && o.status != OrderStatus::Filled && !o.status.is_dead())
                .collect();
            live.sort_by_key(|o| o.id);
            live
        }

        async fn next_placement_fails(&self) -> bool {
            if *self.fail_placements.lock().await {
                return true;
            }
            self.placement_script.lock().await.pop_front().unwrap_or(false)
        }
    }

    #[async_trait]
    impl GridExchange for MockExchange {
        async fn place_order(&self, request: &OrderRequest) -> GridResult<Order> {
            self.attempts.lock().await.push(request.clone());

            if self.next_placement_fails().await {
                return Err(GridError::Transport("Mock failure".into()));
            }

            if self.client_ids.lock().await.contains_key(&request.client_order_id) {
                return Err(GridError::Rejected {
                    code: -4116,
                    msg: "ClientOrderId is duplicated.".into(),
                });
            }

            let (price, quantity) = match *self.precision.lock().await {
                Some(p) => (p.normalize_price(request.price), p.normalize_quantity(request.quantity)),
                None => (request.price, request.quantity),
            };

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let order = Order::new(id, request.side, price, quantity);

            self.orders.lock().await.insert(
                id,
                MockOrder {
                    order: order.clone(),
                    avg_price: None,
                },
            );
            self.client_ids
                .lock()
                .await
                .insert(request.client_order_id.clone(), id);
            self.placed.lock().await.push(request.clone());

            if self.ack_script.lock().await.pop_front().unwrap_or(false) {
                return Err(GridError::Transport("Mock acknowledgement lost".into()));
            }

            Ok(order)
        }

        async fn order_by_client_id(&self, client_order_id: &str) -> GridResult<Order> {
            let id = self
                .client_ids
                .lock()
                .await
                .get(client_order_id)
                .copied()
                .ok_or_else(|| GridError::UnknownClientOrder(client_order_id.to_string()))?;
            self.order(id).await.ok_or(GridError::OrderNotFound(id))
        }

        async fn query_order(&self, id: OrderId) -> GridResult<OrderQuery> {
            if *self.fail_queries.lock().await || self.failing_queries.lock().await.contains(&id) {
                return Err(GridError::Transport("Mock query failure".into()));
            }

            let orders = self.orders.lock().await;
            let entry = orders.get(&id).ok_or(GridError::OrderNotFound(id))?;

            Ok(OrderQuery {
                status: entry.order.status,
                filled_quantity: entry.order.filled_quantity,
                remaining_quantity: entry.order.quantity - entry.order.filled_quantity,
                avg_price: entry.avg_price,
            })
        }

        async fn cancel_order(&self, id: OrderId) -> GridResult<()> {
            if *self.fail_cancels.lock().await {
                return Err(GridError::Transport("Mock cancel failure".into()));
            }

            let mut orders = self.orders.lock().await;
            let entry = orders.get_mut(&id).ok_or(GridError::OrderNotFound(id))?;

            if entry.order.status == OrderStatus::Filled || entry.order.status.is_dead() {
                return Err(GridError::Rejected {
                    code: -2011,
                    msg: "Unknown order sent.".into(),
                });
            }

            entry.order.status = OrderStatus::Canceled;
            drop(orders);
            self.cancelled_ids.lock().await.push(id);
            Ok(())
        }

        async fn last_price(&self) -> GridResult<f64> {
            self.last_price
                .lock()
                .await
                .ok_or_else(|| GridError::MissingMarketData("Mock price unavailable".into()))
        }

        async fn symbol_precision(&self) -> GridResult<SymbolPrecision> {
            self.precision
                .lock()
                .await
                .ok_or_else(|| GridError::MissingMarketData("Mock precision unset".into()))
        }

        async fn update_leverage(&self, leverage: u32) -> GridResult<()> {
            *self.leverage.lock().await = Some(leverage);
            Ok(())
        }
    }

}
