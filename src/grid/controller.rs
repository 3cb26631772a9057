//! Cycle controller - the order-lifecycle state machine
//!
//! Each tick runs four steps in a fixed order:
//!
//! 1. cycle start: cancel tracked buys and place a fresh ladder when one is
//!    due, or resume an incomplete ladder
//! 2. fill detection: poll tracked buys and convert full fills into sells
//! 3. replenishment: poll tracked sells and replace fills with lower buys,
//!    or close the cycle once every sell has filled
//! 4. rise check: restart an untouched ladder once price has run away
//!
//! No step aborts the tick. Failures are collected into a [`TickReport`]
//! and the affected order stays tracked so the next tick retries it.

use std::collections::HashMap;
use std::fmt;

use log::{debug, info, warn};

use super::book::OrderBook;
use super::config::TraderConfig;
use super::cycle::{CyclePhase, Ladder};
use super::errors::{GridError, GridResult};
use super::executor::GridExchange;
use super::types::{Order, OrderId, OrderQuery, OrderRequest, OrderStatus};

/// Step of a tick, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStep {
    CycleStart,
    FillDetection,
    Replenishment,
    RiseCheck,
}

impl fmt::Display for TickStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickStep::CycleStart => "cycle_start",
            TickStep::FillDetection => "fill_detection",
            TickStep::Replenishment => "replenishment",
            TickStep::RiseCheck => "rise_check",
        };
        f.write_str(name)
    }
}

/// A failed exchange interaction within a tick
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub step: TickStep,
    pub order_id: Option<OrderId>,
    pub error: GridError,
}

/// Outcome of one tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub failures: Vec<StepFailure>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures attributed to one step
    pub fn failures_in(&self, step: TickStep) -> impl Iterator<Item = &StepFailure> {
        self.failures.iter().filter(move |f| f.step == step)
    }

    fn record(&mut self, step: TickStep, order_id: Option<OrderId>, error: GridError) {
        let order = order_id.map_or_else(|| "-".to_string(), |id| id.to_string());
        warn!(
            "step={} order={} cause={} detail={}",
            step,
            order,
            error.kind(),
            error
        );
        self.failures.push(StepFailure {
            step,
            order_id,
            error,
        });
    }
}

/// Place an order, adopting it when an earlier submission with the same
/// client id already reached the exchange
async fn submit<E: GridExchange + ?Sized>(exchange: &E, request: &OrderRequest) -> GridResult<Order> {
    match exchange.place_order(request).await {
        Err(e) if e.is_duplicate_client_order() => {
            let order = exchange.order_by_client_id(&request.client_order_id).await?;
            info!(
                "Client id {} already accepted as order {}, tracking it",
                request.client_order_id, order.id
            );
            Ok(order)
        }
        result => result,
    }
}

/// Owns the order book and cycle phase for one trading pair
#[derive(Debug)]
pub struct CycleController {
    config: TraderConfig,
    book: OrderBook,
    phase: CyclePhase,
    /// Follow-up request per filled order, kept until acknowledged
    follow_ups: HashMap<OrderId, OrderRequest>,
}

impl CycleController {
    pub fn new(config: TraderConfig) -> GridResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            book: OrderBook::new(),
            phase: CyclePhase::default(),
            follow_ups: HashMap::new(),
        })
    }

    pub fn config(&self) -> &TraderConfig {
        &self.config
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn phase(&self) -> &CyclePhase {
        &self.phase
    }

    /// Run one polling pass
    pub async fn tick<E: GridExchange + ?Sized>(&mut self, exchange: &E) -> TickReport {
        let mut report = TickReport::default();

        self.start_cycle(exchange, &mut report).await;
        self.check_buy_fills(exchange, &mut report).await;
        self.replenish_buys(exchange, &mut report).await;
        self.check_price_rise(exchange, &mut report).await;

        if !report.is_clean() {
            debug!(
                "Tick finished in phase {} with {} failures",
                self.phase.name(),
                report.failures.len()
            );
        }
        report
    }

    /// Place a fresh ladder when due, then submit any rungs still pending
    pub async fn start_cycle<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        report: &mut TickReport,
    ) {
        if self.phase.needs_new_ladder() {
            if !self.cancel_tracked_buys(exchange, report).await {
                return;
            }

            let base_price = match exchange.last_price().await {
                Ok(price) => price,
                Err(e) => {
                    report.record(TickStep::CycleStart, None, e);
                    return;
                }
            };

            let ladder = Ladder::plan(&self.config, base_price);
            info!(
                "Starting cycle from {}: base_price={} rungs={} quantity={}",
                self.phase.name(),
                base_price,
                ladder.prices().len(),
                ladder.quantity()
            );
            self.phase.start(ladder);
        }

        self.place_pending_rungs(exchange, report).await;
    }

    /// Cancel every tracked buy; false if any is still live afterwards
    async fn cancel_tracked_buys<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        report: &mut TickReport,
    ) -> bool {
        for order in self.book.open_buys() {
            match exchange.cancel_order(order.id).await {
                Ok(()) => {
                    if order.filled_quantity > 0.0 {
                        warn!(
                            "Cancelled buy {} after a partial fill of {} at {}",
                            order.id, order.filled_quantity, order.price
                        );
                    }
                    self.book.remove_buy(order.id);
                    self.follow_ups.remove(&order.id);
                }
                Err(e) => report.record(TickStep::CycleStart, Some(order.id), e),
            }
        }

        let remaining = self.book.buy_count();
        if remaining > 0 {
            warn!(
                "Cycle start postponed: {} buys could not be cancelled",
                remaining
            );
            return false;
        }
        true
    }

    /// Submit rungs from the ladder cursor until one fails or all are placed
    async fn place_pending_rungs<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        report: &mut TickReport,
    ) {
        loop {
            let pending = self.phase.ladder_mut().and_then(|ladder| {
                let total = ladder.prices().len();
                ladder
                    .pending_request()
                    .map(|(rung, request)| (rung, total, request))
            });
            let (rung, total, request) = match pending {
                Some(pending) => pending,
                None => return,
            };

            match submit(exchange, &request).await {
                Ok(order) => {
                    info!(
                        "Placed buy rung {}/{}: id={} price={} qty={}",
                        rung, total, order.id, order.price, order.quantity
                    );
                    let id = order.id;
                    if let Err(e) = self.book.record_buy(order) {
                        report.record(TickStep::CycleStart, Some(id), e);
                    }
                    if let Some(ladder) = self.phase.ladder_mut() {
                        ladder.advance();
                    }
                }
                Err(e) => {
                    report.record(TickStep::CycleStart, None, e);
                    info!(
                        "Ladder paused at rung {}/{}, resuming next tick",
                        rung, total
                    );
                    return;
                }
            }
        }
    }

    /// Poll every tracked buy and convert full fills into sells
    pub async fn check_buy_fills<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        report: &mut TickReport,
    ) {
        for order in self.book.open_buys() {
            let query = match exchange.query_order(order.id).await {
                Ok(query) => query,
                Err(e) => {
                    report.record(TickStep::FillDetection, Some(order.id), e);
                    continue;
                }
            };

            debug!(
                "Buy {} status={:?} filled={}/{}",
                order.id, query.status, query.filled_quantity, order.quantity
            );

            if query.status.is_dead() {
                warn!("Buy {} is {:?} on the exchange, dropping it", order.id, query.status);
                self.book.remove_buy(order.id);
                self.follow_ups.remove(&order.id);
                continue;
            }

            let updated = match self.book.update_buy(order.id, &query) {
                Some(updated) => updated.clone(),
                None => continue,
            };

            if query.status.has_fill() {
                if !self.phase.buy_filled() && !self.phase.needs_new_ladder() {
                    info!("First buy fill of the cycle: id={}", order.id);
                }
                self.phase.on_buy_filled();
            }

            if updated.is_fully_filled() {
                self.convert_to_sell(exchange, &updated, &query, report).await;
            }
        }
    }

    async fn convert_to_sell<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        buy: &Order,
        query: &OrderQuery,
        report: &mut TickReport,
    ) {
        let fill_price = query.fill_price(buy.price);
        let sell_price = self.config.sell_price(fill_price);
        let request = self
            .follow_ups
            .entry(buy.id)
            .or_insert_with(|| OrderRequest::sell(sell_price, buy.filled_quantity))
            .clone();

        match self.place_with_retry(exchange, &request).await {
            Ok(sell) => {
                info!(
                    "Buy {} filled at {}: placed sell id={} price={} qty={}",
                    buy.id, fill_price, sell.id, sell.price, sell.quantity
                );
                self.book.remove_buy(buy.id);
                self.follow_ups.remove(&buy.id);
                let id = sell.id;
                if let Err(e) = self.book.record_sell(sell) {
                    report.record(TickStep::FillDetection, Some(id), e);
                }
            }
            Err(e) => report.record(TickStep::FillDetection, Some(buy.id), e),
        }
    }

    /// Submit with exponential backoff, reusing the same client order id
    async fn place_with_retry<E: GridExchange + ?Sized>(
        &self,
        exchange: &E,
        request: &OrderRequest,
    ) -> GridResult<Order> {
        let max_attempts = self.config.sell_placement_attempts;
        let mut attempts = 0;
        let mut last_error = GridError::Transport("no attempt made".into());

        while attempts < max_attempts {
            match submit(exchange, request).await {
                Ok(order) => return Ok(order),
                Err(e) => {
                    attempts += 1;
                    last_error = e;

                    if attempts < max_attempts {
                        let delay = self.config.retry_delay(attempts);
                        warn!(
                            "{} placement failed (attempt {}/{}), retrying in {:?}: {}",
                            request.side, attempts, max_attempts, delay, last_error
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(GridError::OrderPlacementFailed {
            attempts: max_attempts,
            reason: last_error.to_string(),
        })
    }

    /// Poll every tracked sell; replace fills with buys or close the cycle
    pub async fn replenish_buys<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        report: &mut TickReport,
    ) {
        let sells = self.book.open_sells();
        if sells.is_empty() {
            return;
        }

        let mut filled: Vec<(Order, OrderQuery)> = Vec::new();
        let mut all_filled = true;

        for order in sells {
            let query = match exchange.query_order(order.id).await {
                Ok(query) => query,
                Err(e) => {
                    all_filled = false;
                    report.record(TickStep::Replenishment, Some(order.id), e);
                    continue;
                }
            };

            debug!(
                "Sell {} status={:?} filled={}/{}",
                order.id, query.status, query.filled_quantity, order.quantity
            );

            if query.status.is_dead() {
                warn!("Sell {} is {:?} on the exchange, dropping it", order.id, query.status);
                self.book.remove_sell(order.id);
                self.follow_ups.remove(&order.id);
                continue;
            }

            self.book.update_sell(order.id, &query);
            if query.status == OrderStatus::Filled {
                filled.push((order, query));
            } else {
                all_filled = false;
            }
        }

        if filled.is_empty() {
            return;
        }

        if all_filled {
            for (order, _) in &filled {
                self.book.remove_sell(order.id);
                self.follow_ups.remove(&order.id);
            }
            info!("All {} sells filled, cycle complete", filled.len());
            self.phase.on_all_sells_filled();
            return;
        }

        for (sell, query) in filled {
            let fill_price = query.fill_price(sell.price);
            let buy_price = self.config.replenish_price(fill_price);
            let request = self
                .follow_ups
                .entry(sell.id)
                .or_insert_with(|| OrderRequest::buy(buy_price, sell.quantity))
                .clone();

            match submit(exchange, &request).await {
                Ok(buy) => {
                    info!(
                        "Sell {} filled at {}: placed replacement buy id={} price={} qty={}",
                        sell.id, fill_price, buy.id, buy.price, buy.quantity
                    );
                    self.book.remove_sell(sell.id);
                    self.follow_ups.remove(&sell.id);
                    let id = buy.id;
                    if let Err(e) = self.book.record_buy(buy) {
                        report.record(TickStep::Replenishment, Some(id), e);
                    }
                }
                Err(e) => report.record(TickStep::Replenishment, Some(sell.id), e),
            }
        }
    }

    /// Restart an untouched ladder once price exceeds the sell threshold
    pub async fn check_price_rise<E: GridExchange + ?Sized>(
        &mut self,
        exchange: &E,
        report: &mut TickReport,
    ) {
        let base_price = match &self.phase {
            CyclePhase::LadderPlaced { ladder } => ladder.base_price(),
            _ => return,
        };
        if self.book.has_partially_filled_buy() {
            return;
        }

        let price = match exchange.last_price().await {
            Ok(price) => price,
            Err(e) => {
                report.record(TickStep::RiseCheck, None, e);
                return;
            }
        };

        let threshold = self.config.restart_threshold(base_price);
        if price > threshold {
            info!(
                "Price {} above restart threshold {} with no fills, restarting cycle",
                price, threshold
            );
            self.phase.on_stale_ladder();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::executor::mock::MockExchange;
    use crate::grid::types::OrderSide;

    /// 2 rungs, $180 margin at 10x from 600 => 1.5 per rung
    fn config() -> TraderConfig {
        TraderConfig::new("BNBUSDT", 10, 180.0, 0.001, 0.001, 2)
    }

    fn controller(config: TraderConfig) -> CycleController {
        CycleController::new(config).unwrap()
    }

    async fn last_placed(exchange: &MockExchange) -> OrderRequest {
        exchange.placed.lock().await.last().cloned().unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.max_buy_times = 0;
        assert!(matches!(
            CycleController::new(config),
            Err(GridError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_cold_start_places_ladder() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());

        let report = controller.tick(&exchange).await;
        assert!(report.is_clean());

        let placed = exchange.placed.lock().await.clone();
        assert_eq!(placed.len(), 2);
        assert!(placed.iter().all(|r| r.side == OrderSide::Buy));
        assert!((placed[0].price - 599.4).abs() < 1e-9);
        assert!((placed[1].price - 598.8).abs() < 1e-9);
        assert!((placed[0].quantity - 1.5).abs() < 1e-9);

        assert_eq!(controller.book().buy_count(), 2);
        assert_eq!(controller.phase().name(), "ladder_placed");
        assert_eq!(controller.phase().base_price(), Some(600.0));
    }

    #[tokio::test]
    async fn test_full_fill_converts_to_sell() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;

        exchange.fill_at(2, 598.8).await;
        let report = controller.tick(&exchange).await;
        assert!(report.is_clean());

        let sell = last_placed(&exchange).await;
        assert_eq!(sell.side, OrderSide::Sell);
        assert!((sell.price - 599.3988).abs() < 1e-9);
        assert!((sell.quantity - 1.5).abs() < 1e-9);

        assert_eq!(controller.book().buy_count(), 1);
        assert_eq!(controller.book().sell_count(), 1);
        assert!(!controller.book().contains(2));
        assert_eq!(controller.phase().name(), "partially_filled");
    }

    #[tokio::test]
    async fn test_converted_buy_is_not_resubmitted() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;
        exchange.fill(1).await;
        controller.tick(&exchange).await;
        assert_eq!(exchange.placed.lock().await.len(), 3);

        controller.tick(&exchange).await;
        controller.tick(&exchange).await;
        assert_eq!(exchange.placed.lock().await.len(), 3);
        assert_eq!(controller.book().sell_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_fill_is_not_converted() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;

        exchange
            .set_order_state(1, OrderStatus::PartiallyFilled, 0.7, Some(599.4))
            .await;
        controller.tick(&exchange).await;

        assert_eq!(exchange.placed.lock().await.len(), 2);
        assert_eq!(controller.book().buy_count(), 2);
        assert_eq!(controller.book().get(1).map(|o| o.filled_quantity), Some(0.7));
        assert_eq!(controller.phase().name(), "partially_filled");
    }

    #[tokio::test]
    async fn test_sell_placement_retried_within_tick() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;

        exchange.fill(1).await;
        exchange.script_placements([true, true, false]).await;
        let report = controller.tick(&exchange).await;

        assert!(report.is_clean());
        assert_eq!(exchange.attempts.lock().await.len(), 5);
        assert_eq!(controller.book().sell_count(), 1);

        // Every attempt reused the same client order id
        let attempts = exchange.attempts.lock().await.clone();
        assert!(attempts[2..]
            .iter()
            .all(|r| r.client_order_id == attempts[2].client_order_id));
    }

    #[tokio::test]
    async fn test_exhausted_sell_retries_keep_buy_tracked() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;

        exchange.fill(1).await;
        exchange.set_fail_placements(true).await;
        let report = controller.tick(&exchange).await;

        assert_eq!(exchange.attempts.lock().await.len(), 5);
        let failure = report.failures_in(TickStep::FillDetection).next().unwrap();
        assert_eq!(failure.order_id, Some(1));
        assert_eq!(failure.error.kind(), "placement_exhausted");
        assert!(controller.book().contains(1));
        assert_eq!(controller.book().sell_count(), 0);

        exchange.set_fail_placements(false).await;
        controller.tick(&exchange).await;
        assert!(!controller.book().contains(1));
        assert_eq!(controller.book().sell_count(), 1);
    }

    #[tokio::test]
    async fn test_all_sells_filled_completes_cycle() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;
        exchange.fill(1).await;
        controller.tick(&exchange).await;

        // Sell id 3 mirrors buy 1
        exchange.fill(3).await;
        let report = controller.tick(&exchange).await;

        assert!(report.is_clean());
        assert_eq!(controller.phase(), &CyclePhase::CycleComplete);
        assert_eq!(controller.book().sell_count(), 0);
        // No replenishment buy that tick
        assert_eq!(exchange.placed.lock().await.len(), 3);

        // Next tick cancels the leftover rung and places a fresh ladder
        controller.tick(&exchange).await;
        assert_eq!(exchange.cancelled_ids.lock().await.clone(), vec![2]);
        assert_eq!(exchange.placed.lock().await.len(), 5);
        assert_eq!(controller.book().buy_count(), 2);
        assert_eq!(controller.phase().name(), "ladder_placed");
    }

    #[tokio::test]
    async fn test_filled_sell_replenished_while_others_open() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;

        exchange.fill(1).await;
        exchange.fill(2).await;
        controller.tick(&exchange).await;
        assert_eq!(controller.book().sell_count(), 2);
        assert_eq!(controller.book().buy_count(), 0);

        exchange.fill_at(3, 600.0).await;
        let report = controller.tick(&exchange).await;
        assert!(report.is_clean());

        let buy = last_placed(&exchange).await;
        assert_eq!(buy.side, OrderSide::Buy);
        assert!((buy.price - 599.4).abs() < 1e-9);
        assert!((buy.quantity - 1.5).abs() < 1e-9);

        assert!(!controller.book().contains(3));
        assert!(controller.book().contains(5));
        assert_eq!(controller.book().sell_count(), 1);
        assert_eq!(controller.book().buy_count(), 1);
        assert_eq!(controller.phase().name(), "partially_filled");
    }

    #[tokio::test]
    async fn test_failed_replenishment_keeps_sell() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;
        exchange.fill(1).await;
        exchange.fill(2).await;
        controller.tick(&exchange).await;

        exchange.fill(3).await;
        exchange.set_fail_placements(true).await;
        let report = controller.tick(&exchange).await;
        assert_eq!(report.failures_in(TickStep::Replenishment).count(), 1);
        assert!(controller.book().contains(3));

        exchange.set_fail_placements(false).await;
        controller.tick(&exchange).await;
        assert!(!controller.book().contains(3));
        assert_eq!(controller.book().buy_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_rung_resumes_without_duplicates() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(TraderConfig::new("BNBUSDT", 10, 1000.0, 0.001, 0.001, 4));

        exchange.script_placements([false, true]).await;
        let report = controller.tick(&exchange).await;

        assert_eq!(report.failures_in(TickStep::CycleStart).count(), 1);
        assert_eq!(exchange.attempts.lock().await.len(), 2);
        assert_eq!(controller.book().buy_count(), 1);
        assert_eq!(controller.phase().ladder().map(Ladder::rungs_placed), Some(1));

        let report = controller.tick(&exchange).await;
        assert!(report.is_clean());

        let placed = exchange.placed.lock().await.clone();
        assert_eq!(placed.len(), 4);
        for (i, request) in placed.iter().enumerate() {
            let expected = 600.0 * (1.0 - 0.001 * (i + 1) as f64);
            assert!((request.price - expected).abs() < 1e-9);
        }
        assert_eq!(controller.book().buy_count(), 4);
        assert_eq!(controller.phase().base_price(), Some(600.0));
    }

    #[tokio::test]
    async fn test_price_rise_restarts_untouched_ladder() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;

        // 600.5 is below the 600.6 threshold
        exchange.set_last_price(Some(600.5)).await;
        controller.tick(&exchange).await;
        assert_eq!(controller.phase().name(), "ladder_placed");

        exchange.set_last_price(Some(601.0)).await;
        controller.tick(&exchange).await;
        assert_eq!(controller.phase(), &CyclePhase::ColdStart);

        controller.tick(&exchange).await;
        assert_eq!(exchange.cancelled_ids.lock().await.clone(), vec![1, 2]);
        assert_eq!(controller.phase().base_price(), Some(601.0));
        assert_eq!(controller.book().buy_count(), 2);
        assert!(!controller.book().contains(1));
    }

    #[tokio::test]
    async fn test_no_rise_restart_with_partial_fill() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;

        exchange
            .set_order_state(1, OrderStatus::PartiallyFilled, 0.3, Some(599.4))
            .await;
        exchange.set_last_price(Some(700.0)).await;
        controller.tick(&exchange).await;
        controller.tick(&exchange).await;

        assert_eq!(controller.phase().name(), "partially_filled");
        assert!(exchange.cancelled_ids.lock().await.is_empty());
        assert_eq!(controller.phase().base_price(), Some(600.0));
    }

    #[tokio::test]
    async fn test_missing_price_keeps_cold_start() {
        let exchange = MockExchange::new(600.0);
        exchange.set_last_price(None).await;
        let mut controller = controller(config());

        let report = controller.tick(&exchange).await;
        let failure = report.failures_in(TickStep::CycleStart).next().unwrap();
        assert_eq!(failure.error.kind(), "missing_market_data");
        assert_eq!(controller.phase(), &CyclePhase::ColdStart);
        assert!(exchange.attempts.lock().await.is_empty());

        exchange.set_last_price(Some(600.0)).await;
        assert!(controller.tick(&exchange).await.is_clean());
        assert_eq!(controller.book().buy_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_cancel_postpones_cycle_start() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;
        exchange.set_last_price(Some(601.0)).await;
        controller.tick(&exchange).await;
        assert_eq!(controller.phase(), &CyclePhase::ColdStart);

        exchange.set_fail_cancels(true).await;
        let report = controller.tick(&exchange).await;
        assert_eq!(report.failures_in(TickStep::CycleStart).count(), 2);
        assert_eq!(controller.book().buy_count(), 2);
        assert_eq!(exchange.placed.lock().await.len(), 2);

        exchange.set_fail_cancels(false).await;
        controller.tick(&exchange).await;
        assert_eq!(exchange.placed.lock().await.len(), 4);
        assert_eq!(controller.phase().base_price(), Some(601.0));
    }

    #[tokio::test]
    async fn test_dead_orders_dropped() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;

        exchange.set_order_state(1, OrderStatus::Canceled, 0.0, None).await;
        controller.tick(&exchange).await;
        assert!(!controller.book().contains(1));
        assert_eq!(controller.book().buy_count(), 1);
    }

    #[tokio::test]
    async fn test_query_failure_retried_next_tick() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;
        exchange.fill(1).await;

        exchange.set_fail_queries(true).await;
        let report = controller.tick(&exchange).await;
        assert_eq!(report.failures_in(TickStep::FillDetection).count(), 2);
        assert_eq!(controller.book().sell_count(), 0);

        exchange.set_fail_queries(false).await;
        controller.tick(&exchange).await;
        assert_eq!(controller.book().sell_count(), 1);
    }

    #[tokio::test]
    async fn test_lost_sell_ack_adopted_within_tick() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;

        exchange.fill(1).await;
        exchange.script_lost_acks([true]).await;
        let report = controller.tick(&exchange).await;

        assert!(report.is_clean());
        assert_eq!(exchange.live_orders(OrderSide::Sell).await.len(), 1);
        assert_eq!(controller.book().sell_count(), 1);
        assert!(controller.book().contains(3));
        assert!(!controller.book().contains(1));
    }

    #[tokio::test]
    async fn test_lost_sell_ack_adopted_next_tick() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config().with_retry_config(1, 0));
        controller.tick(&exchange).await;

        exchange.fill(1).await;
        exchange.script_lost_acks([true]).await;
        let report = controller.tick(&exchange).await;
        assert_eq!(report.failures_in(TickStep::FillDetection).count(), 1);
        assert!(controller.book().contains(1));
        assert_eq!(controller.book().sell_count(), 0);

        controller.tick(&exchange).await;
        assert_eq!(exchange.live_orders(OrderSide::Sell).await.len(), 1);
        assert_eq!(controller.book().sell_count(), 1);
        assert!(!controller.book().contains(1));
    }

    #[tokio::test]
    async fn test_lost_rung_ack_never_duplicates_rung() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(TraderConfig::new("BNBUSDT", 10, 1000.0, 0.001, 0.001, 4));

        exchange.script_lost_acks([false, true]).await;
        let report = controller.tick(&exchange).await;
        assert_eq!(report.failures_in(TickStep::CycleStart).count(), 1);
        assert_eq!(controller.book().buy_count(), 1);

        controller.tick(&exchange).await;

        let live = exchange.live_orders(OrderSide::Buy).await;
        assert_eq!(live.len(), 4);
        for (i, order) in live.iter().enumerate() {
            let expected = 600.0 * (1.0 - 0.001 * (i + 1) as f64);
            assert!((order.price - expected).abs() < 1e-9);
        }
        assert_eq!(controller.book().buy_count(), 4);
        assert!(controller.phase().ladder().map(Ladder::is_complete).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_lost_replenishment_ack_adopted_next_tick() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;
        exchange.fill(1).await;
        exchange.fill(2).await;
        controller.tick(&exchange).await;

        exchange.fill(3).await;
        exchange.script_lost_acks([true]).await;
        let report = controller.tick(&exchange).await;
        assert_eq!(report.failures_in(TickStep::Replenishment).count(), 1);
        assert!(controller.book().contains(3));

        controller.tick(&exchange).await;
        assert_eq!(exchange.live_orders(OrderSide::Buy).await.len(), 1);
        assert!(!controller.book().contains(3));
        assert!(controller.book().contains(5));
        assert_eq!(controller.book().buy_count(), 1);
    }

    #[tokio::test]
    async fn test_many_sell_attempts_do_not_overflow() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config().with_retry_config(70, 0));
        controller.tick(&exchange).await;

        exchange.fill(1).await;
        exchange.set_fail_placements(true).await;
        let report = controller.tick(&exchange).await;

        assert_eq!(exchange.attempts.lock().await.len(), 72);
        let failure = report.failures_in(TickStep::FillDetection).next().unwrap();
        assert_eq!(failure.error.kind(), "placement_exhausted");
        assert!(controller.book().contains(1));
    }

    #[tokio::test]
    async fn test_several_sells_filled_together_complete_cycle() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;
        exchange.fill(1).await;
        exchange.fill(2).await;
        controller.tick(&exchange).await;
        assert_eq!(controller.book().sell_count(), 2);

        exchange.fill(3).await;
        exchange.fill(4).await;
        let report = controller.tick(&exchange).await;

        assert!(report.is_clean());
        assert_eq!(controller.phase(), &CyclePhase::CycleComplete);
        assert_eq!(controller.book().sell_count(), 0);
        assert_eq!(controller.book().buy_count(), 0);
        // 2 rungs + 2 sells, no replenishment buy
        assert_eq!(exchange.placed.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_sell_query_blocks_cycle_completion() {
        let exchange = MockExchange::new(600.0);
        let mut controller = controller(config());
        controller.tick(&exchange).await;
        exchange.fill(1).await;
        exchange.fill(2).await;
        controller.tick(&exchange).await;

        exchange.fill(3).await;
        exchange.fill(4).await;
        exchange.set_fail_query_for(4, true).await;
        let report = controller.tick(&exchange).await;

        assert_eq!(report.failures_in(TickStep::Replenishment).count(), 1);
        assert_eq!(controller.phase().name(), "partially_filled");
        assert!(controller.book().contains(4));
        // Sell 3 was replenished as if others were still open
        assert!(!controller.book().contains(3));
        assert!(controller.book().contains(5));

        exchange.set_fail_query_for(4, false).await;
        controller.tick(&exchange).await;
        assert_eq!(controller.phase(), &CyclePhase::CycleComplete);
        assert_eq!(controller.book().sell_count(), 0);
    }
}
