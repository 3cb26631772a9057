//! In-memory tracking of open buy and sell orders

use std::collections::BTreeMap;

use super::errors::{GridError, GridResult};
use super::types::{Order, OrderId, OrderQuery, OrderSide, OrderStatus};

/// Open orders keyed by exchange id, one table per side
///
/// The cycle controller is the only mutator. Ids are unique across both
/// tables at any instant.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    buys: BTreeMap<OrderId, Order>,
    sells: BTreeMap<OrderId, Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an acknowledged buy order
    pub fn record_buy(&mut self, order: Order) -> GridResult<()> {
        if order.side != OrderSide::Buy {
            return Err(GridError::SideMismatch {
                id: order.id,
                expected: OrderSide::Buy,
            });
        }
        self.ensure_untracked(order.id)?;
        self.buys.insert(order.id, order);
        Ok(())
    }

    /// Track an acknowledged sell order
    pub fn record_sell(&mut self, order: Order) -> GridResult<()> {
        if order.side != OrderSide::Sell {
            return Err(GridError::SideMismatch {
                id: order.id,
                expected: OrderSide::Sell,
            });
        }
        self.ensure_untracked(order.id)?;
        self.sells.insert(order.id, order);
        Ok(())
    }

    pub fn remove_buy(&mut self, id: OrderId) -> Option<Order> {
        self.buys.remove(&id)
    }

    pub fn remove_sell(&mut self, id: OrderId) -> Option<Order> {
        self.sells.remove(&id)
    }

    /// Snapshot of open buys, oldest id first
    pub fn open_buys(&self) -> Vec<Order> {
        self.buys.values().cloned().collect()
    }

    /// Snapshot of open sells, oldest id first
    pub fn open_sells(&self) -> Vec<Order> {
        self.sells.values().cloned().collect()
    }

    /// Drop every tracked buy, returning what was removed
    pub fn clear_all_buys(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.buys).into_values().collect()
    }

    /// Store the latest exchange report on a tracked buy
    pub fn update_buy(&mut self, id: OrderId, query: &OrderQuery) -> Option<&Order> {
        let order = self.buys.get_mut(&id)?;
        order.apply_query(query);
        Some(order)
    }

    /// Store the latest exchange report on a tracked sell
    pub fn update_sell(&mut self, id: OrderId, query: &OrderQuery) -> Option<&Order> {
        let order = self.sells.get_mut(&id)?;
        order.apply_query(query);
        Some(order)
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.buys.get(&id).or_else(|| self.sells.get(&id))
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.buys.contains_key(&id) || self.sells.contains_key(&id)
    }

    /// Any tracked buy last reported as partially filled
    pub fn has_partially_filled_buy(&self) -> bool {
        self.buys
            .values()
            .any(|o| o.status == OrderStatus::PartiallyFilled)
    }

    pub fn buy_count(&self) -> usize {
        self.buys.len()
    }

    pub fn sell_count(&self) -> usize {
        self.sells.len()
    }

    fn ensure_untracked(&self, id: OrderId) -> GridResult<()> {
        if self.contains(id) {
            return Err(GridError::DuplicateOrder(id));
        }
        Ok(())
    }
}
