//! Cycle phases and the buy ladder plan

use super::config::TraderConfig;
use super::types::OrderRequest;

/// Planned buy ladder for one cycle
///
/// Progress survives failed submissions: `next_rung` only advances once a
/// rung is acknowledged, so a retried ladder never resubmits an earlier rung.
/// The pending rung keeps its request (and client order id) until then.
#[derive(Debug, Clone, PartialEq)]
pub struct Ladder {
    base_price: f64,
    prices: Vec<f64>,
    quantity: f64,
    next_rung: usize,
    pending: Option<OrderRequest>,
}

impl Ladder {
    /// Plan `max_buy_times` rungs below `base_price`
    pub fn plan(config: &TraderConfig, base_price: f64) -> Self {
        let prices = (1..=config.max_buy_times)
            .map(|i| config.rung_price(base_price, i))
            .collect();

        Self {
            base_price,
            prices,
            quantity: config.rung_quantity(base_price),
            next_rung: 0,
            pending: None,
        }
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Per-rung quantity (before precision rounding)
    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Rung prices in submission order (before tick rounding)
    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    /// Next rung awaiting submission as (1-based rung number, price)
    pub fn next_pending(&self) -> Option<(usize, f64)> {
        self.prices
            .get(self.next_rung)
            .map(|price| (self.next_rung + 1, *price))
    }

    /// Request for the pending rung, created once and reused until acknowledged
    pub fn pending_request(&mut self) -> Option<(usize, OrderRequest)> {
        let (rung, price) = self.next_pending()?;
        let quantity = self.quantity;
        let request = self
            .pending
            .get_or_insert_with(|| OrderRequest::buy(price, quantity))
            .clone();
        Some((rung, request))
    }

    /// Mark the pending rung as acknowledged
    pub fn advance(&mut self) {
        self.pending = None;
        if self.next_rung < self.prices.len() {
            self.next_rung += 1;
        }
    }

    pub fn rungs_placed(&self) -> usize {
        self.next_rung
    }

    pub fn is_complete(&self) -> bool {
        self.next_rung >= self.prices.len()
    }
}

/// Lifecycle of one grid cycle
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CyclePhase {
    /// No ladder; a fresh one is due on the next cycle-start check
    #[default]
    ColdStart,
    /// Ladder submitted (possibly still incomplete), no buy has filled yet
    LadderPlaced { ladder: Ladder },
    /// At least one buy of this cycle has (partially) filled
    PartiallyFilled { ladder: Ladder },
    /// Every tracked sell filled; a fresh ladder is due
    CycleComplete,
}

impl CyclePhase {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            CyclePhase::ColdStart => "cold_start",
            CyclePhase::LadderPlaced { .. } => "ladder_placed",
            CyclePhase::PartiallyFilled { .. } => "partially_filled",
            CyclePhase::CycleComplete => "cycle_complete",
        }
    }

    /// A new ladder must be placed before anything else this cycle
    pub fn needs_new_ladder(&self) -> bool {
        matches!(self, CyclePhase::ColdStart | CyclePhase::CycleComplete)
    }

    /// Reference price of the current ladder
    pub fn base_price(&self) -> Option<f64> {
        self.ladder().map(Ladder::base_price)
    }

    pub fn ladder(&self) -> Option<&Ladder> {
        match self {
            CyclePhase::LadderPlaced { ladder } | CyclePhase::PartiallyFilled { ladder } => {
                Some(ladder)
            }
            CyclePhase::ColdStart | CyclePhase::CycleComplete => None,
        }
    }

    pub fn ladder_mut(&mut self) -> Option<&mut Ladder> {
        match self {
            CyclePhase::LadderPlaced { ladder } | CyclePhase::PartiallyFilled { ladder } => {
                Some(ladder)
            }
            CyclePhase::ColdStart | CyclePhase::CycleComplete => None,
        }
    }

    /// Whether any buy has filled during this cycle
    pub fn buy_filled(&self) -> bool {
        matches!(self, CyclePhase::PartiallyFilled { .. })
    }

    /// ColdStart | CycleComplete -> LadderPlaced
    pub fn start(&mut self, ladder: Ladder) {
        *self = CyclePhase::LadderPlaced { ladder };
    }

    /// LadderPlaced -> PartiallyFilled; other phases are unchanged
    pub fn on_buy_filled(&mut self) {
        *self = match std::mem::take(self) {
            CyclePhase::LadderPlaced { ladder } => CyclePhase::PartiallyFilled { ladder },
            other => other,
        };
    }

    /// Any phase -> CycleComplete
    pub fn on_all_sells_filled(&mut self) {
        *self = CyclePhase::CycleComplete;
    }

    /// LadderPlaced -> ColdStart once the untouched ladder is stale
    pub fn on_stale_ladder(&mut self) {
        if matches!(self, CyclePhase::LadderPlaced { .. }) {
            *self = CyclePhase::ColdStart;
        }
    }
}
