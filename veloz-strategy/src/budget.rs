use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use veloz_execution::order::id::ClientOrderId;

/// Per-strategy order budget, enforced by the runtime before the global risk engine.
///
/// Reservations are keyed by client order id: only an order that actually reserved can
/// release, so placements that bypass the runtime (eg/ gateway orders reusing a strategy
/// id) can never inflate the strategy's headroom.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct StrategyBudget {
    pub max_open_orders: usize,
    pub max_committed_notional: Decimal,
    reservations: IndexMap<ClientOrderId, Decimal>,
    committed_notional: Decimal,
}

/// Error returned when an open request would exceed the strategy's budget.
#[derive(Debug, Clone, Eq, PartialEq, Error, Deserialize, Serialize)]
pub enum BudgetExceeded {
    #[error("open order ceiling {0} reached")]
    OpenOrders(usize),
    #[error("committed notional would reach {would}, ceiling {limit}")]
    Notional { would: Decimal, limit: Decimal },
}

impl StrategyBudget {
    pub fn new(max_open_orders: usize, max_committed_notional: Decimal) -> Self {
        Self {
            max_open_orders,
            max_committed_notional,
            reservations: IndexMap::new(),
            committed_notional: Decimal::ZERO,
        }
    }

    pub fn open_orders(&self) -> usize {
        self.reservations.len()
    }

    pub fn committed_notional(&self) -> Decimal {
        self.committed_notional
    }

    /// Check and reserve budget for an open of the given notional, keyed by the order's
    /// client order id. Re-reserving an already-reserved id is a no-op.
    pub fn reserve(&mut self, cid: ClientOrderId, notional: Decimal) -> Result<(), BudgetExceeded> {
        if self.reservations.contains_key(&cid) {
            return Ok(());
        }

        if self.reservations.len() + 1 > self.max_open_orders {
            return Err(BudgetExceeded::OpenOrders(self.max_open_orders));
        }

        let would = self.committed_notional + notional;
        if would > self.max_committed_notional {
            return Err(BudgetExceeded::Notional {
                would,
                limit: self.max_committed_notional,
            });
        }

        self.reservations.insert(cid, notional);
        self.committed_notional = would;
        Ok(())
    }

    /// Release the reservation held for `cid`, returning its notional.
    ///
    /// A no-op returning `None` for ids that never reserved (eg/ gateway placements).
    pub fn release(&mut self, cid: &ClientOrderId) -> Option<Decimal> {
        let notional = self.reservations.swap_remove(cid)?;
        self.committed_notional = (self.committed_notional - notional).max(Decimal::ZERO);
        Some(notional)
    }
}

impl Default for StrategyBudget {
    fn default() -> Self {
        Self::new(32, Decimal::new(1_000_000, 0))
    }
}
