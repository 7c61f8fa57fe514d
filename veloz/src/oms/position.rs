use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use veloz_execution::order::id::StrategyId;
use veloz_instrument::{Side, symbol::SymbolIndex};

/// Net position of one `(strategy, symbol)` pair.
///
/// Created on first fill; size-zero positions are retained until run shutdown so realized
/// PnL stays reportable.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Position {
    pub strategy: StrategyId,
    pub symbol: SymbolIndex,
    /// Positive long, negative short.
    pub signed_quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub fees_paid: Decimal,
    pub margin_reserved: Decimal,
}

impl Position {
    pub fn new(strategy: StrategyId, symbol: SymbolIndex) -> Self {
        Self {
            strategy,
            symbol,
            signed_quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            margin_reserved: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.signed_quantity.is_zero()
    }

    /// Apply one fill, realizing PnL on any closed quantity and re-averaging any opened
    /// quantity. Standard flip handling: closing through zero realizes the closed leg and
    /// opens the remainder at the fill price.
    pub fn apply_fill(&mut self, side: Side, quantity: Decimal, price: Decimal, fee: Decimal) {
        self.fees_paid += fee;

        let delta = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };

        let same_direction = self.signed_quantity.is_zero()
            || (self.signed_quantity.is_sign_positive() == delta.is_sign_positive());

        if same_direction {
            // Extending (or opening): weighted-average entry
            let new_quantity = self.signed_quantity + delta;
            if !new_quantity.is_zero() {
                self.avg_entry_price = (self.avg_entry_price * self.signed_quantity.abs()
                    + price * delta.abs())
                    / new_quantity.abs();
            }
            self.signed_quantity = new_quantity;
            return;
        }

        // Opposing: close up to the open quantity
        let closing = delta.abs().min(self.signed_quantity.abs());
        let direction = if self.signed_quantity.is_sign_positive() {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        self.realized_pnl += (price - self.avg_entry_price) * closing * direction;

        let remaining = delta.abs() - closing;
        if remaining.is_zero() {
            self.signed_quantity += delta;
            if self.signed_quantity.is_zero() {
                self.avg_entry_price = Decimal::ZERO;
            }
        } else {
            // Flip: remainder opens a fresh position at the fill price
            self.signed_quantity = -direction * remaining;
            self.avg_entry_price = price;
        }
    }

    /// Recompute unrealized PnL against the provided mark price.
    pub fn mark(&mut self, mark_price: Decimal) {
        self.unrealized_pnl = if self.signed_quantity.is_zero() {
            Decimal::ZERO
        } else {
            (mark_price - self.avg_entry_price) * self.signed_quantity
        };
    }
}
