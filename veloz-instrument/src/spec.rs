use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading constraints of a [`Symbol`](crate::symbol::Symbol), as published by the venue.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct SymbolSpec {
    pub price: SpecPrice,
    pub quantity: SpecQuantity,
    pub notional: SpecNotional,
    /// Contract multiplier; `1` for spot and linear contracts quoted 1:1.
    pub contract_multiplier: Decimal,
}

impl Default for SymbolSpec {
    fn default() -> Self {
        Self {
            price: SpecPrice {
                precision: 8,
                tick_size: Decimal::new(1, 8),
            },
            quantity: SpecQuantity {
                precision: 8,
                lot_size: Decimal::new(1, 8),
                min: Decimal::ZERO,
            },
            notional: SpecNotional { min: Decimal::ZERO },
            contract_multiplier: Decimal::ONE,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct SpecPrice {
    pub precision: u32,
    pub tick_size: Decimal,
}

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct SpecQuantity {
    pub precision: u32,
    pub lot_size: Decimal,
    pub min: Decimal,
}

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct SpecNotional {
    pub min: Decimal,
}

impl SymbolSpec {
    /// Round the provided price down to the nearest valid tick.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        round_to_increment(price, self.price.tick_size)
    }

    /// Round the provided quantity down to the nearest valid lot.
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        round_to_increment(quantity, self.quantity.lot_size)
    }

    /// Check the provided `(price, quantity)` satisfies the venue minimums.
    pub fn meets_minimums(&self, price: Decimal, quantity: Decimal) -> bool {
        quantity >= self.quantity.min && price * quantity >= self.notional.min
    }
}

fn round_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment.is_zero() {
        return value;
    }
    (value / increment).floor() * increment
}
