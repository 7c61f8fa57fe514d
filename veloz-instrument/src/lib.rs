#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # VeloZ-Instrument
//! Venue, symbol and asset identity data structures shared across the VeloZ trading engine.
//!
//! A [`Symbol`](symbol::Symbol) is a venue-qualified instrument: the same textual pair on two
//! venues is two distinct symbols. Symbols are interned once per run into a
//! [`SymbolSet`](index::SymbolSet), and the rest of the engine refers to them by the cheap
//! `Copy` [`SymbolIndex`](symbol::SymbolIndex).

use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Defines the global [`VenueId`](venue::VenueId) enum and the venue market kinds.
pub mod venue;

/// [`Symbol`](symbol::Symbol) identity and naming.
pub mod symbol;

/// Per-symbol trading constraints: precision, tick size, lot size, min notional, multiplier.
pub mod spec;

/// Asset naming.
pub mod asset;

/// Interned, indexed collection of the symbols configured for a run.
pub mod index;

/// A keyed value.
///
/// eg/ Keyed<SymbolIndex, Symbol>
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct Keyed<Key, Value> {
    pub key: Key,
    pub value: Value,
}

impl<Key, Value> AsRef<Value> for Keyed<Key, Value> {
    fn as_ref(&self) -> &Value {
        &self.value
    }
}

impl<Key, Value> Display for Keyed<Key, Value>
where
    Key: Display,
    Value: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.key, self.value)
    }
}

/// Underlying base and quote asset pair of a [`Symbol`](symbol::Symbol).
///
/// eg/ Underlying { base: "btc", quote: "usdt" }
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Underlying<AssetKey> {
    pub base: AssetKey,
    pub quote: AssetKey,
}

impl<AssetKey> Underlying<AssetKey> {
    pub fn new<A>(base: A, quote: A) -> Self
    where
        A: Into<AssetKey>,
    {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

/// [`Side`] of an order, trade or position - Buy or Sell.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub enum Side {
    #[serde(alias = "buy", alias = "BUY", alias = "b")]
    Buy,
    #[serde(alias = "sell", alias = "SELL", alias = "s")]
    Sell,
}

impl Side {
    /// Sign applied to a quantity on this side: +1 for Buy, -1 for Sell.
    pub fn sign(&self) -> i8 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn invert(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Side::Buy => "buy",
                Side::Sell => "sell",
            }
        )
    }
}

pub mod test_utils {
    use crate::{
        Underlying,
        asset::AssetName,
        spec::SymbolSpec,
        symbol::{Symbol, SymbolText},
        venue::{MarketKind, VenueId},
    };

    pub fn symbol(venue: VenueId, base: &str, quote: &str) -> Symbol {
        Symbol::new(
            venue,
            MarketKind::Spot,
            SymbolText::new(format!("{}{}", base.to_uppercase(), quote.to_uppercase())),
            Underlying::new(AssetName::new(base), AssetName::new(quote)),
            SymbolSpec::default(),
        )
    }
}
