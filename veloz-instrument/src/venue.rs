use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Unique identifier for a trading venue endpoint.
///
/// ### Notes
/// A venue may run distinct servers for different [`MarketKind`]s. For example, Binance spot
/// and Binance USD-margined perpetuals have distinct APIs, and are therefore represented as
/// unique variants.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename = "venue", rename_all = "snake_case")]
pub enum VenueId {
    Sim,
    Mock,
    BinanceSpot,
    BinanceLinear,
    BinanceInverse,
    Okx,
    Bybit,
    Coinbase,
}

impl VenueId {
    /// Return the &str representation of this [`VenueId`].
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Sim => "sim",
            VenueId::Mock => "mock",
            VenueId::BinanceSpot => "binance_spot",
            VenueId::BinanceLinear => "binance_linear",
            VenueId::BinanceInverse => "binance_inverse",
            VenueId::Okx => "okx",
            VenueId::Bybit => "bybit",
            VenueId::Coinbase => "coinbase",
        }
    }

    /// Venues that simulate execution in-process rather than over the network.
    pub fn is_simulated(&self) -> bool {
        matches!(self, VenueId::Sim | VenueId::Mock)
    }
}

/// Kind of market a [`Symbol`](crate::symbol::Symbol) trades on.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Spot,
    /// Perpetual swap margined in the quote asset.
    LinearPerpetual,
    /// Perpetual swap margined in the base asset.
    InversePerpetual,
}
