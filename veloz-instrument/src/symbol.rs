use crate::{
    Underlying,
    asset::AssetName,
    spec::SymbolSpec,
    venue::{MarketKind, VenueId},
};
use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};

/// Index of an interned [`Symbol`] in the run's [`SymbolSet`](crate::index::SymbolSet).
///
/// The hot path refers to symbols exclusively by this `Copy` index.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct SymbolIndex(pub usize);

impl SymbolIndex {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for SymbolIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymbolIndex({})", self.0)
    }
}

/// `SmolStr` symbol name exactly as the venue spells it.
///
/// eg/ "BTCUSDT" on Binance, "BTC-USD" on Coinbase
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display)]
pub struct SymbolText(pub SmolStr);

impl SymbolText {
    pub fn new<S>(name: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self(name.into())
    }
}

impl From<&str> for SymbolText {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Borrow<str> for SymbolText {
    fn borrow(&self) -> &str {
        self.0.borrow()
    }
}

impl AsRef<str> for SymbolText {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

/// Venue-qualified instrument identity with its trading constraints.
///
/// Immutable once interned. Note that Binance BTCUSDT spot is not considered the same symbol
/// as Bybit BTCUSDT spot.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct Symbol {
    pub venue: VenueId,
    pub kind: MarketKind,
    pub name_venue: SymbolText,
    pub underlying: Underlying<AssetName>,
    pub spec: SymbolSpec,
}

impl Symbol {
    /// Unique internal name of this symbol: `{venue}-{kind}-{name_venue}` lowercased.
    pub fn name_internal(&self) -> SmolStr {
        smol_str::format_smolstr!(
            "{}-{}-{}",
            self.venue.as_str(),
            match self.kind {
                MarketKind::Spot => "spot",
                MarketKind::LinearPerpetual => "linear",
                MarketKind::InversePerpetual => "inverse",
            },
            self.name_venue.0.to_lowercase()
        )
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name_internal())
    }
}
