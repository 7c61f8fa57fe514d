use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use veloz_instrument::{symbol::SymbolIndex, venue::VenueId};

/// Market data channel on a venue feed.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Trades,
    BookL2,
    Klines,
    Ticker,
    MarkPrice,
    Funding,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Trades => "trades",
            Channel::BookL2 => "book_l2",
            Channel::Klines => "klines",
            Channel::Ticker => "ticker",
            Channel::MarkPrice => "mark_price",
            Channel::Funding => "funding",
        }
    }
}

/// Unique `SmolStr` identifier for a subscribed data stream.
///
/// eg/ "binance_spot|BTCUSDT|book_l2"
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct SubscriptionId(pub SmolStr);

impl SubscriptionId {
    pub fn new<S>(id: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self(id.into())
    }
}

/// Subscription to one [`Channel`] of one symbol on one venue.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct Subscription {
    pub venue: VenueId,
    pub symbol: SymbolIndex,
    pub channel: Channel,
}
