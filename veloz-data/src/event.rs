use crate::books::{OrderBookSnapshot, OrderBookUpdate};
use chrono::{DateTime, Utc};
use derive_more::From;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use veloz_instrument::{Side, symbol::SymbolIndex, venue::VenueId};

/// Normalised VeloZ `MarketEvent<T>` wrapping the `T` data variant in venue metadata.
///
/// Note: `T` can be an enum such as [`MarketDataKind`] if required.
///
/// ### Examples
/// - `MarketEvent<SymbolIndex, PublicTrade>`
/// - `MarketEvent<SymbolIndex, MarketDataKind>`
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct MarketEvent<SymbolKey = SymbolIndex, T = MarketDataKind> {
    pub time_exchange: DateTime<Utc>,
    pub time_received: DateTime<Utc>,
    pub venue: VenueId,
    pub symbol: SymbolKey,
    pub kind: T,
}

impl<SymbolKey, T> MarketEvent<SymbolKey, T> {
    pub fn map_kind<F, O>(self, op: F) -> MarketEvent<SymbolKey, O>
    where
        F: FnOnce(T) -> O,
    {
        MarketEvent {
            time_exchange: self.time_exchange,
            time_received: self.time_received,
            venue: self.venue,
            symbol: self.symbol,
            kind: op(self.kind),
        }
    }
}

/// Available kinds of normalised VeloZ [`MarketEvent<T>`](MarketEvent).
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize, From)]
pub enum MarketDataKind {
    Trade(PublicTrade),
    BookUpdate(OrderBookUpdate),
    BookSnapshot(OrderBookSnapshot),
    Kline(Kline),
    Ticker(Ticker),
    MarkPrice(MarkPrice),
    Funding(Funding),
}

/// Normalised public trade.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
pub struct PublicTrade {
    pub id: SmolStr,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Taker side of the trade.
    pub side: Side,
}

/// Normalised venue kline/candle.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Kline {
    pub time_open: DateTime<Utc>,
    pub time_close: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
}

/// Normalised 24h rolling ticker.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Ticker {
    pub last_price: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub volume_24h: Decimal,
}

/// Derivatives mark price.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
pub struct MarkPrice {
    pub mark: Decimal,
    pub index: Option<Decimal>,
}

/// Funding rate update for perpetual symbols.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Funding {
    pub rate: Decimal,
    pub time_next: DateTime<Utc>,
}

impl<SymbolKey> From<MarketEvent<SymbolKey, PublicTrade>>
    for MarketEvent<SymbolKey, MarketDataKind>
{
    fn from(value: MarketEvent<SymbolKey, PublicTrade>) -> Self {
        value.map_kind(PublicTrade::into)
    }
}

impl<SymbolKey> From<MarketEvent<SymbolKey, OrderBookUpdate>>
    for MarketEvent<SymbolKey, MarketDataKind>
{
    fn from(value: MarketEvent<SymbolKey, OrderBookUpdate>) -> Self {
        value.map_kind(OrderBookUpdate::into)
    }
}

impl<SymbolKey> From<MarketEvent<SymbolKey, OrderBookSnapshot>>
    for MarketEvent<SymbolKey, MarketDataKind>
{
    fn from(value: MarketEvent<SymbolKey, OrderBookSnapshot>) -> Self {
        value.map_kind(OrderBookSnapshot::into)
    }
}

impl<SymbolKey> From<MarketEvent<SymbolKey, Kline>> for MarketEvent<SymbolKey, MarketDataKind> {
    fn from(value: MarketEvent<SymbolKey, Kline>) -> Self {
        value.map_kind(Kline::into)
    }
}

impl<SymbolKey> From<MarketEvent<SymbolKey, Ticker>> for MarketEvent<SymbolKey, MarketDataKind> {
    fn from(value: MarketEvent<SymbolKey, Ticker>) -> Self {
        value.map_kind(Ticker::into)
    }
}
