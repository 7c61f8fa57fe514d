use crate::{
    error::BusinessReason,
    order::id::{ClientOrderId, ExecId, VenueOrderId},
};
use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use veloz_instrument::{asset::AssetName, venue::VenueId};

/// Normalised VeloZ trading event: every venue response and user-stream message becomes one
/// of these before it reaches the engine's event bus.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct TradingEvent {
    pub venue: VenueId,
    /// Venue receipt sequence; stale receipts (`seq <= order.last_seq`) are dropped.
    pub seq: u64,
    pub time_exchange: DateTime<Utc>,
    pub time_received: DateTime<Utc>,
    pub kind: TradingEventKind,
}

impl TradingEvent {
    /// The client order id this event concerns, if it carries one.
    pub fn client_order_id(&self) -> Option<&ClientOrderId> {
        match &self.kind {
            TradingEventKind::OrderAccepted(event) => Some(&event.cid),
            TradingEventKind::OrderRejected(event) => Some(&event.cid),
            TradingEventKind::OrderPartialFill(event) | TradingEventKind::OrderFill(event) => {
                event.cid.as_ref()
            }
            TradingEventKind::OrderCanceled(event) => event.cid.as_ref(),
            TradingEventKind::OrderExpired(event) => event.cid.as_ref(),
            TradingEventKind::BalanceUpdate(_) => None,
        }
    }

    /// The venue order id this event concerns, if it carries one.
    pub fn venue_order_id(&self) -> Option<&VenueOrderId> {
        match &self.kind {
            TradingEventKind::OrderAccepted(event) => Some(&event.void),
            TradingEventKind::OrderRejected(_) => None,
            TradingEventKind::OrderPartialFill(event) | TradingEventKind::OrderFill(event) => {
                Some(&event.void)
            }
            TradingEventKind::OrderCanceled(event) => Some(&event.void),
            TradingEventKind::OrderExpired(event) => Some(&event.void),
            TradingEventKind::BalanceUpdate(_) => None,
        }
    }
}

/// Available kinds of normalised VeloZ [`TradingEvent`].
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum TradingEventKind {
    OrderAccepted(OrderAccepted),
    OrderRejected(OrderRejected),
    OrderPartialFill(OrderFillEvent),
    OrderFill(OrderFillEvent),
    OrderCanceled(OrderCanceled),
    OrderExpired(OrderExpired),
    BalanceUpdate(BalanceUpdate),
}

/// Venue acknowledgement binding `client_order_id <-> venue_order_id`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderAccepted {
    pub cid: ClientOrderId,
    pub void: VenueOrderId,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderRejected {
    pub cid: ClientOrderId,
    pub reason: BusinessReason,
}

/// A (partial or full) fill receipt.
///
/// Quantities are cumulative: the order's state is derived from `fill.cum_quantity` against
/// the requested quantity, which tolerates missing intermediate fill receipts.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderFillEvent {
    pub cid: Option<ClientOrderId>,
    pub void: VenueOrderId,
    pub fill: Fill,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderCanceled {
    pub cid: Option<ClientOrderId>,
    pub void: VenueOrderId,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderExpired {
    pub cid: Option<ClientOrderId>,
    pub void: VenueOrderId,
}

/// Venue-authoritative balance deltas from the user stream.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct BalanceUpdate {
    pub balances: Vec<AssetBalance>,
}

/// One execution of an order.
///
/// `exec_id` de-duplicates retransmits; `cum_quantity` is the venue's cumulative filled
/// quantity as of this execution.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Fill {
    pub exec_id: ExecId,
    pub cum_quantity: Decimal,
    pub last_quantity: Decimal,
    pub price: Decimal,
    pub fee: AssetFees,
    pub liquidity: LiquidityRole,
}

/// Whether the fill added or removed book liquidity.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityRole {
    Maker,
    Taker,
}

/// Fees paid in a specific asset.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct AssetFees {
    pub asset: AssetName,
    pub fees: Decimal,
}

/// Balance of one asset on one venue.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct AssetBalance {
    pub asset: AssetName,
    pub balance: Balance,
    pub time_exchange: DateTime<Utc>,
}

/// Total/free split of an asset balance; `locked = total - free`.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Constructor,
)]
pub struct Balance {
    pub total: Decimal,
    pub free: Decimal,
}

impl Balance {
    pub fn locked(&self) -> Decimal {
        self.total - self.free
    }
}
