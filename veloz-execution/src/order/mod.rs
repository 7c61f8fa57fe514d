use crate::order::{
    id::{ClientOrderId, StrategyId, VenueOrderId},
    status::OrderStatus,
};
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use veloz_instrument::{Side, symbol::SymbolIndex, venue::VenueId};

/// `Order` related identifiers.
///
/// eg/ `ClientOrderId`, `VenueOrderId`, `StrategyId`, `ExecId`.
pub mod id;

/// Order lifecycle statuses.
pub mod status;

/// Kind of an order.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum OrderKind {
    Market,
    Limit,
    StopLimit,
}

/// Time-in-force and execution flags of an order.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum TimeInForce {
    #[display("gtc(post_only={post_only})")]
    GoodUntilCancelled { post_only: bool },
    FillOrKill,
    ImmediateOrCancel,
}

impl TimeInForce {
    pub fn is_post_only(&self) -> bool {
        matches!(self, TimeInForce::GoodUntilCancelled { post_only: true })
    }
}

/// A strategy's desire to place an order, as it enters the submit path.
///
/// The OMS derives the deterministic [`ClientOrderId`] from `(strategy, counter)`, persists
/// the intent, and only then hands it to a venue adapter.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct OrderIntent {
    pub strategy: StrategyId,
    /// Monotonic per-strategy intent counter; the idempotency source.
    pub counter: u64,
    pub symbol: SymbolIndex,
    pub side: Side,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
    /// Strategy parameter version active when the intent was generated.
    pub params_version: u64,
}

impl OrderIntent {
    pub fn client_order_id(&self) -> ClientOrderId {
        ClientOrderId::deterministic(&self.strategy, self.counter)
    }
}

/// Point-in-time view of an order as the venue reports it.
///
/// Produced by `query_order`/`query_open_orders` and consumed by the reconciler, which
/// treats it as the authoritative side of any divergence.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderSnapshot {
    pub venue: VenueId,
    pub cid: Option<ClientOrderId>,
    pub void: VenueOrderId,
    pub side: Side,
    pub status: OrderStatus,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub price: Option<Decimal>,
}
