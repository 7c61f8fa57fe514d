use crate::{
    error::ExecutionError,
    event::{AssetBalance, TradingEvent},
    order::{
        OrderIntent, OrderSnapshot,
        id::{ClientOrderId, VenueOrderId},
    },
};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use veloz_instrument::{symbol::Symbol, venue::VenueId};

/// Stream of normalised [`TradingEvent`]s from a venue user-data stream.
pub type UserStream = BoxStream<'static, TradingEvent>;

/// Capability flags a venue adapter exposes to the core.
///
/// The OMS consults these before routing; eg/ an amend on a venue without
/// `supports_amend` is rewritten as cancel + place upstream.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct VenueCapabilities {
    pub supports_amend: bool,
    pub supports_post_only: bool,
    pub supports_stop_limit: bool,
    pub supports_reduce_only: bool,
}

impl VenueCapabilities {
    /// Capabilities of the in-process simulated venues.
    pub fn simulated() -> Self {
        Self {
            supports_amend: false,
            supports_post_only: true,
            supports_stop_limit: false,
            supports_reduce_only: false,
        }
    }
}

/// Reference to an order a cancel/amend/query targets.
///
/// The venue order id may not be known yet (eg/ cancel raced with acceptance), in which case
/// adapters address the order by client order id.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum OrderRef {
    Client(ClientOrderId),
    Venue(VenueOrderId),
}

/// The venue adapter capability surface.
///
/// One implementation per venue wire protocol; every call returns a normalised
/// [`TradingEvent`] or an [`ExecutionError`] classified per the engine's taxonomy. Adapters
/// hold no orders: they address them only by the opaque identifiers in the requests.
#[allow(async_fn_in_trait)]
pub trait VenueClient {
    fn venue(&self) -> VenueId;

    fn capabilities(&self) -> VenueCapabilities;

    /// Submit the intent. The engine guarantees the intent's WAL record is durable before
    /// this is called.
    async fn place(
        &self,
        symbol: &Symbol,
        cid: &ClientOrderId,
        intent: &OrderIntent,
    ) -> Result<TradingEvent, ExecutionError>;

    async fn cancel(
        &self,
        symbol: &Symbol,
        order: &OrderRef,
    ) -> Result<TradingEvent, ExecutionError>;

    /// Amend price and/or quantity in place, where [`VenueCapabilities::supports_amend`].
    async fn amend(
        &self,
        symbol: &Symbol,
        order: &OrderRef,
        new_quantity: Option<Decimal>,
        new_price: Option<Decimal>,
    ) -> Result<TradingEvent, ExecutionError>;

    async fn query_open_orders(
        &self,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<OrderSnapshot>, ExecutionError>;

    async fn query_order(
        &self,
        symbol: &Symbol,
        cid: &ClientOrderId,
    ) -> Result<Option<OrderSnapshot>, ExecutionError>;

    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, ExecutionError>;

    /// Open the venue user-data stream of trading events and balance updates.
    async fn subscribe_user_stream(&self) -> Result<UserStream, ExecutionError>;
}
