use crate::{
    client::{OrderRef, UserStream, VenueCapabilities, VenueClient},
    error::ExecutionError,
    event::{AssetBalance, TradingEvent},
    order::{OrderIntent, OrderSnapshot, id::ClientOrderId},
};
use rust_decimal::Decimal;
use veloz_instrument::{symbol::Symbol, venue::VenueId};

/// In-process venue with deterministic matching, used by tests and `sim` execution mode.
pub mod mock;

/// Binance family adapter (spot, linear, inverse).
pub mod binance;

/// Tagged-variant dispatch over the configured venue adapters.
///
/// The submit hot path selects the adapter with a plain `match` instead of a virtual call.
#[derive(Debug)]
pub enum VenueAdapter {
    Mock(mock::MockVenue),
    Binance(binance::BinanceClient),
}

impl VenueClient for VenueAdapter {
    fn venue(&self) -> VenueId {
        match self {
            VenueAdapter::Mock(client) => client.venue(),
            VenueAdapter::Binance(client) => client.venue(),
        }
    }

    fn capabilities(&self) -> VenueCapabilities {
        match self {
            VenueAdapter::Mock(client) => client.capabilities(),
            VenueAdapter::Binance(client) => client.capabilities(),
        }
    }

    async fn place(
        &self,
        symbol: &Symbol,
        cid: &ClientOrderId,
        intent: &OrderIntent,
    ) -> Result<TradingEvent, ExecutionError> {
        match self {
            VenueAdapter::Mock(client) => client.place(symbol, cid, intent).await,
            VenueAdapter::Binance(client) => client.place(symbol, cid, intent).await,
        }
    }

    async fn cancel(
        &self,
        symbol: &Symbol,
        order: &OrderRef,
    ) -> Result<TradingEvent, ExecutionError> {
        match self {
            VenueAdapter::Mock(client) => client.cancel(symbol, order).await,
            VenueAdapter::Binance(client) => client.cancel(symbol, order).await,
        }
    }

    async fn amend(
        &self,
        symbol: &Symbol,
        order: &OrderRef,
        new_quantity: Option<Decimal>,
        new_price: Option<Decimal>,
    ) -> Result<TradingEvent, ExecutionError> {
        match self {
            VenueAdapter::Mock(client) => {
                client.amend(symbol, order, new_quantity, new_price).await
            }
            VenueAdapter::Binance(client) => {
                client.amend(symbol, order, new_quantity, new_price).await
            }
        }
    }

    async fn query_open_orders(
        &self,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<OrderSnapshot>, ExecutionError> {
        match self {
            VenueAdapter::Mock(client) => client.query_open_orders(symbol).await,
            VenueAdapter::Binance(client) => client.query_open_orders(symbol).await,
        }
    }

    async fn query_order(
        &self,
        symbol: &Symbol,
        cid: &ClientOrderId,
    ) -> Result<Option<OrderSnapshot>, ExecutionError> {
        match self {
            VenueAdapter::Mock(client) => client.query_order(symbol, cid).await,
            VenueAdapter::Binance(client) => client.query_order(symbol, cid).await,
        }
    }

    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, ExecutionError> {
        match self {
            VenueAdapter::Mock(client) => client.fetch_balances().await,
            VenueAdapter::Binance(client) => client.fetch_balances().await,
        }
    }

    async fn subscribe_user_stream(&self) -> Result<UserStream, ExecutionError> {
        match self {
            VenueAdapter::Mock(client) => client.subscribe_user_stream().await,
            VenueAdapter::Binance(client) => client.subscribe_user_stream().await,
        }
    }
}
