use crate::event::{EngineEvent, ExecOp, ExecutionFailure};
use fnv::FnvHashMap;
use std::sync::Arc;
use tracing::{error, warn};
use veloz_execution::{
    client::{OrderRef, VenueClient},
    order::{OrderIntent, id::ClientOrderId},
    resilient::Resilient,
    venue::VenueAdapter,
};
use veloz_instrument::{symbol::Symbol, venue::VenueId};
use veloz_integration::channel::{Tx, UnboundedTx};
use veloz_wal::writer::CommitReceipt;

/// How the engine hands order flow to the execution plane.
///
/// Live engines route through the async [`ExecutionRouter`] (completions re-enter via the
/// loop feed); replay engines plug in a synchronous simulator whose receipts are returned
/// directly, keeping runs deterministic. Everything above this seam is identical in both
/// modes.
pub trait ExecutionDispatch {
    /// Dispatch a place. Any synchronously-produced receipts are returned for immediate
    /// processing.
    fn place(
        &mut self,
        symbol: Symbol,
        cid: ClientOrderId,
        intent: OrderIntent,
        commit: Option<CommitReceipt>,
    ) -> Vec<EngineEvent>;

    /// Dispatch a cancel.
    fn cancel(&mut self, symbol: Symbol, cid: ClientOrderId, order: OrderRef)
    -> Vec<EngineEvent>;

    /// Observe a market event, eg/ so a simulated venue can match resting orders.
    fn on_market(
        &mut self,
        _event: &veloz_data::event::MarketEvent<
            veloz_instrument::symbol::SymbolIndex,
            veloz_data::event::MarketDataKind,
        >,
    ) -> Vec<EngineEvent> {
        Vec::new()
    }
}

/// Error type for the loop feed channel.
#[derive(Debug, Clone)]
pub struct FeedClosed;

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for FeedClosed {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self
    }
}

/// Transmitter of events back into the engine loop feed.
pub type FeedTx = UnboundedTx<EngineEvent, FeedClosed>;

/// Routes venue calls off the loop thread, delivering completions back through the feed.
///
/// One resilient adapter per configured venue. Calls are spawned as tasks so the loop never
/// awaits a venue; responses and failures re-enter as [`EngineEvent`]s, keeping all state
/// mutation on the loop thread.
#[derive(Debug)]
pub struct ExecutionRouter {
    adapters: FnvHashMap<VenueId, Arc<Resilient<VenueAdapter>>>,
    feed_tx: FeedTx,
}

impl ExecutionRouter {
    pub fn new(feed_tx: FeedTx) -> Self {
        Self {
            adapters: FnvHashMap::default(),
            feed_tx,
        }
    }

    pub fn add_venue(&mut self, venue: VenueId, adapter: Resilient<VenueAdapter>) {
        self.adapters.insert(venue, Arc::new(adapter));
    }

    pub fn adapter(&self, venue: VenueId) -> Option<&Arc<Resilient<VenueAdapter>>> {
        self.adapters.get(&venue)
    }

    pub fn venues(&self) -> impl Iterator<Item = VenueId> + '_ {
        self.adapters.keys().copied()
    }

    /// Submit a place call, gated on the intent's WAL durability barrier.
    ///
    /// The adapter is only contacted after `commit` resolves, preserving the invariant
    /// that every order intent is durable before any venue sees it.
    pub fn dispatch_place(
        &self,
        symbol: Symbol,
        cid: ClientOrderId,
        intent: OrderIntent,
        commit: Option<CommitReceipt>,
    ) {
        let venue = symbol.venue;
        let Some(adapter) = self.adapters.get(&venue).cloned() else {
            error!(%venue, %cid, "place dropped: no adapter configured for venue");
            return;
        };
        let feed_tx = self.feed_tx.clone();

        tokio::spawn(async move {
            if let Some(commit) = commit {
                if let Err(wal_error) = commit.wait().await {
                    // Durability unknown: do NOT contact the venue; the engine halts on
                    // the WAL failure notice
                    error!(?wal_error, %cid, "WAL commit failed before place");
                    return;
                }
            }

            let outcome = adapter.place(&symbol, &cid, &intent).await;
            let event = match outcome {
                Ok(trading_event) => EngineEvent::Trading(trading_event),
                Err(error) => EngineEvent::ExecutionFailure(ExecutionFailure::new(
                    venue,
                    cid,
                    ExecOp::Place,
                    error,
                )),
            };

            if feed_tx.send(event).is_err() {
                warn!("loop feed closed; place outcome dropped");
            }
        });
    }

    pub fn dispatch_cancel(&self, symbol: Symbol, cid: ClientOrderId, order: OrderRef) {
        let venue = symbol.venue;
        let Some(adapter) = self.adapters.get(&venue).cloned() else {
            error!(%venue, %cid, "cancel dropped: no adapter configured for venue");
            return;
        };
        let feed_tx = self.feed_tx.clone();

        tokio::spawn(async move {
            let outcome = adapter.cancel(&symbol, &order).await;
            let event = match outcome {
                Ok(trading_event) => EngineEvent::Trading(trading_event),
                Err(error) => EngineEvent::ExecutionFailure(ExecutionFailure::new(
                    venue,
                    cid,
                    ExecOp::Cancel,
                    error,
                )),
            };

            if feed_tx.send(event).is_err() {
                warn!("loop feed closed; cancel outcome dropped");
            }
        });
    }
}

impl ExecutionDispatch for ExecutionRouter {
    fn place(
        &mut self,
        symbol: Symbol,
        cid: ClientOrderId,
        intent: OrderIntent,
        commit: Option<CommitReceipt>,
    ) -> Vec<EngineEvent> {
        self.dispatch_place(symbol, cid, intent, commit);
        Vec::new()
    }

    fn cancel(
        &mut self,
        symbol: Symbol,
        cid: ClientOrderId,
        order: OrderRef,
    ) -> Vec<EngineEvent> {
        self.dispatch_cancel(symbol, cid, order);
        Vec::new()
    }
}
