use crate::{
    config::EngineConfig,
    engine::{Engine, clock::SimClock, router::ExecutionDispatch},
    event::EngineEvent,
    oms::Oms,
    replay::matching::{MatchingConfig, MatchingEngine},
    runtime::StrategyRuntime,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use veloz_data::event::{MarketDataKind, MarketEvent};
use veloz_execution::{
    client::OrderRef,
    order::{OrderIntent, id::ClientOrderId},
};
use veloz_instrument::{index::SymbolSet, symbol::Symbol, symbol::SymbolIndex};
use veloz_risk::{breaker::TradingBreaker, engine::RiskEngine};
use veloz_wal::writer::CommitReceipt;

/// The simulated matching model.
pub mod matching;

/// Historical market event loading.
pub mod market_data;

/// Synchronous [`ExecutionDispatch`] backed by the [`MatchingEngine`].
///
/// Receipts are returned inline from every dispatch call, so a replay run's event order is
/// a pure function of its inputs.
#[derive(Debug)]
pub struct SimDispatch {
    matcher: MatchingEngine,
}

impl SimDispatch {
    pub fn new(config: MatchingConfig) -> Self {
        Self {
            matcher: MatchingEngine::new(config),
        }
    }
}

impl ExecutionDispatch for SimDispatch {
    fn place(
        &mut self,
        symbol: Symbol,
        cid: ClientOrderId,
        intent: OrderIntent,
        _commit: Option<CommitReceipt>,
    ) -> Vec<EngineEvent> {
        self.matcher.place(&symbol, intent.symbol, cid, &intent)
    }

    fn cancel(
        &mut self,
        _symbol: Symbol,
        cid: ClientOrderId,
        _order: OrderRef,
    ) -> Vec<EngineEvent> {
        self.matcher.cancel(&cid)
    }

    fn on_market(
        &mut self,
        event: &MarketEvent<SymbolIndex, MarketDataKind>,
    ) -> Vec<EngineEvent> {
        self.matcher.on_market(event)
    }
}

/// Summary of a completed replay run.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ReplaySummary {
    pub events_processed: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub realized_pnl: Decimal,
}

/// Drives the identical engine from a historical event stream under simulated time.
///
/// Only the execution dispatch differs from a live run: orders are matched by the
/// configurable [`MatchingEngine`] instead of a venue. Given identical inputs and
/// parameters, runs are bit-identical (the cost model's seeded RNG is the only randomness).
#[derive(Debug)]
pub struct ReplayEnvironment {
    pub engine: Engine<SimClock, SimDispatch>,
}

impl ReplayEnvironment {
    pub fn new(
        start_time: DateTime<Utc>,
        config: EngineConfig,
        matching: MatchingConfig,
        symbols: SymbolSet,
        runtime: StrategyRuntime,
    ) -> Self {
        let engine = Engine::new(
            SimClock::new(start_time),
            config.clone(),
            symbols,
            // Replay runs reconstruct nothing and need no durability
            Oms::new(None),
            RiskEngine::new(config.risk.clone()),
            TradingBreaker::new(config.trading_breaker.clone()),
            runtime,
            SimDispatch::new(matching),
        );

        Self { engine }
    }

    /// Seed the account projection a run starts from; without funds the risk engine
    /// refuses every intent.
    pub fn seed_balances(
        &mut self,
        venue: veloz_instrument::venue::VenueId,
        balances: Vec<veloz_execution::event::AssetBalance>,
    ) {
        self.engine.oms.accounts.venue_mut(venue).overwrite(balances);
    }

    /// Process the full historical stream, returning the run summary.
    pub fn run<Events>(&mut self, events: Events) -> ReplaySummary
    where
        Events: IntoIterator<Item = MarketEvent<SymbolIndex, MarketDataKind>>,
    {
        let mut summary = ReplaySummary::default();

        for event in events {
            self.engine.process(EngineEvent::Market(event));
            summary.events_processed += 1;
        }

        for (_, metrics) in self.collect_metrics() {
            summary.orders_submitted += metrics.orders_submitted;
            summary.orders_filled += metrics.orders_filled;
            summary.realized_pnl += metrics.realized_pnl;
        }

        info!(
            events = summary.events_processed,
            submitted = summary.orders_submitted,
            filled = summary.orders_filled,
            "replay run complete"
        );
        summary
    }

    fn collect_metrics(
        &self,
    ) -> Vec<(
        veloz_execution::order::id::StrategyId,
        crate::runtime::StrategyMetrics,
    )> {
        self.engine
            .oms
            .positions()
            .map(|position| position.strategy.clone())
            .chain(self.engine.oms.orders().map(|order| order.strategy.clone()))
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .filter_map(|strategy| {
                self.engine
                    .runtime
                    .metrics(&strategy)
                    .cloned()
                    .map(|metrics| (strategy, metrics))
            })
            .collect()
    }
}
