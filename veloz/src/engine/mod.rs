use crate::{
    Sequence,
    bus::{BusEvent, EventBus, Topic},
    config::EngineConfig,
    engine::{
        clock::EngineClock,
        router::{ExecutionDispatch, FeedClosed},
    },
    event::{Command, EngineEvent, ExecOp, ExecutionFailure, PlaceSpec, SystemEvent},
    oms::{Oms, OmsNotice, PrepareSubmit},
    reconciler::{LocalOrderView, ReconcileOutcome, ReconcileReport},
    runtime::StrategyRuntime,
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};
use veloz_data::{
    books::manager::{BookAction, BookManager},
    event::{MarketDataKind, MarketEvent},
};
use veloz_execution::{
    client::OrderRef,
    error::ExecutionError,
    event::{Balance, TradingEvent, TradingEventKind},
    order::{
        OrderIntent,
        id::{ClientOrderId, StrategyId},
        status::OrderStatus,
    },
};
use veloz_instrument::{
    asset::AssetName,
    index::SymbolSet,
    symbol::{Symbol, SymbolIndex},
    venue::VenueId,
};
use veloz_integration::{Unrecoverable, channel::UnboundedTx};
use veloz_risk::{
    breaker::{BreakerState, TradeOp, TradingBreaker},
    engine::{RiskContext, RiskEngine},
};
use veloz_strategy::StrategyAction;

/// Engine clocks (live and simulated).
pub mod clock;

/// The single-threaded cooperative event loop.
pub mod event_loop;

/// Off-loop venue call routing and the [`ExecutionDispatch`] seam.
pub mod router;

/// Whether strategies may generate new order intents.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum TradingState {
    Enabled,
    Disabled,
}

/// Per-venue stream health, driving reconcile-on-reconnect.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum Connectivity {
    Healthy,
    Reconnecting,
}

/// Transmitter type used by all engine bus subscribers.
pub type BusTx = UnboundedTx<BusEvent, FeedClosed>;

/// The VeloZ trading engine.
///
/// Owns all trading state and processes [`EngineEvent`]s one at a time on the loop thread:
/// market events update books, receipts drive the OMS state machine, strategy actions are
/// routed through risk and the WAL barrier to the execution dispatch, and every derived
/// event is published on the bus.
///
/// Generic over the clock (live vs simulated) and the execution dispatch (async router vs
/// synchronous simulator); everything else is identical between live and replay runs.
#[derive(Debug)]
pub struct Engine<Clock, Dispatch> {
    pub clock: Clock,
    pub sequence: Sequence,
    pub config: EngineConfig,
    pub symbols: SymbolSet,
    pub books: BookManager,
    pub oms: Oms,
    pub risk: RiskEngine,
    pub breaker: TradingBreaker,
    pub runtime: StrategyRuntime,
    pub execution: Dispatch,
    pub bus: EventBus<BusTx>,
    pub trading: TradingState,
    connectivity: FnvHashMap<VenueId, Connectivity>,
    /// Receipts produced synchronously by the dispatch (simulated venues), processed
    /// in-order after the event that caused them.
    feedback: VecDeque<EngineEvent>,
    /// Set after WAL replay or a disconnect; submissions are refused until the mandatory
    /// reconcile completes.
    reconcile_required: bool,
    /// Set once a shutdown has been processed; the run loop must stop after this event.
    shutdown: bool,
    /// Counter backing deterministic ids for gateway-submitted orders.
    gateway_counter: u64,
}

impl<Clock, Dispatch> Engine<Clock, Dispatch>
where
    Clock: EngineClock,
    Dispatch: ExecutionDispatch,
{
    pub fn new(
        clock: Clock,
        config: EngineConfig,
        symbols: SymbolSet,
        oms: Oms,
        risk: RiskEngine,
        breaker: TradingBreaker,
        runtime: StrategyRuntime,
        execution: Dispatch,
    ) -> Self {
        let books = BookManager::new(symbols.symbols().map(|keyed| keyed.key), 10);

        Self {
            clock,
            sequence: Sequence::default(),
            config,
            symbols,
            books,
            oms,
            risk,
            breaker,
            runtime,
            execution,
            bus: EventBus::new(),
            trading: TradingState::Enabled,
            connectivity: FnvHashMap::default(),
            feedback: VecDeque::new(),
            reconcile_required: false,
            shutdown: false,
            gateway_counter: 0,
        }
    }

    /// Subscribe a bus consumer. Loop-thread only.
    pub fn subscribe(&mut self, topic: Topic, tx: BusTx) {
        self.bus.subscribe(topic, tx)
    }

    /// Gate submissions behind a mandatory reconcile, eg/ after WAL replay.
    pub fn require_reconcile(&mut self) {
        self.reconcile_required = true;
    }

    pub fn reconcile_required(&self) -> bool {
        self.reconcile_required
    }

    /// `true` once a shutdown has been processed, whether externally requested or
    /// internally initiated on a fatal error. The run loop must stop and flush.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Process one event, then any receipts it synchronously produced.
    ///
    /// The single entry point of all engine state mutation.
    pub fn process(&mut self, event: EngineEvent) {
        self.process_one(event);
        while let Some(feedback) = self.feedback.pop_front() {
            self.process_one(feedback);
        }
    }

    fn process_one(&mut self, event: EngineEvent) {
        self.sequence.fetch_add();
        if let Some(time_exchange) = event.time_exchange() {
            self.clock.observe(time_exchange);
        }
        let now = self.clock.time();

        match &event {
            EngineEvent::Shutdown(_) => {
                self.shutdown = true;
                self.bus.publish_system(SystemEvent::ShutdownRequested, now);
                return;
            }
            EngineEvent::Command(command) => self.action(command.clone(), now),
            EngineEvent::Market(market) => self.update_from_market(market, now),
            EngineEvent::Trading(trading) => self.update_from_receipt(trading, now),
            EngineEvent::System(system) => self.update_from_system(system, now),
            EngineEvent::ExecutionFailure(failure) => {
                self.update_from_execution_failure(failure, now)
            }
        }

        // Strategies observe the event only after state is consistent with it
        let actions = self.runtime.deliver(&event);
        self.route_actions(actions, now);
    }

    /// Periodic timer hook: strategy timers and parked-receipt expiry.
    pub fn on_timer(&mut self) {
        let now = self.clock.time();

        let ttl = TimeDelta::from_std(self.config.orphan_receipt_ttl)
            .unwrap_or_else(|_| TimeDelta::seconds(60));
        for orphan in self.oms.expire_parked(ttl, now) {
            self.bus.publish_system(orphan, now);
        }

        let actions = self.runtime.deliver_timer(now);
        self.route_actions(actions, now);

        while let Some(feedback) = self.feedback.pop_front() {
            self.process_one(feedback);
        }
    }

    fn update_from_market(
        &mut self,
        market: &MarketEvent<SymbolIndex, MarketDataKind>,
        now: DateTime<Utc>,
    ) {
        let action = match &market.kind {
            MarketDataKind::BookUpdate(update) => {
                self.books.update(market.symbol, update.clone(), now)
            }
            MarketDataKind::BookSnapshot(snapshot) => {
                self.books.apply_snapshot(market.symbol, snapshot, now)
            }
            _ => BookAction::None,
        };

        if let BookAction::Resync(error) = action {
            warn!(symbol = %market.symbol, %error, "book sequence gap - resync required");
            if let veloz_data::error::DataError::InvalidSequence {
                last_update_id,
                first_update_id,
            } = error
            {
                self.bus.publish_system(
                    SystemEvent::SnapshotGap {
                        symbol: market.symbol,
                        last_update_id,
                        first_update_id,
                    },
                    now,
                );
            }
        }

        // Simulated venues match resting orders against the tape
        let receipts = self.execution.on_market(market);
        self.feedback.extend(receipts);

        self.bus.publish_market(market.clone(), now);
    }

    fn update_from_receipt(&mut self, trading: &TradingEvent, now: DateTime<Utc>) {
        // Breaker health signals derived from the receipt kind
        match &trading.kind {
            TradingEventKind::OrderAccepted(_) => self.breaker.record_accept(),
            TradingEventKind::OrderRejected(_) => self.breaker.record_reject(now),
            _ => {}
        }

        let notices = self.oms.apply_trading_event(trading, now);
        self.publish_notices(notices, now);
        self.bus.publish_trading(trading.clone(), now);
    }

    fn publish_notices(&mut self, notices: Vec<OmsNotice>, now: DateTime<Utc>) {
        for notice in notices {
            match notice {
                OmsNotice::System(system) => self.bus.publish_system(system, now),
                OmsNotice::OrderUpdated(order) => {
                    match order.status {
                        OrderStatus::Filled => {
                            self.runtime.record_filled(
                                &order.strategy,
                                order.filled_quantity,
                                order.avg_fill_price,
                            );
                        }
                        OrderStatus::Canceled => self.runtime.record_cancelled(&order.strategy),
                        OrderStatus::Rejected => self.runtime.record_rejected(&order.strategy),
                        _ => {}
                    }

                    if order.status.is_terminal() {
                        self.runtime.release_budget(&order.strategy, &order.cid);
                    }
                }
                OmsNotice::PositionUpdated(position) => {
                    self.runtime
                        .record_realized_pnl(&position.strategy, position.realized_pnl);
                }
            }
        }
    }

    fn update_from_system(&mut self, system: &SystemEvent, now: DateTime<Utc>) {
        match system {
            SystemEvent::Connected { venue } => {
                let previous = self.connectivity.insert(*venue, Connectivity::Healthy);
                if previous == Some(Connectivity::Reconnecting) {
                    // Books resync from fresh snapshots; OMS truth re-established by
                    // the mandatory reconcile
                    info!(%venue, "venue reconnected - reconcile required");
                    self.reconcile_required = true;
                }
            }
            SystemEvent::Disconnected { venue } => {
                self.connectivity.insert(*venue, Connectivity::Reconnecting);
                self.invalidate_books_for_venue(*venue);
            }
            _ => {}
        }

        self.bus.publish_system(system.clone(), now);
    }

    fn invalidate_books_for_venue(&mut self, venue: VenueId) {
        let affected: Vec<SymbolIndex> = self
            .symbols
            .symbols()
            .filter(|keyed| keyed.value.venue == venue)
            .map(|keyed| keyed.key)
            .collect();
        for symbol in affected {
            self.books.invalidate(&symbol);
        }
    }

    fn update_from_execution_failure(&mut self, failure: &ExecutionFailure, now: DateTime<Utc>) {
        match &failure.error {
            ExecutionError::Timeout => {
                // Outcome unknown: persist the attempt and let the reconciler resolve it
                self.oms.record_timeout_pending(&failure.cid, now);
                self.reconcile_required = true;
            }
            ExecutionError::Transport(_) => {
                // Retries exhausted and the send itself failed; outcome equally unknown
                self.oms.record_timeout_pending(&failure.cid, now);
                self.reconcile_required = true;
            }
            ExecutionError::CircuitOpen(venue) => {
                self.bus
                    .publish_system(SystemEvent::CircuitTripped { venue: *venue }, now);
                self.reject_locally(&failure.cid, failure.op, now);
            }
            ExecutionError::Business(reason) => {
                if matches!(reason, veloz_execution::error::BusinessReason::RateLimited) {
                    self.bus
                        .publish_system(SystemEvent::RateLimited { venue: failure.venue }, now);
                }
                self.breaker.record_reject(now);
                self.reject_locally(&failure.cid, failure.op, now);
            }
            kind @ (ExecutionError::Protocol(_) | ExecutionError::Internal(_)) => {
                if kind.is_unrecoverable() {
                    // Invariant violation inside the execution plane: fatal. The engine
                    // stops after this event; the run loop flushes the WAL on the way out.
                    error!(cid = %failure.cid, ?kind, "fatal internal execution error - shutting down");
                    self.feedback.push_back(EngineEvent::shutdown());
                } else {
                    self.breaker.record_reject(now);
                    self.reject_locally(&failure.cid, failure.op, now);
                }
            }
        }

        self.bus.publish_system(
            SystemEvent::HandlerError {
                detail: format!("{:?} {} failed: {}", failure.op, failure.cid, failure.error),
            },
            now,
        );
    }

    fn reject_locally(&mut self, cid: &ClientOrderId, op: ExecOp, now: DateTime<Utc>) {
        // A failed cancel leaves the order as-is; a failed place terminates it
        if op == ExecOp::Place {
            if let Some(order) = self.oms.force_local_state(cid, OrderStatus::Rejected, now) {
                self.runtime.record_rejected(&order.strategy);
            }
        }
    }

    fn action(&mut self, command: Command, now: DateTime<Utc>) {
        match command {
            Command::Place {
                strategy,
                symbol,
                intent,
            } => {
                info!(%strategy, %symbol, "engine actioning gateway place");
                self.place_from_gateway(strategy, symbol, intent, now);
            }
            Command::Cancel { cid } => {
                info!(%cid, "engine actioning gateway cancel");
                self.dispatch_cancel(&cid);
            }
            Command::Query { .. } => {
                // Reads are served synchronously by the gateway against engine state
            }
            Command::StrategyStart { strategy } => {
                self.runtime.start(&strategy);
            }
            Command::StrategyStop { strategy } => {
                self.runtime.stop(&strategy);
            }
            Command::StrategyParams { strategy, params } => {
                match self.runtime.update_params(&strategy, params) {
                    Ok(version) => self.oms.record_param_update(&strategy, version, now),
                    Err(error) => warn!(%strategy, ?error, "strategy params update refused"),
                }
            }
            Command::KillSwitch { engaged } => {
                self.breaker.set_kill_switch(engaged, now);
                self.trading = if engaged {
                    TradingState::Disabled
                } else {
                    TradingState::Enabled
                };
                self.publish_breaker_state(now);
            }
        }
    }

    /// Place an order on behalf of the gateway, returning the idempotency key the caller
    /// should report.
    pub fn place_from_gateway(
        &mut self,
        strategy: StrategyId,
        symbol: SymbolIndex,
        spec: PlaceSpec,
        now: DateTime<Utc>,
    ) -> ClientOrderId {
        self.gateway_counter += 1;
        let counter = self.gateway_counter;
        let PlaceSpec {
            side,
            kind,
            time_in_force,
            quantity,
            price,
            cid_override,
        } = spec;

        let intent = OrderIntent::new(
            strategy, counter, symbol, side, kind, time_in_force, quantity, price, None, false, 0,
        );
        let cid = cid_override.unwrap_or_else(|| intent.client_order_id());
        self.submit_intent(intent, Some(cid.clone()), now);
        cid
    }

    fn publish_breaker_state(&mut self, now: DateTime<Utc>) {
        let state = self.breaker.state();
        let reason = self.breaker.trip_reason().map(ToString::to_string);
        self.bus.publish_system(
            SystemEvent::TradingBreaker {
                state: state.to_string(),
                reason,
            },
            now,
        );
    }

    fn route_actions(&mut self, actions: Vec<(StrategyId, StrategyAction)>, now: DateTime<Utc>) {
        for (strategy, action) in actions {
            match action {
                StrategyAction::Open(request) => {
                    // Gate before reserving budget; `submit_intent` re-checks for the
                    // gateway path
                    if self.trading == TradingState::Disabled
                        || self.reconcile_required
                        || !self.breaker.allows(TradeOp::Place, &strategy, now)
                    {
                        debug!(%strategy, "open dropped before budget reservation");
                        continue;
                    }

                    let reference_mid = self.reference_mid(request.symbol);
                    let Some(intent) =
                        self.runtime.build_intent(&strategy, &request, reference_mid)
                    else {
                        continue;
                    };
                    self.submit_intent(intent, None, now);
                }
                StrategyAction::Cancel(cancel) => {
                    if !self.breaker.allows(TradeOp::Cancel, &strategy, now) {
                        continue;
                    }
                    self.dispatch_cancel(&cancel.cid);
                }
            }
        }
    }

    fn reference_mid(&self, symbol: SymbolIndex) -> Option<Decimal> {
        self.books
            .book(&symbol)
            .filter(|sync| sync.snapshot_ready())
            .and_then(|sync| sync.book().mid_price())
    }

    fn risk_context(&self, intent: &OrderIntent) -> RiskContext {
        let symbol = self.symbols.find(intent.symbol).ok();
        let available_funds = symbol
            .map(|symbol| {
                self.oms
                    .accounts
                    .free(symbol.venue, &symbol.underlying.quote)
            })
            .unwrap_or_default();
        let position_quantity = self
            .oms
            .position(&intent.strategy, intent.symbol)
            .map(|position| position.signed_quantity)
            .unwrap_or_default();
        let account_notional = self.oms.gross_notional();

        RiskContext {
            available_funds,
            reference_mid: self.reference_mid(intent.symbol),
            position_quantity,
            account_notional,
            equity: available_funds + account_notional,
        }
    }

    fn submit_intent(
        &mut self,
        intent: OrderIntent,
        cid_override: Option<ClientOrderId>,
        now: DateTime<Utc>,
    ) {
        // Every submit path (strategy, gateway) passes the same gates
        if self.trading == TradingState::Disabled {
            debug!(strategy = %intent.strategy, "intent dropped: trading disabled");
            return;
        }
        if self.reconcile_required {
            debug!(strategy = %intent.strategy, "intent dropped: reconcile pending");
            return;
        }
        if !self.breaker.allows(TradeOp::Place, &intent.strategy, now) {
            debug!(strategy = %intent.strategy, "intent dropped: trading breaker");
            return;
        }

        let Ok(symbol) = self.symbols.find(intent.symbol).map(Symbol::clone) else {
            warn!(symbol = %intent.symbol, "intent dropped: symbol not configured");
            return;
        };

        let context = self.risk_context(&intent);
        let strategy = intent.strategy.clone();
        // The id `build_intent` reserved budget under; releasing it is a no-op for
        // gateway placements that never reserved
        let budget_cid = intent.client_order_id();

        let approved = match self.risk.check_intent(&symbol, intent, &context, now) {
            Ok(approved) => approved,
            Err(refused) => {
                debug!(%strategy, reason = %refused.reason, "intent refused by risk engine");
                self.runtime.record_rejected(&strategy);
                self.runtime.release_budget(&strategy, &budget_cid);
                return;
            }
        };

        match self
            .oms
            .prepare_submit_with_cid(approved.into_item(), cid_override, now)
        {
            Ok(PrepareSubmit::New {
                order,
                intent,
                commit,
            }) => {
                self.runtime.record_submitted(&strategy);
                let receipts = self
                    .execution
                    .place(symbol, order.cid.clone(), intent, commit);
                self.feedback.extend(receipts);
            }
            Ok(PrepareSubmit::Existing(order)) => {
                debug!(cid = %order.cid, "duplicate submit: no adapter call made");
                self.runtime.release_budget(&strategy, &budget_cid);
            }
            Err(error) => {
                warn!(?error, "prepare_submit failed");
                self.runtime.release_budget(&strategy, &budget_cid);
                self.bus.publish_system(
                    SystemEvent::HandlerError {
                        detail: format!("prepare_submit failed: {error}"),
                    },
                    now,
                );
            }
        }
    }

    fn dispatch_cancel(&mut self, cid: &ClientOrderId) {
        let Some(order) = self.oms.order(cid) else {
            warn!(%cid, "cancel dropped: unknown order");
            return;
        };
        let Ok(symbol) = self.symbols.find(order.symbol).map(Symbol::clone) else {
            return;
        };

        let order_ref = match &order.void {
            Some(void) => OrderRef::Venue(void.clone()),
            None => OrderRef::Client(cid.clone()),
        };
        let receipts = self.execution.cancel(symbol, cid.clone(), order_ref);
        self.feedback.extend(receipts);
    }

    /// Apply the outcome of a reconcile sweep (assembled off-loop by the reconciler).
    pub fn apply_reconcile_report(&mut self, report: ReconcileReport) {
        let now = self.clock.time();
        let was_required = self.reconcile_required;

        for outcome in report.outcomes {
            match outcome {
                ReconcileOutcome::OrphanOrder { cid } => {
                    // Venue does not know the order: locally cancel, stop acting on it
                    if let Some(order) =
                        self.oms.force_local_state(&cid, OrderStatus::Canceled, now)
                    {
                        self.runtime.record_cancelled(&order.strategy);
                    }
                    self.bus
                        .publish_system(SystemEvent::OrphanOrder { cid }, now);
                }
                ReconcileOutcome::ForeignOrder {
                    venue,
                    void,
                    symbol,
                    cancel,
                } => {
                    self.bus
                        .publish_system(SystemEvent::ForeignOrder { void: void.clone() }, now);
                    match symbol.and_then(|symbol| self.symbols.find(symbol).ok().cloned()) {
                        Some(symbol) if cancel => {
                            let receipts = self.execution.cancel(
                                symbol,
                                ClientOrderId::new(void.0.clone()),
                                OrderRef::Venue(void),
                            );
                            self.feedback.extend(receipts);
                        }
                        _ => debug!(%venue, "foreign order left in place per policy"),
                    }
                }
                ReconcileOutcome::StateDivergence {
                    venue,
                    cid,
                    status,
                    filled_quantity,
                    avg_fill_price,
                    detail,
                } => {
                    // The venue is authoritative: overwrite the projection
                    self.oms.overwrite_from_venue(
                        &cid,
                        status,
                        filled_quantity,
                        avg_fill_price,
                        now,
                    );
                    self.bus
                        .publish_system(SystemEvent::ReconcilerDivergence { venue, detail }, now);
                }
                ReconcileOutcome::BalanceDivergence {
                    venue,
                    balances,
                    within_tolerance,
                    detail,
                } => {
                    self.oms.accounts.venue_mut(venue).overwrite(balances);
                    if within_tolerance {
                        self.bus.publish_system(
                            SystemEvent::ReconcilerDivergence { venue, detail },
                            now,
                        );
                    } else {
                        // Beyond tolerance: freeze strategies until operators acknowledge
                        self.runtime.freeze_all();
                        self.bus
                            .publish_system(SystemEvent::BalanceDivergence { venue, detail }, now);
                    }
                }
                ReconcileOutcome::BalancesClean { venue, balances } => {
                    self.oms.accounts.venue_mut(venue).overwrite(balances);
                }
            }
        }

        self.reconcile_required = false;
        if was_required {
            info!("mandatory reconcile complete - submissions re-enabled");
        }

        while let Some(feedback) = self.feedback.pop_front() {
            self.process_one(feedback);
        }
    }

    /// Capture the engine-side inputs of a reconcile sweep for `venue`.
    ///
    /// Called on the loop thread; the returned views are owned so the sweep can run
    /// off-loop against the venue.
    pub fn reconcile_views(
        &self,
        venue: VenueId,
    ) -> (
        Vec<(SymbolIndex, Symbol)>,
        Vec<LocalOrderView>,
        Vec<(AssetName, Balance)>,
    ) {
        let symbols: Vec<_> = self
            .symbols
            .symbols()
            .filter(|keyed| keyed.value.venue == venue)
            .map(|keyed| (keyed.key, keyed.value.clone()))
            .collect();

        let venue_symbols: Vec<SymbolIndex> = symbols.iter().map(|(index, _)| *index).collect();

        let local_active = self
            .oms
            .active_orders()
            .filter(|order| venue_symbols.contains(&order.symbol))
            .map(|order| LocalOrderView {
                cid: order.cid.clone(),
                void: order.void.clone(),
                symbol: order.symbol,
                status: order.status,
                filled_quantity: order.filled_quantity,
                avg_fill_price: order.avg_fill_price,
                time_created: order.time_created,
            })
            .collect();

        let local_balances = self
            .oms
            .accounts
            .venue(venue)
            .map(|projection| {
                projection
                    .iter()
                    .map(|(asset, balance)| (asset.clone(), *balance))
                    .collect()
            })
            .unwrap_or_default();

        (symbols, local_active, local_balances)
    }
}
