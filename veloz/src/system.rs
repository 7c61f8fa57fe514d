use crate::{
    config::EngineConfig,
    engine::{Engine, TradingState, clock::LiveClock, router::{ExecutionRouter, FeedClosed}},
    error::EngineError,
    event::{Command, EngineEvent, SystemEvent},
    gateway::{GatewayRequest, GatewayResponse},
    oms::Oms,
    reconciler::{ReconcileReport, Reconciler},
    replay::{ReplayEnvironment, market_data::load_market_events, matching::MatchingConfig},
    runtime::StrategyRuntime,
};
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use veloz_execution::{client::VenueClient, resilient::Resilient, venue::VenueAdapter};
use veloz_instrument::{index::SymbolSet, venue::VenueId};
use veloz_integration::channel::{UnboundedRx, UnboundedTx, mpsc_unbounded};
use veloz_risk::{breaker::TradingBreaker, engine::RiskEngine};
use veloz_wal::{
    replay::{next_sequence, replay_dir},
    snapshot::SnapshotStore,
    writer::{WalNotice, WalWriter},
};

/// Everything the run loop can receive.
#[derive(Debug)]
pub enum EngineInput {
    Event(EngineEvent),
    Request(GatewayRequest, oneshot::Sender<GatewayResponse>),
    Reconcile(ReconcileReport),
    /// Periodic reconcile tick from the event loop's timer wheel.
    ReconcileTick,
    /// Periodic housekeeping tick (orphan expiry, strategy timers).
    Housekeeping,
}

/// Transmitter used by collaborators (gateway, market sources) to reach the run loop.
pub type InputTx = mpsc::UnboundedSender<EngineInput>;

/// A fully-assembled live engine, ready to run.
#[derive(Debug)]
pub struct EngineSystem {
    pub engine: Engine<LiveClock, ExecutionRouter>,
    pub reconciler: Reconciler,
    input_tx: InputTx,
    input_rx: mpsc::UnboundedReceiver<EngineInput>,
    feed_rx: UnboundedRx<EngineEvent>,
    wal_notice_rx: mpsc::UnboundedReceiver<WalNotice>,
    positions: SnapshotStore,
    backtest_counter: u64,
}

impl EngineSystem {
    /// Assemble a live engine: replay the WAL, restore the OMS, spawn the WAL writer, and
    /// wire venue adapters through the execution router.
    ///
    /// A mandatory reconcile is armed after restore; strategies cannot submit until the
    /// first sweep completes.
    pub fn init(
        config: EngineConfig,
        symbols: SymbolSet,
        runtime: StrategyRuntime,
        adapters: Vec<Resilient<VenueAdapter>>,
    ) -> Result<Self, EngineError> {
        std::fs::create_dir_all(config.wal_dir())
            .map_err(|error| EngineError::Config(error.to_string()))?;

        // Crash recovery: rebuild OMS state from the log before anything else runs
        let (records, truncation) = replay_dir(&config.wal_dir())?;
        let next_seq = next_sequence(&records);

        let (wal_notice_tx, wal_notice_rx) = mpsc::unbounded_channel();
        let (wal_handle, _wal_join) =
            WalWriter::spawn(config.wal_config(), next_seq, wal_notice_tx)?;

        let mut oms = Oms::new(Some(wal_handle));
        oms.restore(&records, Utc::now())?;

        let positions = SnapshotStore::new(config.positions_dir())?;

        let (feed_tx, feed_rx): (UnboundedTx<EngineEvent, FeedClosed>, _) = mpsc_unbounded();
        let mut router = ExecutionRouter::new(feed_tx);
        for adapter in adapters {
            router.add_venue(adapter.venue(), adapter);
        }

        let mut engine = Engine::new(
            LiveClock,
            config.clone(),
            symbols,
            oms,
            RiskEngine::new(config.risk.clone()),
            TradingBreaker::new(config.trading_breaker.clone()),
            runtime,
            router,
        );

        // Replay is never trusted alone: venue truth must confirm it
        engine.require_reconcile();
        if let Some(truncation) = truncation {
            warn!(?truncation, "WAL replay truncated at torn record");
            engine.bus.publish_system(
                SystemEvent::WalTruncated {
                    at_seq: truncation.at_seq,
                },
                Utc::now(),
            );
        }

        let (input_tx, input_rx) = mpsc::unbounded_channel();

        info!(
            orders_restored = engine.oms.orders().count(),
            "engine system initialised"
        );

        Ok(Self {
            engine,
            reconciler: Reconciler::default(),
            input_tx,
            input_rx,
            feed_rx,
            wal_notice_rx,
            positions,
            backtest_counter: 0,
        })
    }

    /// Handle used by the gateway and market sources to reach the loop.
    pub fn input_tx(&self) -> InputTx {
        self.input_tx.clone()
    }

    /// Run the engine loop until a `Shutdown` event is processed.
    ///
    /// All engine state is touched only inside this task. Venue I/O, WAL fsync and
    /// reconcile sweeps run elsewhere and re-enter through the channels selected here;
    /// periodic work arrives as ticks from the cooperative [`EventLoop`]'s timer wheel.
    pub async fn run(mut self) {
        let loop_handle = self.spawn_timer_loop();

        // An immediate sweep services the mandatory post-replay reconcile
        self.spawn_reconcile_sweeps();

        loop {
            tokio::select! {
                input = self.input_rx.recv() => {
                    match input {
                        Some(EngineInput::Event(event)) => {
                            self.engine.process(event);
                            if self.engine.is_shutdown() {
                                break;
                            }
                        }
                        Some(EngineInput::Request(request, response_tx)) => {
                            let response = self.serve(request);
                            let _ = response_tx.send(response);
                        }
                        Some(EngineInput::Reconcile(report)) => {
                            self.engine.apply_reconcile_report(report);
                            if self.engine.is_shutdown() {
                                break;
                            }
                        }
                        Some(EngineInput::ReconcileTick) => {
                            self.spawn_reconcile_sweeps();
                        }
                        Some(EngineInput::Housekeeping) => {
                            self.engine.on_timer();
                        }
                        None => break,
                    }
                }
                event = self.feed_rx.rx.recv() => {
                    if let Some(event) = event {
                        // A fatal failure inside processing (eg/ an internal execution
                        // error) initiates shutdown from here too
                        self.engine.process(event);
                        if self.engine.is_shutdown() {
                            break;
                        }
                    }
                }
                notice = self.wal_notice_rx.recv() => {
                    match notice {
                        Some(WalNotice::Rotated { closed_index }) => {
                            // Position snapshots pair with closed segments
                            let snapshot = self.engine.oms.positions_snapshot();
                            if let Err(error) = self.positions.write(closed_index, &snapshot) {
                                error!(?error, "positions snapshot write failed");
                            }
                        }
                        Some(WalNotice::CommitFailed(error)) => {
                            error!(%error, "WAL commit failed - engine halting");
                            self.engine.process(EngineEvent::shutdown());
                            break;
                        }
                        None => {}
                    }
                }
            }
        }

        loop_handle.stop();

        // Final flush attempted on every shutdown path: resolve pending WAL commits and
        // stop the writer thread
        if let Some(wal) = self.engine.oms.wal_handle() {
            wal.shutdown().await;
        }

        info!("engine system shutting down");
    }

    /// Spawn the cooperative event loop carrying the system's periodic timers.
    ///
    /// Ticks re-enter the run loop through the input channel, so all engine mutation stays
    /// on this task.
    fn spawn_timer_loop(&self) -> crate::engine::event_loop::LoopHandle {
        let mut event_loop = crate::engine::event_loop::EventLoop::new(Box::new(|error| {
            error!(?error, "timer loop handler failed");
        }));

        let reconcile_tx = self.input_tx.clone();
        event_loop.every(self.engine.config.reconcile_interval, move |_now| {
            reconcile_tx
                .send(EngineInput::ReconcileTick)
                .map_err(|_| EngineError::Recoverable("engine input channel closed".into()))
        });

        let housekeeping_tx = self.input_tx.clone();
        event_loop.every(std::time::Duration::from_secs(1), move |_now| {
            housekeeping_tx
                .send(EngineInput::Housekeeping)
                .map_err(|_| EngineError::Recoverable("engine input channel closed".into()))
        });

        let handle = event_loop.handle();
        tokio::spawn(async move { event_loop.run().await });
        handle
    }

    /// Start one off-loop sweep per configured venue; reports re-enter via the input
    /// channel.
    fn spawn_reconcile_sweeps(&self) {
        for venue in self.engine.execution.venues().collect::<Vec<_>>() {
            let Some(adapter) = self.engine.execution.adapter(venue).cloned() else {
                continue;
            };
            let (symbols, local_active, local_balances) = self.engine.reconcile_views(venue);
            let reconciler = self.reconciler.clone();
            let input_tx = self.input_tx.clone();

            tokio::spawn(async move {
                match reconciler
                    .sweep(&*adapter, &symbols, local_active, local_balances, Utc::now())
                    .await
                {
                    Ok(report) => {
                        let _ = input_tx.send(EngineInput::Reconcile(report));
                    }
                    Err(error) => {
                        warn!(%venue, ?error, "reconcile sweep failed; retrying next interval");
                    }
                }
            });
        }
    }

    /// Serve one gateway request against live engine state.
    fn serve(&mut self, request: GatewayRequest) -> GatewayResponse {
        let now = Utc::now();

        match request {
            GatewayRequest::Ping => GatewayResponse::ok_with("PONG"),
            GatewayRequest::Status => {
                let state = if self.engine.reconcile_required() {
                    "reconciling".to_string()
                } else if self.engine.trading == TradingState::Disabled {
                    "trading_disabled".to_string()
                } else {
                    format!("running breaker={}", self.engine.breaker_state())
                };
                GatewayResponse::ok_with(state)
            }
            GatewayRequest::OrderPlace {
                symbol,
                spec,
                strategy,
            } => {
                // Resolve the venue-qualified symbol: first configured venue that lists it
                let resolved = self
                    .engine
                    .symbols
                    .venues()
                    .collect::<Vec<_>>()
                    .into_iter()
                    .find_map(|venue| {
                        self.engine
                            .symbols
                            .find_by_venue_name(venue, &symbol)
                            .ok()
                    });

                match resolved {
                    Some(index) => {
                        let cid = self.engine.place_from_gateway(strategy, index, spec, now);
                        GatewayResponse::ok_with(cid.0.as_str())
                    }
                    None => GatewayResponse::err(format!("unknown symbol: {symbol}")),
                }
            }
            GatewayRequest::OrderCancel { cid } => {
                if self.engine.oms.order(&cid).is_none() {
                    return GatewayResponse::err(format!("unknown order: {cid}"));
                }
                self.engine.process(EngineEvent::Command(Command::Cancel { cid }));
                GatewayResponse::ok()
            }
            GatewayRequest::OrderQuery { cid } => match self.engine.oms.order(&cid) {
                Some(order) => match serde_json::to_string(order) {
                    Ok(json) => GatewayResponse::ok_with(json),
                    Err(error) => GatewayResponse::err(format!("serialise: {error}")),
                },
                None => GatewayResponse::err(format!("unknown order: {cid}")),
            },
            GatewayRequest::StrategyStart { strategy } => {
                if self.engine.runtime.start(&strategy) {
                    GatewayResponse::ok()
                } else {
                    GatewayResponse::err(format!("unknown strategy: {strategy}"))
                }
            }
            GatewayRequest::StrategyStop { strategy } => {
                if self.engine.runtime.stop(&strategy) {
                    GatewayResponse::ok()
                } else {
                    GatewayResponse::err(format!("unknown strategy: {strategy}"))
                }
            }
            GatewayRequest::StrategyParams { strategy, params } => {
                match self.engine.runtime.update_params(&strategy, params) {
                    Ok(version) => {
                        self.engine.oms.record_param_update(&strategy, version, now);
                        GatewayResponse::ok_with(version.to_string())
                    }
                    Err(error) => GatewayResponse::err(error.to_string()),
                }
            }
            GatewayRequest::StrategyMetrics { strategy } => {
                match self.engine.runtime.metrics(&strategy) {
                    Some(metrics) => match serde_json::to_string(metrics) {
                        Ok(json) => GatewayResponse::ok_with(json),
                        Err(error) => GatewayResponse::err(format!("serialise: {error}")),
                    },
                    None => GatewayResponse::err(format!("unknown strategy: {strategy}")),
                }
            }
            GatewayRequest::BacktestRun { config } => {
                self.backtest_counter += 1;
                let run_id = format!("bt-{}", self.backtest_counter);
                match self.spawn_backtest(&run_id, config) {
                    Ok(()) => GatewayResponse::ok_with(run_id),
                    Err(error) => GatewayResponse::err(error.to_string()),
                }
            }
            GatewayRequest::KillSwitch { engaged } => {
                self.engine
                    .process(EngineEvent::Command(Command::KillSwitch { engaged }));
                GatewayResponse::ok()
            }
        }
    }

    fn spawn_backtest(
        &self,
        run_id: &str,
        config: serde_json::Value,
    ) -> Result<(), EngineError> {
        #[derive(serde::Deserialize)]
        struct BacktestSpec {
            market_data: PathBuf,
            #[serde(default)]
            matching: Option<MatchingConfig>,
            /// Starting `(asset, total)` balances on the simulated venue.
            #[serde(default)]
            initial_balances: Vec<(String, rust_decimal::Decimal)>,
        }

        let spec: BacktestSpec = serde_json::from_value(config)
            .map_err(|error| EngineError::Config(format!("backtest config: {error}")))?;

        let symbols = self.engine.symbols.clone();
        let engine_config = self.engine.config.clone();
        let run_id = run_id.to_string();

        tokio::spawn(async move {
            let events = match load_market_events(&spec.market_data) {
                Ok(events) => events,
                Err(error) => {
                    error!(%run_id, ?error, "backtest data load failed");
                    return;
                }
            };

            let start_time = events
                .first()
                .map(|event| event.time_exchange)
                .unwrap_or_else(Utc::now);

            let mut replay = ReplayEnvironment::new(
                start_time,
                engine_config,
                spec.matching.unwrap_or_default(),
                symbols,
                StrategyRuntime::new(),
            );
            replay.seed_balances(
                VenueId::Sim,
                spec.initial_balances
                    .into_iter()
                    .map(|(asset, total)| {
                        veloz_execution::event::AssetBalance::new(
                            veloz_instrument::asset::AssetName::new(asset.as_str()),
                            veloz_execution::event::Balance::new(total, total),
                            start_time,
                        )
                    })
                    .collect(),
            );
            let summary = replay.run(events);
            info!(%run_id, ?summary, "backtest complete");
        });

        Ok(())
    }
}
