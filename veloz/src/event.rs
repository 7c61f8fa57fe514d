use chrono::{DateTime, Utc};
use derive_more::{Constructor, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use veloz_data::event::{MarketDataKind, MarketEvent};
use veloz_execution::{
    event::TradingEvent,
    order::id::{ClientOrderId, StrategyId, VenueOrderId},
};
use veloz_instrument::{symbol::SymbolIndex, venue::VenueId};
use veloz_integration::Terminal;

/// Engine-internal notifications: connectivity, gaps, divergences, breaker transitions.
///
/// Every failure in the engine produces one of these on the bus; nothing is suppressed
/// silently.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum SystemEvent {
    Connected {
        venue: VenueId,
    },
    Disconnected {
        venue: VenueId,
    },
    RateLimited {
        venue: VenueId,
    },
    /// A book diff broke the venue sequence; the symbol's book is invalid until resynced.
    SnapshotGap {
        symbol: SymbolIndex,
        last_update_id: u64,
        first_update_id: u64,
    },
    /// The reconciler overwrote engine state with venue truth.
    ReconcilerDivergence {
        venue: VenueId,
        detail: String,
    },
    /// Balance divergence beyond tolerance froze all strategies.
    BalanceDivergence {
        venue: VenueId,
        detail: String,
    },
    /// The venue transport circuit breaker opened.
    CircuitTripped {
        venue: VenueId,
    },
    /// The trading breaker changed state (cancel-only while tripped).
    TradingBreaker {
        state: String,
        reason: Option<String>,
    },
    /// A fill arrived for an order already in a terminal state; quantities were updated,
    /// the state was not reopened.
    LateFill {
        cid: ClientOrderId,
    },
    /// A receipt referencing an unknown venue order id expired unbound.
    OrphanReceipt {
        void: VenueOrderId,
    },
    /// The engine holds an order the venue does not know.
    OrphanOrder {
        cid: ClientOrderId,
    },
    /// The venue holds an order the engine does not know.
    ForeignOrder {
        void: VenueOrderId,
    },
    /// WAL replay stopped at a torn record.
    WalTruncated {
        at_seq: Option<u64>,
    },
    /// A loop handler returned an error; the loop continues.
    HandlerError {
        detail: String,
    },
    ShutdownRequested,
}

/// External trading directives actioned by the engine.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum Command {
    Place {
        strategy: StrategyId,
        symbol: SymbolIndex,
        intent: PlaceSpec,
    },
    Cancel {
        cid: ClientOrderId,
    },
    Query {
        cid: ClientOrderId,
    },
    StrategyStart {
        strategy: StrategyId,
    },
    StrategyStop {
        strategy: StrategyId,
    },
    StrategyParams {
        strategy: StrategyId,
        params: serde_json::Value,
    },
    KillSwitch {
        engaged: bool,
    },
}

/// Order fields of a `ORDER PLACE` command, before the OMS assigns identity.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct PlaceSpec {
    pub side: veloz_instrument::Side,
    pub kind: veloz_execution::order::OrderKind,
    pub time_in_force: veloz_execution::order::TimeInForce,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub cid_override: Option<ClientOrderId>,
}

/// Marker requesting the engine shut down gracefully.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
pub struct Shutdown;

/// A failed adapter call, delivered back to the loop for classification.
///
/// Successful calls come back as [`TradingEvent`]s; this variant exists because the error
/// taxonomy decides whether the OMS rejects, waits for the reconciler, or halts.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct ExecutionFailure {
    pub venue: VenueId,
    pub cid: ClientOrderId,
    pub op: ExecOp,
    pub error: veloz_execution::error::ExecutionError,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum ExecOp {
    Place,
    Cancel,
}

/// The composite event type processed by the engine loop.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, From)]
pub enum EngineEvent {
    Shutdown(Shutdown),
    Command(Command),
    Market(MarketEvent<SymbolIndex, MarketDataKind>),
    Trading(TradingEvent),
    System(SystemEvent),
    ExecutionFailure(ExecutionFailure),
}

impl Terminal for EngineEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }
}

impl EngineEvent {
    pub fn shutdown() -> Self {
        Self::Shutdown(Shutdown)
    }

    /// The symbol this event concerns, when it is symbol-scoped.
    pub fn symbol(&self) -> Option<SymbolIndex> {
        match self {
            Self::Market(event) => Some(event.symbol),
            _ => None,
        }
    }

    /// Exchange timestamp, used by the simulated clock during replay.
    pub fn time_exchange(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Market(event) => Some(event.time_exchange),
            Self::Trading(event) => Some(event.time_exchange),
            _ => None,
        }
    }
}
