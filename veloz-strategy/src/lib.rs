#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # VeloZ-Strategy
//! Strategy interfaces hosted by the VeloZ runtime.
//!
//! A [`Strategy`] is a pure event processor: it receives engine events, never blocks, never
//! performs I/O, and expresses its desires as [`StrategyAction`]s the runtime routes through
//! risk, the OMS and the venue adapters. Parameters are hot-updatable and versioned; the
//! active version is stamped on every intent the strategy produces for later attribution.

use chrono::{DateTime, Utc};
use derive_more::{Constructor, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use veloz_execution::order::{
    OrderKind, TimeInForce,
    id::{ClientOrderId, StrategyId},
};
use veloz_instrument::{Side, symbol::SymbolIndex};

/// Versioned, hot-updatable strategy parameters.
pub mod params;

/// Registry of hosted strategy instances and their lifecycle states.
pub mod registry;

/// Per-strategy order budget enforced by the runtime before the global risk engine.
pub mod budget;

/// A strategy's desire, expressed to the runtime.
///
/// The runtime owns identity: it assigns the intent counter, stamps the active parameter
/// version, and routes the resulting [`OrderIntent`](veloz_execution::order::OrderIntent)
/// through the risk engine and OMS.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, From)]
pub enum StrategyAction {
    Open(OpenRequest),
    Cancel(CancelRequest),
}

/// Draft of an order open, before the runtime assigns identity.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OpenRequest {
    pub symbol: SymbolIndex,
    pub side: Side,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct CancelRequest {
    pub cid: ClientOrderId,
}

/// Errors surfaced by strategy implementations.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error, Deserialize, Serialize)]
pub enum StrategyError {
    #[error("invalid params for strategy {strategy}: {reason}")]
    InvalidParams { strategy: StrategyId, reason: String },
}

/// The capability set every hosted strategy implements.
///
/// Generic over the engine `Event` type so this crate stays independent of the engine's
/// event bus; the runtime instantiates it with the full engine event.
///
/// Implementations must return promptly: the runtime is single-threaded and any blocking
/// here stalls the whole engine.
pub trait Strategy<Event>: std::fmt::Debug {
    fn id(&self) -> StrategyId;

    /// Apply (possibly hot-updated) parameters. Called once before `on_start` and again on
    /// every `STRATEGY PARAMS` control command.
    fn apply_params(&mut self, params: &serde_json::Value) -> Result<(), StrategyError>;

    fn on_start(&mut self) {}

    /// Process one engine event, returning any actions to route.
    fn on_event(&mut self, event: &Event) -> Vec<StrategyAction>;

    /// Periodic timer delivery; `now` is engine time (simulated during replay).
    fn on_timer(&mut self, _now: DateTime<Utc>) -> Vec<StrategyAction> {
        Vec::new()
    }

    fn on_stop(&mut self) {}

    /// Drop accumulated state, returning to the post-`initialize` condition.
    fn reset(&mut self) {}
}
