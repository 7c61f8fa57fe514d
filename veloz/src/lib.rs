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

//! # VeloZ
//! VeloZ core is an event-driven crypto trading engine: it turns a multi-venue market-data
//! stream into orders, routes them through resilient venue adapters, reconciles their
//! lifecycle against out-of-order venue receipts, and writes every transition ahead to a
//! durable, replayable log.
//!
//! At a high level it provides:
//! * A single-threaded cooperative [`EventLoop`](engine::event_loop::EventLoop) and typed
//!   [`EventBus`](bus::EventBus) carrying market, trading and system events.
//! * An [`Oms`](oms::Oms) owning orders, positions and account projections, serving
//!   idempotent submission by deterministic client order id with WAL-first durability.
//! * A [`Reconciler`](reconciler::Reconciler) that periodically diffs engine state against
//!   venue truth and repairs divergence (venue wins).
//! * A [`StrategyRuntime`](runtime::StrategyRuntime) hosting strategies behind the risk
//!   engine and trading circuit breaker.
//! * A [`ReplayEnvironment`](replay::ReplayEnvironment) driving the identical engine from
//!   historical events under a deterministic simulated clock and matching model.

use derive_more::{Constructor, From};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// System events and the engine's composite event type.
pub mod event;

/// All possible errors in VeloZ core.
pub mod error;

/// Environment-driven engine configuration.
pub mod config;

/// Default VeloZ tracing initialisers.
pub mod logging;

/// Typed publish/subscribe bus for one engine instance.
pub mod bus;

/// The engine: state, event processing, clock, and the cooperative event loop.
pub mod engine;

/// The order management system: the order state machine, positions, and account
/// projections.
pub mod oms;

/// Periodic diff of engine state against venue truth, with directed repair.
pub mod reconciler;

/// Strategy hosting: event delivery, intent routing through risk and the OMS.
pub mod runtime;

/// Deterministic historical replay for backtest and paper trading.
pub mod replay;

/// Line-oriented control protocol spoken with the gateway collaborator.
pub mod gateway;

/// Live system assembly: WAL recovery, venue wiring, and the run loop.
pub mod system;

/// A timed value.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Constructor,
)]
pub struct Timed<T> {
    pub value: T,
    pub time: DateTime<Utc>,
}

/// Monotonically increasing event sequence. Used to track engine event processing order.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
    Constructor, From,
)]
pub struct Sequence(pub u64);

impl Sequence {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn fetch_add(&mut self) -> Sequence {
        let sequence = *self;
        self.0 += 1;
        sequence
    }
}
