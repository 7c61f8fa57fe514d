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

//! # VeloZ-Risk
//! Synchronous pre-trade gate on the VeloZ submit path.
//!
//! Every order intent passes the [`RiskEngine`](engine::RiskEngine) before the OMS persists
//! it: funds, position and leverage ceilings, per-strategy submit rate, price deviation
//! against the reference mid, and the venue minimums. All checks are O(1).
//!
//! The [`TradingBreaker`](breaker::TradingBreaker) sits above the checks: once `Tripped`
//! (drawdown breach, reject streak, latency anomaly, or the kill switch) only cancel
//! operations pass until a half-open probe succeeds.

use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};

/// Reusable primitive risk checks and notional utilities.
pub mod check;

/// The pre-trade [`RiskEngine`](engine::RiskEngine).
pub mod engine;

/// The trading circuit breaker (`Normal`/`Warning`/`Tripped`).
pub mod breaker;

/// Wrapper communicating the inner order request passed all risk checks.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct RiskApproved<T>(pub T);

impl<T> RiskApproved<T> {
    pub fn into_item(self) -> T {
        self.0
    }
}

/// Wrapper communicating the inner order request was refused, and why.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct RiskRefused<T, Reason = engine::RiskRefusal> {
    pub item: T,
    pub reason: Reason,
}

impl<T, Reason> RiskRefused<T, Reason> {
    pub fn into_item(self) -> T {
        self.item
    }
}
