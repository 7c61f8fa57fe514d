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

//! # VeloZ-Execution
//! The execution plane of the VeloZ trading engine.
//!
//! * **Order model**: intents, identifiers, and the venue-facing order snapshot.
//! * **Trading events**: every venue response and user-stream message is normalised into a
//!   [`TradingEvent`](event::TradingEvent) before it reaches the engine's event bus.
//! * **Venue adapters**: the [`VenueClient`](client::VenueClient) capability surface with
//!   per-venue implementations, routed through a tagged-variant dispatch so the submit hot
//!   path stays free of virtual calls.
//! * **Resilience**: every adapter is decorated with retry/backoff and a circuit breaker,
//!   and throttled by per-venue priority token buckets (cancel > place > query).

use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// Venue error taxonomy and the execution error kinds.
pub mod error;

/// Order intents, identifiers and statuses.
pub mod order;

/// Normalised trading events and balances flowing back from venues.
pub mod event;

/// The [`VenueClient`](client::VenueClient) capability surface and capability flags.
pub mod client;

/// Per-venue priority token-bucket rate limiting.
pub mod rate_limit;

/// Retry/backoff and circuit breaking decorating every venue adapter.
pub mod resilient;

/// Per-venue adapter implementations.
pub mod venue;

/// API credentials used by private venue endpoints.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
}
