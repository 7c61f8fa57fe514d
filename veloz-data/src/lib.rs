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

//! # VeloZ-Data
//! Normalised market events and L2 order book reconstruction for the VeloZ trading engine.
//!
//! * **Events**: every venue feed is decoded into a [`MarketEvent`](event::MarketEvent)
//!   before it reaches the engine's event bus.
//! * **Books**: per-symbol L2 [`OrderBook`](books::OrderBook)s are rebuilt from snapshot +
//!   diff streams by a [`BookSynchronizer`](books::sync::BookSynchronizer) that buffers
//!   pre-snapshot diffs, enforces contiguous venue sequences, and demands a resynchronisation
//!   when it detects a gap.

/// All errors generated in `veloz-data`.
pub mod error;

/// Normalised market event model.
///
/// eg/ `MarketEvent<SymbolIndex, MarketDataKind>`.
pub mod event;

/// Market data subscription channels and identities.
pub mod subscription;

/// L2 order book: price levels, synchronisation from snapshot + diffs, microstructure views.
pub mod books;
