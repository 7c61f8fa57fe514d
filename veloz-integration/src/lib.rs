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

//! # VeloZ-Integration
//! Low-level plumbing shared by the VeloZ trading engine crates.
//!
//! Provides the cross-thread and cross-component glue the engine is built on:
//! * **Channels**: a [`Tx`](channel::Tx) abstraction over channel transmitters, so components
//!   can send events without caring about the concrete channel kind.
//! * **Lock-free queues**: bounded and unbounded MPMC queues used for the engine's
//!   cross-thread task and WAL-buffer handoffs.
//! * **Socket errors**: the transport-level error type shared by REST and WebSocket venue
//!   plumbing.

use serde::{Deserialize, Serialize};

/// All transport-level [`Error`](std::error::Error)s generated in VeloZ-Integration.
pub mod error;

/// Defines a trait [`Tx`](channel::Tx) abstraction over different channel kinds, as well as
/// other channel utilities.
///
/// eg/ `UnboundedTx`, `ChannelTxDroppable`, etc.
pub mod channel;

/// Lock-free MPMC queues for cross-thread handoff.
///
/// eg/ `BoundedQueue` (backpressured), `UnboundedQueue` (Michael-Scott).
pub mod queue;

/// Defines a generic [`Snapshot`](snapshot::Snapshot) wrapper communicating that the inner
/// value is a point-in-time view of some state.
pub mod snapshot;

/// Determines if something is considered "unrecoverable", such as an unrecoverable error.
///
/// Note that the meaning of [`Unrecoverable`] may vary depending on the context.
pub trait Unrecoverable {
    fn is_unrecoverable(&self) -> bool;
}

/// Trait that communicates if something is terminal (eg/ requires shutdown or restart).
pub trait Terminal {
    fn is_terminal(&self) -> bool;
}

/// Indicates an `Iterator` or `Stream` has ended.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize,
)]
pub struct FeedEnded;
