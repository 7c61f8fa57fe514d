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

//! # VeloZ-WAL
//! Segmented write-ahead log for the VeloZ trading engine.
//!
//! Every order intent and receipt is appended here *before* the corresponding in-memory
//! mutation, making engine state reconstructible after a crash:
//! * **Framing**: `[u32 len][u8 kind][u64 seq][u64 ts_ns][payload][u32 crc32]` per record.
//! * **Group commit**: a dedicated writer thread batches appends and fsyncs at a record
//!   count or time threshold, acknowledging producers after the sync.
//! * **Segments**: rotation on size; segments are `NNNNN.log` files read back in order.
//! * **Replay**: a bad CRC ends replay at the previous valid record (torn final write),
//!   reporting the truncation point so the caller can surface it.

/// All errors generated in `veloz-wal`.
pub mod error;

/// Record kinds and the on-disk frame codec.
pub mod record;

/// Append-only segment files and their readers.
pub mod segment;

/// The group-commit writer thread and its producer handle.
pub mod writer;

/// Sequential replay of a segment directory.
pub mod replay;

/// Point-in-time state snapshots written alongside the log at rotation.
pub mod snapshot;

pub use error::WalError;
pub use record::{RecordKind, WalRecord};
pub use writer::{WalConfig, WalHandle, WalWriter};
