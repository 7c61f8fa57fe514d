use crate::{
    books::{OrderBook, OrderBookSnapshot, OrderBookUpdate},
    error::DataError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum diffs buffered while awaiting the initial snapshot before the stream is treated
/// as gapped and a fresh snapshot is demanded.
pub const DEFAULT_BUFFER_LIMIT: usize = 1024;

/// Outcome of feeding one L2 diff into a [`BookSynchronizer`].
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum SyncOutcome {
    /// Diff applied to the book; views derived from the book are valid.
    Applied,
    /// No snapshot yet; diff buffered for replay once the snapshot arrives.
    Buffered,
    /// Diff is entirely covered by the current book state and was dropped.
    Stale,
}

/// Synchronisation state of one symbol's L2 book.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
enum SyncState {
    /// Buffering diffs until [`BookSynchronizer::apply_snapshot`] is called.
    AwaitingSnapshot { buffer: Vec<OrderBookUpdate> },
    /// Snapshot applied; the next diff must satisfy `U <= last_update_id + 1 <= u`.
    SnapshotApplied,
    /// Contiguous diffs flowing; every diff must satisfy `U == last_update_id + 1`.
    Synced,
}

/// Maintains a consistent L2 [`OrderBook`] from a venue snapshot + diff stream.
///
/// ### Protocol
/// 1. On subscription start diffs are buffered and the caller fetches a REST snapshot.
/// 2. [`Self::apply_snapshot`] seeds the book and replays buffered diffs, discarding those
///    the snapshot already covers. The first replayed diff must straddle the snapshot
///    sequence (`U <= U₀+1 <= u`); otherwise the buffer has a hole and the caller must
///    refetch.
/// 3. Thereafter every diff must continue the sequence exactly. Any violation invalidates
///    the book (`snapshot_ready == false`) and the caller must restart from step 1.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BookSynchronizer {
    state: SyncState,
    buffer_limit: usize,
    book: OrderBook,
}

impl Default for BookSynchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_LIMIT)
    }
}

impl BookSynchronizer {
    pub fn new(buffer_limit: usize) -> Self {
        Self {
            state: SyncState::AwaitingSnapshot { buffer: Vec::new() },
            buffer_limit,
            book: OrderBook::default(),
        }
    }

    /// `true` once a snapshot has been applied and all subsequent diffs have been contiguous.
    ///
    /// Derived views must only be emitted while this holds.
    pub fn snapshot_ready(&self) -> bool {
        matches!(
            self.state,
            SyncState::SnapshotApplied | SyncState::Synced
        )
    }

    /// The synchronised book. Contents are only meaningful while [`Self::snapshot_ready`].
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Drop synchronisation, returning to the buffering state.
    ///
    /// Called on stream reconnect, or after [`Self::update`] reports a gap.
    pub fn invalidate(&mut self) {
        self.state = SyncState::AwaitingSnapshot { buffer: Vec::new() };
    }

    /// Feed one L2 diff.
    ///
    /// Returns `Err(DataError::InvalidSequence)` when the diff does not follow on from the
    /// book sequence; the book is invalidated and the caller must refetch a snapshot.
    pub fn update(
        &mut self,
        update: OrderBookUpdate,
        time_engine: DateTime<Utc>,
    ) -> Result<SyncOutcome, DataError> {
        match &mut self.state {
            SyncState::AwaitingSnapshot { buffer } => {
                if buffer.len() >= self.buffer_limit {
                    // Buffer window exhausted without a snapshot; force a restart
                    let first_update_id = update.first_update_id;
                    self.invalidate();
                    return Err(DataError::InvalidSequence {
                        last_update_id: 0,
                        first_update_id,
                    });
                }
                buffer.push(update);
                Ok(SyncOutcome::Buffered)
            }
            SyncState::SnapshotApplied => {
                let next = self.book.last_update_id() + 1;
                if update.last_update_id <= self.book.last_update_id() {
                    return Ok(SyncOutcome::Stale);
                }
                if update.first_update_id <= next && next <= update.last_update_id {
                    self.book.apply_update(&update, time_engine);
                    self.state = SyncState::Synced;
                    Ok(SyncOutcome::Applied)
                } else {
                    let error = DataError::InvalidSequence {
                        last_update_id: self.book.last_update_id(),
                        first_update_id: update.first_update_id,
                    };
                    self.invalidate();
                    Err(error)
                }
            }
            SyncState::Synced => {
                if update.last_update_id <= self.book.last_update_id() {
                    return Ok(SyncOutcome::Stale);
                }
                if update.first_update_id == self.book.last_update_id() + 1 {
                    self.book.apply_update(&update, time_engine);
                    Ok(SyncOutcome::Applied)
                } else {
                    let error = DataError::InvalidSequence {
                        last_update_id: self.book.last_update_id(),
                        first_update_id: update.first_update_id,
                    };
                    self.invalidate();
                    Err(error)
                }
            }
        }
    }

    /// Seed the book from a REST snapshot, replaying any buffered diffs.
    ///
    /// Returns the number of buffered diffs applied. `Err(DataError::InvalidSequence)` means
    /// the buffer had a hole relative to the snapshot; the caller must refetch.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &OrderBookSnapshot,
        time_engine: DateTime<Utc>,
    ) -> Result<usize, DataError> {
        let buffer = match std::mem::replace(
            &mut self.state,
            SyncState::AwaitingSnapshot { buffer: Vec::new() },
        ) {
            SyncState::AwaitingSnapshot { buffer } => buffer,
            // Snapshot re-applied mid-stream (eg/ forced resync): discard current state
            SyncState::SnapshotApplied | SyncState::Synced => Vec::new(),
        };

        self.book.apply_snapshot(snapshot, time_engine);
        self.state = SyncState::SnapshotApplied;

        let mut applied = 0;
        for update in buffer {
            // Diffs entirely covered by the snapshot are expected; drop quietly
            if update.last_update_id <= snapshot.last_update_id {
                debug!(
                    update_last = update.first_update_id,
                    snapshot_last = snapshot.last_update_id,
                    "discarding buffered diff covered by book snapshot"
                );
                continue;
            }

            match self.update(update, time_engine)? {
                SyncOutcome::Applied => applied += 1,
                SyncOutcome::Stale => {}
                SyncOutcome::Buffered => {
                    unreachable!("BookSynchronizer cannot buffer after snapshot is applied")
                }
            }
        }

        Ok(applied)
    }
}
