use crate::{
    books::{
        OrderBookSnapshot, OrderBookUpdate,
        sync::{BookSynchronizer, SyncOutcome},
        view::TopOfBook,
    },
    error::DataError,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use veloz_instrument::symbol::SymbolIndex;

/// What the owning component must do after feeding a book event to the [`BookManager`].
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum BookAction {
    /// Book mutated and ready; the updated [`TopOfBook`] is attached.
    Updated(TopOfBook),
    /// Event consumed without making the book ready (buffered diff, stale diff).
    None,
    /// Sequence gap detected; the caller must refetch a snapshot for this symbol and
    /// surface the gap on the system bus.
    Resync(DataError),
}

/// Maintains one [`BookSynchronizer`] per configured symbol.
///
/// The engine feeds decoded `BookUpdate`/`BookSnapshot` market events through this manager,
/// which polices sequencing per symbol and reports when a resynchronisation is required.
#[derive(Debug, Default)]
pub struct BookManager {
    books: FnvHashMap<SymbolIndex, BookSynchronizer>,
    view_depth: usize,
}

impl BookManager {
    pub fn new<Iter>(symbols: Iter, view_depth: usize) -> Self
    where
        Iter: IntoIterator<Item = SymbolIndex>,
    {
        Self {
            books: symbols
                .into_iter()
                .map(|symbol| (symbol, BookSynchronizer::default()))
                .collect(),
            view_depth,
        }
    }

    pub fn book(&self, symbol: &SymbolIndex) -> Option<&BookSynchronizer> {
        self.books.get(symbol)
    }

    /// `true` if the symbol is configured and its book is currently consistent.
    pub fn is_ready(&self, symbol: &SymbolIndex) -> bool {
        self.books
            .get(symbol)
            .is_some_and(BookSynchronizer::snapshot_ready)
    }

    pub fn update(
        &mut self,
        symbol: SymbolIndex,
        update: OrderBookUpdate,
        time_engine: DateTime<Utc>,
    ) -> BookAction {
        let Some(sync) = self.books.get_mut(&symbol) else {
            warn!(%symbol, "consumed book update for non-configured symbol");
            return BookAction::None;
        };

        match sync.update(update, time_engine) {
            Ok(SyncOutcome::Applied) => {
                BookAction::Updated(TopOfBook::from_book(sync.book(), self.view_depth))
            }
            Ok(SyncOutcome::Buffered | SyncOutcome::Stale) => BookAction::None,
            Err(error) => BookAction::Resync(error),
        }
    }

    pub fn apply_snapshot(
        &mut self,
        symbol: SymbolIndex,
        snapshot: &OrderBookSnapshot,
        time_engine: DateTime<Utc>,
    ) -> BookAction {
        let Some(sync) = self.books.get_mut(&symbol) else {
            warn!(%symbol, "consumed book snapshot for non-configured symbol");
            return BookAction::None;
        };

        match sync.apply_snapshot(snapshot, time_engine) {
            Ok(_applied) => {
                BookAction::Updated(TopOfBook::from_book(sync.book(), self.view_depth))
            }
            Err(error) => BookAction::Resync(error),
        }
    }

    /// Invalidate the symbol's book, eg/ after a stream reconnect.
    pub fn invalidate(&mut self, symbol: &SymbolIndex) {
        if let Some(sync) = self.books.get_mut(symbol) {
            sync.invalidate();
        }
    }

    /// Invalidate every book, eg/ after a venue-wide disconnect.
    pub fn invalidate_all(&mut self) {
        for sync in self.books.values_mut() {
            sync.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::Level;
    use rust_decimal_macros::dec;

    fn snapshot(last: u64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            last_update_id: last,
            bids: vec![Level::new(dec!(100), dec!(1))],
            asks: vec![Level::new(dec!(101), dec!(1))],
        }
    }

    fn update(first: u64, last: u64) -> OrderBookUpdate {
        OrderBookUpdate {
            first_update_id: first,
            last_update_id: last,
            bids: vec![Level::new(dec!(100), dec!(2))],
            asks: vec![],
        }
    }

    #[test]
    fn test_manager_gap_demands_resync() {
        let symbol = SymbolIndex(0);
        let mut manager = BookManager::new([symbol], 5);

        assert!(matches!(
            manager.apply_snapshot(symbol, &snapshot(100), Default::default()),
            BookAction::Updated(_)
        ));
        assert!(matches!(
            manager.update(symbol, update(101, 102), Default::default()),
            BookAction::Updated(_)
        ));

        // Gap: no views until a fresh snapshot is applied
        assert!(matches!(
            manager.update(symbol, update(104, 105), Default::default()),
            BookAction::Resync(DataError::InvalidSequence { .. })
        ));
        assert!(!manager.is_ready(&symbol));

        assert!(matches!(
            manager.apply_snapshot(symbol, &snapshot(110), Default::default()),
            BookAction::Updated(_)
        ));
        assert!(manager.is_ready(&symbol));
    }

    #[test]
    fn test_manager_ignores_unknown_symbol() {
        let mut manager = BookManager::new([SymbolIndex(0)], 5);

        assert_eq!(
            manager.update(SymbolIndex(9), update(1, 2), Default::default()),
            BookAction::None
        );
    }
}
