use crate::{
    Keyed,
    symbol::{Symbol, SymbolIndex, SymbolText},
    venue::VenueId,
};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a lookup against a [`SymbolSet`] fails.
#[derive(Debug, Clone, Eq, PartialEq, Error, Deserialize, Serialize)]
pub enum IndexError {
    #[error("SymbolIndex({0}) out of bounds")]
    SymbolIndexOutOfBounds(usize),

    #[error("symbol {1} not configured for venue {0}")]
    SymbolNotConfigured(VenueId, String),
}

/// Interned, indexed collection of the [`Symbol`]s configured for a run.
///
/// Built once at startup; lookups by [`SymbolIndex`] are direct vector indexing, and lookups
/// by `(VenueId, SymbolText)` go through an `FnvHashMap`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SymbolSet {
    symbols: Vec<Symbol>,
    #[serde(skip)]
    lookup: FnvHashMap<(VenueId, SymbolText), SymbolIndex>,
}

impl SymbolSet {
    pub fn builder() -> SymbolSetBuilder {
        SymbolSetBuilder::default()
    }

    pub fn find(&self, index: SymbolIndex) -> Result<&Symbol, IndexError> {
        self.symbols
            .get(index.index())
            .ok_or(IndexError::SymbolIndexOutOfBounds(index.index()))
    }

    pub fn find_by_venue_name(
        &self,
        venue: VenueId,
        name_venue: &SymbolText,
    ) -> Result<SymbolIndex, IndexError> {
        self.lookup
            .get(&(venue, name_venue.clone()))
            .copied()
            .ok_or_else(|| IndexError::SymbolNotConfigured(venue, name_venue.0.to_string()))
    }

    pub fn symbols(&self) -> impl Iterator<Item = Keyed<SymbolIndex, &Symbol>> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(index, symbol)| Keyed::new(SymbolIndex(index), symbol))
    }

    pub fn venues(&self) -> impl Iterator<Item = VenueId> + '_ {
        let mut seen = Vec::new();
        self.symbols.iter().filter_map(move |symbol| {
            if seen.contains(&symbol.venue) {
                None
            } else {
                seen.push(symbol.venue);
                Some(symbol.venue)
            }
        })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Rebuild the lookup map, eg/ after deserialising a `SymbolSet` that skipped it.
    pub fn rebuild_lookup(&mut self) {
        self.lookup = self
            .symbols
            .iter()
            .enumerate()
            .map(|(index, symbol)| {
                (
                    (symbol.venue, symbol.name_venue.clone()),
                    SymbolIndex(index),
                )
            })
            .collect();
    }
}

/// Builder that interns [`Symbol`]s, de-duplicating on `(VenueId, SymbolText)`.
#[derive(Debug, Default)]
pub struct SymbolSetBuilder {
    symbols: Vec<Symbol>,
    lookup: FnvHashMap<(VenueId, SymbolText), SymbolIndex>,
}

impl SymbolSetBuilder {
    /// Intern the provided [`Symbol`], returning its [`SymbolIndex`].
    ///
    /// Re-adding an already interned `(venue, name)` pair returns the existing index.
    pub fn add(&mut self, symbol: Symbol) -> SymbolIndex {
        let key = (symbol.venue, symbol.name_venue.clone());

        if let Some(existing) = self.lookup.get(&key) {
            return *existing;
        }

        let index = SymbolIndex(self.symbols.len());
        self.symbols.push(symbol);
        self.lookup.insert(key, index);
        index
    }

    pub fn extend<Iter>(mut self, symbols: Iter) -> Self
    where
        Iter: IntoIterator<Item = Symbol>,
    {
        for symbol in symbols {
            self.add(symbol);
        }
        self
    }

    pub fn build(self) -> SymbolSet {
        SymbolSet {
            symbols: self.symbols,
            lookup: self.lookup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::symbol;

    #[test]
    fn test_symbol_set_interning_deduplicates() {
        let mut builder = SymbolSet::builder();

        let btc = builder.add(symbol(VenueId::BinanceSpot, "btc", "usdt"));
        let eth = builder.add(symbol(VenueId::BinanceSpot, "eth", "usdt"));
        let btc_again = builder.add(symbol(VenueId::BinanceSpot, "btc", "usdt"));
        let btc_okx = builder.add(symbol(VenueId::Okx, "btc", "usdt"));

        assert_eq!(btc, btc_again);
        assert_ne!(btc, eth);
        assert_ne!(btc, btc_okx);

        let set = builder.build();
        assert_eq!(set.len(), 3);

        let found = set
            .find_by_venue_name(VenueId::BinanceSpot, &SymbolText::new("BTCUSDT"))
            .unwrap();
        assert_eq!(found, btc);

        assert!(
            set.find_by_venue_name(VenueId::Bybit, &SymbolText::new("BTCUSDT"))
                .is_err()
        );
    }

    #[test]
    fn test_symbol_set_venues_unique() {
        let set = SymbolSet::builder()
            .extend([
                symbol(VenueId::BinanceSpot, "btc", "usdt"),
                symbol(VenueId::BinanceSpot, "eth", "usdt"),
                symbol(VenueId::Okx, "btc", "usdt"),
            ])
            .build();

        let venues: Vec<_> = set.venues().collect();
        assert_eq!(venues, vec![VenueId::BinanceSpot, VenueId::Okx]);
    }
}
