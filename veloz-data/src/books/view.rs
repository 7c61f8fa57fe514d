use crate::books::{Level, OrderBook, mid_price, volume_weighted_mid_price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cheap microstructure summary of a ready [`OrderBook`].
///
/// Recomputed on demand after each applied diff; only valid while the owning synchroniser
/// reports `snapshot_ready`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct TopOfBook {
    pub best_bid: Option<Level>,
    pub best_ask: Option<Level>,
    pub spread: Option<Decimal>,
    pub mid: Option<Decimal>,
    /// Mid-price weighted by the notional resting on the top `depth` levels of each side.
    pub weighted_mid: Option<Decimal>,
}

impl TopOfBook {
    /// Derive a [`TopOfBook`] from the provided book, weighting the mid over `depth` levels.
    pub fn from_book(book: &OrderBook, depth: usize) -> Self {
        let best_bid = book.bids().best().copied();
        let best_ask = book.asks().best().copied();

        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        };

        let mid = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some(mid_price(bid.price, ask.price)),
            _ => None,
        };

        Self {
            best_bid,
            best_ask,
            spread,
            mid,
            weighted_mid: notional_weighted_mid(book, depth),
        }
    }
}

/// Copy-on-read snapshot of the top `depth` levels of each side.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LadderView {
    pub last_update_id: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl LadderView {
    pub fn from_book(book: &OrderBook, depth: usize) -> Self {
        Self {
            last_update_id: book.last_update_id(),
            bids: book.bids().levels().iter().take(depth).copied().collect(),
            asks: book.asks().levels().iter().take(depth).copied().collect(),
        }
    }
}

/// Mid-price weighted by the notional resting on the top `depth` levels of each side.
///
/// Falls back to the top-of-book micro-price when only single levels are present.
fn notional_weighted_mid(book: &OrderBook, depth: usize) -> Option<Decimal> {
    let bid_notional = side_notional(book.bids().levels(), depth);
    let ask_notional = side_notional(book.asks().levels(), depth);

    match (book.bids().best(), book.asks().best()) {
        (Some(best_bid), Some(best_ask)) => {
            let total = bid_notional + ask_notional;
            if total.is_zero() {
                return Some(volume_weighted_mid_price(*best_bid, *best_ask));
            }
            // Weight each side's best price by the opposing side's resting notional
            Some((best_bid.price * ask_notional + best_ask.price * bid_notional) / total)
        }
        _ => None,
    }
}

fn side_notional(levels: &[Level], depth: usize) -> Decimal {
    levels
        .iter()
        .take(depth)
        .map(|level| level.price * level.quantity)
        .sum()
}
