use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use veloz_execution::event::{AssetBalance, Balance};
use veloz_instrument::{asset::AssetName, venue::VenueId};

/// Engine-side projection of one venue's account balances.
///
/// The authoritative copy lives on the venue. This projection is updated from the user
/// stream and overwritten by the reconciler whenever they diverge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccountProjection {
    balances: FnvHashMap<AssetName, (Balance, DateTime<Utc>)>,
}

impl AccountProjection {
    /// Apply a venue balance update; newer snapshots overwrite, stale ones are dropped.
    pub fn apply(&mut self, update: &AssetBalance) {
        match self.balances.get(&update.asset) {
            Some((_, existing_time)) if *existing_time > update.time_exchange => {}
            _ => {
                self.balances.insert(
                    update.asset.clone(),
                    (update.balance, update.time_exchange),
                );
            }
        }
    }

    /// Overwrite the whole projection with venue truth (reconciler repair path).
    pub fn overwrite(&mut self, balances: impl IntoIterator<Item = AssetBalance>) {
        self.balances.clear();
        for balance in balances {
            self.balances
                .insert(balance.asset, (balance.balance, balance.time_exchange));
        }
    }

    pub fn balance(&self, asset: &AssetName) -> Option<Balance> {
        self.balances.get(asset).map(|(balance, _)| *balance)
    }

    pub fn free(&self, asset: &AssetName) -> Decimal {
        self.balance(asset).map(|b| b.free).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AssetName, &Balance)> {
        self.balances.iter().map(|(asset, (balance, _))| (asset, balance))
    }
}

/// Per-venue account projections.
#[derive(Debug, Clone, Default)]
pub struct Accounts {
    venues: FnvHashMap<VenueId, AccountProjection>,
}

impl Accounts {
    pub fn venue(&self, venue: VenueId) -> Option<&AccountProjection> {
        self.venues.get(&venue)
    }

    pub fn venue_mut(&mut self, venue: VenueId) -> &mut AccountProjection {
        self.venues.entry(venue).or_default()
    }

    pub fn free(&self, venue: VenueId, asset: &AssetName) -> Decimal {
        self.venues
            .get(&venue)
            .map(|projection| projection.free(asset))
            .unwrap_or_default()
    }
}
