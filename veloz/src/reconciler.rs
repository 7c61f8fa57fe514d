use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use veloz_execution::{
    client::VenueClient,
    error::ExecutionError,
    event::AssetBalance,
    order::{
        OrderSnapshot,
        id::{ClientOrderId, VenueOrderId},
        status::OrderStatus,
    },
};
use veloz_instrument::{asset::AssetName, symbol::SymbolIndex, venue::VenueId};

/// Reconciler policy knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// Local orders younger than this are not judged orphaned (their acceptance may still
    /// be in flight).
    pub orphan_grace: std::time::Duration,
    /// Relative balance divergence below this repairs silently; above it freezes
    /// strategies.
    pub balance_tolerance: Decimal,
    /// Whether venue orders unknown to the engine are cancelled.
    pub cancel_foreign: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            orphan_grace: std::time::Duration::from_secs(10),
            balance_tolerance: Decimal::new(1, 3),
            cancel_foreign: true,
        }
    }
}

/// Engine-side view of one active order, captured on the loop thread before the sweep.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LocalOrderView {
    pub cid: ClientOrderId,
    pub void: Option<VenueOrderId>,
    pub symbol: SymbolIndex,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Decimal,
    pub time_created: DateTime<Utc>,
}

/// One directed repair produced by a reconcile diff.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ReconcileOutcome {
    /// Engine holds an active order the venue does not know: locally cancel it.
    OrphanOrder { cid: ClientOrderId },
    /// Venue holds an order the engine does not know.
    ForeignOrder {
        venue: VenueId,
        void: VenueOrderId,
        symbol: Option<SymbolIndex>,
        cancel: bool,
    },
    /// Quantity/price/state mismatch: overwrite the engine with venue truth.
    StateDivergence {
        venue: VenueId,
        cid: ClientOrderId,
        status: OrderStatus,
        filled_quantity: Decimal,
        avg_fill_price: Option<Decimal>,
        detail: String,
    },
    /// Balance mismatch; `within_tolerance` decides between silent repair and freezing.
    BalanceDivergence {
        venue: VenueId,
        balances: Vec<AssetBalance>,
        within_tolerance: bool,
        detail: String,
    },
    /// Balances agreed; projection refreshed with venue copy.
    BalancesClean {
        venue: VenueId,
        balances: Vec<AssetBalance>,
    },
}

/// Everything one reconcile sweep decided, applied atomically on the loop thread.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ReconcileReport {
    pub outcomes: Vec<ReconcileOutcome>,
}

/// Periodic reconciliation of engine projections against venue truth.
///
/// The sweep (network fetches) runs off-loop; [`diff`] is pure so the decision logic is
/// deterministic and testable. The engine applies the resulting report on the loop thread.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    pub config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    /// Fetch venue truth and diff it against the engine views.
    ///
    /// `local_balances` is the engine's projection at capture time; `venue_open` is
    /// fetched per configured symbol so foreign orders stay attributable.
    pub async fn sweep<Client>(
        &self,
        client: &Client,
        symbols: &[(SymbolIndex, veloz_instrument::symbol::Symbol)],
        local_active: Vec<LocalOrderView>,
        local_balances: Vec<(AssetName, veloz_execution::event::Balance)>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, ExecutionError>
    where
        Client: VenueClient,
    {
        let venue = client.venue();

        let mut venue_open = Vec::new();
        for (index, symbol) in symbols {
            let open = client.query_open_orders(Some(symbol)).await?;
            venue_open.extend(open.into_iter().map(|snapshot| (*index, snapshot)));
        }

        // Local active orders absent from the open set are queried individually: they may
        // have filled rather than vanished
        let open_cids: Vec<&ClientOrderId> = venue_open
            .iter()
            .filter_map(|(_, snapshot)| snapshot.cid.as_ref())
            .collect();

        let mut lookups = FnvHashMap::default();
        for view in &local_active {
            if open_cids.contains(&&view.cid) {
                continue;
            }
            let Some((_, symbol)) = symbols.iter().find(|(index, _)| *index == view.symbol)
            else {
                continue;
            };
            let looked_up = client.query_order(symbol, &view.cid).await?;
            lookups.insert(view.cid.clone(), looked_up);
        }

        let venue_balances = client.fetch_balances().await?;

        Ok(diff(
            &self.config,
            venue,
            &local_active,
            &venue_open,
            &lookups,
            &local_balances,
            venue_balances,
            now,
        ))
    }
}

/// Pure reconcile decision logic.
pub fn diff(
    config: &ReconcileConfig,
    venue: VenueId,
    local_active: &[LocalOrderView],
    venue_open: &[(SymbolIndex, OrderSnapshot)],
    venue_lookups: &FnvHashMap<ClientOrderId, Option<OrderSnapshot>>,
    local_balances: &[(AssetName, veloz_execution::event::Balance)],
    venue_balances: Vec<AssetBalance>,
    now: DateTime<Utc>,
) -> ReconcileReport {
    let mut outcomes = Vec::new();

    let open_by_cid: FnvHashMap<&ClientOrderId, &OrderSnapshot> = venue_open
        .iter()
        .filter_map(|(_, snapshot)| snapshot.cid.as_ref().map(|cid| (cid, snapshot)))
        .collect();

    // Engine-side orders: present on venue (compare) / queried (compare or orphan)
    for view in local_active {
        let venue_truth = open_by_cid
            .get(&view.cid)
            .copied()
            .or_else(|| venue_lookups.get(&view.cid).and_then(Option::as_ref));

        match venue_truth {
            Some(snapshot) => {
                if let Some(divergence) = compare(venue, view, snapshot) {
                    outcomes.push(divergence);
                }
            }
            None => {
                let age = now.signed_duration_since(view.time_created);
                if age.to_std().is_ok_and(|age| age >= config.orphan_grace) {
                    info!(cid = %view.cid, "venue does not know active order - orphaned");
                    outcomes.push(ReconcileOutcome::OrphanOrder {
                        cid: view.cid.clone(),
                    });
                } else {
                    debug!(cid = %view.cid, "order within orphan grace period");
                }
            }
        }
    }

    // Venue-side orders the engine does not hold
    let local_cids: Vec<&ClientOrderId> = local_active.iter().map(|view| &view.cid).collect();
    for (symbol, snapshot) in venue_open {
        let known = snapshot
            .cid
            .as_ref()
            .is_some_and(|cid| local_cids.contains(&cid));
        if !known {
            outcomes.push(ReconcileOutcome::ForeignOrder {
                venue,
                void: snapshot.void.clone(),
                symbol: Some(*symbol),
                cancel: config.cancel_foreign,
            });
        }
    }

    // Balances: venue copy always wins; the tolerance only decides the blast radius
    let mut max_divergence = Decimal::ZERO;
    let mut detail = String::new();
    for (asset, local) in local_balances {
        let venue_total = venue_balances
            .iter()
            .find(|balance| &balance.asset == asset)
            .map(|balance| balance.balance.total)
            .unwrap_or_default();

        let reference = local.total.abs().max(Decimal::ONE);
        let divergence = (venue_total - local.total).abs() / reference;
        if divergence > max_divergence {
            max_divergence = divergence;
            detail = format!(
                "{asset}: local {} vs venue {venue_total}",
                local.total
            );
        }
    }

    if max_divergence.is_zero() {
        outcomes.push(ReconcileOutcome::BalancesClean {
            venue,
            balances: venue_balances,
        });
    } else {
        outcomes.push(ReconcileOutcome::BalanceDivergence {
            venue,
            balances: venue_balances,
            within_tolerance: max_divergence <= config.balance_tolerance,
            detail,
        });
    }

    ReconcileReport { outcomes }
}

fn compare(
    venue: VenueId,
    view: &LocalOrderView,
    snapshot: &OrderSnapshot,
) -> Option<ReconcileOutcome> {
    let status_differs = snapshot.status != view.status;
    let quantity_differs = snapshot.filled_quantity != view.filled_quantity;
    let price_differs = snapshot
        .avg_fill_price
        .is_some_and(|avg| avg != view.avg_fill_price);

    if !(status_differs || quantity_differs || price_differs) {
        return None;
    }

    Some(ReconcileOutcome::StateDivergence {
        venue,
        cid: view.cid.clone(),
        status: snapshot.status,
        filled_quantity: snapshot.filled_quantity,
        avg_fill_price: snapshot.avg_fill_price,
        detail: format!(
            "local ({}, filled {}, avg {}) vs venue ({}, filled {}, avg {:?})",
            view.status,
            view.filled_quantity,
            view.avg_fill_price,
            snapshot.status,
            snapshot.filled_quantity,
            snapshot.avg_fill_price,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;
    use veloz_execution::event::Balance;
    use veloz_instrument::Side;

    fn view(cid: &str, status: OrderStatus, filled: Decimal) -> LocalOrderView {
        LocalOrderView {
            cid: ClientOrderId::new(cid),
            void: Some(VenueOrderId::new("v1")),
            symbol: SymbolIndex(0),
            status,
            filled_quantity: filled,
            avg_fill_price: dec!(100),
            time_created: Utc::now() - TimeDelta::seconds(60),
        }
    }

    fn snapshot(cid: Option<&str>, status: OrderStatus, filled: Decimal, avg: Decimal) -> OrderSnapshot {
        OrderSnapshot::new(
            VenueId::Mock,
            cid.map(ClientOrderId::new),
            VenueOrderId::new("v1"),
            Side::Buy,
            status,
            dec!(2),
            filled,
            Some(avg),
            Some(dec!(100)),
        )
    }

    fn no_balances() -> Vec<(AssetName, Balance)> {
        vec![]
    }

    #[test]
    fn test_quantity_divergence_venue_wins() {
        // Engine: C1 Accepted filled=0; venue: filled=2 @ 99 => overwrite with venue truth
        let report = diff(
            &ReconcileConfig::default(),
            VenueId::Mock,
            &[view("C1", OrderStatus::Accepted, dec!(0))],
            &[(SymbolIndex(0), snapshot(Some("C1"), OrderStatus::Filled, dec!(2), dec!(99)))],
            &FnvHashMap::default(),
            &no_balances(),
            vec![],
            Utc::now(),
        );

        assert!(report.outcomes.iter().any(|outcome| matches!(
            outcome,
            ReconcileOutcome::StateDivergence {
                cid,
                status: OrderStatus::Filled,
                filled_quantity,
                avg_fill_price: Some(avg),
                ..
            } if cid == &ClientOrderId::new("C1")
                && *filled_quantity == dec!(2)
                && *avg == dec!(99)
        )));
    }

    #[test]
    fn test_orphan_respects_grace() {
        let config = ReconcileConfig::default();

        // Old order unknown to the venue: orphaned
        let report = diff(
            &config,
            VenueId::Mock,
            &[view("C1", OrderStatus::Accepted, dec!(0))],
            &[],
            &FnvHashMap::from_iter([(ClientOrderId::new("C1"), None)]),
            &no_balances(),
            vec![],
            Utc::now(),
        );
        assert!(report.outcomes.iter().any(|outcome| matches!(
            outcome,
            ReconcileOutcome::OrphanOrder { .. }
        )));

        // Fresh order: still within grace
        let mut fresh = view("C2", OrderStatus::PendingSubmit, dec!(0));
        fresh.time_created = Utc::now();
        let report = diff(
            &config,
            VenueId::Mock,
            &[fresh],
            &[],
            &FnvHashMap::from_iter([(ClientOrderId::new("C2"), None)]),
            &no_balances(),
            vec![],
            Utc::now(),
        );
        assert!(!report.outcomes.iter().any(|outcome| matches!(
            outcome,
            ReconcileOutcome::OrphanOrder { .. }
        )));
    }

    #[test]
    fn test_foreign_order_flagged_for_cancel() {
        let report = diff(
            &ReconcileConfig::default(),
            VenueId::Mock,
            &[],
            &[(SymbolIndex(3), snapshot(None, OrderStatus::Accepted, dec!(0), dec!(0)))],
            &FnvHashMap::default(),
            &no_balances(),
            vec![],
            Utc::now(),
        );

        assert!(report.outcomes.iter().any(|outcome| matches!(
            outcome,
            ReconcileOutcome::ForeignOrder {
                symbol: Some(SymbolIndex(3)),
                cancel: true,
                ..
            }
        )));
    }

    #[test]
    fn test_balance_tolerance_split() {
        let usdt = AssetName::new("usdt");
        let local = vec![(usdt.clone(), Balance::new(dec!(1000), dec!(1000)))];

        let venue_close = vec![AssetBalance::new(
            usdt.clone(),
            Balance::new(dec!(1000.5), dec!(1000.5)),
            Utc::now(),
        )];
        let report = diff(
            &ReconcileConfig::default(),
            VenueId::Mock,
            &[],
            &[],
            &FnvHashMap::default(),
            &local,
            venue_close,
            Utc::now(),
        );
        assert!(report.outcomes.iter().any(|outcome| matches!(
            outcome,
            ReconcileOutcome::BalanceDivergence {
                within_tolerance: true,
                ..
            }
        )));

        let venue_far = vec![AssetBalance::new(
            usdt,
            Balance::new(dec!(500), dec!(500)),
            Utc::now(),
        )];
        let report = diff(
            &ReconcileConfig::default(),
            VenueId::Mock,
            &[],
            &[],
            &FnvHashMap::default(),
            &local,
            venue_far,
            Utc::now(),
        );
        assert!(report.outcomes.iter().any(|outcome| matches!(
            outcome,
            ReconcileOutcome::BalanceDivergence {
                within_tolerance: false,
                ..
            }
        )));
    }
}
