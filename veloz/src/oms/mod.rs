use crate::{
    error::EngineError,
    event::SystemEvent,
    oms::{
        account::Accounts,
        order::{ApplyOutcome, FillDelta, Order},
        position::Position,
    },
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use veloz_execution::{
    error::BusinessReason,
    event::{Fill, TradingEvent, TradingEventKind},
    order::{
        OrderIntent,
        id::{ClientOrderId, StrategyId, VenueOrderId},
        status::OrderStatus,
    },
};
use veloz_instrument::symbol::SymbolIndex;
use veloz_wal::{RecordKind, WalRecord, writer::CommitReceipt, WalHandle};

/// The authoritative internal order record.
pub mod order;

/// Net positions per `(strategy, symbol)`.
pub mod position;

/// Engine-side account balance projections.
pub mod account;

/// Payload of every OMS WAL record, bincode-encoded inside the record frame.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum WalPayload {
    OrderIntent {
        cid: ClientOrderId,
        intent: OrderIntent,
    },
    OrderMutation {
        cid: ClientOrderId,
        status: OrderStatus,
        void: Option<VenueOrderId>,
        receipt_seq: u64,
        reason: Option<BusinessReason>,
    },
    FillApplied {
        cid: ClientOrderId,
        receipt_seq: u64,
        fill: Fill,
    },
    /// A receipt dropped as already-applied, retained for audit.
    Duplicate {
        cid: Option<ClientOrderId>,
        receipt_seq: u64,
    },
    ParamUpdate {
        strategy: StrategyId,
        version: u64,
    },
    /// A venue call expired at its deadline; the reconciler resolves the outcome.
    TimeoutPending {
        cid: ClientOrderId,
    },
    /// Marker paired with a positions snapshot file at segment rotation.
    Snapshot {
        closed_segment: u64,
    },
}

impl WalPayload {
    pub fn record_kind(&self) -> RecordKind {
        match self {
            WalPayload::OrderIntent { .. } => RecordKind::OrderIntent,
            WalPayload::OrderMutation { .. } => RecordKind::OrderMutation,
            WalPayload::FillApplied { .. } => RecordKind::FillApplied,
            WalPayload::Duplicate { .. } => RecordKind::Duplicate,
            WalPayload::ParamUpdate { .. } => RecordKind::ParamUpdate,
            WalPayload::TimeoutPending { .. } => RecordKind::TimeoutPending,
            WalPayload::Snapshot { .. } => RecordKind::Snapshot,
        }
    }
}

/// Snapshot of all positions, written beside the WAL at segment rotation.
#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct PositionsSnapshot {
    pub positions: Vec<Position>,
}

/// Outcome of [`Oms::prepare_submit`].
#[derive(Debug)]
pub enum PrepareSubmit {
    /// Fresh order: the caller must await `commit` (the WAL durability barrier) before
    /// handing the intent to a venue adapter.
    New {
        order: Order,
        intent: OrderIntent,
        commit: Option<CommitReceipt>,
    },
    /// Duplicate client order id: the existing order is returned unchanged, no WAL record
    /// was written, and no adapter call must be made.
    Existing(Order),
}

/// Notifications produced by applying a receipt, for the engine to publish on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum OmsNotice {
    OrderUpdated(Order),
    PositionUpdated(Position),
    System(SystemEvent),
}

/// The order management system.
///
/// Exclusively owns every [`Order`], [`Position`] and account projection in the engine.
/// Receipts are applied with out-of-order tolerance (venue sequence + cumulative
/// quantities); submissions are idempotent by deterministic client order id; every
/// mutation is WAL-appended before the in-memory state changes.
#[derive(Debug, Default)]
pub struct Oms {
    orders: FnvHashMap<ClientOrderId, Order>,
    void_index: FnvHashMap<VenueOrderId, ClientOrderId>,
    /// Receipts referencing venue order ids not yet bound to a client order id.
    parked: FnvHashMap<VenueOrderId, Vec<(TradingEvent, DateTime<Utc>)>>,
    positions: FnvHashMap<(StrategyId, SymbolIndex), Position>,
    pub accounts: Accounts,
    wal: Option<WalHandle>,
}

impl Oms {
    pub fn new(wal: Option<WalHandle>) -> Self {
        Self {
            wal,
            ..Default::default()
        }
    }

    /// Handle to the WAL this OMS writes ahead to, used for the final flush on shutdown.
    pub fn wal_handle(&self) -> Option<&WalHandle> {
        self.wal.as_ref()
    }

    pub fn order(&self, cid: &ClientOrderId) -> Option<&Order> {
        self.orders.get(cid)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(|order| order.status.is_active())
    }

    pub fn position(&self, strategy: &StrategyId, symbol: SymbolIndex) -> Option<&Position> {
        self.positions.get(&(strategy.clone(), symbol))
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn positions_snapshot(&self) -> PositionsSnapshot {
        PositionsSnapshot {
            positions: self.positions.values().cloned().collect(),
        }
    }

    /// Idempotent submission, step one: derive the deterministic client order id, reserve
    /// the order slot, and append the `OrderIntent` WAL record.
    ///
    /// The WAL append for a fresh order must be awaited (fsync barrier) before the venue
    /// adapter is called. A duplicate intent returns the existing order with no new WAL
    /// record and no adapter call.
    pub fn prepare_submit(
        &mut self,
        intent: OrderIntent,
        now: DateTime<Utc>,
    ) -> Result<PrepareSubmit, EngineError> {
        self.prepare_submit_with_cid(intent, None, now)
    }

    /// [`Self::prepare_submit`] with an externally-supplied idempotency key, eg/ the
    /// optional client order id of a gateway `ORDER PLACE`.
    pub fn prepare_submit_with_cid(
        &mut self,
        intent: OrderIntent,
        cid_override: Option<ClientOrderId>,
        now: DateTime<Utc>,
    ) -> Result<PrepareSubmit, EngineError> {
        let cid = cid_override.unwrap_or_else(|| intent.client_order_id());

        if let Some(existing) = self.orders.get(&cid) {
            debug!(%cid, "duplicate submit returned existing order");
            return Ok(PrepareSubmit::Existing(existing.clone()));
        }

        let order = Order::from_intent(&intent, cid.clone(), now);
        let commit = self.append_wal_ack(
            WalPayload::OrderIntent {
                cid: cid.clone(),
                intent: intent.clone(),
            },
            now,
        )?;
        self.orders.insert(cid, order.clone());

        Ok(PrepareSubmit::New {
            order,
            intent,
            commit,
        })
    }

    /// Mark a venue call that expired at its deadline; the reconciler resolves the true
    /// outcome on its next sweep.
    pub fn record_timeout_pending(&mut self, cid: &ClientOrderId, now: DateTime<Utc>) {
        self.append_wal(WalPayload::TimeoutPending { cid: cid.clone() }, now);
    }

    /// Record a strategy parameter update for attribution.
    pub fn record_param_update(&mut self, strategy: &StrategyId, version: u64, now: DateTime<Utc>) {
        self.append_wal(
            WalPayload::ParamUpdate {
                strategy: strategy.clone(),
                version,
            },
            now,
        );
    }

    /// Apply one normalised venue receipt.
    ///
    /// Unknown venue order ids are parked until the binding `OrderAccepted` arrives;
    /// duplicates are dropped but WAL-appended for audit.
    pub fn apply_trading_event(
        &mut self,
        event: &TradingEvent,
        now: DateTime<Utc>,
    ) -> Vec<OmsNotice> {
        if let TradingEventKind::BalanceUpdate(update) = &event.kind {
            let projection = self.accounts.venue_mut(event.venue);
            for balance in &update.balances {
                projection.apply(balance);
            }
            return Vec::new();
        }

        let Some(cid) = self.resolve_cid(event) else {
            return self.park(event, now);
        };

        let mut notices = self.apply_to_order(&cid, event, now);

        // An acceptance binds cid <-> void; flush anything parked under that void
        if let TradingEventKind::OrderAccepted(accepted) = &event.kind {
            self.void_index
                .insert(accepted.void.clone(), accepted.cid.clone());

            if let Some(parked) = self.parked.remove(&accepted.void) {
                for (parked_event, _parked_at) in parked {
                    notices.extend(self.apply_to_order(&cid, &parked_event, now));
                }
            }
        }

        notices
    }

    /// Drop parked receipts older than `ttl`, surfacing each as an orphan.
    pub fn expire_parked(&mut self, ttl: TimeDelta, now: DateTime<Utc>) -> Vec<SystemEvent> {
        let mut orphaned = Vec::new();

        self.parked.retain(|void, entries| {
            entries.retain(|(_, parked_at)| {
                let expired = now.signed_duration_since(*parked_at) >= ttl;
                if expired {
                    orphaned.push(SystemEvent::OrphanReceipt { void: void.clone() });
                }
                !expired
            });
            !entries.is_empty()
        });

        orphaned
    }

    /// Gross notional of all open positions, marked at entry.
    pub fn gross_notional(&self) -> Decimal {
        self.positions
            .values()
            .map(|position| (position.signed_quantity * position.avg_entry_price).abs())
            .sum()
    }

    /// Force a local terminal state without a venue receipt (reconciler repair path).
    pub fn force_local_state(
        &mut self,
        cid: &ClientOrderId,
        status: OrderStatus,
        now: DateTime<Utc>,
    ) -> Option<Order> {
        let order = self.orders.get_mut(cid)?;
        order.status = status;
        order.time_last_update = now;
        let snapshot = order.clone();
        self.append_wal(
            WalPayload::OrderMutation {
                cid: cid.clone(),
                status,
                void: snapshot.void.clone(),
                receipt_seq: snapshot.last_seq,
                reason: None,
            },
            now,
        );
        Some(snapshot)
    }

    /// Overwrite an order's fill state with venue truth (reconciler repair path).
    pub fn overwrite_from_venue(
        &mut self,
        cid: &ClientOrderId,
        status: OrderStatus,
        filled_quantity: Decimal,
        avg_fill_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Option<Order> {
        let order = self.orders.get_mut(cid)?;
        order.status = status;
        order.filled_quantity = filled_quantity.min(order.requested_quantity);
        if let Some(avg) = avg_fill_price {
            order.avg_fill_price = avg;
        }
        order.time_last_update = now;
        let snapshot = order.clone();
        self.append_wal(
            WalPayload::OrderMutation {
                cid: cid.clone(),
                status,
                void: snapshot.void.clone(),
                receipt_seq: snapshot.last_seq,
                reason: None,
            },
            now,
        );
        Some(snapshot)
    }

    fn resolve_cid(&self, event: &TradingEvent) -> Option<ClientOrderId> {
        if let Some(cid) = event.client_order_id() {
            if self.orders.contains_key(cid) {
                return Some(cid.clone());
            }
        }
        event
            .venue_order_id()
            .and_then(|void| self.void_index.get(void))
            .cloned()
    }

    fn park(&mut self, event: &TradingEvent, now: DateTime<Utc>) -> Vec<OmsNotice> {
        let Some(void) = event.venue_order_id() else {
            warn!(?event, "receipt without resolvable order identity dropped");
            return Vec::new();
        };

        debug!(%void, "parking receipt for unknown venue order id");
        self.parked
            .entry(void.clone())
            .or_default()
            .push((event.clone(), now));
        Vec::new()
    }

    fn apply_to_order(
        &mut self,
        cid: &ClientOrderId,
        event: &TradingEvent,
        now: DateTime<Utc>,
    ) -> Vec<OmsNotice> {
        let Some(order) = self.orders.get_mut(cid) else {
            return Vec::new();
        };

        let outcome = match &event.kind {
            TradingEventKind::OrderAccepted(accepted) => {
                order.apply_accepted(event.seq, accepted.void.clone(), now)
            }
            TradingEventKind::OrderRejected(rejected) => {
                order.apply_rejected(event.seq, rejected.reason.clone(), now)
            }
            TradingEventKind::OrderPartialFill(fill_event)
            | TradingEventKind::OrderFill(fill_event) => {
                order.apply_fill(event.seq, &fill_event.fill, now)
            }
            TradingEventKind::OrderCanceled(_) => order.apply_canceled(event.seq, now),
            TradingEventKind::OrderExpired(_) => order.apply_expired(event.seq, now),
            TradingEventKind::BalanceUpdate(_) => unreachable!("handled before order routing"),
        };

        let order_snapshot = order.clone();
        let mut notices = Vec::new();

        match outcome {
            ApplyOutcome::Duplicate => {
                self.append_wal(
                    WalPayload::Duplicate {
                        cid: Some(cid.clone()),
                        receipt_seq: event.seq,
                    },
                    now,
                );
            }
            ApplyOutcome::NoChange => {}
            ApplyOutcome::Applied { fill_delta } => {
                self.wal_for_applied(cid, event, &order_snapshot, fill_delta.as_ref(), now);
                if let Some(delta) = fill_delta {
                    notices.push(self.update_position(&order_snapshot, &delta));
                }
                notices.push(OmsNotice::OrderUpdated(order_snapshot));
            }
            ApplyOutcome::LateFill { fill_delta } => {
                self.wal_for_applied(cid, event, &order_snapshot, fill_delta.as_ref(), now);
                // Venue is authoritative: late fills do move positions
                if let Some(delta) = fill_delta {
                    notices.push(self.update_position(&order_snapshot, &delta));
                }
                notices.push(OmsNotice::System(SystemEvent::LateFill { cid: cid.clone() }));
                notices.push(OmsNotice::OrderUpdated(order_snapshot));
            }
        }

        notices
    }

    fn wal_for_applied(
        &mut self,
        cid: &ClientOrderId,
        event: &TradingEvent,
        order: &Order,
        fill_delta: Option<&FillDelta>,
        now: DateTime<Utc>,
    ) {
        let payload = match (&event.kind, fill_delta) {
            (
                TradingEventKind::OrderPartialFill(fill_event)
                | TradingEventKind::OrderFill(fill_event),
                Some(_),
            ) => WalPayload::FillApplied {
                cid: cid.clone(),
                receipt_seq: event.seq,
                fill: fill_event.fill.clone(),
            },
            _ => WalPayload::OrderMutation {
                cid: cid.clone(),
                status: order.status,
                void: order.void.clone(),
                receipt_seq: event.seq,
                reason: order.reject_reason.clone(),
            },
        };
        self.append_wal(payload, now);
    }

    fn update_position(&mut self, order: &Order, delta: &FillDelta) -> OmsNotice {
        let position = self
            .positions
            .entry((order.strategy.clone(), order.symbol))
            .or_insert_with(|| Position::new(order.strategy.clone(), order.symbol));

        position.apply_fill(order.side, delta.quantity, delta.price, delta.fee);
        position.mark(delta.price);
        OmsNotice::PositionUpdated(position.clone())
    }

    /// Receipts and audit records are appended without awaiting durability; loss of the
    /// trailing batch on crash is repaired by the mandatory post-replay reconcile.
    fn append_wal(&mut self, payload: WalPayload, now: DateTime<Utc>) {
        let Some(wal) = &self.wal else { return };
        let kind = payload.record_kind();
        match bincode::serialize(&payload) {
            Ok(bytes) => wal.append_noack(kind, timestamp_ns(now), bytes),
            Err(error) => warn!(?error, "failed to encode WAL payload"),
        }
    }

    fn append_wal_ack(
        &mut self,
        payload: WalPayload,
        now: DateTime<Utc>,
    ) -> Result<Option<CommitReceipt>, EngineError> {
        let Some(wal) = &self.wal else {
            return Ok(None);
        };
        let kind = payload.record_kind();
        let bytes =
            bincode::serialize(&payload).map_err(|error| EngineError::Wal(error.to_string()))?;
        Ok(Some(wal.append(kind, timestamp_ns(now), bytes)))
    }

    /// Rebuild OMS state from replayed WAL records.
    ///
    /// Mutation records carry post-transition state, so replay is a direct reconstruction
    /// rather than a receipt re-derivation. A mandatory reconcile must follow before new
    /// submissions are accepted.
    pub fn restore(&mut self, records: &[WalRecord], now: DateTime<Utc>) -> Result<(), EngineError> {
        for record in records {
            let payload: WalPayload = bincode::deserialize(&record.payload)
                .map_err(|error| EngineError::Wal(format!("replay decode: {error}")))?;

            match payload {
                WalPayload::OrderIntent { cid, intent } => {
                    self.orders
                        .entry(cid.clone())
                        .or_insert_with(|| Order::from_intent(&intent, cid, now));
                }
                WalPayload::OrderMutation {
                    cid,
                    status,
                    void,
                    receipt_seq,
                    reason,
                } => {
                    if let Some(order) = self.orders.get_mut(&cid) {
                        order.status = status;
                        order.last_seq = order.last_seq.max(receipt_seq);
                        order.reject_reason = reason;
                        if let Some(void) = void {
                            self.void_index.insert(void.clone(), cid.clone());
                            order.void = Some(void);
                        }
                    }
                }
                WalPayload::FillApplied {
                    cid,
                    receipt_seq,
                    fill,
                } => {
                    if let Some(order) = self.orders.get_mut(&cid) {
                        // Replay through the same cumulative application path
                        let outcome = order.apply_fill(receipt_seq, &fill, now);
                        if let ApplyOutcome::Applied {
                            fill_delta: Some(delta),
                        }
                        | ApplyOutcome::LateFill {
                            fill_delta: Some(delta),
                        } = outcome
                        {
                            let order_snapshot = order.clone();
                            self.update_position(&order_snapshot, &delta);
                        }
                    }
                }
                WalPayload::Duplicate { .. }
                | WalPayload::ParamUpdate { .. }
                | WalPayload::TimeoutPending { .. }
                | WalPayload::Snapshot { .. } => {}
            }
        }

        Ok(())
    }
}

fn timestamp_ns(time: DateTime<Utc>) -> u64 {
    time.timestamp_nanos_opt().unwrap_or(0).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use veloz_execution::{
        event::{AssetFees, LiquidityRole, OrderAccepted, OrderFillEvent},
        order::{OrderKind, TimeInForce, id::ExecId},
    };
    use veloz_instrument::{Side, venue::VenueId};

    fn intent(counter: u64, quantity: Decimal) -> OrderIntent {
        OrderIntent::new(
            StrategyId::new("s1"),
            counter,
            SymbolIndex(0),
            Side::Buy,
            OrderKind::Limit,
            TimeInForce::GoodUntilCancelled { post_only: false },
            quantity,
            Some(dec!(100)),
            None,
            false,
            0,
        )
    }

    fn accepted_event(seq: u64, cid: &ClientOrderId, void: &str) -> TradingEvent {
        TradingEvent::new(
            VenueId::Mock,
            seq,
            Utc::now(),
            Utc::now(),
            TradingEventKind::OrderAccepted(OrderAccepted::new(
                cid.clone(),
                VenueOrderId::new(void),
            )),
        )
    }

    fn fill_event(seq: u64, void: &str, cum: Decimal, price: Decimal) -> TradingEvent {
        TradingEvent::new(
            VenueId::Mock,
            seq,
            Utc::now(),
            Utc::now(),
            TradingEventKind::OrderFill(OrderFillEvent::new(
                None,
                VenueOrderId::new(void),
                Fill::new(
                    ExecId::new(format!("e{seq}")),
                    cum,
                    cum,
                    price,
                    AssetFees::new(veloz_instrument::asset::AssetName::new("usdt"), dec!(0)),
                    LiquidityRole::Taker,
                ),
            )),
        )
    }

    #[test]
    fn test_prepare_submit_idempotent() {
        let mut oms = Oms::new(None);
        let now = Utc::now();

        let first = oms.prepare_submit(intent(7, dec!(1)), now).unwrap();
        let PrepareSubmit::New { order, .. } = first else {
            panic!("first submit must be New");
        };
        assert_eq!(order.cid, ClientOrderId::new("s1-7"));
        assert_eq!(order.status, OrderStatus::PendingSubmit);

        // Identical intent: existing order returned unchanged
        let second = oms.prepare_submit(intent(7, dec!(1)), now).unwrap();
        let PrepareSubmit::Existing(existing) = second else {
            panic!("second submit must be Existing");
        };
        assert_eq!(existing.cid, order.cid);
        assert_eq!(oms.orders().count(), 1);
    }

    #[test]
    fn test_receipt_by_void_after_binding() {
        let mut oms = Oms::new(None);
        let now = Utc::now();

        let PrepareSubmit::New { order, .. } =
            oms.prepare_submit(intent(1, dec!(1)), now).unwrap()
        else {
            panic!()
        };

        oms.apply_trading_event(&accepted_event(1, &order.cid, "v9"), now);

        // Fill carries only the void; resolved through the void index
        let notices = oms.apply_trading_event(&fill_event(2, "v9", dec!(1), dec!(100)), now);
        assert!(
            notices
                .iter()
                .any(|notice| matches!(notice, OmsNotice::PositionUpdated(_)))
        );

        let order = oms.order(&order.cid).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);

        let position = oms
            .position(&StrategyId::new("s1"), SymbolIndex(0))
            .unwrap();
        assert_eq!(position.signed_quantity, dec!(1));
    }

    #[test]
    fn test_unknown_void_parked_then_flushed() {
        let mut oms = Oms::new(None);
        let now = Utc::now();

        let PrepareSubmit::New { order, .. } =
            oms.prepare_submit(intent(1, dec!(1)), now).unwrap()
        else {
            panic!()
        };

        // Fill arrives before the acceptance that binds the void
        let notices = oms.apply_trading_event(&fill_event(2, "v9", dec!(1), dec!(100)), now);
        assert!(notices.is_empty());
        assert_eq!(oms.order(&order.cid).unwrap().status, OrderStatus::PendingSubmit);

        // Acceptance binds and flushes the parked fill
        let notices = oms.apply_trading_event(&accepted_event(1, &order.cid, "v9"), now);
        assert!(
            notices
                .iter()
                .any(|notice| matches!(notice, OmsNotice::PositionUpdated(_)))
        );
        assert_eq!(oms.order(&order.cid).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn test_parked_receipt_expires_as_orphan() {
        let mut oms = Oms::new(None);
        let now = Utc::now();

        oms.apply_trading_event(&fill_event(2, "ghost", dec!(1), dec!(100)), now);

        let later = now + TimeDelta::seconds(61);
        let orphans = oms.expire_parked(TimeDelta::seconds(60), later);
        assert_eq!(
            orphans,
            vec![SystemEvent::OrphanReceipt {
                void: VenueOrderId::new("ghost"),
            }]
        );

        // Second sweep finds nothing
        assert!(oms.expire_parked(TimeDelta::seconds(60), later).is_empty());
    }

    #[test]
    fn test_late_fill_updates_position_and_emits_event() {
        let mut oms = Oms::new(None);
        let now = Utc::now();

        let PrepareSubmit::New { order, .. } =
            oms.prepare_submit(intent(1, dec!(2)), now).unwrap()
        else {
            panic!()
        };

        oms.apply_trading_event(&accepted_event(1, &order.cid, "v1"), now);

        // Local cancel repair, then the venue reports a fill anyway
        oms.force_local_state(&order.cid, OrderStatus::Canceled, now);
        let notices = oms.apply_trading_event(&fill_event(5, "v1", dec!(2), dec!(99)), now);

        assert!(notices.iter().any(|notice| matches!(
            notice,
            OmsNotice::System(SystemEvent::LateFill { .. })
        )));
        let position = oms
            .position(&StrategyId::new("s1"), SymbolIndex(0))
            .unwrap();
        assert_eq!(position.signed_quantity, dec!(2));
    }

    #[test]
    fn test_out_of_order_permutations_converge() {
        // Scenario: receipts arrive as Fill(seq=3, cum=1.0), Accepted(seq=1),
        // Fill(seq=2, cum=0.5); terminal state must match the in-order run.
        let orderings: Vec<Vec<u64>> = vec![vec![1, 2, 3], vec![3, 1, 2], vec![2, 3, 1]];

        let mut terminal_states = Vec::new();
        for ordering in orderings {
            let mut oms = Oms::new(None);
            let now = Utc::now();
            let PrepareSubmit::New { order, .. } =
                oms.prepare_submit(intent(1, dec!(1)), now).unwrap()
            else {
                panic!()
            };

            for seq in ordering {
                let event = match seq {
                    1 => accepted_event(1, &order.cid, "v1"),
                    2 => fill_event(2, "v1", dec!(0.5), dec!(100)),
                    3 => fill_event(3, "v1", dec!(1), dec!(100)),
                    _ => unreachable!(),
                };
                oms.apply_trading_event(&event, now);
            }

            let order = oms.order(&order.cid).unwrap();
            terminal_states.push((order.status, order.filled_quantity, order.avg_fill_price));
        }

        assert!(
            terminal_states
                .iter()
                .all(|state| *state == (OrderStatus::Filled, dec!(1), dec!(100))),
            "all permutations must converge: {terminal_states:?}"
        );
    }
}
