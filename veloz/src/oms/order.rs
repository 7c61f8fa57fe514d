use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use veloz_execution::{
    error::BusinessReason,
    event::Fill,
    order::{
        OrderIntent, OrderKind, TimeInForce,
        id::{ClientOrderId, StrategyId, VenueOrderId},
        status::OrderStatus,
    },
};
use veloz_instrument::{Side, symbol::SymbolIndex, venue::VenueId};

/// The authoritative internal order record, owned exclusively by the OMS.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Order {
    pub cid: ClientOrderId,
    pub void: Option<VenueOrderId>,
    pub strategy: StrategyId,
    pub symbol: SymbolIndex,
    pub side: Side,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    pub requested_quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Decimal,
    pub fees_total: Decimal,
    pub reject_reason: Option<BusinessReason>,
    pub time_created: DateTime<Utc>,
    pub time_last_update: DateTime<Utc>,
    pub time_accepted: Option<DateTime<Utc>>,
    /// Venue sequence of the last applied receipt; receipts at or below are duplicates.
    pub last_seq: u64,
    /// Strategy parameter version attached at intent time, for attribution.
    pub params_version: u64,
    pub route_hint: Option<VenueId>,
}

impl Order {
    pub fn from_intent(intent: &OrderIntent, cid: ClientOrderId, time_created: DateTime<Utc>) -> Self {
        Self {
            cid,
            void: None,
            strategy: intent.strategy.clone(),
            symbol: intent.symbol,
            side: intent.side,
            kind: intent.kind,
            time_in_force: intent.time_in_force,
            requested_quantity: intent.quantity,
            limit_price: intent.price,
            stop_price: intent.stop_price,
            status: OrderStatus::PendingSubmit,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            fees_total: Decimal::ZERO,
            reject_reason: None,
            time_created,
            time_last_update: time_created,
            time_accepted: None,
            last_seq: 0,
            params_version: intent.params_version,
            route_hint: None,
        }
    }

    pub fn quantity_remaining(&self) -> Decimal {
        self.requested_quantity - self.filled_quantity
    }
}

/// What applying one receipt to an [`Order`] produced.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum ApplyOutcome {
    /// Receipt mutated the order; the delta fill (if any) is attached for position upkeep.
    Applied { fill_delta: Option<FillDelta> },
    /// Receipt's venue sequence was at or below `last_seq`; dropped, retained for audit.
    Duplicate,
    /// A fill arrived after a terminal state: quantities were updated (venue truth), the
    /// state was not reopened.
    LateFill { fill_delta: Option<FillDelta> },
    /// Receipt was valid but changed nothing (eg/ acceptance after a fill already
    /// implied it).
    NoChange,
}

/// Incremental fill quantities derived from cumulative receipt quantities.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct FillDelta {
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
}

impl Order {
    /// Bind the venue order id on acceptance, transitioning out of `PendingSubmit`.
    pub fn apply_accepted(&mut self, seq: u64, void: VenueOrderId, now: DateTime<Utc>) -> ApplyOutcome {
        if seq <= self.last_seq {
            return ApplyOutcome::Duplicate;
        }
        self.last_seq = seq;
        self.time_last_update = now;

        if self.void.is_none() {
            self.void = Some(void);
        }

        match self.status {
            OrderStatus::PendingSubmit => {
                self.status = OrderStatus::Accepted;
                self.time_accepted = Some(now);
                ApplyOutcome::Applied { fill_delta: None }
            }
            // Acceptance racing behind a fill receipt: the id binding is the only news
            _ => ApplyOutcome::NoChange,
        }
    }

    pub fn apply_rejected(
        &mut self,
        seq: u64,
        reason: BusinessReason,
        now: DateTime<Utc>,
    ) -> ApplyOutcome {
        if seq <= self.last_seq {
            return ApplyOutcome::Duplicate;
        }
        self.last_seq = seq;
        self.time_last_update = now;

        if self.status.is_terminal() {
            return ApplyOutcome::NoChange;
        }

        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason);
        ApplyOutcome::Applied { fill_delta: None }
    }

    /// Apply a fill from its cumulative quantity.
    ///
    /// The state is derived from cumulative quantities rather than fill counts, so a
    /// receipt implying skipped intermediate fills applies directly. A fill after a
    /// terminal state updates quantities (the venue is authoritative) without reopening
    /// the state.
    pub fn apply_fill(&mut self, seq: u64, fill: &Fill, now: DateTime<Utc>) -> ApplyOutcome {
        if seq <= self.last_seq {
            return ApplyOutcome::Duplicate;
        }
        self.last_seq = seq;
        self.time_last_update = now;

        let was_terminal = self.status.is_terminal();

        let new_cum = fill.cum_quantity.min(self.requested_quantity);
        if new_cum <= self.filled_quantity {
            // Retransmit or sub-sequence duplicate: nothing new to apply
            return if was_terminal {
                ApplyOutcome::LateFill { fill_delta: None }
            } else {
                ApplyOutcome::NoChange
            };
        }

        let delta = new_cum - self.filled_quantity;
        self.avg_fill_price = if new_cum.is_zero() {
            Decimal::ZERO
        } else {
            (self.avg_fill_price * self.filled_quantity + fill.price * delta) / new_cum
        };
        self.filled_quantity = new_cum;
        self.fees_total += fill.fee.fees;

        let fill_delta = Some(FillDelta {
            quantity: delta,
            price: fill.price,
            fee: fill.fee.fees,
        });

        if was_terminal {
            // Terminal states are absorbing; Canceled stays Canceled even as quantities
            // catch up to venue truth. Filled is the exception implied by full quantity.
            if self.status == OrderStatus::Canceled && self.filled_quantity == self.requested_quantity
            {
                self.status = OrderStatus::Filled;
            }
            return ApplyOutcome::LateFill { fill_delta };
        }

        self.status = if self.filled_quantity == self.requested_quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        ApplyOutcome::Applied { fill_delta }
    }

    pub fn apply_canceled(&mut self, seq: u64, now: DateTime<Utc>) -> ApplyOutcome {
        self.apply_terminal(seq, OrderStatus::Canceled, now)
    }

    pub fn apply_expired(&mut self, seq: u64, now: DateTime<Utc>) -> ApplyOutcome {
        self.apply_terminal(seq, OrderStatus::Expired, now)
    }

    fn apply_terminal(&mut self, seq: u64, status: OrderStatus, now: DateTime<Utc>) -> ApplyOutcome {
        if seq <= self.last_seq {
            return ApplyOutcome::Duplicate;
        }
        self.last_seq = seq;
        self.time_last_update = now;

        if self.status.is_terminal() {
            return ApplyOutcome::NoChange;
        }

        self.status = status;
        ApplyOutcome::Applied { fill_delta: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use veloz_execution::{
        event::{AssetFees, LiquidityRole},
        order::id::ExecId,
    };
    use veloz_instrument::asset::AssetName;

    fn order(quantity: Decimal) -> Order {
        let intent = OrderIntent::new(
            StrategyId::new("s1"),
            7,
            SymbolIndex(0),
            Side::Buy,
            OrderKind::Limit,
            TimeInForce::GoodUntilCancelled { post_only: false },
            quantity,
            Some(dec!(100)),
            None,
            false,
            0,
        );
        Order::from_intent(&intent, intent.client_order_id(), Utc::now())
    }

    fn fill(exec: &str, cum: Decimal, price: Decimal) -> Fill {
        Fill::new(
            ExecId::new(exec),
            cum,
            cum,
            price,
            AssetFees::new(AssetName::new("usdt"), dec!(0)),
            LiquidityRole::Taker,
        )
    }

    #[test]
    fn test_lifecycle_accept_partial_fill() {
        let mut order = order(dec!(1));
        let now = Utc::now();

        assert_eq!(
            order.apply_accepted(1, VenueOrderId::new("v1"), now),
            ApplyOutcome::Applied { fill_delta: None }
        );
        assert_eq!(order.status, OrderStatus::Accepted);

        order.apply_fill(2, &fill("e1", dec!(0.5), dec!(100)), now);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_quantity, dec!(0.5));

        order.apply_fill(3, &fill("e2", dec!(1), dec!(100)), now);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(1));
        assert_eq!(order.avg_fill_price, dec!(100));
    }

    #[test]
    fn test_out_of_order_receipts_converge() {
        // Receipts arrive as seq 3 (cum=1.0), seq 1 (accepted), seq 2 (cum=0.5)
        let mut order = order(dec!(1));
        let now = Utc::now();

        order.apply_fill(3, &fill("e2", dec!(1), dec!(100)), now);
        assert_eq!(order.status, OrderStatus::Filled);

        assert_eq!(
            order.apply_accepted(1, VenueOrderId::new("v1"), now),
            ApplyOutcome::Duplicate
        );
        assert_eq!(
            order.apply_fill(2, &fill("e1", dec!(0.5), dec!(100)), now),
            ApplyOutcome::Duplicate
        );

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(1));
        assert_eq!(order.avg_fill_price, dec!(100));
    }

    #[test]
    fn test_cumulative_jump_tolerates_skipped_fill() {
        let mut order = order(dec!(1));
        let now = Utc::now();
        order.apply_accepted(1, VenueOrderId::new("v1"), now);

        // The cum=0.5 receipt was lost; cum=1.0 applies directly
        let outcome = order.apply_fill(5, &fill("e9", dec!(1), dec!(101)), now);
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                fill_delta: Some(FillDelta {
                    quantity: dec!(1),
                    price: dec!(101),
                    fee: dec!(0),
                })
            }
        );
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_fill_after_cancel_is_late_fill() {
        let mut order = order(dec!(2));
        let now = Utc::now();
        order.apply_accepted(1, VenueOrderId::new("v1"), now);
        order.apply_canceled(2, now);
        assert_eq!(order.status, OrderStatus::Canceled);

        let outcome = order.apply_fill(3, &fill("e1", dec!(1), dec!(99)), now);
        assert!(matches!(
            outcome,
            ApplyOutcome::LateFill { fill_delta: Some(_) }
        ));
        // Quantities track venue truth; the cancel is not reopened
        assert_eq!(order.status, OrderStatus::Canceled);
        assert_eq!(order.filled_quantity, dec!(1));

        // A late fill completing the order does resolve it as Filled
        let outcome = order.apply_fill(4, &fill("e2", dec!(2), dec!(99)), now);
        assert!(matches!(outcome, ApplyOutcome::LateFill { .. }));
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_duplicate_receipt_idempotent() {
        let mut order = order(dec!(1));
        let now = Utc::now();
        order.apply_accepted(1, VenueOrderId::new("v1"), now);
        order.apply_fill(2, &fill("e1", dec!(0.5), dec!(100)), now);

        let before = order.clone();
        assert_eq!(
            order.apply_fill(2, &fill("e1", dec!(0.5), dec!(100)), now),
            ApplyOutcome::Duplicate
        );
        assert_eq!(order, before);
    }

    #[test]
    fn test_filled_quantity_clamped_to_requested() {
        let mut order = order(dec!(1));
        let now = Utc::now();
        order.apply_accepted(1, VenueOrderId::new("v1"), now);

        order.apply_fill(2, &fill("e1", dec!(1.5), dec!(100)), now);
        assert_eq!(order.filled_quantity, dec!(1));
        assert_eq!(order.status, OrderStatus::Filled);
    }
}
