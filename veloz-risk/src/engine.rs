use crate::{
    RiskApproved, RiskRefused,
    check::{calculate_abs_percent_difference, calculate_quote_notional, signed_quantity},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use veloz_execution::order::{OrderIntent, id::StrategyId};
use veloz_instrument::symbol::Symbol;

/// Pre-trade check limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RiskConfig {
    /// Quote-notional ceiling per order.
    pub max_order_notional: Decimal,
    /// Absolute position quantity ceiling per `(strategy, symbol)`.
    pub max_position_quantity: Decimal,
    /// Gross-notional-to-equity ceiling for the account.
    pub max_leverage: Decimal,
    /// Reject limit prices deviating from the reference mid by more than this fraction.
    pub price_deviation_limit: Decimal,
    /// Per-strategy submit burst capacity.
    pub submit_burst: u32,
    /// Per-strategy submit tokens restored per second.
    pub submit_per_sec: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_order_notional: Decimal::new(100_000, 0),
            max_position_quantity: Decimal::new(1_000, 0),
            max_leverage: Decimal::new(5, 0),
            price_deviation_limit: Decimal::new(5, 2),
            submit_burst: 10,
            submit_per_sec: 5,
        }
    }
}

/// Account/market state the checks run against, assembled by the engine per intent.
///
/// All values are projections owned by the OMS; the reconciler repairs them against venue
/// truth.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RiskContext {
    /// Free quote balance available for new exposure.
    pub available_funds: Decimal,
    /// Reference mid from the symbol's book, when `snapshot_ready`.
    pub reference_mid: Option<Decimal>,
    /// Signed current position quantity for `(strategy, symbol)`.
    pub position_quantity: Decimal,
    /// Current gross notional across the account.
    pub account_notional: Decimal,
    /// Account equity backing the leverage ceiling.
    pub equity: Decimal,
}

/// Why an intent was refused.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display)]
pub enum RiskRefusal {
    #[display("funds insufficient: required {required}, available {available}")]
    FundsInsufficient {
        required: Decimal,
        available: Decimal,
    },
    #[display("position ceiling: resulting {resulting} exceeds {limit}")]
    PositionCeiling { resulting: Decimal, limit: Decimal },
    #[display("leverage ceiling: resulting {resulting} exceeds {limit}")]
    LeverageCeiling { resulting: Decimal, limit: Decimal },
    #[display("submit rate exceeded for strategy {strategy}")]
    SubmitRate { strategy: StrategyId },
    #[display("price {price} deviates {deviation} from mid {mid}")]
    PriceDeviation {
        price: Decimal,
        mid: Decimal,
        deviation: Decimal,
    },
    #[display("order notional {notional} exceeds per-order ceiling {limit}")]
    OrderNotionalCeiling { notional: Decimal, limit: Decimal },
    #[display("below venue minimums")]
    MinNotional,
    #[display("no price available to value the order")]
    PriceUnavailable,
}

#[derive(Debug)]
struct SubmitBucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Synchronous pre-trade gate on the submit path. All checks are O(1) against the provided
/// [`RiskContext`].
#[derive(Debug)]
pub struct RiskEngine {
    config: RiskConfig,
    submit_buckets: FnvHashMap<StrategyId, SubmitBucket>,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            submit_buckets: FnvHashMap::default(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Run every pre-trade check against the intent.
    ///
    /// Checks run cheapest-first; the first failure wins. The submit-rate token is only
    /// consumed if all other checks pass.
    pub fn check_intent(
        &mut self,
        symbol: &Symbol,
        intent: OrderIntent,
        context: &RiskContext,
        now: DateTime<Utc>,
    ) -> Result<RiskApproved<OrderIntent>, RiskRefused<OrderIntent>> {
        if let Err(reason) = self.run_checks(symbol, &intent, context, now) {
            debug!(
                strategy = %intent.strategy,
                %reason,
                "risk refused order intent"
            );
            return Err(RiskRefused::new(intent, reason));
        }

        self.consume_submit_token(&intent.strategy, now);
        Ok(RiskApproved::new(intent))
    }

    fn run_checks(
        &mut self,
        symbol: &Symbol,
        intent: &OrderIntent,
        context: &RiskContext,
        now: DateTime<Utc>,
    ) -> Result<(), RiskRefusal> {
        // Submit-rate first: it is the hot-path guard against a runaway strategy
        if !self.has_submit_token(&intent.strategy, now) {
            return Err(RiskRefusal::SubmitRate {
                strategy: intent.strategy.clone(),
            });
        }

        let reference_price = intent.price.or(context.reference_mid);
        let Some(price) = reference_price else {
            return Err(RiskRefusal::PriceUnavailable);
        };

        // Price deviation applies to limit prices only; market orders take the mid
        if let (Some(limit_price), Some(mid)) = (intent.price, context.reference_mid) {
            if let Some(deviation) = calculate_abs_percent_difference(limit_price, mid) {
                if deviation > self.config.price_deviation_limit {
                    return Err(RiskRefusal::PriceDeviation {
                        price: limit_price,
                        mid,
                        deviation,
                    });
                }
            }
        }

        if !symbol.spec.meets_minimums(price, intent.quantity) {
            return Err(RiskRefusal::MinNotional);
        }

        let notional =
            calculate_quote_notional(intent.quantity, price, symbol.spec.contract_multiplier)
                .ok_or(RiskRefusal::PriceUnavailable)?;

        if notional > self.config.max_order_notional {
            return Err(RiskRefusal::OrderNotionalCeiling {
                notional,
                limit: self.config.max_order_notional,
            });
        }

        // Reduce-only intents shrink exposure; funds/position/leverage ceilings don't apply
        if intent.reduce_only {
            return Ok(());
        }

        if notional > context.available_funds {
            return Err(RiskRefusal::FundsInsufficient {
                required: notional,
                available: context.available_funds,
            });
        }

        let resulting_position =
            context.position_quantity + signed_quantity(intent.side, intent.quantity);
        if resulting_position.abs() > self.config.max_position_quantity {
            return Err(RiskRefusal::PositionCeiling {
                resulting: resulting_position,
                limit: self.config.max_position_quantity,
            });
        }

        if context.equity > Decimal::ZERO {
            let resulting_leverage = (context.account_notional + notional) / context.equity;
            if resulting_leverage > self.config.max_leverage {
                return Err(RiskRefusal::LeverageCeiling {
                    resulting: resulting_leverage,
                    limit: self.config.max_leverage,
                });
            }
        }

        Ok(())
    }

    fn refill(bucket: &mut SubmitBucket, config: &RiskConfig, now: DateTime<Utc>) {
        let elapsed = now
            .signed_duration_since(bucket.last_refill)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed * f64::from(config.submit_per_sec))
            .min(f64::from(config.submit_burst));
        bucket.last_refill = now;
    }

    fn has_submit_token(&mut self, strategy: &StrategyId, now: DateTime<Utc>) -> bool {
        let bucket = self
            .submit_buckets
            .entry(strategy.clone())
            .or_insert_with(|| SubmitBucket {
                tokens: f64::from(self.config.submit_burst),
                last_refill: now,
            });
        Self::refill(bucket, &self.config, now);
        bucket.tokens >= 1.0
    }

    fn consume_submit_token(&mut self, strategy: &StrategyId, now: DateTime<Utc>) {
        if let Some(bucket) = self.submit_buckets.get_mut(strategy) {
            Self::refill(bucket, &self.config, now);
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
        }
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;
    use veloz_execution::order::{OrderKind, TimeInForce};
    use veloz_instrument::{Side, symbol::SymbolIndex, test_utils::symbol, venue::VenueId};

    fn intent(side: Side, quantity: Decimal, price: Option<Decimal>) -> OrderIntent {
        OrderIntent::new(
            StrategyId::new("mom"),
            1,
            SymbolIndex(0),
            side,
            if price.is_some() {
                OrderKind::Limit
            } else {
                OrderKind::Market
            },
            TimeInForce::GoodUntilCancelled { post_only: false },
            quantity,
            price,
            None,
            false,
            0,
        )
    }

    fn context() -> RiskContext {
        RiskContext {
            available_funds: dec!(100000),
            reference_mid: Some(dec!(100)),
            position_quantity: dec!(0),
            account_notional: dec!(0),
            equity: dec!(100000),
        }
    }

    #[test]
    fn test_check_matrix() {
        struct TestCase {
            name: &'static str,
            intent: OrderIntent,
            context: RiskContext,
            expected_err: Option<fn(&RiskRefusal) -> bool>,
        }

        let tests = vec![
            TestCase {
                name: "limit within all limits approved",
                intent: intent(Side::Buy, dec!(10), Some(dec!(100))),
                context: context(),
                expected_err: None,
            },
            TestCase {
                name: "price deviation refused",
                intent: intent(Side::Buy, dec!(10), Some(dec!(110))),
                context: context(),
                expected_err: Some(|reason| {
                    matches!(reason, RiskRefusal::PriceDeviation { .. })
                }),
            },
            TestCase {
                name: "funds insufficient refused",
                intent: intent(Side::Buy, dec!(10), Some(dec!(100))),
                context: RiskContext {
                    available_funds: dec!(500),
                    ..context()
                },
                expected_err: Some(|reason| {
                    matches!(reason, RiskRefusal::FundsInsufficient { .. })
                }),
            },
            TestCase {
                name: "position ceiling refused",
                intent: intent(Side::Sell, dec!(600), Some(dec!(100))),
                context: RiskContext {
                    position_quantity: dec!(-500),
                    ..context()
                },
                expected_err: Some(|reason| {
                    matches!(reason, RiskRefusal::PositionCeiling { .. })
                }),
            },
            TestCase {
                name: "market order without mid refused",
                intent: intent(Side::Buy, dec!(1), None),
                context: RiskContext {
                    reference_mid: None,
                    ..context()
                },
                expected_err: Some(|reason| matches!(reason, RiskRefusal::PriceUnavailable)),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut engine = RiskEngine::default();
            let btc = symbol(VenueId::Mock, "btc", "usdt");

            let result = engine.check_intent(&btc, test.intent, &test.context, Utc::now());
            match (result, test.expected_err) {
                (Ok(_), None) => {}
                (Err(refused), Some(matches_expected)) => {
                    assert!(
                        matches_expected(&refused.reason),
                        "TC{index} ({}) failed: wrong refusal {:?}",
                        test.name,
                        refused.reason
                    );
                }
                (result, _) => panic!(
                    "TC{index} ({}) failed: unexpected {result:?}",
                    test.name
                ),
            }
        }
    }

    #[test]
    fn test_submit_rate_bucket() {
        let mut engine = RiskEngine::new(RiskConfig {
            submit_burst: 2,
            submit_per_sec: 1,
            ..Default::default()
        });
        let btc = symbol(VenueId::Mock, "btc", "usdt");
        let start = Utc::now();

        for counter in 0..2 {
            let mut next = intent(Side::Buy, dec!(1), Some(dec!(100)));
            next.counter = counter;
            assert!(
                engine.check_intent(&btc, next, &context(), start).is_ok(),
                "burst submit {counter} should pass"
            );
        }

        let refused = engine
            .check_intent(&btc, intent(Side::Buy, dec!(1), Some(dec!(100))), &context(), start)
            .unwrap_err();
        assert!(matches!(refused.reason, RiskRefusal::SubmitRate { .. }));

        // One second restores one token
        let later = start + TimeDelta::seconds(1);
        assert!(
            engine
                .check_intent(&btc, intent(Side::Buy, dec!(1), Some(dec!(100))), &context(), later)
                .is_ok()
        );
    }

    #[test]
    fn test_reduce_only_skips_funds_check() {
        let mut engine = RiskEngine::default();
        let btc = symbol(VenueId::Mock, "btc", "usdt");

        let mut closing = intent(Side::Sell, dec!(10), Some(dec!(100)));
        closing.reduce_only = true;

        let broke = RiskContext {
            available_funds: dec!(0),
            position_quantity: dec!(10),
            ..context()
        };

        assert!(
            engine
                .check_intent(&btc, closing, &broke, Utc::now())
                .is_ok()
        );
    }
}
