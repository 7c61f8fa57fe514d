use chrono::{DateTime, Utc};
use std::time::Duration;
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use veloz_execution::order::id::StrategyId;

/// Trading circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TradingBreakerConfig {
    /// Fractional drawdown from the run's equity peak that trips the breaker (eg/ 0.1).
    pub drawdown_limit: Decimal,
    /// Fractional drawdown that raises `Warning` without tripping.
    pub drawdown_warning: Decimal,
    /// Consecutive venue rejects that trip the breaker.
    pub reject_streak_limit: u32,
    /// Venue round-trip latency above this raises a latency strike; three strikes trip.
    pub latency_limit_ms: i64,
    /// Cooldown before a half-open probe is admitted.
    pub cooldown: Duration,
}

impl Default for TradingBreakerConfig {
    fn default() -> Self {
        Self {
            drawdown_limit: Decimal::new(10, 2),
            drawdown_warning: Decimal::new(5, 2),
            reject_streak_limit: 5,
            latency_limit_ms: 2_000,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Observable state of the [`TradingBreaker`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum BreakerState {
    Normal,
    /// Degraded but trading; surfaced so operators can intervene early.
    Warning,
    /// Only cancel operations are allowed.
    Tripped,
}

/// Why the breaker tripped.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Display)]
pub enum TripReason {
    #[display("drawdown {_0} breached limit")]
    Drawdown(Decimal),
    #[display("{_0} consecutive venue rejects")]
    RejectStreak(u32),
    #[display("venue latency anomaly")]
    LatencyAnomaly,
    #[display("kill switch engaged")]
    KillSwitch,
}

/// Operation classes gated by the breaker.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum TradeOp {
    Place,
    Cancel,
}

/// The engine-level trading circuit breaker.
///
/// Distinct from the per-venue transport breaker in `veloz-execution`: this one gates the
/// whole strategy runtime. While `Tripped`, strategies keep receiving events but only
/// cancels reach a venue. After `cooldown`, a single strategy is admitted as a half-open
/// probe; its next accepted order restores `Normal`, another trip condition re-trips.
#[derive(Debug)]
pub struct TradingBreaker {
    config: TradingBreakerConfig,
    state: BreakerState,
    tripped_at: Option<DateTime<Utc>>,
    trip_reason: Option<TripReason>,
    probe_strategy: Option<StrategyId>,
    reject_streak: u32,
    latency_strikes: u32,
    kill_switch: bool,
}

impl TradingBreaker {
    pub fn new(config: TradingBreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Normal,
            tripped_at: None,
            trip_reason: None,
            probe_strategy: None,
            reject_streak: 0,
            latency_strikes: 0,
            kill_switch: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn trip_reason(&self) -> Option<&TripReason> {
        self.trip_reason.as_ref()
    }

    /// Whether `op` from `strategy` may proceed at `now`.
    ///
    /// Cancels always pass. Places pass in `Normal`/`Warning`; while `Tripped` a single
    /// probe strategy is admitted once the cooldown has elapsed (kill switch excepted).
    pub fn allows(&mut self, op: TradeOp, strategy: &StrategyId, now: DateTime<Utc>) -> bool {
        match (op, self.state) {
            (TradeOp::Cancel, _) => true,
            (TradeOp::Place, BreakerState::Normal | BreakerState::Warning) => true,
            (TradeOp::Place, BreakerState::Tripped) => {
                if self.kill_switch {
                    return false;
                }

                let cooled_down = self.tripped_at.is_some_and(|tripped| {
                    now.signed_duration_since(tripped)
                        .to_std()
                        .is_ok_and(|elapsed| elapsed >= self.config.cooldown)
                });
                if !cooled_down {
                    return false;
                }

                // Half-open: the first strategy to ask becomes the single probe
                match &self.probe_strategy {
                    None => {
                        info!(%strategy, "trading breaker admitting half-open probe");
                        self.probe_strategy = Some(strategy.clone());
                        true
                    }
                    Some(probe) => probe == strategy,
                }
            }
        }
    }

    /// An order from the probe (or any order while not tripped) was accepted by the venue.
    pub fn record_accept(&mut self) {
        self.reject_streak = 0;

        if self.state == BreakerState::Tripped && self.probe_strategy.is_some() && !self.kill_switch
        {
            info!("trading breaker probe accepted - resuming normal trading");
            self.reset();
        }
    }

    /// A venue reject; a streak trips the breaker.
    pub fn record_reject(&mut self, now: DateTime<Utc>) {
        self.reject_streak += 1;

        if self.state == BreakerState::Tripped {
            // Probe failed; restart the cooldown
            self.tripped_at = Some(now);
            self.probe_strategy = None;
            return;
        }

        if self.reject_streak >= self.config.reject_streak_limit {
            self.trip(TripReason::RejectStreak(self.reject_streak), now);
        }
    }

    /// Equity drawdown from the run's peak, as a fraction.
    pub fn record_drawdown(&mut self, drawdown: Decimal, now: DateTime<Utc>) {
        if self.state == BreakerState::Tripped {
            return;
        }

        if drawdown >= self.config.drawdown_limit {
            self.trip(TripReason::Drawdown(drawdown), now);
        } else if drawdown >= self.config.drawdown_warning {
            if self.state != BreakerState::Warning {
                warn!(%drawdown, "trading breaker raised Warning on drawdown");
            }
            self.state = BreakerState::Warning;
        } else if self.state == BreakerState::Warning {
            self.state = BreakerState::Normal;
        }
    }

    /// Venue round-trip latency observation; three strikes trip.
    pub fn record_latency(&mut self, latency_ms: i64, now: DateTime<Utc>) {
        if latency_ms > self.config.latency_limit_ms {
            self.latency_strikes += 1;
            if self.latency_strikes >= 3 && self.state != BreakerState::Tripped {
                self.trip(TripReason::LatencyAnomaly, now);
            }
        } else {
            self.latency_strikes = 0;
        }
    }

    /// Engage or release the explicit kill switch.
    pub fn set_kill_switch(&mut self, engaged: bool, now: DateTime<Utc>) {
        self.kill_switch = engaged;
        if engaged {
            self.trip(TripReason::KillSwitch, now);
        } else if matches!(self.trip_reason, Some(TripReason::KillSwitch)) {
            info!("kill switch released - resuming normal trading");
            self.reset();
        }
    }

    fn trip(&mut self, reason: TripReason, now: DateTime<Utc>) {
        warn!(%reason, "trading breaker TRIPPED - cancel-only mode");
        self.state = BreakerState::Tripped;
        self.tripped_at = Some(now);
        self.trip_reason = Some(reason);
        self.probe_strategy = None;
    }

    fn reset(&mut self) {
        self.state = BreakerState::Normal;
        self.tripped_at = None;
        self.trip_reason = None;
        self.probe_strategy = None;
        self.reject_streak = 0;
        self.latency_strikes = 0;
    }
}

impl Default for TradingBreaker {
    fn default() -> Self {
        Self::new(TradingBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;

    fn strategy(name: &str) -> StrategyId {
        StrategyId::new(name)
    }

    #[test]
    fn test_reject_streak_trips_then_probe_recovers() {
        let mut breaker = TradingBreaker::new(TradingBreakerConfig {
            reject_streak_limit: 3,
            cooldown: Duration::from_secs(60),
            ..Default::default()
        });
        let start = Utc::now();

        for _ in 0..3 {
            breaker.record_reject(start);
        }
        assert_eq!(breaker.state(), BreakerState::Tripped);

        // Cancels still allowed; places refused during cooldown
        assert!(breaker.allows(TradeOp::Cancel, &strategy("a"), start));
        assert!(!breaker.allows(TradeOp::Place, &strategy("a"), start));

        // After cooldown, exactly one strategy probes
        let after = start + TimeDelta::seconds(61);
        assert!(breaker.allows(TradeOp::Place, &strategy("a"), after));
        assert!(!breaker.allows(TradeOp::Place, &strategy("b"), after));

        breaker.record_accept();
        assert_eq!(breaker.state(), BreakerState::Normal);
        assert!(breaker.allows(TradeOp::Place, &strategy("b"), after));
    }

    #[test]
    fn test_failed_probe_restarts_cooldown() {
        let mut breaker = TradingBreaker::new(TradingBreakerConfig {
            reject_streak_limit: 1,
            cooldown: Duration::from_secs(60),
            ..Default::default()
        });
        let start = Utc::now();

        breaker.record_reject(start);
        assert_eq!(breaker.state(), BreakerState::Tripped);

        let probe_time = start + TimeDelta::seconds(61);
        assert!(breaker.allows(TradeOp::Place, &strategy("a"), probe_time));
        breaker.record_reject(probe_time);

        assert_eq!(breaker.state(), BreakerState::Tripped);
        assert!(!breaker.allows(TradeOp::Place, &strategy("a"), probe_time + TimeDelta::seconds(30)));
        assert!(breaker.allows(TradeOp::Place, &strategy("a"), probe_time + TimeDelta::seconds(61)));
    }

    #[test]
    fn test_drawdown_warning_and_trip() {
        let mut breaker = TradingBreaker::default();
        let now = Utc::now();

        breaker.record_drawdown(dec!(0.06), now);
        assert_eq!(breaker.state(), BreakerState::Warning);

        breaker.record_drawdown(dec!(0.02), now);
        assert_eq!(breaker.state(), BreakerState::Normal);

        breaker.record_drawdown(dec!(0.12), now);
        assert_eq!(breaker.state(), BreakerState::Tripped);
        assert!(matches!(
            breaker.trip_reason(),
            Some(TripReason::Drawdown(_))
        ));
    }

    #[test]
    fn test_kill_switch_blocks_probe() {
        let mut breaker = TradingBreaker::default();
        let now = Utc::now();

        breaker.set_kill_switch(true, now);
        assert_eq!(breaker.state(), BreakerState::Tripped);

        // Even past cooldown, no probe while the switch is engaged
        let later = now + TimeDelta::seconds(3600);
        assert!(!breaker.allows(TradeOp::Place, &strategy("a"), later));
        assert!(breaker.allows(TradeOp::Cancel, &strategy("a"), later));

        breaker.set_kill_switch(false, later);
        assert_eq!(breaker.state(), BreakerState::Normal);
    }
}
