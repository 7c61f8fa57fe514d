use chrono::{DateTime, Utc};
use derive_more::Display;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Venue circuit breaker configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BreakerConfig {
    /// Consecutive breaker-relevant failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before allowing a half-open probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Observable state of a [`CircuitBreaker`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { since: DateTime<Utc> },
    HalfOpen { probe_in_flight: bool },
}

/// Circuit breaker guarding one venue adapter.
///
/// CLOSED until `failure_threshold` consecutive transport/timeout failures, then OPEN:
/// calls fail fast without touching the venue. After `cooldown` a single HALF-OPEN probe is
/// admitted; its success closes the circuit, its failure re-opens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        match &*self.inner.lock() {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Admission check before a venue call.
    ///
    /// `false` means the circuit is open and the call must fail fast. While HALF-OPEN, only
    /// a single probe call is admitted at a time.
    pub fn admit(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed { .. } => true,
            Inner::Open { since } => {
                let elapsed = now.signed_duration_since(*since);
                if elapsed.to_std().is_ok_and(|elapsed| elapsed >= self.config.cooldown) {
                    info!("circuit breaker admitting half-open probe");
                    *inner = Inner::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                } else {
                    false
                }
            }
            Inner::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    false
                } else {
                    *probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match &*inner {
            Inner::Closed { .. } => {
                *inner = Inner::Closed {
                    consecutive_failures: 0,
                };
            }
            Inner::HalfOpen { .. } | Inner::Open { .. } => {
                info!("circuit breaker closed after successful probe");
                *inner = Inner::Closed {
                    consecutive_failures: 0,
                };
            }
        }
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = *consecutive_failures,
                        "circuit breaker tripped open"
                    );
                    *inner = Inner::Open { since: now };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!("circuit breaker probe failed - re-opening");
                *inner = Inner::Open { since: now };
            }
            Inner::Open { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_trip_cooldown_probe_cycle() {
        let start = Utc::now();
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(5),
        });

        // Three consecutive failures trip the circuit
        for _ in 0..3 {
            assert!(breaker.admit(start));
            breaker.record_failure(start);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.admit(start + TimeDelta::seconds(1)));

        // After cooldown a single probe is admitted
        let probe_time = start + TimeDelta::seconds(5);
        assert!(breaker.admit(probe_time));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.admit(probe_time), "second probe must be refused");

        // Probe success closes
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.admit(probe_time));
    }

    #[test]
    fn test_failed_probe_reopens() {
        let start = Utc::now();
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(5),
        });

        breaker.record_failure(start);
        assert_eq!(breaker.state(), CircuitState::Open);

        let probe_time = start + TimeDelta::seconds(6);
        assert!(breaker.admit(probe_time));
        breaker.record_failure(probe_time);
        assert_eq!(breaker.state(), CircuitState::Open);

        // Cooldown restarts from the failed probe
        assert!(!breaker.admit(probe_time + TimeDelta::seconds(4)));
        assert!(breaker.admit(probe_time + TimeDelta::seconds(5)));
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let start = Utc::now();
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(5),
        });

        breaker.record_failure(start);
        breaker.record_failure(start);
        breaker.record_success();
        breaker.record_failure(start);
        breaker.record_failure(start);

        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
