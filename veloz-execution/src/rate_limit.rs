use chrono::{DateTime, Utc};
use derive_more::Display;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// Class of a venue request, ordered by priority.
///
/// Cancels always outrank places, which outrank queries: when tokens run low the engine
/// must still be able to pull risk off the venue.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum RequestClass {
    Cancel,
    Place,
    Query,
}

/// Per-venue token bucket configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Bucket capacity in request tokens.
    pub capacity: u32,
    /// Tokens restored per second.
    pub refill_per_sec: u32,
    /// Tokens only spendable by [`RequestClass::Cancel`].
    pub cancel_reserve: u32,
    /// Additional tokens withheld from [`RequestClass::Query`].
    pub place_reserve: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            refill_per_sec: 10,
            cancel_reserve: 5,
            place_reserve: 5,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Priority token bucket throttling one venue's request budget.
///
/// `try_acquire` is deterministic given an injected `now`, which keeps replay runs
/// bit-identical; the async [`Self::acquire`] convenience loops against the wall clock.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens: f64::from(config.capacity),
                last_refill: now,
            }),
        }
    }

    /// Floor below which this class may not spend.
    fn floor(&self, class: RequestClass) -> f64 {
        match class {
            RequestClass::Cancel => 0.0,
            RequestClass::Place => f64::from(self.config.cancel_reserve),
            RequestClass::Query => {
                f64::from(self.config.cancel_reserve) + f64::from(self.config.place_reserve)
            }
        }
    }

    /// Attempt to spend one token for `class` at `now`.
    ///
    /// Returns `Err(wait)` with the duration after which one token for this class will be
    /// available again.
    pub fn try_acquire(&self, class: RequestClass, now: DateTime<Utc>) -> Result<(), Duration> {
        let mut state = self.state.lock();

        // Refill based on elapsed time, capped at capacity
        let elapsed = now
            .signed_duration_since(state.last_refill)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        state.tokens = (state.tokens + elapsed * f64::from(self.config.refill_per_sec))
            .min(f64::from(self.config.capacity));
        state.last_refill = now;

        let floor = self.floor(class);
        if state.tokens - 1.0 >= floor {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = (floor + 1.0) - state.tokens;
            let wait_secs = deficit / f64::from(self.config.refill_per_sec.max(1));
            trace!(%class, deficit, "rate limit deferring venue request");
            Err(Duration::from_secs_f64(wait_secs))
        }
    }

    /// Await a token for `class`, sleeping through refills as required.
    pub async fn acquire(&self, class: RequestClass) {
        loop {
            match self.try_acquire(class, Utc::now()) {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}
