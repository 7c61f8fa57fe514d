use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Defines how the engine determines the current time.
///
/// Live runs use a [`LiveClock`]; replay runs use a [`SimClock`] driven purely by event
/// timestamps, keeping them bit-deterministic.
pub trait EngineClock {
    fn time(&self) -> DateTime<Utc>;

    /// Observe an event's exchange timestamp, allowing simulated clocks to advance.
    fn observe(&mut self, _time_exchange: DateTime<Utc>) {}
}

/// Live clock using `Utc::now()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct LiveClock;

impl EngineClock for LiveClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Simulated clock driven by observed event timestamps.
///
/// Never consults the wall clock; time only moves forward, so out-of-order historical
/// events cannot rewind it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct SimClock {
    now: DateTime<Utc>,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: start }
    }

    /// Advance by a fixed delta, eg/ for simulated timer delivery.
    pub fn advance(&mut self, delta: TimeDelta) {
        self.now += delta;
    }
}

impl EngineClock for SimClock {
    fn time(&self) -> DateTime<Utc> {
        self.now
    }

    fn observe(&mut self, time_exchange: DateTime<Utc>) {
        if time_exchange > self.now {
            self.now = time_exchange;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_never_rewinds() {
        let start = DateTime::<Utc>::MIN_UTC;
        let mut clock = SimClock::new(start);

        let t1 = start + TimeDelta::seconds(10);
        let t2 = start + TimeDelta::seconds(5);

        clock.observe(t1);
        assert_eq!(clock.time(), t1);

        // Out-of-order event does not move time backwards
        clock.observe(t2);
        assert_eq!(clock.time(), t1);

        clock.advance(TimeDelta::seconds(1));
        assert_eq!(clock.time(), t1 + TimeDelta::seconds(1));
    }
}
