use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

/// Client-generated order identifier: the engine's idempotency key.
///
/// Deterministic per intent (`{strategy}-{counter}`), generated by the OMS before the WAL
/// append, and unique within a run.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct ClientOrderId(pub SmolStr);

impl ClientOrderId {
    pub fn new<S: Into<SmolStr>>(id: S) -> Self {
        Self(id.into())
    }

    /// Deterministic id derived from the owning strategy and its monotonic intent counter.
    ///
    /// Re-deriving the same `(strategy, counter)` pair always yields the same id, which is
    /// what makes duplicate submissions detectable.
    pub fn deterministic(strategy: &StrategyId, counter: u64) -> Self {
        Self(format_smolstr!("{}-{counter}", strategy.0))
    }
}

/// Identifier assigned by the venue on acceptance.
///
/// May arrive after the first fill receipt for the order.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct VenueOrderId(pub SmolStr);

impl VenueOrderId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

/// Identifier of a strategy instance hosted by the runtime.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct StrategyId(pub SmolStr);

impl StrategyId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }

    pub fn unknown() -> Self {
        Self::new("unknown")
    }
}

/// Venue execution identifier de-duplicating fill retransmits.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct ExecId(pub SmolStr);

impl ExecId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}
