use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an order owned by the OMS.
///
/// Terminal statuses are absorbing: once `Filled`, `Canceled`, `Rejected` or `Expired`, no
/// receipt moves the order to another status (late fills update quantities only).
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Intent persisted; venue call in flight or about to be made.
    PendingSubmit,
    /// Venue acknowledged; `VenueOrderId` bound.
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Statuses where the venue may still produce fills.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingSubmit | OrderStatus::Accepted | OrderStatus::PartiallyFilled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_and_active_partition() {
        let all = [
            OrderStatus::PendingSubmit,
            OrderStatus::Accepted,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ];

        for status in all {
            assert_ne!(
                status.is_terminal(),
                status.is_active(),
                "{status} must be exactly one of terminal/active"
            );
        }
    }
}
