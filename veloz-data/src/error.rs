use crate::subscription::Channel;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use veloz_instrument::venue::VenueId;
use veloz_integration::error::SocketError;

/// All errors generated in `veloz-data`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("failed to initialise market stream due to empty subscriptions")]
    SubscriptionsEmpty,

    #[error("unsupported subscription for venue: {venue}, channel: {channel}")]
    Unsupported { venue: VenueId, channel: Channel },

    #[error("initial book snapshot invalid: {0}")]
    InitialSnapshotInvalid(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error(
        "\
        InvalidSequence: first_update_id {first_update_id} does not follow on from the \
        last_update_id {last_update_id} \
    "
    )]
    InvalidSequence {
        last_update_id: u64,
        first_update_id: u64,
    },
}

impl DataError {
    /// Determine if an error requires the associated book/stream to re-initialise from a
    /// fresh snapshot.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            DataError::InvalidSequence { .. } => true,
            DataError::InitialSnapshotInvalid(_) => true,
            _ => false,
        }
    }
}

impl From<SocketError> for DataError {
    fn from(value: SocketError) -> Self {
        Self::Socket(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_error_is_terminal() {
        struct TestCase {
            input: DataError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: is terminal w/ DataError::InvalidSequence
                input: DataError::InvalidSequence {
                    last_update_id: 0,
                    first_update_id: 0,
                },
                expected: true,
            },
            TestCase {
                // TC1: is not terminal w/ DataError::Socket
                input: DataError::from(SocketError::Sink),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_terminal();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
