use serde::{Deserialize, Serialize};
use thiserror::Error;
use veloz_instrument::venue::VenueId;
use veloz_integration::{Unrecoverable, error::SocketError};

/// Execution errors, classified on the five axes the engine reacts to differently.
///
/// * `Transport` - retried by the resilient wrapper; counts towards the circuit breaker.
/// * `Protocol` - non-retryable for the offending call; the stream/book is resynchronised.
/// * `Business` - venue reject; propagated as `OrderRejected`, never retried automatically.
/// * `Internal` - invariant violation; fatal for the engine.
/// * `Timeout` - the call's deadline expired; the reconciler resolves the true outcome.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum ExecutionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("business: {0}")]
    Business(#[from] BusinessReason),

    #[error("internal: {0}")]
    Internal(String),

    #[error("venue call deadline expired")]
    Timeout,

    #[error("circuit open for venue {0}")]
    CircuitOpen(VenueId),
}

impl ExecutionError {
    /// Transient failures the resilient wrapper may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Transport(_))
    }

    /// Failures that count towards tripping the venue circuit breaker.
    pub fn is_breaker_relevant(&self) -> bool {
        matches!(
            self,
            ExecutionError::Transport(_) | ExecutionError::Timeout
        )
    }
}

impl Unrecoverable for ExecutionError {
    fn is_unrecoverable(&self) -> bool {
        matches!(self, ExecutionError::Internal(_))
    }
}

/// Network-level failure talking to a venue.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum TransportError {
    #[error("venue {0} unreachable: {1}")]
    Unreachable(VenueId, String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("tls: {0}")]
    Tls(String),
}

impl From<SocketError> for TransportError {
    fn from(value: SocketError) -> Self {
        Self::ConnectionReset(value.to_string())
    }
}

/// Venue reject reasons mapped from venue-specific error codes.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum BusinessReason {
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("rate limited by venue")]
    RateLimited,

    #[error("post-only order would take")]
    PostOnlyWouldTake,

    #[error("order not found")]
    OrderNotFound,

    #[error("min notional not met")]
    MinNotional,

    #[error("venue rejected: {code} {message}")]
    Venue { code: i64, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        struct TestCase {
            input: ExecutionError,
            retryable: bool,
            breaker: bool,
            unrecoverable: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: transport is retryable and breaker-relevant
                input: ExecutionError::Transport(TransportError::ConnectionReset("rst".into())),
                retryable: true,
                breaker: true,
                unrecoverable: false,
            },
            TestCase {
                // TC1: business rejects never retry
                input: ExecutionError::Business(BusinessReason::InsufficientFunds),
                retryable: false,
                breaker: false,
                unrecoverable: false,
            },
            TestCase {
                // TC2: timeout resolved by reconciler but feeds the breaker
                input: ExecutionError::Timeout,
                retryable: false,
                breaker: true,
                unrecoverable: false,
            },
            TestCase {
                // TC3: internal is fatal
                input: ExecutionError::Internal("invariant".into()),
                retryable: false,
                breaker: false,
                unrecoverable: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.input.is_retryable(), test.retryable, "TC{index} failed");
            assert_eq!(
                test.input.is_breaker_relevant(),
                test.breaker,
                "TC{index} failed"
            );
            assert_eq!(
                test.input.is_unrecoverable(),
                test.unrecoverable,
                "TC{index} failed"
            );
        }
    }
}
