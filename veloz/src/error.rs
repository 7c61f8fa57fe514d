use serde::{Deserialize, Serialize};
use thiserror::Error;
use veloz_execution::order::id::ClientOrderId;
use veloz_integration::Unrecoverable;

/// All possible errors in VeloZ core.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum EngineError {
    /// Recoverable: logged, surfaced as a `SystemEvent`, processing continues.
    #[error("recoverable engine error: {0}")]
    Recoverable(String),

    /// Unrecoverable: an engine invariant is broken; shutdown with final flush.
    #[error("unrecoverable engine error: {0}")]
    Unrecoverable(String),

    #[error("unknown client order id: {0}")]
    OrderUnknown(ClientOrderId),

    #[error("execution: {0}")]
    Execution(#[from] veloz_execution::error::ExecutionError),

    #[error("wal: {0}")]
    Wal(String),

    #[error("config: {0}")]
    Config(String),
}

impl From<veloz_wal::WalError> for EngineError {
    fn from(value: veloz_wal::WalError) -> Self {
        Self::Wal(value.to_string())
    }
}

impl Unrecoverable for EngineError {
    fn is_unrecoverable(&self) -> bool {
        match self {
            EngineError::Unrecoverable(_) | EngineError::Wal(_) => true,
            EngineError::Execution(error) => error.is_unrecoverable(),
            _ => false,
        }
    }
}
