use thiserror::Error;

/// All errors generated in `veloz-wal`.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),

    #[error("WAL record codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("unknown WAL record kind: {0}")]
    UnknownRecordKind(u8),

    #[error("WAL writer thread is not running")]
    WriterStopped,

    #[error("WAL commit acknowledgement dropped before completion")]
    CommitAckDropped,

    #[error("snapshot {0} is corrupt: checksum mismatch")]
    SnapshotCorrupt(String),
}
