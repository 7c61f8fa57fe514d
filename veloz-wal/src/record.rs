use crate::error::WalError;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Fixed bytes of every frame surrounding the payload:
/// `[u32 len][u8 kind][u64 seq][u64 ts_ns] .. [u32 crc32]`.
pub const FRAME_OVERHEAD: usize = 4 + 1 + 8 + 8 + 4;

/// Maximum payload bytes accepted in a single record.
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

/// Kind of a [`WalRecord`], stored as a single byte on disk.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[repr(u8)]
pub enum RecordKind {
    /// An order intent, persisted before the venue adapter is called.
    OrderIntent = 1,
    /// An order state transition (accepted, cancelled, rejected, expired).
    OrderMutation = 2,
    /// A fill applied to an order and its position.
    FillApplied = 3,
    /// A receipt dropped as already-applied, retained for audit.
    Duplicate = 4,
    /// A state snapshot marker paired with a `.snap` file.
    Snapshot = 5,
    /// A strategy parameter update, versioning subsequent intents.
    ParamUpdate = 6,
    /// A venue call that expired at its deadline; outcome resolved by the reconciler.
    TimeoutPending = 7,
}

impl TryFrom<u8> for RecordKind {
    type Error = WalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::OrderIntent),
            2 => Ok(Self::OrderMutation),
            3 => Ok(Self::FillApplied),
            4 => Ok(Self::Duplicate),
            5 => Ok(Self::Snapshot),
            6 => Ok(Self::ParamUpdate),
            7 => Ok(Self::TimeoutPending),
            other => Err(WalError::UnknownRecordKind(other)),
        }
    }
}

/// One durable log record.
///
/// The payload is opaque to the WAL; callers bincode-encode their own payload types.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct WalRecord {
    /// Monotonic sequence assigned by the writer.
    pub seq: u64,
    pub kind: RecordKind,
    /// Engine time of the append, nanoseconds since the unix epoch.
    pub ts_ns: u64,
    pub payload: Vec<u8>,
}

impl WalRecord {
    pub fn new(seq: u64, kind: RecordKind, ts_ns: u64, payload: Vec<u8>) -> Self {
        Self {
            seq,
            kind,
            ts_ns,
            payload,
        }
    }

    /// Total bytes this record occupies on disk.
    pub fn frame_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Append the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), WalError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(WalError::PayloadTooLarge(self.payload.len()));
        }

        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.ts_ns.to_le_bytes());
        buf.extend_from_slice(&self.payload);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[self.kind as u8]);
        hasher.update(&self.seq.to_le_bytes());
        hasher.update(&self.ts_ns.to_le_bytes());
        hasher.update(&self.payload);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());

        Ok(())
    }

    /// Decode one frame from `reader`.
    ///
    /// Returns `Ok(None)` at a clean end of stream, and [`DecodeOutcome::Torn`] inside
    /// [`Ok(Some(..))`] when the trailing record is incomplete or fails its CRC.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Option<DecodeOutcome>, WalError> {
        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(reader, &mut len_buf)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => return Ok(Some(DecodeOutcome::Torn)),
            ReadOutcome::Full => {}
        }

        let payload_len = u32::from_le_bytes(len_buf) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            // A corrupt length prefix is indistinguishable from a torn write
            return Ok(Some(DecodeOutcome::Torn));
        }

        let mut rest = vec![0u8; 1 + 8 + 8 + payload_len + 4];
        match read_exact_or_eof(reader, &mut rest)? {
            ReadOutcome::Eof | ReadOutcome::Partial => return Ok(Some(DecodeOutcome::Torn)),
            ReadOutcome::Full => {}
        }

        let kind_byte = rest[0];
        let seq = u64::from_le_bytes(rest[1..9].try_into().expect("seq slice is 8 bytes"));
        let ts_ns = u64::from_le_bytes(rest[9..17].try_into().expect("ts slice is 8 bytes"));
        let payload = &rest[17..17 + payload_len];
        let crc_stored = u32::from_le_bytes(
            rest[17 + payload_len..]
                .try_into()
                .expect("crc slice is 4 bytes"),
        );

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&rest[..17 + payload_len]);
        if hasher.finalize() != crc_stored {
            return Ok(Some(DecodeOutcome::Torn));
        }

        let kind = RecordKind::try_from(kind_byte)?;

        Ok(Some(DecodeOutcome::Record(WalRecord {
            seq,
            kind,
            ts_ns,
            payload: payload.to_vec(),
        })))
    }
}

/// Result of decoding one frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DecodeOutcome {
    Record(WalRecord),
    /// Incomplete or CRC-failing trailing frame; replay must stop here.
    Torn,
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome, WalError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 if filled == 0 => return Ok(ReadOutcome::Eof),
            0 => return Ok(ReadOutcome::Partial),
            n => filled += n,
        }
    }
    Ok(ReadOutcome::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(seq: u64) -> WalRecord {
        WalRecord::new(seq, RecordKind::OrderIntent, 1_700_000_000_000, vec![1, 2, 3])
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let mut buf = Vec::new();
        for seq in 0..3 {
            record(seq).encode(&mut buf).unwrap();
        }

        let mut cursor = Cursor::new(buf);
        for seq in 0..3 {
            let decoded = WalRecord::decode(&mut cursor).unwrap().unwrap();
            assert_eq!(decoded, DecodeOutcome::Record(record(seq)));
        }
        assert_eq!(WalRecord::decode(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_decode_truncated_frame_is_torn() {
        let mut buf = Vec::new();
        record(7).encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = Cursor::new(buf);
        assert_eq!(
            WalRecord::decode(&mut cursor).unwrap(),
            Some(DecodeOutcome::Torn)
        );
    }

    #[test]
    fn test_decode_flipped_payload_bit_is_torn() {
        let mut buf = Vec::new();
        record(7).encode(&mut buf).unwrap();

        // Flip one payload byte; the stored CRC no longer matches
        let payload_offset = 4 + 1 + 8 + 8;
        buf[payload_offset] ^= 0xFF;

        let mut cursor = Cursor::new(buf);
        assert_eq!(
            WalRecord::decode(&mut cursor).unwrap(),
            Some(DecodeOutcome::Torn)
        );
    }

    #[test]
    fn test_payload_too_large_rejected() {
        let record = WalRecord::new(
            0,
            RecordKind::Snapshot,
            0,
            vec![0u8; MAX_PAYLOAD_LEN + 1],
        );
        assert!(matches!(
            record.encode(&mut Vec::new()),
            Err(WalError::PayloadTooLarge(_))
        ));
    }
}
