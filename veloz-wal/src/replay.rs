use crate::{
    error::WalError,
    record::{DecodeOutcome, WalRecord},
    segment::{SegmentReader, list_segments},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where replay stopped early because of a torn or corrupt record.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Truncation {
    /// Segment file containing the bad record.
    pub segment: PathBuf,
    /// Sequence of the last valid record before the truncation (`None` if the very first
    /// record was bad).
    pub at_seq: Option<u64>,
}

/// Replay all segments inside `dir` in sequence order.
///
/// A record failing its CRC ends replay at the previous valid record: a torn final write is
/// expected after a crash, and everything beyond it is untrusted. The caller surfaces the
/// returned [`Truncation`] and must run a full reconcile before accepting new submissions.
pub fn replay_dir(dir: &Path) -> Result<(Vec<WalRecord>, Option<Truncation>), WalError> {
    let mut records = Vec::new();
    let mut truncation = None;

    'segments: for path in list_segments(dir)? {
        let mut reader = SegmentReader::open(&path)?;

        loop {
            match reader.read_next()? {
                Some(DecodeOutcome::Record(record)) => records.push(record),
                Some(DecodeOutcome::Torn) => {
                    let at_seq = records.last().map(|record: &WalRecord| record.seq);
                    warn!(
                        segment = %path.display(),
                        ?at_seq,
                        "WAL replay found torn record - truncating"
                    );
                    truncation = Some(Truncation {
                        segment: path.clone(),
                        at_seq,
                    });
                    break 'segments;
                }
                None => break,
            }
        }
    }

    info!(
        count = records.len(),
        truncated = truncation.is_some(),
        dir = %dir.display(),
        "WAL replay complete"
    );

    Ok((records, truncation))
}

/// The sequence the writer should continue from after replaying `records`.
pub fn next_sequence(records: &[WalRecord]) -> u64 {
    records.last().map(|record| record.seq + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::RecordKind,
        segment::{Segment, segment_path},
    };
    use std::io::Write;
    use tempfile::TempDir;

    fn write_records(dir: &Path, segment_index: u64, seqs: std::ops::Range<u64>) {
        let mut segment = Segment::open(segment_path(dir, segment_index)).unwrap();
        for seq in seqs {
            let mut frame = Vec::new();
            WalRecord::new(seq, RecordKind::OrderIntent, seq * 10, vec![seq as u8])
                .encode(&mut frame)
                .unwrap();
            segment.append(&frame).unwrap();
        }
        segment.close().unwrap();
    }

    #[test]
    fn test_replay_across_segments_in_order() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 0, 0..5);
        write_records(dir.path(), 1, 5..8);

        let (records, truncation) = replay_dir(dir.path()).unwrap();
        assert!(truncation.is_none());
        assert_eq!(
            records.iter().map(|record| record.seq).collect::<Vec<_>>(),
            (0..8).collect::<Vec<_>>()
        );
        assert_eq!(next_sequence(&records), 8);
    }

    #[test]
    fn test_replay_stops_at_torn_record() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 0, 0..1000);

        // Append a garbage half-frame simulating a torn final write
        let path = segment_path(dir.path(), 0);
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(&[0xDE, 0xAD, 0xBE]).unwrap();
        drop(file);

        let (records, truncation) = replay_dir(dir.path()).unwrap();
        assert_eq!(records.len(), 1000);
        assert_eq!(
            truncation,
            Some(Truncation {
                segment: path,
                at_seq: Some(999),
            })
        );
    }

    #[test]
    fn test_replay_empty_dir() {
        let dir = TempDir::new().unwrap();
        let (records, truncation) = replay_dir(dir.path()).unwrap();
        assert!(records.is_empty());
        assert!(truncation.is_none());
        assert_eq!(next_sequence(&records), 0);
    }
}
