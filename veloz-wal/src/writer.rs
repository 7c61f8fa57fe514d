use crate::{
    error::WalError,
    record::{RecordKind, WalRecord},
    segment::{Segment, latest_segment_index, segment_path},
};
use std::{
    path::PathBuf,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{error, info, warn};
use veloz_integration::queue::UnboundedQueue;

/// WAL writer configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding `NNNNN.log` segment files.
    pub dir: PathBuf,
    /// Segment rotation threshold in bytes.
    pub segment_size: u64,
    /// Group commit: fsync once this many records are pending.
    pub batch_max_records: usize,
    /// Group commit: fsync once the oldest pending record is this old.
    pub batch_max_wait: Duration,
}

impl WalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: 64 * 1024 * 1024,
            batch_max_records: 128,
            batch_max_wait: Duration::from_millis(2),
        }
    }
}

/// Commit failure delivered to producers awaiting an acknowledgement.
///
/// Thin cloneable error: the underlying io error is logged by the writer thread, and any
/// commit failure is fatal for the engine regardless of detail.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("WAL commit failed: {0}")]
pub struct CommitError(pub String);

/// Notices emitted by the writer thread for the engine loop to act on.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WalNotice {
    /// Active segment rotated; a state snapshot should be written for `closed_index`.
    Rotated { closed_index: u64 },
    /// A commit failed; the WAL is no longer accepting appends and the engine must halt.
    CommitFailed(CommitError),
}

enum WalCommand {
    Append {
        kind: RecordKind,
        ts_ns: u64,
        payload: Vec<u8>,
        ack: Option<tokio::sync::oneshot::Sender<Result<u64, CommitError>>>,
    },
    Shutdown {
        ack: tokio::sync::oneshot::Sender<()>,
    },
}

impl std::fmt::Debug for WalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalCommand::Append { kind, .. } => write!(f, "Append({kind})"),
            WalCommand::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

/// Producer handle to the WAL writer thread.
///
/// Cheap to clone; all appends funnel through the shared lock-free queue.
#[derive(Debug, Clone)]
pub struct WalHandle {
    queue: UnboundedQueue<WalCommand>,
    writer_thread: thread::Thread,
}

/// Pending durability acknowledgement for an [`WalHandle::append`].
#[derive(Debug)]
pub struct CommitReceipt {
    rx: tokio::sync::oneshot::Receiver<Result<u64, CommitError>>,
}

impl CommitReceipt {
    /// Await the fsync covering this record, returning its assigned sequence.
    pub async fn wait(self) -> Result<u64, WalError> {
        match self.rx.await {
            Ok(Ok(seq)) => Ok(seq),
            Ok(Err(error)) => Err(WalError::Io(std::io::Error::other(error.0))),
            Err(_) => Err(WalError::CommitAckDropped),
        }
    }
}

impl WalHandle {
    /// Append a record and receive a [`CommitReceipt`] resolving after the covering fsync.
    ///
    /// This is the durability barrier used by order intents: the caller must not contact the
    /// venue until the receipt resolves.
    pub fn append(&self, kind: RecordKind, ts_ns: u64, payload: Vec<u8>) -> CommitReceipt {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.queue.push(WalCommand::Append {
            kind,
            ts_ns,
            payload,
            ack: Some(tx),
        });
        self.writer_thread.unpark();
        CommitReceipt { rx }
    }

    /// Append a record without awaiting durability.
    ///
    /// Used for receipts and audit records whose loss on crash is repaired by the
    /// reconciler.
    pub fn append_noack(&self, kind: RecordKind, ts_ns: u64, payload: Vec<u8>) {
        self.queue.push(WalCommand::Append {
            kind,
            ts_ns,
            payload,
            ack: None,
        });
        self.writer_thread.unpark();
    }

    /// Flush and stop the writer thread, resolving once the final fsync completes.
    ///
    /// The wait is bounded: a writer that already failed will never acknowledge.
    pub async fn shutdown(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.queue.push(WalCommand::Shutdown { ack: tx });
        self.writer_thread.unpark();
        let _ = tokio::time::timeout(Duration::from_secs(5), rx).await;
    }
}

/// The dedicated WAL writer thread.
///
/// Owns the active [`Segment`]; consumes appends from the lock-free queue, batches them, and
/// fsyncs per the group-commit policy before acknowledging producers.
#[derive(Debug)]
pub struct WalWriter {
    config: WalConfig,
    queue: UnboundedQueue<WalCommand>,
    notice_tx: tokio::sync::mpsc::UnboundedSender<WalNotice>,
    segment: Segment,
    segment_index: u64,
    next_seq: u64,
    pending_acks: Vec<(tokio::sync::oneshot::Sender<Result<u64, CommitError>>, u64)>,
    pending_records: usize,
    oldest_pending: Option<Instant>,
}

impl WalWriter {
    /// Open the WAL at `config.dir` and spawn the writer thread.
    ///
    /// `next_seq` continues the sequence restored by replay (0 for a fresh directory).
    pub fn spawn(
        config: WalConfig,
        next_seq: u64,
        notice_tx: tokio::sync::mpsc::UnboundedSender<WalNotice>,
    ) -> Result<(WalHandle, JoinHandle<()>), WalError> {
        std::fs::create_dir_all(&config.dir)?;

        let segment_index = latest_segment_index(&config.dir)?.unwrap_or(0);
        let segment = Segment::open(segment_path(&config.dir, segment_index))?;

        let queue = UnboundedQueue::new();
        let writer = WalWriter {
            config,
            queue: queue.clone(),
            notice_tx,
            segment,
            segment_index,
            next_seq,
            pending_acks: Vec::new(),
            pending_records: 0,
            oldest_pending: None,
        };

        info!(
            dir = %writer.config.dir.display(),
            segment_index,
            next_seq,
            "WAL writer starting"
        );

        let join = thread::Builder::new()
            .name("veloz-wal-writer".into())
            .spawn(move || writer.run())?;

        let handle = WalHandle {
            queue,
            writer_thread: join.thread().clone(),
        };

        Ok((handle, join))
    }

    fn run(mut self) {
        loop {
            let mut drained_any = false;

            while let Some(command) = self.queue.try_pop() {
                drained_any = true;
                match command {
                    WalCommand::Append {
                        kind,
                        ts_ns,
                        payload,
                        ack,
                    } => {
                        if let Err(error) = self.stage(kind, ts_ns, payload, ack) {
                            self.fail(error);
                            return;
                        }
                    }
                    WalCommand::Shutdown { ack } => {
                        if let Err(error) = self.commit() {
                            self.fail(error);
                        } else if let Err(error) = self.segment.sync() {
                            self.fail(error);
                        }
                        let _ = ack.send(());
                        info!("WAL writer shutting down");
                        return;
                    }
                }
            }

            let batch_full = self.pending_records >= self.config.batch_max_records;
            let batch_aged = self
                .oldest_pending
                .is_some_and(|since| since.elapsed() >= self.config.batch_max_wait);

            if self.pending_records > 0 && (batch_full || batch_aged) {
                if let Err(error) = self.commit() {
                    self.fail(error);
                    return;
                }
                continue;
            }

            if !drained_any {
                let park_for = if self.pending_records > 0 {
                    self.config.batch_max_wait
                } else {
                    // Nothing pending; sleep until the next producer unparks us
                    Duration::from_millis(50)
                };
                thread::park_timeout(park_for);
            }
        }
    }

    /// Encode and buffer one record, tracking its acknowledgement for the next commit.
    fn stage(
        &mut self,
        kind: RecordKind,
        ts_ns: u64,
        payload: Vec<u8>,
        ack: Option<tokio::sync::oneshot::Sender<Result<u64, CommitError>>>,
    ) -> Result<(), WalError> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let record = WalRecord::new(seq, kind, ts_ns, payload);
        let mut frame = Vec::with_capacity(record.frame_len());
        record.encode(&mut frame)?;
        self.segment.append(&frame)?;

        if let Some(ack) = ack {
            self.pending_acks.push((ack, seq));
        }
        self.pending_records += 1;
        self.oldest_pending.get_or_insert_with(Instant::now);

        Ok(())
    }

    /// Fsync buffered records, acknowledge producers, and rotate if the segment is full.
    fn commit(&mut self) -> Result<(), WalError> {
        if self.pending_records == 0 {
            return Ok(());
        }

        self.segment.sync()?;

        for (ack, seq) in self.pending_acks.drain(..) {
            let _ = ack.send(Ok(seq));
        }
        self.pending_records = 0;
        self.oldest_pending = None;

        if self.segment.bytes_written() >= self.config.segment_size {
            self.rotate()?;
        }

        Ok(())
    }

    fn rotate(&mut self) -> Result<(), WalError> {
        let closed_index = self.segment_index;
        self.segment_index += 1;
        let next = Segment::open(segment_path(&self.config.dir, self.segment_index))?;
        let closed = std::mem::replace(&mut self.segment, next);
        closed.close()?;

        info!(closed_index, next_index = self.segment_index, "WAL segment rotated");

        if self.notice_tx.send(WalNotice::Rotated { closed_index }).is_err() {
            warn!("WAL notice receiver dropped - rotation notices will no longer be sent");
        }

        Ok(())
    }

    /// Unrecoverable write failure: fail all pending acks and notify the engine.
    fn fail(&mut self, error: WalError) {
        error!(?error, "WAL writer failed - engine must halt");
        let commit_error = CommitError(error.to_string());

        for (ack, _seq) in self.pending_acks.drain(..) {
            let _ = ack.send(Err(commit_error.clone()));
        }

        let _ = self
            .notice_tx
            .send(WalNotice::CommitFailed(commit_error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::replay_dir;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> WalConfig {
        WalConfig {
            dir: dir.path().to_path_buf(),
            segment_size: 1024,
            batch_max_records: 4,
            batch_max_wait: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_append_ack_resolves_with_sequence() {
        let dir = TempDir::new().unwrap();
        let (notice_tx, _notice_rx) = tokio::sync::mpsc::unbounded_channel();
        let (handle, join) = WalWriter::spawn(test_config(&dir), 0, notice_tx).unwrap();

        let first = handle
            .append(RecordKind::OrderIntent, 1, vec![1])
            .wait()
            .await
            .unwrap();
        let second = handle
            .append(RecordKind::OrderMutation, 2, vec![2])
            .wait()
            .await
            .unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 1);

        handle.shutdown().await;
        join.join().unwrap();

        let (records, truncation) = replay_dir(dir.path()).unwrap();
        assert!(truncation.is_none());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, RecordKind::OrderIntent);
        assert_eq!(records[1].seq, 1);
    }

    #[tokio::test]
    async fn test_segment_rotation_emits_notice() {
        let dir = TempDir::new().unwrap();
        let (notice_tx, mut notice_rx) = tokio::sync::mpsc::unbounded_channel();
        let (handle, join) = WalWriter::spawn(test_config(&dir), 0, notice_tx).unwrap();

        // Each record is ~100 bytes; enough to pass the 1KiB rotation threshold
        for index in 0..20u8 {
            handle
                .append(RecordKind::FillApplied, index as u64, vec![index; 80])
                .wait()
                .await
                .unwrap();
        }

        handle.shutdown().await;
        join.join().unwrap();

        let notice = notice_rx.recv().await.unwrap();
        assert!(matches!(notice, WalNotice::Rotated { closed_index: 0 }));

        // All records survive across the rotation
        let (records, truncation) = replay_dir(dir.path()).unwrap();
        assert!(truncation.is_none());
        assert_eq!(records.len(), 20);
        assert_eq!(records.last().unwrap().seq, 19);
    }
}
