use crate::{
    error::WalError,
    record::{DecodeOutcome, WalRecord},
};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

/// File extension of WAL segment files.
pub const SEGMENT_EXTENSION: &str = "log";

/// Append-only WAL segment file.
///
/// One segment is active at a time; the [`WalWriter`](crate::writer::WalWriter) rotates to a
/// new segment when the active one exceeds its size budget.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    file: BufWriter<File>,
    bytes_written: u64,
}

impl Segment {
    /// Create (or append to) the segment at `path`.
    pub fn open(path: PathBuf) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let bytes_written = file.metadata()?.len();

        Ok(Self {
            path,
            file: BufWriter::new(file),
            bytes_written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Buffer the encoded frame; not durable until [`Self::sync`].
    pub fn append(&mut self, frame: &[u8]) -> Result<(), WalError> {
        self.file.write_all(frame)?;
        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    /// Flush buffered frames and fsync the file.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    /// Sync and close the segment.
    pub fn close(mut self) -> Result<(), WalError> {
        self.sync()?;
        debug!(path = %self.path.display(), bytes = self.bytes_written, "WAL segment closed");
        Ok(())
    }
}

/// Sequential reader over one segment file.
#[derive(Debug)]
pub struct SegmentReader {
    reader: BufReader<File>,
}

impl SegmentReader {
    pub fn open(path: &Path) -> Result<Self, WalError> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    /// Read the next record.
    ///
    /// `Ok(None)` at clean end of segment; `Ok(Some(Torn))` at an incomplete or corrupt
    /// trailing frame.
    pub fn read_next(&mut self) -> Result<Option<DecodeOutcome>, WalError> {
        WalRecord::decode(&mut self.reader)
    }
}

/// Path of segment `index` inside `dir`, named `NNNNN.log`.
pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{index:05}.{SEGMENT_EXTENSION}"))
}

/// All segment files inside `dir`, sorted by segment index.
pub fn list_segments(dir: &Path) -> Result<Vec<PathBuf>, WalError> {
    let mut segments: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == SEGMENT_EXTENSION)
        })
        .collect();

    segments.sort();
    Ok(segments)
}

/// Highest segment index present in `dir`, if any.
pub fn latest_segment_index(dir: &Path) -> Result<Option<u64>, WalError> {
    Ok(list_segments(dir)?
        .iter()
        .filter_map(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
        })
        .max())
}
