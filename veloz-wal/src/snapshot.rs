use crate::error::WalError;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// File extension of state snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "snap";

/// Point-in-time state snapshots written alongside the WAL at segment rotation.
///
/// Each snapshot is a bincode blob framed as `[u32 len][payload][u32 crc32]`, named after
/// the segment index it covers (`NNNNN.snap`).
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, WalError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{index:05}.{SNAPSHOT_EXTENSION}"))
    }

    /// Write the snapshot covering segment `index`.
    pub fn write<T: Serialize>(&self, index: u64, state: &T) -> Result<PathBuf, WalError> {
        let payload = bincode::serialize(state)?;

        let mut buf = Vec::with_capacity(payload.len() + 8);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        let path = self.path(index);
        let mut file = fs::File::create(&path)?;
        file.write_all(&buf)?;
        file.sync_all()?;

        info!(path = %path.display(), bytes = buf.len(), "state snapshot written");
        Ok(path)
    }

    /// Load the most recent valid snapshot, if any.
    ///
    /// Corrupt snapshots are skipped with a warning, falling back to the previous one.
    pub fn load_latest<T: DeserializeOwned>(&self) -> Result<Option<(u64, T)>, WalError> {
        let mut indices: Vec<u64> = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                let is_snap = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == SNAPSHOT_EXTENSION);
                if !is_snap {
                    return None;
                }
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<u64>().ok())
            })
            .collect();
        indices.sort_unstable();

        for index in indices.into_iter().rev() {
            match self.load(index) {
                Ok(state) => return Ok(Some((index, state))),
                Err(WalError::SnapshotCorrupt(path)) => {
                    warn!(path, "skipping corrupt state snapshot");
                }
                Err(error) => return Err(error),
            }
        }

        Ok(None)
    }

    fn load<T: DeserializeOwned>(&self, index: u64) -> Result<T, WalError> {
        let path = self.path(index);
        let bytes = fs::read(&path)?;

        let parsed = parse_snapshot(&bytes);
        match parsed {
            Some(payload) => Ok(bincode::deserialize(payload)?),
            None => Err(WalError::SnapshotCorrupt(path.display().to_string())),
        }
    }
}

fn parse_snapshot(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < 8 {
        return None;
    }
    let len = u32::from_le_bytes(bytes[..4].try_into().ok()?) as usize;
    if bytes.len() != len + 8 {
        return None;
    }
    let payload = &bytes[4..4 + len];
    let crc_stored = u32::from_le_bytes(bytes[4 + len..].try_into().ok()?);

    (crc32fast::hash(payload) == crc_stored).then_some(payload)
}
