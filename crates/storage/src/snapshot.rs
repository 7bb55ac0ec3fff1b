// SPDX-License-Identifier: MIT

//! Snapshot persistence for crash recovery (spec.md §4.6's crash-recovery
//! sweep: "load the last snapshot, replay WAL entries after its `seq`").
//!
//! Mirrors the teacher's `storage::snapshot`: a zstd-compressed blob
//! identified by the WAL sequence number it was taken at, with the same
//! `.bak` rotation scheme as the WAL itself.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::state::MaterializedState;

pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;
const MAX_BAK_FILES: u32 = 3;
const ZSTD_LEVEL: i32 = 3;

/// The complete materialized state at a point in time, identified by the
/// WAL sequence number it was taken at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "v")]
    pub version: u32,
    pub seq: u64,
    pub state: MaterializedState,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(seq: u64, state: MaterializedState, created_at: DateTime<Utc>) -> Self {
        Self { version: CURRENT_SNAPSHOT_VERSION, seq, state, created_at }
    }
}

/// Write `snapshot` to `path`, compressed with zstd. Rotates any existing
/// file at `path` into `.bak` first, same as the WAL's corrupt-tail
/// rotation, so a crash mid-write never destroys the only recoverable copy.
pub fn write(path: &Path, snapshot: &Snapshot) -> Result<(), StorageError> {
    if path.exists() {
        rotate_backup(path)?;
    }

    let json = serde_json::to_vec(snapshot).map_err(|source| StorageError::Serialize { source })?;
    let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL)
        .map_err(|source| StorageError::SnapshotRead { path: path.display().to_string(), source })?;

    let tmp = path.with_extension("snapshot.tmp");
    fs::write(&tmp, &compressed)
        .map_err(|source| StorageError::SnapshotRead { path: tmp.display().to_string(), source })?;
    fs::rename(&tmp, path)
        .map_err(|source| StorageError::SnapshotRead { path: path.display().to_string(), source })
}

/// Read and decompress the snapshot at `path`, or `None` if it does not
/// exist yet (first run — recovery falls back to replaying the whole log).
pub fn read(path: &Path) -> Result<Option<Snapshot>, StorageError> {
    let compressed = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StorageError::SnapshotRead { path: path.display().to_string(), source }),
    };

    let json = zstd::decode_all(compressed.as_slice())
        .map_err(|err| StorageError::SnapshotDecode(err.to_string()))?;
    let snapshot = serde_json::from_slice(&json).map_err(|err| StorageError::SnapshotDecode(err.to_string()))?;
    Ok(Some(snapshot))
}

fn rotate_backup(path: &Path) -> Result<(), StorageError> {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    fs::rename(path, bak(1))
        .map_err(|source| StorageError::SnapshotRead { path: path.display().to_string(), source })
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
