// SPDX-License-Identifier: MIT

//! Daemon-level configuration: where state lives on disk, and the
//! `DRY_RUN` environment override layered on top of the persisted
//! `EngineConfig` (spec.md §7).

use std::path::PathBuf;

use healarr_storage::{ConfigStore, StorageError};

use crate::error::DaemonError;

/// Resolved on-disk layout. Every path lives under `HEALARR_STATE_DIR`
/// (default: the platform data directory's `healarr` subdirectory).
pub struct DaemonPaths {
    pub state_dir: PathBuf,
    pub wal_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub config_path: PathBuf,
    pub log_path: PathBuf,
}

impl DaemonPaths {
    pub fn resolve() -> Result<Self, DaemonError> {
        let state_dir = state_dir();
        std::fs::create_dir_all(&state_dir)
            .map_err(|source| DaemonError::StateDir { path: state_dir.display().to_string(), source })?;
        Ok(Self {
            wal_path: state_dir.join("events.wal"),
            snapshot_path: state_dir.join("snapshot.bin"),
            config_path: state_dir.join("config.toml"),
            log_path: state_dir.join("healarrd.log"),
            state_dir,
        })
    }

    /// Loads the config store, then applies the `DRY_RUN` environment
    /// override on top of whatever was last persisted.
    pub fn load_config_store(&self) -> Result<ConfigStore, StorageError> {
        let store = ConfigStore::load(&self.config_path)?;
        if let Some(dry_run) = dry_run_override() {
            store.set_dry_run_mode(dry_run)?;
        }
        Ok(store)
    }
}

fn state_dir() -> PathBuf {
    std::env::var_os("HEALARR_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("healarr"))
}

/// Parses `DRY_RUN` as a boolean; unset or unparseable means no override.
fn dry_run_override() -> Option<bool> {
    std::env::var("DRY_RUN").ok().and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}
