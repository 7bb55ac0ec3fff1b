// SPDX-License-Identifier: MIT

//! Storage-layer errors.
//!
//! `is_transient` distinguishes errors the retry monitor / health monitor
//! should retry with backoff from a durable failure that must be logged and
//! surfaced as `SystemHealthDegraded` (spec.md §7 "Database fatal").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open event log at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append to event log: {source}")]
    Append {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize event: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    #[error("event log append failed after exhausting retries")]
    Durable,

    #[error(transparent)]
    Config(#[from] healarr_core::ConfigError),

    #[error("failed to parse config at {path}: {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("failed to write config at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("schedule {0} not found")]
    ScheduleNotFound(String),

    #[error("scan path {0} not found")]
    ScanPathNotFound(String),

    #[error("no such row: corruption {0} has no recorded events")]
    NoSuchRow(String),

    #[error("failed to read snapshot at {path}: {source}")]
    SnapshotRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode snapshot: {0}")]
    SnapshotDecode(String),
}

impl StorageError {
    /// True for errors a caller should retry with backoff rather than treat
    /// as fatal (spec.md §7: "Infrastructure" vs "Database fatal").
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Append { .. } | StorageError::Open { .. })
    }
}
