// SPDX-License-Identifier: MIT

//! Daemon-level errors: wraps the lower crates' errors plus the daemon's
//! own startup failures (state directory creation, log setup).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to create state directory at {path}: {source}")]
    StateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up logging at {path}: {source}")]
    Logging {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] healarr_storage::StorageError),

    #[error(transparent)]
    Engine(#[from] healarr_engine::EngineError),
}
