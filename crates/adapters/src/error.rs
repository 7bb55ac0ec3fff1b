// SPDX-License-Identifier: MIT

//! Per-capability error enums (spec.md §7: "Infrastructure (upstream)").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArrError {
    #[error("arr request failed: {0}")]
    Request(String),
    #[error("arr returned an unexpected response: {0}")]
    Decode(String),
    #[error("no media found for path {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PathMapError {
    #[error("{path} is not under any configured scan path")]
    NotConfigured { path: String },
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
