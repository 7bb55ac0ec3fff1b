// SPDX-License-Identifier: MIT

//! Tracing setup: a non-blocking file appender plus an `EnvFilter` read
//! from `RUST_LOG` (default `info`).

use std::path::Path;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::DaemonError;

/// Installs the global subscriber and returns the guard that must be held
/// for the life of the process — dropping it stops the background flush
/// thread and any buffered lines are lost.
pub fn setup_logging(log_path: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard, DaemonError> {
    let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .map_err(|source| DaemonError::Logging { path: log_path.display().to_string(), source })?;

    let file_name = log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("healarrd.log"));
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(non_blocking)).init();

    Ok(guard)
}
