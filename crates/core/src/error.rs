// SPDX-License-Identifier: MIT

//! Errors raised while loading and validating configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid cron expression {expression:?} for schedule {schedule_id}: {source}")]
    InvalidCron {
        schedule_id: String,
        expression: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("schedule {schedule_id} references unknown scan path {scan_path_id}")]
    OrphanedSchedule {
        schedule_id: String,
        scan_path_id: String,
    },
}
