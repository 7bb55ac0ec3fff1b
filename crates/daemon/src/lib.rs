// SPDX-License-Identifier: MIT

//! The `healarrd` binary's supporting library: on-disk layout, the
//! cron-driven scheduler, the periodic health/reconciliation sweeps, and
//! the programmatic health-status query. `main.rs` wires these together
//! with the `healarr-engine` services into the running daemon.

pub mod config;
pub mod error;
pub mod health_monitor;
pub mod logging;
pub mod scheduler;
pub mod status;

pub use config::DaemonPaths;
pub use error::DaemonError;
pub use health_monitor::{HealthMonitor, HealthMonitorConfig};
pub use logging::setup_logging;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use status::{health_status, DatabaseStatus, HealthStatus};
