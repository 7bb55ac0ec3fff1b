// SPDX-License-Identifier: MIT

//! The event-driven remediation pipeline (spec.md §4): the bus every
//! service talks through, and the three event-driven services that
//! subscribe to it — `Remediator`, `Verifier`, `RetryMonitor`. The daemon
//! crate wires these together with `HealthMonitor` and `Scheduler`.

pub mod bus;
pub mod cancel;
pub mod error;
pub mod remediator;
pub mod retry_monitor;
pub mod shutdown;
pub mod verifier;

pub use bus::EventBus;
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use error::EngineError;
pub use remediator::{Remediator, RemediatorConfig};
pub use retry_monitor::{RetryMonitor, RetryMonitorConfig};
pub use shutdown::{wait_or_shutdown, Shutdown};
pub use verifier::{Verifier, VerifierConfig};
