// SPDX-License-Identifier: MIT

//! Durable storage for the remediation engine: the event log, the
//! materialized projections folded from it, snapshotting, and config
//! persistence (spec.md §3, §4.1, §4.6).

pub mod config_store;
pub mod error;
pub mod snapshot;
pub mod state;
pub mod wal;

pub use config_store::ConfigStore;
pub use error::StorageError;
pub use snapshot::Snapshot;
pub use state::{CorruptionStatus, FailureRecord, MaterializedState};
pub use wal::{EventDraft, Wal, WalEntry};
