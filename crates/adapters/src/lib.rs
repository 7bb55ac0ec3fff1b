// SPDX-License-Identifier: MIT

//! External collaborators (spec.md §6), modelled as capability traits:
//! narrow, named interfaces the engine consumes without knowing anything
//! about arr wire protocols, file bytes, or disk layout. Production
//! implementations live here; `test-support` fakes back every test in the
//! workspace that needs one of these capabilities.

pub mod arr;
pub mod error;
pub mod health;
pub mod path_mapper;
pub mod scanner;

pub use arr::{ArrClient, HistoryItem, HttpArrClient, MediaId, QueueItem};
pub use error::{ArrError, HealthCheckError, PathMapError, ScanError};
pub use health::{ErrorInfo, FsHealthChecker, HealthCheckMode, HealthCheckResult, HealthChecker};
pub use path_mapper::{PathMapper, PrefixPathMapper};
pub use scanner::{DetectedCorruption, Scanner, SweepScanner};

#[cfg(any(test, feature = "test-support"))]
pub use arr::FakeArrClient;
#[cfg(any(test, feature = "test-support"))]
pub use health::FakeHealthChecker;
#[cfg(any(test, feature = "test-support"))]
pub use path_mapper::FakePathMapper;
#[cfg(any(test, feature = "test-support"))]
pub use scanner::FakeScanner;
