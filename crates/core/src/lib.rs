// SPDX-License-Identifier: MIT

//! Domain types shared by every `healarr` crate: the event model, id
//! newtypes, configuration, corruption classification, and the clock
//! abstraction that keeps time-dependent logic testable.

pub mod clock;
pub mod config;
pub mod corruption;
pub mod error;
pub mod event;
pub mod id;
pub mod ids;
pub mod macros;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{EngineConfig, InstanceInfo, InstanceType, ScanPathConfig, ScheduleConfig};
pub use corruption::CorruptionType;
pub use error::ConfigError;
pub use event::{AggregateType, DeletionMetadata, Event, EventId, EventType, MediaDetails};
pub use ids::{AggregateId, InstanceId, PathId, ScheduleId};
