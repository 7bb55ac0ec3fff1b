// SPDX-License-Identifier: MIT

//! The programmatic health-status query (spec.md §6's `GetHealthStatus`):
//! a point-in-time snapshot of database reachability and how many
//! remediations currently look stuck, for whatever surfaces the daemon's
//! own health to an operator (a CLI subcommand, an HTTP probe, a test).

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use healarr_core::Clock;
use healarr_engine::EventBus;

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatus {
    pub reachable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub database: DatabaseStatus,
    pub stuck_remediations: usize,
}

/// `stuck_threshold`/`stuck_within` mirror [`crate::health_monitor::HealthMonitorConfig`]'s
/// stale-sweep window so this query and the periodic sweep agree on what
/// "stuck" means.
pub fn health_status<C: Clock>(
    bus: &EventBus<C>,
    stuck_threshold: Duration,
    stuck_within: Duration,
) -> HealthStatus {
    let now = Utc::now();
    let stuck_remediations = bus.with_state(|state| state.stuck(now, stuck_threshold, stuck_within).len());
    let reachable = bus.storage_reachable();
    HealthStatus { database: DatabaseStatus { reachable }, stuck_remediations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healarr_core::{AggregateType, CorruptionType, EventType, FakeClock, PathId};
    use healarr_storage::{MaterializedState, Wal};

    #[tokio::test]
    async fn reports_zero_stuck_remediations_on_a_fresh_bus() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(&dir.path().join("events.wal"), 0).unwrap();
        let bus = EventBus::new(wal, MaterializedState::default(), FakeClock::new());

        let status = health_status(&bus, Duration::from_secs(3600), Duration::from_secs(86400));
        assert!(status.database.reachable);
        assert_eq!(status.stuck_remediations, 0);
    }

    #[tokio::test]
    async fn counts_a_non_terminal_aggregate_whose_last_update_has_gone_stale() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(&dir.path().join("events.wal"), 0).unwrap();
        let bus = EventBus::new(wal, MaterializedState::default(), FakeClock::new());

        bus.publish(
            AggregateType::Corruption,
            healarr_core::AggregateId::new(),
            EventType::CorruptionDetected {
                file_path: "/data/movies/a.mkv".into(),
                path_id: PathId::new(),
                corruption_type: CorruptionType::CorruptStream,
                auto_remediate: true,
                dry_run: false,
            },
        )
        .await
        .unwrap();

        // The aggregate was just detected, so it is not yet stale against
        // any reasonable threshold.
        let status = health_status(&bus, Duration::from_secs(0), Duration::from_secs(86400));
        assert_eq!(status.stuck_remediations, 1);
    }

    #[tokio::test]
    async fn reports_unreachable_once_the_wal_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("events.wal");
        let wal = Wal::open(&wal_path, 0).unwrap();
        let bus = EventBus::new(wal, MaterializedState::default(), FakeClock::new());

        std::fs::remove_file(&wal_path).unwrap();

        let status = health_status(&bus, Duration::from_secs(3600), Duration::from_secs(86400));
        assert!(!status.database.reachable);
    }
}
