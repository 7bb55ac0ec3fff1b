// SPDX-License-Identifier: MIT

//! The health monitor (spec.md §4.6): three staggered periodic sweeps over
//! the materialized projections plus arr reachability, each independently
//! timed so a slow sweep never delays the others. A fourth loop piggybacks
//! on the stale-sweep cadence to drop orphaned schedule registrations.
//!
//! Staggering (spec.md §4.6): each sweep's first run is delayed so the
//! three don't all fire together at startup, then repeats on its own
//! interval from there.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use healarr_adapters::{ArrClient, HealthCheckMode, HealthChecker, MediaId, Scanner};
use healarr_core::{AggregateId, AggregateType, Clock, EventType, InstanceType};
use healarr_storage::{ConfigStore, CorruptionStatus};

use healarr_engine::{wait_or_shutdown, EventBus, Shutdown};

use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub stale_sweep_interval: Duration,
    pub stale_sweep_initial_delay: Duration,
    pub stuck_threshold: Duration,
    pub stuck_within: Duration,
    pub repeated_failure_window: Duration,
    pub repeated_failure_min_count: usize,

    /// WAL backlog (events appended since the last flush) at or above this
    /// count is treated as the single-writer analogue of a connection pool
    /// with every connection checked out (spec.md §4.6 sweep item 1's
    /// `in_use == open_connections > 0` check — see SPEC_FULL.md §3.6).
    pub wal_backlog_threshold: usize,

    pub instance_sweep_interval: Duration,
    pub instance_sweep_initial_delay: Duration,

    pub reconciliation_interval: Duration,
    pub reconciliation_initial_delay: Duration,
    pub reconciliation_older_than: Duration,
    pub reconciliation_newer_than: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            stale_sweep_interval: Duration::from_secs(15 * 60),
            stale_sweep_initial_delay: Duration::from_secs(30),
            stuck_threshold: Duration::from_secs(24 * 60 * 60),
            stuck_within: Duration::from_secs(7 * 24 * 60 * 60),
            repeated_failure_window: Duration::from_secs(7 * 24 * 60 * 60),
            repeated_failure_min_count: 2,
            wal_backlog_threshold: 100,

            instance_sweep_interval: Duration::from_secs(5 * 60),
            instance_sweep_initial_delay: Duration::from_secs(60),

            reconciliation_interval: Duration::from_secs(30 * 60),
            reconciliation_initial_delay: Duration::from_secs(5 * 60),
            reconciliation_older_than: Duration::from_secs(60 * 60),
            reconciliation_newer_than: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

pub struct HealthMonitor<A: ArrClient, H: HealthChecker, S: Scanner, C: Clock> {
    bus: Arc<EventBus<C>>,
    arr: Arc<A>,
    health: Arc<H>,
    scheduler: Arc<Scheduler<S, C>>,
    config: HealthMonitorConfig,
    shutdown: Shutdown,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl<A: ArrClient + 'static, H: HealthChecker + 'static, S: Scanner + 'static, C: Clock> HealthMonitor<A, H, S, C> {
    pub fn new(
        bus: Arc<EventBus<C>>,
        arr: Arc<A>,
        health: Arc<H>,
        scheduler: Arc<Scheduler<S, C>>,
        config: HealthMonitorConfig,
    ) -> Arc<Self> {
        let shutdown = bus.shutdown_signal();
        Arc::new(Self { bus, arr, health, scheduler, config, shutdown, tasks: AsyncMutex::new(Vec::new()) })
    }

    pub fn start(self: &Arc<Self>) {
        let me = self.clone();
        let stale = tokio::spawn(async move { me.stale_sweep_loop().await });
        let me = self.clone();
        let instances = tokio::spawn(async move { me.instance_sweep_loop().await });
        let me = self.clone();
        let reconciliation = tokio::spawn(async move { me.reconciliation_sweep_loop().await });
        let me = self.clone();
        let cleanup = tokio::spawn(async move { me.cleanup_loop().await });

        if let Ok(mut tasks) = self.tasks.try_lock() {
            tasks.extend([stale, instances, reconciliation, cleanup]);
        }
    }

    pub async fn stop(&self) {
        self.shutdown.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn stale_sweep_loop(self: Arc<Self>) {
        if wait_or_shutdown(self.config.stale_sweep_initial_delay, &self.shutdown).await {
            return;
        }
        loop {
            self.run_stale_sweep().await;
            if wait_or_shutdown(self.config.stale_sweep_interval, &self.shutdown).await {
                break;
            }
        }
    }

    /// Emits `StuckRemediation` for aggregates whose last update has gone
    /// quiet, `SystemHealthDegraded` for file paths that keep failing
    /// verification across distinct corruption aggregates, and
    /// `SystemHealthDegraded(reason="database_pool_exhausted")` when the
    /// WAL's unflushed backlog crosses `wal_backlog_threshold`.
    async fn run_stale_sweep(&self) {
        let now = Utc::now();

        let stuck: Vec<(AggregateId, String, i64)> = self.bus.with_state(|state| {
            state
                .stuck(now, self.config.stuck_threshold, self.config.stuck_within)
                .into_iter()
                .map(|c| (c.aggregate_id, c.file_path.clone(), now.signed_duration_since(c.last_updated_at).num_seconds().max(0)))
                .collect()
        });
        for (aggregate_id, file_path, stuck_for_secs) in stuck {
            let _ = self
                .bus
                .publish(
                    AggregateType::Health,
                    aggregate_id,
                    EventType::StuckRemediation { file_path: Some(file_path), stuck_for_secs: stuck_for_secs as u64 },
                )
                .await;
        }

        let repeated = self.bus.with_state(|state| {
            state.repeated_failures(now, self.config.repeated_failure_window, self.config.repeated_failure_min_count)
        });
        for file_path in repeated {
            let _ = self
                .bus
                .publish(
                    AggregateType::Health,
                    AggregateId::new(),
                    EventType::SystemHealthDegraded {
                        reason: "repeated_verification_failures".into(),
                        detail: Some(file_path),
                    },
                )
                .await;
        }

        let backlog = self.bus.wal_backlog();
        if backlog >= self.config.wal_backlog_threshold {
            let _ = self
                .bus
                .publish(
                    AggregateType::Health,
                    AggregateId::new(),
                    EventType::SystemHealthDegraded {
                        reason: "database_pool_exhausted".into(),
                        detail: Some(format!(
                            "wal append backlog at {backlog} unflushed events, at or above threshold {}",
                            self.config.wal_backlog_threshold
                        )),
                    },
                )
                .await;
        }
    }

    async fn instance_sweep_loop(self: Arc<Self>) {
        if wait_or_shutdown(self.config.instance_sweep_initial_delay, &self.shutdown).await {
            return;
        }
        loop {
            self.run_instance_sweep().await;
            if wait_or_shutdown(self.config.instance_sweep_interval, &self.shutdown).await {
                break;
            }
        }
    }

    async fn run_instance_sweep(&self) {
        let instances = match self.arr.get_all_instances().await {
            Ok(instances) => instances,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list arr instances for the reachability sweep");
                return;
            }
        };

        for instance in instances {
            if let Err(err) = self.arr.check_instance_health(instance.id.as_str()).await {
                let _ = self
                    .bus
                    .publish(
                        AggregateType::Health,
                        AggregateId::new(),
                        EventType::InstanceUnhealthy {
                            instance_id: instance.id,
                            name: instance.name,
                            instance_type: instance_type_name(instance.instance_type).to_string(),
                            url: instance.url,
                            error: err.to_string(),
                        },
                    )
                    .await;
            }
        }
    }

    async fn reconciliation_sweep_loop(self: Arc<Self>) {
        if wait_or_shutdown(self.config.reconciliation_initial_delay, &self.shutdown).await {
            return;
        }
        loop {
            self.run_reconciliation_sweep().await;
            if wait_or_shutdown(self.config.reconciliation_interval, &self.shutdown).await {
                break;
            }
        }
    }

    /// Reconciles aggregates that have sat in an active intermediate state
    /// long enough to suggest a missed event (a crash between publishes):
    /// re-derives ground truth from the arr instance itself rather than
    /// trusting the stale projection.
    async fn run_reconciliation_sweep(&self) {
        let now = Utc::now();
        let candidates: Vec<CorruptionStatus> = self.bus.with_state(|state| {
            state
                .reconciliation_candidates(now, self.config.reconciliation_older_than, self.config.reconciliation_newer_than)
                .into_iter()
                .cloned()
                .collect()
        });

        for status in candidates {
            self.reconcile_one(status).await;
        }
    }

    async fn reconcile_one(&self, status: CorruptionStatus) {
        let Some(media_id) = status.media_id.clone() else { return };
        let media_id = MediaId::from(media_id);
        let reference = status.arr_path.clone().unwrap_or_else(|| status.file_path.clone());

        let paths = self.arr.get_all_file_paths(&media_id, &reference).await.unwrap_or_default();
        let all_present = !paths.is_empty() && paths.iter().all(|p| p.exists());

        if all_present {
            let mut all_healthy = true;
            let mut failure: Option<(String, String)> = None;
            for path in &paths {
                let local_path = path.display().to_string();
                match self.health.check(&local_path, HealthCheckMode::Full).await {
                    Ok(result) if result.healthy => {}
                    Ok(result) => {
                        all_healthy = false;
                        if failure.is_none() {
                            failure = Some(match result.error {
                                Some(e) => (e.kind.to_string(), e.message),
                                None => ("unknown".to_string(), "unhealthy with no detail".into()),
                            });
                        }
                    }
                    Err(err) => {
                        all_healthy = false;
                        if failure.is_none() {
                            failure = Some(("io_error".to_string(), err.to_string()));
                        }
                    }
                }
            }
            if all_healthy {
                let _ = self
                    .bus
                    .publish_with_retry_or_degrade(
                        AggregateType::Corruption,
                        status.aggregate_id,
                        EventType::VerificationSuccess {
                            file_path: if paths.len() == 1 { Some(paths[0].display().to_string()) } else { None },
                            size: None,
                            quality: None,
                            release_group: None,
                            indexer: None,
                            download_client: None,
                            recovery_action: Some("arr_sync".into()),
                        },
                    )
                    .await;
            } else if let Some((error_type, message)) = failure {
                let _ = self
                    .bus
                    .publish_with_retry_or_degrade(
                        AggregateType::Corruption,
                        status.aggregate_id,
                        EventType::VerificationFailed {
                            error_type,
                            message,
                            file_path: paths.first().map(|p| p.display().to_string()),
                        },
                    )
                    .await;
            }
            return;
        }

        match self.arr.find_queue_items_by_media_id_for_path(&reference, &media_id).await {
            Ok(items) if items.is_empty() => {
                let _ = self
                    .bus
                    .publish_with_retry_or_degrade(
                        AggregateType::Corruption,
                        status.aggregate_id,
                        EventType::SearchExhausted { reason: "item_vanished".into() },
                    )
                    .await;
            }
            // Still queued, or the queue check itself failed: leave untouched — in-flight.
            Ok(_) | Err(_) => {}
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        loop {
            if wait_or_shutdown(self.config.stale_sweep_interval, &self.shutdown).await {
                break;
            }
            if let Err(err) = self.scheduler.cleanup_orphaned_schedules() {
                tracing::warn!(error = %err, "failed to clean up orphaned schedules");
            }
        }
    }
}

fn instance_type_name(instance_type: InstanceType) -> &'static str {
    match instance_type {
        InstanceType::Sonarr => "sonarr",
        InstanceType::Radarr => "radarr",
        InstanceType::Lidarr => "lidarr",
        InstanceType::Whisparr => "whisparr",
    }
}

#[cfg(test)]
#[path = "health_monitor_tests.rs"]
mod tests;
