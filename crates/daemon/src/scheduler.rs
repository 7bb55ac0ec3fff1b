// SPDX-License-Identifier: MIT

//! The scheduler (spec.md §4.2): holds one live cron registration per
//! enabled schedule, fires the configured scanner when a registration's
//! cron expression comes due, and turns whatever it finds into
//! `CorruptionDetected` events.
//!
//! `mutation_lock` serializes `Add`/`Update`/`Delete` against the tick
//! loop's read of the registry so a mutation's validate → persist →
//! mutate-live-registration sequence is never observed half-applied.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use healarr_adapters::Scanner;
use healarr_core::{AggregateId, AggregateType, Clock, EventType, PathId, ScheduleConfig, ScheduleId};
use healarr_engine::{wait_or_shutdown, EventBus, Shutdown};
use healarr_storage::{ConfigStore, StorageError};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the tick loop re-checks every registration (spec.md §4.2
    /// resolves this with second-level granularity; cron expressions
    /// themselves may name any resolution the `cron` crate supports).
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(1) }
    }
}

struct Registration {
    scan_path_id: PathId,
    schedule: cron::Schedule,
    last_check: DateTime<Utc>,
}

pub struct Scheduler<S: Scanner, C: Clock> {
    bus: Arc<EventBus<C>>,
    config_store: Arc<ConfigStore>,
    scanner: Arc<S>,
    config: SchedulerConfig,
    shutdown: Shutdown,
    mutation_lock: Mutex<()>,
    registrations: Mutex<HashMap<ScheduleId, Registration>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: Scanner + 'static, C: Clock> Scheduler<S, C> {
    pub fn new(bus: Arc<EventBus<C>>, config_store: Arc<ConfigStore>, scanner: Arc<S>, config: SchedulerConfig) -> Arc<Self> {
        let shutdown = bus.shutdown_signal();
        Arc::new(Self {
            bus,
            config_store,
            scanner,
            config,
            shutdown,
            mutation_lock: Mutex::new(()),
            registrations: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Registers every enabled schedule found in the config store, skipping
    /// (with a warning) any whose cron expression no longer parses, then
    /// starts the tick loop.
    pub fn start(self: &Arc<Self>) {
        for schedule in self.config_store.schedules() {
            if !schedule.enabled {
                continue;
            }
            let id = schedule.id;
            if let Err(err) = self.register(schedule) {
                tracing::warn!(schedule_id = %id, error = %err, "skipping schedule with invalid cron expression");
            }
        }

        let me = self.clone();
        let task = tokio::spawn(async move { me.tick_loop().await });
        self.tasks.lock().push(task);
    }

    pub async fn stop(&self) {
        self.shutdown.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }

    pub fn registered_count(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn list_schedules(&self) -> Vec<ScheduleConfig> {
        self.config_store.schedules()
    }

    pub fn add_schedule(self: &Arc<Self>, schedule: ScheduleConfig) -> Result<(), StorageError> {
        let _guard = self.mutation_lock.lock();
        self.config_store.add_schedule(schedule.clone())?;
        if schedule.enabled {
            if let Err(err) = self.register(schedule) {
                tracing::warn!(error = %err, "added schedule has an invalid cron expression");
            }
        }
        Ok(())
    }

    pub fn update_schedule(
        self: &Arc<Self>,
        id: &ScheduleId,
        cron_expression: Option<String>,
        enabled: Option<bool>,
    ) -> Result<ScheduleConfig, StorageError> {
        let _guard = self.mutation_lock.lock();
        let updated = self.config_store.update_schedule(id, cron_expression, enabled)?;
        if updated.enabled {
            if let Err(err) = self.register(updated.clone()) {
                tracing::warn!(error = %err, "updated schedule has an invalid cron expression");
            }
        } else {
            self.registrations.lock().remove(id);
        }
        Ok(updated)
    }

    pub fn delete_schedule(self: &Arc<Self>, id: &ScheduleId) -> Result<(), StorageError> {
        let _guard = self.mutation_lock.lock();
        self.config_store.delete_schedule(id)?;
        self.registrations.lock().remove(id);
        Ok(())
    }

    /// Drops any live registration whose scan path no longer exists
    /// (spec.md §4.2's `CleanupOrphanedSchedules`), called from the health
    /// monitor's own periodic sweep.
    pub fn cleanup_orphaned_schedules(self: &Arc<Self>) -> Result<Vec<ScheduleId>, StorageError> {
        let _guard = self.mutation_lock.lock();
        let removed = self.config_store.cleanup_orphaned_schedules()?;
        let mut registrations = self.registrations.lock();
        for id in &removed {
            registrations.remove(id);
        }
        Ok(removed)
    }

    fn register(&self, schedule: ScheduleConfig) -> Result<(), cron::error::Error> {
        let parsed = cron::Schedule::from_str(&schedule.cron_expression)?;
        self.registrations.lock().insert(
            schedule.id,
            Registration { scan_path_id: schedule.scan_path_id, schedule: parsed, last_check: Utc::now() },
        );
        Ok(())
    }

    async fn tick_loop(self: Arc<Self>) {
        loop {
            if wait_or_shutdown(self.config.tick_interval, &self.shutdown).await {
                break;
            }
            self.check_and_fire().await;
        }
    }

    async fn check_and_fire(&self) {
        let now = Utc::now();
        let due: Vec<(ScheduleId, PathId)> = {
            let mut registrations = self.registrations.lock();
            let mut due = Vec::new();
            for (id, registration) in registrations.iter_mut() {
                let fired = registration.schedule.after(&registration.last_check).next().map(|t| t <= now).unwrap_or(false);
                if fired {
                    due.push((*id, registration.scan_path_id));
                }
                registration.last_check = now;
            }
            due
        };

        for (schedule_id, path_id) in due {
            self.fire(schedule_id, path_id).await;
        }
    }

    async fn fire(&self, schedule_id: ScheduleId, path_id: PathId) {
        let Some(scan_path) = self.config_store.scan_path(&path_id) else {
            tracing::warn!(%schedule_id, %path_id, "schedule references an unknown scan path, skipping");
            return;
        };

        let findings = match self.scanner.scan(&scan_path.local_path).await {
            Ok(findings) => findings,
            Err(err) => {
                tracing::warn!(%schedule_id, path = %scan_path.local_path, error = %err, "scan failed");
                return;
            }
        };

        for finding in findings {
            let _ = self
                .bus
                .publish(
                    AggregateType::Corruption,
                    AggregateId::new(),
                    EventType::CorruptionDetected {
                        file_path: finding.file_path,
                        path_id,
                        corruption_type: finding.corruption_type,
                        auto_remediate: scan_path.auto_remediate,
                        dry_run: scan_path.dry_run,
                    },
                )
                .await;
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
