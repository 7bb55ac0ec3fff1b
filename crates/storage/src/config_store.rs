// SPDX-License-Identifier: MIT

//! Durable config store: `scan_paths` and `scan_schedules` (spec.md §3/§6).
//!
//! One `parking_lot::Mutex` guards both the in-memory `EngineConfig` and
//! its on-disk TOML file so a schedule mutation's validate → persist →
//! (caller) mutate-live-registration sequence (spec.md §4.2) never
//! observes a half-written file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use parking_lot::Mutex;

use healarr_core::{EngineConfig, PathId, ScanPathConfig, ScheduleConfig, ScheduleId};

use crate::error::StorageError;

pub struct ConfigStore {
    path: PathBuf,
    inner: Mutex<EngineConfig>,
}

impl ConfigStore {
    /// Load `path`, or start from `EngineConfig::default()` if it does not
    /// exist yet (a fresh install).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let config = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|source| StorageError::TomlParse { path: path.display().to_string(), source })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => EngineConfig::default(),
            Err(source) => return Err(StorageError::Write { path: path.display().to_string(), source }),
        };
        Ok(Self { path, inner: Mutex::new(config) })
    }

    pub fn snapshot(&self) -> EngineConfig {
        self.inner.lock().clone()
    }

    pub fn scan_path(&self, id: &PathId) -> Option<ScanPathConfig> {
        self.inner.lock().scan_paths.iter().find(|p| &p.id == id).cloned()
    }

    pub fn scan_paths(&self) -> Vec<ScanPathConfig> {
        self.inner.lock().scan_paths.clone()
    }

    pub fn schedules(&self) -> Vec<ScheduleConfig> {
        self.inner.lock().schedules.clone()
    }

    pub fn effective_max_retries(&self, path_id: &PathId) -> u32 {
        let config = self.inner.lock();
        config
            .scan_paths
            .iter()
            .find(|p| &p.id == path_id)
            .map(|p| p.effective_max_retries(config.default_max_retries))
            .unwrap_or(config.default_max_retries)
    }

    pub fn effective_verification_timeout(&self, path_id: &PathId) -> Duration {
        let config = self.inner.lock();
        let hours = config
            .scan_paths
            .iter()
            .find(|p| &p.id == path_id)
            .map(|p| p.effective_verification_timeout_hours(config.verification_timeout_hours))
            .unwrap_or(config.verification_timeout_hours);
        Duration::from_secs(u64::from(hours) * 3600)
    }

    pub fn effective_dry_run(&self, path_id: &PathId) -> bool {
        let config = self.inner.lock();
        config.dry_run_mode || config.scan_paths.iter().any(|p| &p.id == path_id && p.dry_run)
    }

    /// Validate the cron expression, then persist. Does not touch any live
    /// cron registration — callers (the scheduler) do that after this
    /// returns, under their own lock, per spec.md §4.2.
    pub fn add_schedule(&self, schedule: ScheduleConfig) -> Result<(), StorageError> {
        validate_cron(&schedule.id, &schedule.cron_expression)?;
        let mut config = self.inner.lock();
        config.schedules.retain(|s| s.id != schedule.id);
        config.schedules.push(schedule);
        self.persist(&config)
    }

    pub fn update_schedule(
        &self,
        id: &ScheduleId,
        cron_expression: Option<String>,
        enabled: Option<bool>,
    ) -> Result<ScheduleConfig, StorageError> {
        let mut config = self.inner.lock();
        let Some(schedule) = config.schedules.iter_mut().find(|s| &s.id == id) else {
            return Err(StorageError::ScheduleNotFound(id.to_string()));
        };
        if let Some(expr) = cron_expression {
            validate_cron(id, &expr)?;
            schedule.cron_expression = expr;
        }
        if let Some(enabled) = enabled {
            schedule.enabled = enabled;
        }
        let updated = schedule.clone();
        self.persist(&config)?;
        Ok(updated)
    }

    pub fn delete_schedule(&self, id: &ScheduleId) -> Result<(), StorageError> {
        let mut config = self.inner.lock();
        let before = config.schedules.len();
        config.schedules.retain(|s| &s.id != id);
        if config.schedules.len() == before {
            return Err(StorageError::ScheduleNotFound(id.to_string()));
        }
        self.persist(&config)
    }

    /// Overrides `dry_run_mode` without touching anything else — the
    /// daemon's `DRY_RUN` environment variable applies this at startup
    /// (spec.md §7), on top of whatever was last persisted.
    pub fn set_dry_run_mode(&self, dry_run: bool) -> Result<(), StorageError> {
        let mut config = self.inner.lock();
        config.dry_run_mode = dry_run;
        self.persist(&config)
    }

    /// Remove schedules whose `scan_path_id` no longer exists in
    /// `scan_paths` (spec.md §4.2's `CleanupOrphanedSchedules`).
    pub fn cleanup_orphaned_schedules(&self) -> Result<Vec<ScheduleId>, StorageError> {
        let mut config = self.inner.lock();
        let known: std::collections::HashSet<_> = config.scan_paths.iter().map(|p| p.id).collect();
        let mut removed = Vec::new();
        config.schedules.retain(|s| {
            if known.contains(&s.scan_path_id) {
                true
            } else {
                removed.push(s.id);
                false
            }
        });
        if !removed.is_empty() {
            self.persist(&config)?;
        }
        Ok(removed)
    }

    fn persist(&self, config: &EngineConfig) -> Result<(), StorageError> {
        let toml = toml::to_string_pretty(config)?;
        std::fs::write(&self.path, toml)
            .map_err(|source| StorageError::Write { path: self.path.display().to_string(), source })
    }
}

fn validate_cron(schedule_id: &ScheduleId, expression: &str) -> Result<(), StorageError> {
    cron::Schedule::from_str(expression)
        .map(|_| ())
        .map_err(|source| {
            StorageError::Config(healarr_core::ConfigError::InvalidCron {
                schedule_id: schedule_id.to_string(),
                expression: expression.to_string(),
                source,
            })
        })
}

#[cfg(test)]
#[path = "config_store_tests.rs"]
mod tests;
