// SPDX-License-Identifier: MIT

//! Configuration types: engine defaults, scan paths, schedules, instances.

use serde::{Deserialize, Serialize};

use crate::ids::{InstanceId, PathId, ScheduleId};

/// Top-level engine configuration, loaded from TOML and overridable by the
/// `DRY_RUN` environment variable at startup (see `healarr_daemon::config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub dry_run_mode: bool,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_verification_timeout_hours")]
    pub verification_timeout_hours: u32,
    #[serde(default = "default_verification_interval_secs")]
    pub verification_interval_secs: u64,
    #[serde(default)]
    pub scan_paths: Vec<ScanPathConfig>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run_mode: false,
            default_max_retries: default_max_retries(),
            verification_timeout_hours: default_verification_timeout_hours(),
            verification_interval_secs: default_verification_interval_secs(),
            scan_paths: Vec::new(),
            schedules: Vec::new(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_verification_timeout_hours() -> u32 {
    6
}

fn default_verification_interval_secs() -> u64 {
    30
}

/// One configured library path the scheduler scans and the remediator acts on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPathConfig {
    pub id: PathId,
    pub local_path: String,
    pub arr_path: String,
    #[serde(default)]
    pub auto_remediate: bool,
    #[serde(default)]
    pub dry_run: bool,
    pub max_retries: Option<u32>,
    pub verification_timeout_hours: Option<u32>,
}

impl ScanPathConfig {
    pub fn effective_max_retries(&self, default_max_retries: u32) -> u32 {
        self.max_retries.unwrap_or(default_max_retries)
    }

    pub fn effective_verification_timeout_hours(&self, default_hours: u32) -> u32 {
        self.verification_timeout_hours.unwrap_or(default_hours)
    }
}

/// A cron registration bound to a scan path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub id: ScheduleId,
    pub scan_path_id: PathId,
    pub cron_expression: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Arr instance kind, as reported by `GetAllInstances`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Sonarr,
    Radarr,
    Lidarr,
    Whisparr,
}

/// An arr instance the arr client knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(!cfg.dry_run_mode);
        assert_eq!(cfg.default_max_retries, 5);
        assert_eq!(cfg.verification_timeout_hours, 6);
        assert_eq!(cfg.verification_interval_secs, 30);
        assert!(cfg.scan_paths.is_empty());
    }

    #[test]
    fn scan_path_falls_back_to_engine_defaults() {
        let path = ScanPathConfig {
            id: PathId::new(),
            local_path: "/data/movies".into(),
            arr_path: "/movies".into(),
            auto_remediate: true,
            dry_run: false,
            max_retries: None,
            verification_timeout_hours: None,
        };
        assert_eq!(path.effective_max_retries(5), 5);
        assert_eq!(path.effective_verification_timeout_hours(6), 6);
    }

    #[test]
    fn scan_path_override_wins_over_default() {
        let path = ScanPathConfig {
            id: PathId::new(),
            local_path: "/data/tv".into(),
            arr_path: "/tv".into(),
            auto_remediate: true,
            dry_run: false,
            max_retries: Some(2),
            verification_timeout_hours: Some(12),
        };
        assert_eq!(path.effective_max_retries(5), 2);
        assert_eq!(path.effective_verification_timeout_hours(6), 12);
    }

    #[test]
    fn engine_config_parses_from_toml() {
        let toml_src = r#"
            dry_run_mode = false
            default_max_retries = 5

            [[scan_paths]]
            id = "pth-movies0000000000000"
            local_path = "/data/movies"
            arr_path = "/movies"
            auto_remediate = true

            [[schedules]]
            id = "sch-nightly00000000000000"
            scan_path_id = "pth-movies0000000000000"
            cron_expression = "0 3 * * *"
        "#;
        let cfg: EngineConfig = toml::from_str(toml_src).expect("parse config");
        assert_eq!(cfg.scan_paths.len(), 1);
        assert_eq!(cfg.schedules.len(), 1);
        assert!(cfg.schedules[0].enabled);
    }
}
