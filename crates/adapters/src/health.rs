// SPDX-License-Identifier: MIT

//! The health-checker capability (spec.md §6): probes a single file and
//! reports healthy/unhealthy plus an error kind. The "infrastructure"
//! subset of [`CorruptionType`] drives the remediator's safety gate and is
//! shared with the scanner's own classification (see `healarr_core::corruption`).

use async_trait::async_trait;
use healarr_core::CorruptionType;

use crate::error::HealthCheckError;

/// How thorough a check should be. A quick check is a presence/size probe;
/// a full check decodes the stream. The verifier always requests `Full`
/// after a replacement file is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheckMode {
    Quick,
    Full,
}

/// Detail accompanying an unhealthy result.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub kind: CorruptionType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub error: Option<ErrorInfo>,
}

impl HealthCheckResult {
    pub fn healthy() -> Self {
        Self { healthy: true, error: None }
    }

    pub fn unhealthy(kind: CorruptionType, message: impl Into<String>) -> Self {
        Self { healthy: false, error: Some(ErrorInfo { kind, message: message.into() }) }
    }
}

/// `Check(local_path, mode) -> (healthy, error_info)` (spec.md §6).
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, local_path: &str, mode: HealthCheckMode) -> Result<HealthCheckResult, HealthCheckError>;
}

/// Stat-based production `HealthChecker`.
///
/// The engine's non-goal is inspecting file *bytes* (spec.md §1); this
/// checker probes file *presence* and *plausibility* only — existence,
/// readability, and (in `Full` mode) that the file is not truncated to
/// zero bytes. A scanner or a richer prober that actually decodes media
/// streams is a separate external collaborator the engine consumes
/// through this same trait, never implemented here.
pub struct FsHealthChecker;

impl FsHealthChecker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FsHealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthChecker for FsHealthChecker {
    async fn check(&self, local_path: &str, mode: HealthCheckMode) -> Result<HealthCheckResult, HealthCheckError> {
        let path = local_path.to_string();
        tokio::task::spawn_blocking(move || Self::check_blocking(&path, mode))
            .await
            .unwrap_or_else(|join_err| {
                Ok(HealthCheckResult::unhealthy(
                    CorruptionType::IoError,
                    format!("health check task panicked: {join_err}"),
                ))
            })
    }
}

impl FsHealthChecker {
    fn check_blocking(local_path: &str, mode: HealthCheckMode) -> Result<HealthCheckResult, HealthCheckError> {
        let metadata = match std::fs::metadata(local_path) {
            Ok(metadata) => metadata,
            Err(source) => {
                return Ok(match source.kind() {
                    std::io::ErrorKind::NotFound => {
                        HealthCheckResult::unhealthy(CorruptionType::PathNotFound, source.to_string())
                    }
                    std::io::ErrorKind::PermissionDenied => {
                        HealthCheckResult::unhealthy(CorruptionType::AccessDenied, source.to_string())
                    }
                    _ => return Err(HealthCheckError::Stat { path: local_path.to_string(), source }),
                });
            }
        };

        if !metadata.is_file() {
            return Ok(HealthCheckResult::unhealthy(CorruptionType::PathNotFound, "not a regular file"));
        }
        if metadata.len() == 0 {
            return Ok(HealthCheckResult::unhealthy(CorruptionType::TruncatedFile, "file is zero bytes"));
        }

        if mode == HealthCheckMode::Full {
            // A readability probe: open and read the first few bytes. Does
            // not decode the container — that would cross into the
            // scanner's territory (spec.md §1's non-goal).
            use std::io::Read;
            let mut file = match std::fs::File::open(local_path) {
                Ok(file) => file,
                Err(source) => {
                    return Err(HealthCheckError::Stat { path: local_path.to_string(), source });
                }
            };
            let mut probe = [0u8; 16];
            match file.read(&mut probe) {
                Ok(0) => return Ok(HealthCheckResult::unhealthy(CorruptionType::TruncatedFile, "file head unreadable")),
                Ok(_) => {}
                Err(source) => return Err(HealthCheckError::Stat { path: local_path.to_string(), source }),
            }
        }

        Ok(HealthCheckResult::healthy())
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeHealthChecker;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Call-recording fake keyed by `local_path`; defaults to healthy for
    /// any path not explicitly configured.
    #[derive(Clone, Default)]
    pub struct FakeHealthChecker {
        inner: Arc<Mutex<Inner>>,
    }

    #[derive(Default)]
    struct Inner {
        results: HashMap<String, HealthCheckResult>,
        calls: Vec<String>,
    }

    impl FakeHealthChecker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_healthy(&self, path: &str) {
            self.inner.lock().results.insert(path.to_string(), HealthCheckResult::healthy());
        }

        pub fn set_unhealthy(&self, path: &str, kind: CorruptionType, message: impl Into<String>) {
            self.inner.lock().results.insert(path.to_string(), HealthCheckResult::unhealthy(kind, message));
        }

        pub fn calls(&self) -> Vec<String> {
            self.inner.lock().calls.clone()
        }
    }

    #[async_trait]
    impl HealthChecker for FakeHealthChecker {
        async fn check(&self, local_path: &str, mode: HealthCheckMode) -> Result<HealthCheckResult, HealthCheckError> {
            let mut inner = self.inner.lock();
            inner.calls.push(format!("check({local_path}, {mode:?})"));
            Ok(inner.results.get(local_path).cloned().unwrap_or_else(HealthCheckResult::healthy))
        }
    }
}
