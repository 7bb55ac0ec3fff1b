// SPDX-License-Identifier: MIT

//! The corruption-scanner capability (spec.md §6): probes the files under a
//! configured path and reports what it finds. The scanner decides
//! *whether* a file is corrupt and how; the engine only needs its verdict
//! to originate a `CorruptionDetected` event (spec.md §4.2).

use async_trait::async_trait;
use healarr_core::CorruptionType;

use crate::error::ScanError;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedCorruption {
    pub file_path: String,
    pub corruption_type: CorruptionType,
}

#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, local_path: &str) -> Result<Vec<DetectedCorruption>, ScanError>;
}

/// Production `Scanner`: walks `local_path` and runs an injected
/// [`HealthChecker`] over every file it finds, reporting the unhealthy
/// ones as detected corruptions.
///
/// This is the engine's own minimal standing-in for the actual corruption
/// scanner (spec.md §1 names it an external collaborator out of scope);
/// the production binary wires a richer decode-and-probe scanner through
/// this same trait when one is available. `SweepScanner` exists so the
/// daemon has something to register against a cron schedule out of the box.
pub struct SweepScanner<H: crate::health::HealthChecker> {
    health: std::sync::Arc<H>,
}

impl<H: crate::health::HealthChecker> SweepScanner<H> {
    pub fn new(health: std::sync::Arc<H>) -> Self {
        Self { health }
    }

    fn walk(dir: &std::path::Path, out: &mut Vec<std::path::PathBuf>) -> Result<(), ScanError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|source| ScanError::Walk { path: dir.display().to_string(), source })?;
        for entry in entries {
            let entry = entry.map_err(|source| ScanError::Walk { path: dir.display().to_string(), source })?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|source| ScanError::Walk { path: path.display().to_string(), source })?;
            if file_type.is_dir() {
                Self::walk(&path, out)?;
            } else if file_type.is_file() {
                out.push(path);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<H: crate::health::HealthChecker> Scanner for SweepScanner<H> {
    async fn scan(&self, local_path: &str) -> Result<Vec<DetectedCorruption>, ScanError> {
        let root = std::path::PathBuf::from(local_path);
        let mut files = Vec::new();
        Self::walk(&root, &mut files)?;

        let mut findings = Vec::new();
        for path in files {
            let path_str = path.display().to_string();
            let result = self.health.check(&path_str, crate::health::HealthCheckMode::Quick).await;
            if let Ok(result) = result {
                if !result.healthy {
                    if let Some(error) = result.error {
                        findings.push(DetectedCorruption { file_path: path_str, corruption_type: error.kind });
                    }
                }
            }
        }
        Ok(findings)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeScanner;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    pub struct FakeScanner {
        inner: Arc<Mutex<Inner>>,
    }

    #[derive(Default)]
    struct Inner {
        findings: HashMap<String, Result<Vec<DetectedCorruption>, String>>,
    }

    impl FakeScanner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_findings(&self, local_path: &str, findings: Vec<DetectedCorruption>) {
            self.inner.lock().findings.insert(local_path.to_string(), Ok(findings));
        }

        pub fn fail(&self, local_path: &str, error: impl Into<String>) {
            self.inner.lock().findings.insert(local_path.to_string(), Err(error.into()));
        }
    }

    #[async_trait]
    impl Scanner for FakeScanner {
        async fn scan(&self, local_path: &str) -> Result<Vec<DetectedCorruption>, ScanError> {
            match self.inner.lock().findings.get(local_path) {
                Some(Ok(findings)) => Ok(findings.clone()),
                Some(Err(_)) => Err(ScanError::Walk {
                    path: local_path.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "fake scan failure"),
                }),
                None => Ok(Vec::new()),
            }
        }
    }
}
