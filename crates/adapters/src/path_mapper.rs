// SPDX-License-Identifier: MIT

//! The path-mapper capability (spec.md §6): translates between the
//! engine's local filesystem namespace and the arr service's own view of
//! the same library. Both directions are fallible with a "not configured"
//! error callers must tolerate — the verifier falls back to the original
//! path when translation is unavailable (spec.md §4.4).

use crate::error::PathMapError;

pub trait PathMapper: Send + Sync {
    fn to_arr_path(&self, local: &str) -> Result<String, PathMapError>;
    fn to_local_path(&self, arr: &str) -> Result<String, PathMapError>;
}

/// Maps by substituting a configured local-root prefix for an arr-root
/// prefix (the common arr deployment shape: the engine and the arr
/// instance see the same library through different mount points).
pub struct PrefixPathMapper {
    mappings: Vec<(String, String)>,
}

impl PrefixPathMapper {
    pub fn new(mappings: Vec<(String, String)>) -> Self {
        Self { mappings }
    }
}

impl PathMapper for PrefixPathMapper {
    fn to_arr_path(&self, local: &str) -> Result<String, PathMapError> {
        for (local_root, arr_root) in &self.mappings {
            if let Some(rest) = local.strip_prefix(local_root.as_str()) {
                return Ok(format!("{arr_root}{rest}"));
            }
        }
        Err(PathMapError::NotConfigured { path: local.to_string() })
    }

    fn to_local_path(&self, arr: &str) -> Result<String, PathMapError> {
        for (local_root, arr_root) in &self.mappings {
            if let Some(rest) = arr.strip_prefix(arr_root.as_str()) {
                return Ok(format!("{local_root}{rest}"));
            }
        }
        Err(PathMapError::NotConfigured { path: arr.to_string() })
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakePathMapper;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Identity mapping by default (local path == arr path), overridable
    /// per-path, with an explicit way to force a "not configured" error.
    #[derive(Clone, Default)]
    pub struct FakePathMapper {
        inner: Arc<Mutex<Inner>>,
    }

    #[derive(Default)]
    struct Inner {
        to_arr: HashMap<String, String>,
        to_local: HashMap<String, String>,
        unconfigured: std::collections::HashSet<String>,
    }

    impl FakePathMapper {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn map(&self, local: &str, arr: &str) {
            let mut inner = self.inner.lock();
            inner.to_arr.insert(local.to_string(), arr.to_string());
            inner.to_local.insert(arr.to_string(), local.to_string());
        }

        pub fn fail_for(&self, path: &str) {
            self.inner.lock().unconfigured.insert(path.to_string());
        }
    }

    impl PathMapper for FakePathMapper {
        fn to_arr_path(&self, local: &str) -> Result<String, PathMapError> {
            let inner = self.inner.lock();
            if inner.unconfigured.contains(local) {
                return Err(PathMapError::NotConfigured { path: local.to_string() });
            }
            Ok(inner.to_arr.get(local).cloned().unwrap_or_else(|| local.to_string()))
        }

        fn to_local_path(&self, arr: &str) -> Result<String, PathMapError> {
            let inner = self.inner.lock();
            if inner.unconfigured.contains(arr) {
                return Err(PathMapError::NotConfigured { path: arr.to_string() });
            }
            Ok(inner.to_local.get(arr).cloned().unwrap_or_else(|| arr.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_mapper_translates_local_to_arr() {
        let mapper = PrefixPathMapper::new(vec![("/data/movies".into(), "/movies".into())]);
        assert_eq!(mapper.to_arr_path("/data/movies/a.mkv").unwrap(), "/movies/a.mkv");
    }

    #[test]
    fn prefix_mapper_translates_arr_to_local() {
        let mapper = PrefixPathMapper::new(vec![("/data/movies".into(), "/movies".into())]);
        assert_eq!(mapper.to_local_path("/movies/a.mkv").unwrap(), "/data/movies/a.mkv");
    }

    #[test]
    fn prefix_mapper_errors_when_unconfigured() {
        let mapper = PrefixPathMapper::new(vec![("/data/movies".into(), "/movies".into())]);
        assert!(mapper.to_arr_path("/data/tv/a.mkv").is_err());
    }
}
