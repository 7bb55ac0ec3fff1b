// SPDX-License-Identifier: MIT

//! The arr client capability (spec.md §6): an HTTP facade over one or more
//! arr instances (Sonarr/Radarr/Lidarr/Whisparr share the same *arr* REST
//! shape — queue, history, command, and a per-media file listing).

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use healarr_core::{DeletionMetadata, InstanceInfo, MediaDetails};

use crate::error::ArrError;

/// Opaque media identifier returned by `find_media_by_path` and threaded
/// through the rest of the remediation pipeline as a plain `String` once it
/// reaches an `Event`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub String);

impl std::fmt::Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MediaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MediaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One entry in an arr instance's download queue (spec.md §6's "queue-item
/// shape").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub tracked_download_state: Option<String>,
    pub tracked_download_status: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub status_messages: Vec<String>,
    pub title: Option<String>,
    pub download_id: Option<String>,
    pub protocol: Option<String>,
    pub download_client: Option<String>,
    pub indexer: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub size_left: u64,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub added_at: Option<DateTime<Utc>>,
}

/// One entry in an arr instance's history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub event_type: String,
    pub date: DateTime<Utc>,
}

/// The "import" subset of history event types (spec.md §6).
const IMPORT_EVENT_TYPES: &[&str] =
    &["downloadFolderImported", "episodeFileImported", "movieFileImported", "albumImported"];

impl HistoryItem {
    pub fn is_import(&self) -> bool {
        IMPORT_EVENT_TYPES.contains(&self.event_type.as_str())
    }
}

/// The arr client capability (spec.md §6): an HTTP facade over one or more
/// arr instances.
#[async_trait]
pub trait ArrClient: Send + Sync {
    async fn find_media_by_path(&self, arr_path: &str) -> Result<MediaId, ArrError>;
    async fn delete_file(&self, media_id: &MediaId, arr_path: &str) -> Result<DeletionMetadata, ArrError>;
    async fn trigger_search(&self, media_id: &MediaId, arr_path: &str, target_ids: &[String]) -> Result<(), ArrError>;
    async fn get_all_file_paths(&self, media_id: &MediaId, reference_path: &str) -> Result<Vec<PathBuf>, ArrError>;
    async fn get_queue_for_path(&self, local_path: &str) -> Result<Vec<QueueItem>, ArrError>;
    async fn find_queue_items_by_media_id_for_path(
        &self,
        arr_path: &str,
        media_id: &MediaId,
    ) -> Result<Vec<QueueItem>, ArrError>;
    async fn get_recent_history_for_media_by_path(
        &self,
        arr_path: &str,
        media_id: &MediaId,
        limit: u32,
    ) -> Result<Vec<HistoryItem>, ArrError>;
    async fn get_media_details(&self, media_id: &MediaId, arr_path: &str) -> Result<MediaDetails, ArrError>;
    async fn get_all_instances(&self) -> Result<Vec<InstanceInfo>, ArrError>;
    async fn check_instance_health(&self, instance_id: &str) -> Result<(), ArrError>;
}

/// Production `ArrClient` speaking the common *arr REST shape over HTTP.
///
/// One `HttpArrClient` fronts one arr instance; the daemon holds one per
/// configured instance and dispatches by `path_id` → instance mapping
/// (owned by configuration, out of scope here per spec.md §1).
pub struct HttpArrClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpArrClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), api_key: api_key.into(), http: reqwest::Client::new() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ArrClient for HttpArrClient {
    async fn find_media_by_path(&self, arr_path: &str) -> Result<MediaId, ArrError> {
        let response = self
            .http
            .get(self.url("/api/v3/parse"))
            .query(&[("apikey", self.api_key.as_str()), ("path", arr_path)])
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArrError::NotFound(arr_path.to_string()));
        }
        let body: serde_json::Value = response.json().await.map_err(|e| ArrError::Decode(e.to_string()))?;
        body.get("id")
            .and_then(|v| v.as_i64().map(|n| n.to_string()).or_else(|| v.as_str().map(str::to_string)))
            .map(MediaId)
            .ok_or_else(|| ArrError::NotFound(arr_path.to_string()))
    }

    async fn delete_file(&self, media_id: &MediaId, _arr_path: &str) -> Result<DeletionMetadata, ArrError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v3/mediafile/{media_id}")))
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArrError::Request(format!("delete {media_id} returned {}", response.status())));
        }
        let metadata: DeletionMetadata =
            response.json().await.unwrap_or_default();
        Ok(metadata)
    }

    async fn trigger_search(&self, media_id: &MediaId, _arr_path: &str, target_ids: &[String]) -> Result<(), ArrError> {
        let body = serde_json::json!({ "name": "MediaSearch", "mediaId": media_id.0, "targetIds": target_ids });
        let response = self
            .http
            .post(self.url("/api/v3/command"))
            .query(&[("apikey", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArrError::Request(format!("search command returned {}", response.status())));
        }
        Ok(())
    }

    async fn get_all_file_paths(&self, media_id: &MediaId, _reference_path: &str) -> Result<Vec<PathBuf>, ArrError> {
        let response = self
            .http
            .get(self.url("/api/v3/mediafile"))
            .query(&[("apikey", self.api_key.as_str()), ("mediaId", &media_id.0)])
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        let files: Vec<serde_json::Value> = response.json().await.map_err(|e| ArrError::Decode(e.to_string()))?;
        Ok(files
            .into_iter()
            .filter_map(|f| f.get("path").and_then(|p| p.as_str()).map(PathBuf::from))
            .collect())
    }

    async fn get_queue_for_path(&self, local_path: &str) -> Result<Vec<QueueItem>, ArrError> {
        let response = self
            .http
            .get(self.url("/api/v3/queue"))
            .query(&[("apikey", self.api_key.as_str()), ("path", local_path)])
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        response.json().await.map_err(|e| ArrError::Decode(e.to_string()))
    }

    async fn find_queue_items_by_media_id_for_path(
        &self,
        _arr_path: &str,
        media_id: &MediaId,
    ) -> Result<Vec<QueueItem>, ArrError> {
        let response = self
            .http
            .get(self.url("/api/v3/queue"))
            .query(&[("apikey", self.api_key.as_str()), ("mediaId", media_id.0.as_str())])
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        response.json().await.map_err(|e| ArrError::Decode(e.to_string()))
    }

    async fn get_recent_history_for_media_by_path(
        &self,
        _arr_path: &str,
        media_id: &MediaId,
        limit: u32,
    ) -> Result<Vec<HistoryItem>, ArrError> {
        let response = self
            .http
            .get(self.url("/api/v3/history"))
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("mediaId", media_id.0.as_str()),
                ("pageSize", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        response.json().await.map_err(|e| ArrError::Decode(e.to_string()))
    }

    async fn get_media_details(&self, media_id: &MediaId, _arr_path: &str) -> Result<MediaDetails, ArrError> {
        let response = self
            .http
            .get(self.url(&format!("/api/v3/media/{media_id}")))
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        response.json().await.map_err(|e| ArrError::Decode(e.to_string()))
    }

    async fn get_all_instances(&self) -> Result<Vec<InstanceInfo>, ArrError> {
        let response = self
            .http
            .get(self.url("/api/v3/system/status"))
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        response.json().await.map_err(|e| ArrError::Decode(e.to_string()))
    }

    async fn check_instance_health(&self, _instance_id: &str) -> Result<(), ArrError> {
        let response = self
            .http
            .get(self.url("/api/v3/health"))
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ArrError::Request(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ArrError::Request(format!("health check returned {}", response.status())))
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeArrClient;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Call-recording fake, same shape as the teacher's `FakeAgentAdapter`:
    /// canned responses keyed by input, with every call recorded for
    /// assertions.
    #[derive(Clone, Default)]
    pub struct FakeArrClient {
        inner: Arc<Mutex<FakeState>>,
    }

    #[derive(Default)]
    struct FakeState {
        media_by_path: HashMap<String, Result<MediaId, String>>,
        delete_results: HashMap<String, Result<DeletionMetadata, String>>,
        search_results: HashMap<String, Result<(), String>>,
        file_paths: HashMap<String, Vec<PathBuf>>,
        queues: HashMap<String, Vec<QueueItem>>,
        histories: HashMap<String, Vec<HistoryItem>>,
        media_details: HashMap<String, MediaDetails>,
        instances: Vec<InstanceInfo>,
        instance_health: HashMap<String, Result<(), String>>,
        calls: Vec<String>,
    }

    impl FakeArrClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_media_for_path(&self, arr_path: &str, media_id: MediaId) {
            self.inner.lock().media_by_path.insert(arr_path.to_string(), Ok(media_id));
        }

        pub fn fail_media_for_path(&self, arr_path: &str, error: impl Into<String>) {
            self.inner.lock().media_by_path.insert(arr_path.to_string(), Err(error.into()));
        }

        pub fn set_delete_result(&self, media_id: &MediaId, metadata: DeletionMetadata) {
            self.inner.lock().delete_results.insert(media_id.0.clone(), Ok(metadata));
        }

        pub fn fail_delete(&self, media_id: &MediaId, error: impl Into<String>) {
            self.inner.lock().delete_results.insert(media_id.0.clone(), Err(error.into()));
        }

        pub fn fail_search(&self, media_id: &MediaId, error: impl Into<String>) {
            self.inner.lock().search_results.insert(media_id.0.clone(), Err(error.into()));
        }

        pub fn set_file_paths(&self, media_id: &MediaId, paths: Vec<PathBuf>) {
            self.inner.lock().file_paths.insert(media_id.0.clone(), paths);
        }

        pub fn set_queue(&self, local_path: &str, queue: Vec<QueueItem>) {
            self.inner.lock().queues.insert(local_path.to_string(), queue);
        }

        pub fn set_history(&self, media_id: &MediaId, history: Vec<HistoryItem>) {
            self.inner.lock().histories.insert(media_id.0.clone(), history);
        }

        pub fn set_media_details(&self, media_id: &MediaId, details: MediaDetails) {
            self.inner.lock().media_details.insert(media_id.0.clone(), details);
        }

        pub fn set_instances(&self, instances: Vec<InstanceInfo>) {
            self.inner.lock().instances = instances;
        }

        pub fn fail_instance_health(&self, instance_id: &str, error: impl Into<String>) {
            self.inner.lock().instance_health.insert(instance_id.to_string(), Err(error.into()));
        }

        pub fn calls(&self) -> Vec<String> {
            self.inner.lock().calls.clone()
        }
    }

    #[async_trait]
    impl ArrClient for FakeArrClient {
        async fn find_media_by_path(&self, arr_path: &str) -> Result<MediaId, ArrError> {
            let mut state = self.inner.lock();
            state.calls.push(format!("find_media_by_path({arr_path})"));
            match state.media_by_path.get(arr_path) {
                Some(Ok(id)) => Ok(id.clone()),
                Some(Err(e)) => Err(ArrError::NotFound(e.clone())),
                None => Err(ArrError::NotFound(arr_path.to_string())),
            }
        }

        async fn delete_file(&self, media_id: &MediaId, arr_path: &str) -> Result<DeletionMetadata, ArrError> {
            let mut state = self.inner.lock();
            state.calls.push(format!("delete_file({media_id}, {arr_path})"));
            match state.delete_results.get(&media_id.0) {
                Some(Ok(metadata)) => Ok(metadata.clone()),
                Some(Err(e)) => Err(ArrError::Request(e.clone())),
                None => Ok(DeletionMetadata::default()),
            }
        }

        async fn trigger_search(&self, media_id: &MediaId, arr_path: &str, _target_ids: &[String]) -> Result<(), ArrError> {
            let mut state = self.inner.lock();
            state.calls.push(format!("trigger_search({media_id}, {arr_path})"));
            match state.search_results.get(&media_id.0) {
                Some(Err(e)) => Err(ArrError::Request(e.clone())),
                _ => Ok(()),
            }
        }

        async fn get_all_file_paths(&self, media_id: &MediaId, _reference_path: &str) -> Result<Vec<PathBuf>, ArrError> {
            let mut state = self.inner.lock();
            state.calls.push(format!("get_all_file_paths({media_id})"));
            Ok(state.file_paths.get(&media_id.0).cloned().unwrap_or_default())
        }

        async fn get_queue_for_path(&self, local_path: &str) -> Result<Vec<QueueItem>, ArrError> {
            let mut state = self.inner.lock();
            state.calls.push(format!("get_queue_for_path({local_path})"));
            Ok(state.queues.get(local_path).cloned().unwrap_or_default())
        }

        async fn find_queue_items_by_media_id_for_path(
            &self,
            arr_path: &str,
            media_id: &MediaId,
        ) -> Result<Vec<QueueItem>, ArrError> {
            let mut state = self.inner.lock();
            state.calls.push(format!("find_queue_items_by_media_id_for_path({arr_path}, {media_id})"));
            Ok(state.queues.get(arr_path).cloned().unwrap_or_default())
        }

        async fn get_recent_history_for_media_by_path(
            &self,
            arr_path: &str,
            media_id: &MediaId,
            _limit: u32,
        ) -> Result<Vec<HistoryItem>, ArrError> {
            let mut state = self.inner.lock();
            state.calls.push(format!("get_recent_history_for_media_by_path({arr_path}, {media_id})"));
            Ok(state.histories.get(&media_id.0).cloned().unwrap_or_default())
        }

        async fn get_media_details(&self, media_id: &MediaId, arr_path: &str) -> Result<MediaDetails, ArrError> {
            let mut state = self.inner.lock();
            state.calls.push(format!("get_media_details({media_id}, {arr_path})"));
            Ok(state.media_details.get(&media_id.0).cloned().unwrap_or_default())
        }

        async fn get_all_instances(&self) -> Result<Vec<InstanceInfo>, ArrError> {
            let mut state = self.inner.lock();
            state.calls.push("get_all_instances".to_string());
            Ok(state.instances.clone())
        }

        async fn check_instance_health(&self, instance_id: &str) -> Result<(), ArrError> {
            let mut state = self.inner.lock();
            state.calls.push(format!("check_instance_health({instance_id})"));
            match state.instance_health.get(instance_id) {
                Some(Err(e)) => Err(ArrError::Request(e.clone())),
                _ => Ok(()),
            }
        }
    }
}

#[cfg(test)]
#[path = "arr_tests.rs"]
mod tests;
