// SPDX-License-Identifier: MIT

//! The verifier (spec.md §4.4): consumes `SearchCompleted`, polls the arr
//! queue/history until the replacement import resolves one way or another,
//! then verifies the health of whatever landed on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use healarr_adapters::{ArrClient, HealthCheckMode, HealthChecker, MediaId, QueueItem};
use healarr_core::{AggregateId, AggregateType, Clock, Event, EventType, PathId};
use healarr_storage::ConfigStore;

use crate::bus::EventBus;
use crate::cancel::{cancel_pair, CancelHandle, CancelToken};
use crate::shutdown::{wait_or_shutdown, Shutdown};

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub concurrency: usize,
    pub acquire_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_interval_max: Duration,
    /// How many consecutive disappeared-without-import polls to tolerate
    /// before concluding the download was removed (spec.md §4.4
    /// "near-complete" mode).
    pub near_complete_retries: u32,
    /// Consecutive history-API failures tolerated before giving up
    /// (spec.md §4.4's "API failure" row).
    pub api_failure_threshold: u32,
    pub history_page_size: u32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            acquire_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(30),
            poll_interval_max: Duration::from_secs(3600),
            near_complete_retries: 3,
            api_failure_threshold: 5,
            history_page_size: 20,
        }
    }
}

/// Captured once the replacement download is observed in the queue;
/// enriches the eventual `VerificationSuccess` (spec.md §3).
#[derive(Debug, Clone, Default)]
struct VerificationMeta {
    quality: Option<String>,
    release_group: Option<String>,
    indexer: Option<String>,
    download_client: Option<String>,
    size: Option<u64>,
}

struct RunCtx {
    aggregate_id: AggregateId,
    file_path: String,
    arr_path: String,
    media_id: MediaId,
    path_id: PathId,
    verification_timeout: Duration,
}

struct RunState {
    t0: Instant,
    was_in_queue: bool,
    near_complete_retry_count: u32,
    api_failure_count: u32,
    attempt: u32,
    last_status: Option<String>,
    meta: VerificationMeta,
}

pub struct Verifier<A: ArrClient, H: HealthChecker, C: Clock> {
    bus: Arc<EventBus<C>>,
    arr: Arc<A>,
    health: Arc<H>,
    config_store: Arc<ConfigStore>,
    semaphore: Arc<Semaphore>,
    config: VerifierConfig,
    shutdown: Shutdown,
    active: Mutex<HashMap<AggregateId, CancelHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: ArrClient + 'static, H: HealthChecker + 'static, C: Clock> Verifier<A, H, C> {
    pub fn new(
        bus: Arc<EventBus<C>>,
        arr: Arc<A>,
        health: Arc<H>,
        config_store: Arc<ConfigStore>,
        config: VerifierConfig,
    ) -> Arc<Self> {
        let shutdown = bus.shutdown_signal();
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            bus,
            arr,
            health,
            config_store,
            config,
            shutdown,
            active: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let me = self.clone();
        self.bus.subscribe("search:completed", move |event| {
            let me = me.clone();
            async move { me.on_search_completed(event).await }
        });
    }

    pub async fn stop(&self) {
        self.shutdown.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Number of monitor tasks currently tracked as active. Exposed for
    /// tests asserting that cancellation releases resources promptly.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    async fn on_search_completed(self: &Arc<Self>, event: Event) {
        let EventType::SearchCompleted { media_id, arr_path, .. } = event.event_type else {
            return;
        };
        let aggregate_id = event.aggregate_id;
        let media_id = MediaId::from(media_id);

        // A newer search supersedes an older one (spec.md §4.4).
        if let Some(previous) = self.active.lock().remove(&aggregate_id) {
            previous.cancel();
        }

        // Prefer the corruption aggregate's own `file_path` (cheap, already
        // in memory); only when the projection has no record of this
        // aggregate — e.g. the log is being read starting mid-stream — fall
        // back to asking arr for a candidate path keyed by `media_id`.
        // Only a failure of *both* is the validation failure spec.md §9's
        // open question resolves this to (see DESIGN.md).
        let (file_path, path_id) = match self.bus.status(&aggregate_id) {
            Some(status) => (status.file_path.clone(), Some(status.path_id)),
            None => match self.fallback_file_path(&media_id, &arr_path).await {
                Some(file_path) => (file_path, None),
                None => {
                    let _ = self
                        .bus
                        .publish_with_retry_or_degrade(
                            AggregateType::Corruption,
                            aggregate_id,
                            EventType::VerificationFailed {
                                error_type: "validation".into(),
                                message: "missing file_path: no corruption_detected projection for this aggregate and arr reported no candidate file".into(),
                                file_path: None,
                            },
                        )
                        .await;
                    return;
                }
            },
        };

        let (handle, token) = cancel_pair();
        self.active.lock().insert(aggregate_id, handle);

        let permit = match tokio::time::timeout(self.config.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                self.active.lock().remove(&aggregate_id);
                let _ = self
                    .bus
                    .publish_with_retry_or_degrade(
                        AggregateType::Corruption,
                        aggregate_id,
                        EventType::VerificationFailed {
                            error_type: "queue_full".into(),
                            message: "verification queue full".into(),
                            file_path: Some(file_path.clone()),
                        },
                    )
                    .await;
                return;
            }
        };

        // An aggregate recovered only via the arr fallback has no known
        // `path_id`; `effective_verification_timeout` degrades to the
        // global default for an id that matches no configured scan path.
        let path_id = path_id.unwrap_or_else(PathId::new);
        let ctx = RunCtx {
            aggregate_id,
            file_path,
            arr_path,
            media_id,
            path_id,
            verification_timeout: self.config_store.effective_verification_timeout(&path_id),
        };

        let me = self.clone();
        let task = tokio::spawn(async move { me.run(ctx, token, permit).await });
        self.tasks.lock().push(task);
    }

    /// Best-effort recovery of a file path keyed only by `media_id`/`arr_path`,
    /// used when the corruption projection has no record of this aggregate.
    async fn fallback_file_path(&self, media_id: &MediaId, arr_path: &str) -> Option<String> {
        let paths = self.arr.get_all_file_paths(media_id, arr_path).await.ok()?;
        paths.into_iter().find(|p| p.exists()).map(|p| p.display().to_string())
    }

    async fn run(self: Arc<Self>, ctx: RunCtx, cancel: CancelToken, permit: OwnedSemaphorePermit) {
        let mut state = RunState {
            t0: self.bus.clock().now(),
            was_in_queue: false,
            near_complete_retry_count: 0,
            api_failure_count: 0,
            attempt: 0,
            last_status: None,
            meta: VerificationMeta::default(),
        };

        loop {
            if cancel.is_cancelled() || self.shutdown.is_shutting_down() {
                break;
            }

            let progressed = self.poll_once(&ctx, &mut state).await;
            let Some(progressed) = progressed else { break };

            let interval = self.next_interval(&mut state, progressed);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
            }
        }

        drop(permit);
        self.active.lock().remove(&ctx.aggregate_id);
    }

    fn next_interval(&self, state: &mut RunState, progressed: bool) -> Duration {
        if progressed {
            state.attempt = 0;
        } else {
            state.attempt = state.attempt.saturating_add(1);
        }
        let multiplier = 1u64.checked_shl(state.attempt.min(32)).unwrap_or(u64::MAX);
        let secs = self.config.poll_interval.as_secs().saturating_mul(multiplier);
        Duration::from_secs(secs).min(self.config.poll_interval_max)
    }

    /// Runs one observation. `Some(true)` means progress was observed (resets
    /// backoff), `Some(false)` means polling continues unchanged, `None`
    /// means a terminal event was published and the monitor should stop.
    async fn poll_once(&self, ctx: &RunCtx, state: &mut RunState) -> Option<bool> {
        if self.bus.clock().now().duration_since(state.t0) >= ctx.verification_timeout {
            let _ = self
                .bus
                .publish_with_retry_or_degrade(
                    AggregateType::Corruption,
                    ctx.aggregate_id,
                    EventType::DownloadTimeout {
                        elapsed_secs: ctx.verification_timeout.as_secs(),
                        attempt: state.attempt,
                        last_status: state.last_status.clone(),
                        reason: None,
                    },
                )
                .await;
            return None;
        }

        let queue_items = match self.arr.find_queue_items_by_media_id_for_path(&ctx.arr_path, &ctx.media_id).await {
            Ok(items) => items,
            Err(_) => {
                state.api_failure_count += 1;
                if state.api_failure_count >= self.config.api_failure_threshold {
                    let _ = self
                        .bus
                        .publish_with_retry_or_degrade(
                            AggregateType::Corruption,
                            ctx.aggregate_id,
                            EventType::DownloadTimeout {
                                elapsed_secs: self.bus.clock().now().duration_since(state.t0).as_secs(),
                                attempt: state.attempt,
                                last_status: state.last_status.clone(),
                                reason: Some("api_unavailable".into()),
                            },
                        )
                        .await;
                    return None;
                }
                return Some(false);
            }
        };
        state.api_failure_count = 0;

        if let Some(item) = queue_items.first() {
            return self.observe_queue_item(ctx, state, item).await;
        }

        if state.was_in_queue {
            self.observe_disappeared(ctx, state).await
        } else {
            self.observe_never_seen(ctx, state).await
        }
    }

    async fn observe_queue_item(&self, ctx: &RunCtx, state: &mut RunState, item: &QueueItem) -> Option<bool> {
        state.was_in_queue = true;
        state.last_status = item.tracked_download_state.clone();
        state.meta.indexer = item.indexer.clone().or_else(|| state.meta.indexer.clone());
        state.meta.download_client = item.download_client.clone().or_else(|| state.meta.download_client.clone());
        if item.size > 0 {
            state.meta.size = Some(item.size);
        }

        match item.tracked_download_state.as_deref() {
            Some("failed") => {
                let error = item.error_message.clone().unwrap_or_else(|| "download failed".into());
                let _ = self
                    .bus
                    .publish_with_retry_or_degrade(AggregateType::Corruption, ctx.aggregate_id, EventType::DownloadFailed { error })
                    .await;
                None
            }
            Some("ignored") => {
                let _ = self
                    .bus
                    .publish_with_retry_or_degrade(
                        AggregateType::Corruption,
                        ctx.aggregate_id,
                        EventType::DownloadIgnored { reason: item.error_message.clone() },
                    )
                    .await;
                None
            }
            _ if item.tracked_download_status.as_deref() == Some("warning") && !item.status_messages.is_empty() => {
                let _ = self
                    .bus
                    .publish_with_retry_or_degrade(
                        AggregateType::Corruption,
                        ctx.aggregate_id,
                        EventType::ImportBlocked { status_messages: item.status_messages.clone() },
                    )
                    .await;
                None
            }
            _ => {
                let progress = item.progress;
                let eta_secs = item
                    .estimated_completion
                    .map(|eta| (eta - chrono::Utc::now()).num_seconds().max(0) as u64);
                let _ = self
                    .bus
                    .publish(
                        AggregateType::Corruption,
                        ctx.aggregate_id,
                        EventType::DownloadProgress {
                            progress,
                            title: item.title.clone(),
                            size: if item.size > 0 { Some(item.size) } else { None },
                            eta_secs,
                            indexer: item.indexer.clone(),
                            download_client: item.download_client.clone(),
                        },
                    )
                    .await;
                // Below near-complete, progress deltas count as forward
                // motion and reset the backoff; near-complete (>=99%) keeps
                // polling at the same cadence until the queue clears.
                Some(progress < 99.0)
            }
        }
    }

    async fn observe_disappeared(&self, ctx: &RunCtx, state: &mut RunState) -> Option<bool> {
        let history = self
            .arr
            .get_recent_history_for_media_by_path(&ctx.arr_path, &ctx.media_id, self.config.history_page_size)
            .await
            .unwrap_or_default();

        if history.iter().any(|h| h.is_import()) {
            let paths = self.arr.get_all_file_paths(&ctx.media_id, &ctx.file_path).await.unwrap_or_default();
            return Some(self.finish_with_files(ctx, state, paths, None).await);
        }

        state.near_complete_retry_count += 1;
        if state.near_complete_retry_count >= self.config.near_complete_retries {
            let _ = self
                .bus
                .publish_with_retry_or_degrade(
                    AggregateType::Corruption,
                    ctx.aggregate_id,
                    EventType::ManuallyRemoved { reason: Some("disappeared from queue without an import record".into()) },
                )
                .await;
            return None;
        }
        Some(false)
    }

    async fn observe_never_seen(&self, ctx: &RunCtx, state: &mut RunState) -> Option<bool> {
        let paths = self.arr.get_all_file_paths(&ctx.media_id, &ctx.file_path).await.unwrap_or_default();
        let existing: Vec<PathBuf> = paths.iter().filter(|p| p.exists()).cloned().collect();

        if !paths.is_empty() && existing.len() == paths.len() {
            return Some(self.finish_with_files(ctx, state, paths, None).await);
        }

        let elapsed = self.bus.clock().now().duration_since(state.t0);
        if elapsed >= ctx.verification_timeout / 2 && !existing.is_empty() {
            let expected = paths.len() as u32;
            let missing = expected - existing.len() as u32;
            return Some(self.finish_with_files(ctx, state, existing, Some((expected, missing))).await);
        }

        Some(false)
    }

    /// Verifies health of every path in `paths`, emits `FileDetected`, then
    /// `VerificationSuccess`/`VerificationFailed`. Returns whether this
    /// counts as forward progress (it always is — emitting a terminal
    /// event ends the loop regardless of the return value).
    async fn finish_with_files(
        &self,
        ctx: &RunCtx,
        state: &mut RunState,
        paths: Vec<PathBuf>,
        partial: Option<(u32, u32)>,
    ) -> bool {
        if paths.is_empty() {
            return false;
        }

        let file_count = paths.len() as u32;
        if paths.len() == 1 && partial.is_none() {
            let _ = self
                .bus
                .publish(
                    AggregateType::Corruption,
                    ctx.aggregate_id,
                    EventType::FileDetected {
                        file_path: Some(paths[0].display().to_string()),
                        file_paths: vec![],
                        file_count,
                        partial_replacement: false,
                        expected_count: None,
                        missing_count: None,
                    },
                )
                .await;
        } else {
            let (expected_count, missing_count) = match partial {
                Some((expected, missing)) => (Some(expected), Some(missing)),
                None => (None, None),
            };
            let _ = self
                .bus
                .publish(
                    AggregateType::Corruption,
                    ctx.aggregate_id,
                    EventType::FileDetected {
                        file_path: None,
                        file_paths: paths.iter().map(|p| p.display().to_string()).collect(),
                        file_count,
                        partial_replacement: partial.is_some(),
                        expected_count,
                        missing_count,
                    },
                )
                .await;
        }

        let mut all_healthy = true;
        let mut failure: Option<(String, String, String)> = None;
        for path in &paths {
            let local_path = path.display().to_string();
            let result = self.health.check(&local_path, HealthCheckMode::Full).await;
            match result {
                Ok(r) if r.healthy => {}
                Ok(r) => {
                    all_healthy = false;
                    if failure.is_none() {
                        let (kind, message) = match r.error {
                            Some(error) => (error.kind.to_string(), error.message),
                            None => ("unknown".to_string(), "health check reported unhealthy with no detail".into()),
                        };
                        failure = Some((kind, message, local_path.clone()));
                    }
                }
                Err(err) => {
                    all_healthy = false;
                    if failure.is_none() {
                        failure = Some(("io_error".to_string(), err.to_string(), local_path.clone()));
                    }
                }
            }
        }

        if all_healthy {
            let file_path = if paths.len() == 1 { Some(paths[0].display().to_string()) } else { None };
            let _ = self
                .bus
                .publish_with_retry_or_degrade(
                    AggregateType::Corruption,
                    ctx.aggregate_id,
                    EventType::VerificationSuccess {
                        file_path,
                        size: state.meta.size,
                        quality: state.meta.quality.clone(),
                        release_group: state.meta.release_group.clone(),
                        indexer: state.meta.indexer.clone(),
                        download_client: state.meta.download_client.clone(),
                        recovery_action: None,
                    },
                )
                .await;
        } else if let Some((error_type, message, file_path)) = failure {
            let _ = self
                .bus
                .publish_with_retry_or_degrade(
                    AggregateType::Corruption,
                    ctx.aggregate_id,
                    EventType::VerificationFailed { error_type, message, file_path: Some(file_path) },
                )
                .await;
        }

        true
    }
}

#[cfg(test)]
#[path = "verifier_tests.rs"]
mod tests;
