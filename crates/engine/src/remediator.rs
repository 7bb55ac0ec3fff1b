// SPDX-License-Identifier: MIT

//! The remediator (spec.md §4.3): consumes `CorruptionDetected` and
//! `RetryScheduled`, and orchestrates delete → search behind a safety gate,
//! dry-run short-circuit, and a bounded semaphore protecting the arr API.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;

use healarr_adapters::{ArrClient, PathMapper};
use healarr_core::{AggregateId, AggregateType, Clock, CorruptionType, DeletionMetadata, Event, EventType, MediaDetails};
use healarr_storage::{CorruptionStatus, ConfigStore};

use crate::bus::EventBus;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone)]
pub struct RemediatorConfig {
    /// Bounds concurrent remediations in flight (spec.md §4.3: capacity 5).
    pub concurrency: usize,
    /// How long a task waits for a semaphore slot before giving up
    /// (spec.md §4.3: 2 minutes).
    pub acquire_timeout: Duration,
}

impl Default for RemediatorConfig {
    fn default() -> Self {
        Self { concurrency: 5, acquire_timeout: Duration::from_secs(120) }
    }
}

pub struct Remediator<A: ArrClient, P: PathMapper, C: Clock> {
    bus: Arc<EventBus<C>>,
    arr: Arc<A>,
    path_mapper: Arc<P>,
    config_store: Arc<ConfigStore>,
    semaphore: Arc<Semaphore>,
    config: RemediatorConfig,
    shutdown: Shutdown,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl<A: ArrClient + 'static, P: PathMapper + 'static, C: Clock> Remediator<A, P, C> {
    pub fn new(
        bus: Arc<EventBus<C>>,
        arr: Arc<A>,
        path_mapper: Arc<P>,
        config_store: Arc<ConfigStore>,
        config: RemediatorConfig,
    ) -> Arc<Self> {
        let shutdown = bus.shutdown_signal();
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            bus,
            arr,
            path_mapper,
            config_store,
            config,
            shutdown,
            tasks: AsyncMutex::new(Vec::new()),
        })
    }

    /// Subscribe to the bus. Each matching event spawns an independent
    /// orchestration task so a slow deletion never head-of-line-blocks
    /// unrelated corruptions.
    pub fn start(self: &Arc<Self>) {
        let me = self.clone();
        self.bus.subscribe("corruption:detected", move |event| {
            let me = me.clone();
            async move { me.spawn_corruption_detected(event).await }
        });

        let me = self.clone();
        self.bus.subscribe("retry:scheduled", move |event| {
            let me = me.clone();
            async move { me.spawn_retry_scheduled(event).await }
        });
    }

    pub async fn stop(&self) {
        self.shutdown.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn spawn_corruption_detected(self: &Arc<Self>, event: Event) {
        let me = self.clone();
        let task = tokio::spawn(async move { me.handle_corruption_detected(event).await });
        self.tasks.lock().await.push(task);
    }

    async fn spawn_retry_scheduled(self: &Arc<Self>, event: Event) {
        let me = self.clone();
        let task = tokio::spawn(async move { me.handle_retry_scheduled(event).await });
        self.tasks.lock().await.push(task);
    }

    async fn handle_corruption_detected(&self, event: Event) {
        let EventType::CorruptionDetected { file_path, path_id, corruption_type, auto_remediate, dry_run } =
            event.event_type
        else {
            return;
        };
        let aggregate_id = event.aggregate_id;

        if file_path.trim().is_empty() {
            self.fail(aggregate_id, "missing file_path").await;
            return;
        }

        self.run_full_flow(aggregate_id, file_path, path_id, corruption_type, auto_remediate, dry_run, false).await;
    }

    async fn handle_retry_scheduled(&self, event: Event) {
        let EventType::RetryScheduled { file_path, path_id, auto_remediate } = event.event_type else {
            return;
        };
        let aggregate_id = event.aggregate_id;

        let Some(status) = self.bus.status(&aggregate_id) else {
            self.fail(aggregate_id, "no corruption_detected event found for this aggregate").await;
            return;
        };

        if status.deletion_completed {
            self.run_search_only(aggregate_id, &status, file_path).await;
        } else {
            self.run_full_flow(
                aggregate_id,
                file_path,
                path_id,
                status.corruption_type,
                auto_remediate,
                status.dry_run,
                true,
            )
            .await;
        }
    }

    /// Steps 1-12 of spec.md §4.3.
    #[allow(clippy::too_many_arguments)]
    async fn run_full_flow(
        &self,
        aggregate_id: AggregateId,
        file_path: String,
        path_id: healarr_core::PathId,
        corruption_type: CorruptionType,
        auto_remediate: bool,
        dry_run: bool,
        is_retry: bool,
    ) {
        if corruption_type.is_infrastructure() {
            self.fail(
                aggregate_id,
                format!("remediation blocked: {corruption_type} is an infrastructure condition, not confirmed corruption"),
            )
            .await;
            return;
        }

        let arr_path = match self.path_mapper.to_arr_path(&file_path) {
            Ok(p) => p,
            Err(err) => {
                self.fail(aggregate_id, format!("path mapping failed: {err}")).await;
                return;
            }
        };

        let _ = self
            .bus
            .publish(
                AggregateType::Corruption,
                aggregate_id,
                EventType::RemediationQueued { file_path: file_path.clone(), path_id, dry_run: false },
            )
            .await;

        if !auto_remediate {
            return;
        }

        let effective_dry_run = dry_run || self.config_store.effective_dry_run(&path_id);
        if effective_dry_run {
            tracing::info!(file_path = %file_path, "dry-run: would delete and re-search");
            let _ = self
                .bus
                .publish(
                    AggregateType::Corruption,
                    aggregate_id,
                    EventType::RemediationQueued { file_path, path_id, dry_run: true },
                )
                .await;
            return;
        }

        let permit = match tokio::time::timeout(self.config.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                self.fail(aggregate_id, "remediation queue full").await;
                return;
            }
        };

        let media_id = match self.arr.find_media_by_path(&arr_path).await {
            Ok(id) => id,
            Err(err) => {
                self.fail(aggregate_id, format!("media lookup failed: {err}")).await;
                return;
            }
        };

        let _ = self
            .bus
            .publish(
                AggregateType::Corruption,
                aggregate_id,
                EventType::DeletionStarted { media_id: media_id.0.clone(), arr_path: arr_path.clone() },
            )
            .await;

        let metadata = match self.arr.delete_file(&media_id, &arr_path).await {
            Ok(metadata) => metadata,
            Err(err) => {
                self.fail(aggregate_id, format!("delete failed: {err}")).await;
                return;
            }
        };

        // Once deletion has succeeded, the search must be attempted even if
        // shutdown is in progress (spec.md §4.3 step 10) — an unsearched
        // deletion leaves the corruption in an inconsistent state.
        if self
            .bus
            .publish_with_retry_or_degrade(
                AggregateType::Corruption,
                aggregate_id,
                EventType::DeletionCompleted { media_id: media_id.0.clone(), metadata: metadata.clone() },
            )
            .await
            .is_none()
        {
            return;
        }

        self.search(aggregate_id, media_id, arr_path, metadata, is_retry, permit).await;
    }

    async fn run_search_only(&self, aggregate_id: AggregateId, status: &CorruptionStatus, file_path: String) {
        let arr_path = status.arr_path.clone().unwrap_or_else(|| {
            self.path_mapper.to_arr_path(&file_path).unwrap_or_else(|_| file_path.clone())
        });

        let permit = match tokio::time::timeout(self.config.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                self.search_fail(aggregate_id, "remediation queue full").await;
                return;
            }
        };

        let media_id = if let Some(id) = &status.media_id {
            healarr_adapters::MediaId::from(id.clone())
        } else {
            match self.arr.find_media_by_path(&arr_path).await {
                Ok(id) => id,
                Err(err) => {
                    self.search_fail(aggregate_id, format!("media lookup failed: {err}")).await;
                    return;
                }
            }
        };

        self.search(aggregate_id, media_id, arr_path, status.metadata.clone(), true, permit).await;
    }

    async fn search(
        &self,
        aggregate_id: AggregateId,
        media_id: healarr_adapters::MediaId,
        arr_path: String,
        metadata: DeletionMetadata,
        is_retry: bool,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let mut target_ids = metadata.episode_ids;
        target_ids.extend(metadata.album_ids);

        let _ = self
            .bus
            .publish(
                AggregateType::Corruption,
                aggregate_id,
                EventType::SearchStarted { media_id: media_id.0.clone(), arr_path: arr_path.clone(), target_ids: target_ids.clone() },
            )
            .await;

        if let Err(err) = self.arr.trigger_search(&media_id, &arr_path, &target_ids).await {
            let _ = self
                .bus
                .publish(
                    AggregateType::Corruption,
                    aggregate_id,
                    EventType::SearchFailed { error: err.to_string() },
                )
                .await;
            drop(permit);
            return;
        }

        // Best-effort enrichment: a failure here degrades silently rather
        // than failing the whole search (spec.md §4.3 step 12).
        let media_details = self.arr.get_media_details(&media_id, &arr_path).await.unwrap_or_else(|_| MediaDetails::default());

        let _ = self
            .bus
            .publish_with_retry_or_degrade(
                AggregateType::Corruption,
                aggregate_id,
                EventType::SearchCompleted {
                    media_id: media_id.0,
                    arr_path,
                    is_retry,
                    media_details: Some(media_details),
                },
            )
            .await;

        drop(permit);
    }

    async fn fail(&self, aggregate_id: AggregateId, error: impl Into<String>) {
        let _ = self
            .bus
            .publish(AggregateType::Corruption, aggregate_id, EventType::DeletionFailed { error: error.into() })
            .await;
    }

    /// Like [`Self::fail`], but for failures on the search-only retry path
    /// where nothing was deleted — `SearchFailed` is the accurate event.
    async fn search_fail(&self, aggregate_id: AggregateId, error: impl Into<String>) {
        let _ = self
            .bus
            .publish(AggregateType::Corruption, aggregate_id, EventType::SearchFailed { error: error.into() })
            .await;
    }
}

#[cfg(test)]
#[path = "remediator_tests.rs"]
mod tests;
