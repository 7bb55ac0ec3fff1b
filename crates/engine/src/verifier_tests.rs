// SPDX-License-Identifier: MIT

use std::time::Duration;

use healarr_adapters::{FakeArrClient, FakeHealthChecker, HistoryItem, MediaId, QueueItem};
use healarr_core::{AggregateType, CorruptionType, EngineConfig, EventType, FakeClock, PathId};
use healarr_storage::{ConfigStore, MaterializedState, Wal};
use proptest::prelude::*;

use super::*;

fn harness(
) -> (Arc<EventBus<FakeClock>>, Arc<FakeArrClient>, Arc<FakeHealthChecker>, Arc<ConfigStore>, FakeClock, tempfile::TempDir)
{
    let dir = tempfile::tempdir().expect("tempdir");
    let wal = Wal::open(&dir.path().join("events.wal"), 0).expect("open wal");
    let clock = FakeClock::new();
    let bus = EventBus::new(wal, MaterializedState::default(), clock.clone());
    let arr = Arc::new(FakeArrClient::new());
    let health = Arc::new(FakeHealthChecker::new());
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, toml::to_string(&EngineConfig::default()).unwrap()).unwrap();
    let config_store = Arc::new(ConfigStore::load(config_path).expect("load config"));
    (bus, arr, health, config_store, clock, dir)
}

fn fast_config() -> VerifierConfig {
    VerifierConfig {
        concurrency: 5,
        acquire_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        poll_interval_max: Duration::from_millis(100),
        near_complete_retries: 2,
        api_failure_threshold: 5,
        history_page_size: 20,
    }
}

async fn detect_and_complete_search(
    bus: &Arc<EventBus<FakeClock>>,
    aggregate_id: AggregateId,
    path_id: PathId,
    arr_path: &str,
    media_id: &str,
) {
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::CorruptionDetected {
            file_path: "/data/movies/a.mkv".into(),
            path_id,
            corruption_type: CorruptionType::CorruptStream,
            auto_remediate: true,
            dry_run: false,
        },
    )
    .await
    .unwrap();
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::SearchCompleted {
            media_id: media_id.into(),
            arr_path: arr_path.into(),
            is_retry: false,
            media_details: None,
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn queued_download_emits_progress_and_keeps_polling() {
    let (bus, arr, health, config_store, _clock, _dir) = harness();
    arr.set_queue(
        "/movies/a.mkv",
        vec![QueueItem { tracked_download_state: Some("downloading".into()), progress: 42.0, ..Default::default() }],
    );

    let verifier = Verifier::new(bus.clone(), arr.clone(), health, config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(verifier.active_count(), 1);
    verifier.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "download:progress");
}

#[tokio::test]
async fn failed_download_state_stops_with_download_failed() {
    let (bus, arr, health, config_store, _clock, _dir) = harness();
    arr.set_queue(
        "/movies/a.mkv",
        vec![QueueItem {
            tracked_download_state: Some("failed".into()),
            error_message: Some("disk full".into()),
            ..Default::default()
        }],
    );

    let verifier = Verifier::new(bus.clone(), arr.clone(), health, config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    verifier.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "download:failed");
    assert_eq!(verifier.active_count(), 0);
}

#[tokio::test]
async fn ignored_download_state_stops_with_download_ignored() {
    let (bus, arr, health, config_store, _clock, _dir) = harness();
    arr.set_queue("/movies/a.mkv", vec![QueueItem { tracked_download_state: Some("ignored".into()), ..Default::default() }]);

    let verifier = Verifier::new(bus.clone(), arr.clone(), health, config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    verifier.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "download:ignored");
}

#[tokio::test]
async fn warning_with_status_messages_emits_import_blocked() {
    let (bus, arr, health, config_store, _clock, _dir) = harness();
    arr.set_queue(
        "/movies/a.mkv",
        vec![QueueItem {
            tracked_download_status: Some("warning".into()),
            status_messages: vec!["quality profile rejected".into()],
            ..Default::default()
        }],
    );

    let verifier = Verifier::new(bus.clone(), arr.clone(), health, config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    verifier.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "import:blocked");
}

#[tokio::test]
async fn import_seen_in_history_after_disappearing_from_queue_verifies_health() {
    let (bus, arr, health, config_store, _clock, dir) = harness();
    let media_id = MediaId::from("10");

    arr.set_queue(
        "/movies/a.mkv",
        vec![QueueItem { tracked_download_state: Some("downloading".into()), progress: 10.0, ..Default::default() }],
    );

    let verifier = Verifier::new(bus.clone(), arr.clone(), health.clone(), config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let replacement = dir.path().join("a.mkv");
    std::fs::write(&replacement, b"data").unwrap();
    arr.set_queue("/movies/a.mkv", vec![]);
    arr.set_history(&media_id, vec![HistoryItem { event_type: "episodeFileImported".into(), date: chrono::Utc::now() }]);
    arr.set_file_paths(&media_id, vec![replacement.clone()]);
    health.set_healthy(&replacement.display().to_string());

    tokio::time::sleep(Duration::from_millis(60)).await;
    verifier.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "verification:success");
}

#[tokio::test]
async fn disappearing_without_an_import_record_emits_manually_removed() {
    let (bus, arr, health, config_store, _clock, _dir) = harness();
    arr.set_queue(
        "/movies/a.mkv",
        vec![QueueItem { tracked_download_state: Some("downloading".into()), progress: 10.0, ..Default::default() }],
    );

    let verifier = Verifier::new(bus.clone(), arr.clone(), health, config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    arr.set_queue("/movies/a.mkv", vec![]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    verifier.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "manual:removed");
}

#[tokio::test]
async fn never_queued_with_all_files_already_present_verifies_health() {
    let (bus, arr, health, config_store, _clock, dir) = harness();
    let media_id = MediaId::from("10");
    let replacement = dir.path().join("a.mkv");
    std::fs::write(&replacement, b"data").unwrap();
    arr.set_file_paths(&media_id, vec![replacement.clone()]);
    health.set_unhealthy(&replacement.display().to_string(), CorruptionType::CorruptStream, "still broken");

    let verifier = Verifier::new(bus.clone(), arr.clone(), health, config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    verifier.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "verification:failed");
}

#[tokio::test]
async fn a_newer_search_completed_supersedes_the_earlier_monitor() {
    let (bus, arr, health, config_store, _clock, _dir) = harness();
    arr.set_queue(
        "/movies/a.mkv",
        vec![QueueItem { tracked_download_state: Some("downloading".into()), progress: 5.0, ..Default::default() }],
    );

    let verifier = Verifier::new(bus.clone(), arr.clone(), health, config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(verifier.active_count(), 1);

    // A retry produced a fresh search for the same aggregate.
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::SearchCompleted {
            media_id: "10".into(),
            arr_path: "/movies/a.mkv".into(),
            is_retry: true,
            media_details: None,
        },
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Exactly one monitor remains active; the earlier one was cancelled
    // rather than left running alongside the new one.
    assert_eq!(verifier.active_count(), 1);
    verifier.stop().await;
}

/// Subscribes to `event_type` and records every matching event's name, for
/// asserting on aggregates the projection never recorded a `CorruptionDetected`
/// for (where `EventBus::status` has nothing to report).
fn record_one(bus: &Arc<EventBus<FakeClock>>, event_type: &'static str) -> Arc<std::sync::Mutex<Vec<EventType>>> {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    bus.subscribe(event_type, move |event| {
        let seen = seen2.clone();
        async move {
            seen.lock().expect("lock").push(event.event_type);
        }
    });
    seen
}

#[tokio::test]
async fn search_completed_with_no_projection_falls_back_to_an_arr_file_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let existing = dir.path().join("a.mkv");
    std::fs::write(&existing, b"replacement").unwrap();

    let (bus, arr, health, config_store, _clock, _verifier_dir) = harness();
    arr.set_file_paths(&MediaId::from("10".to_string()), vec![existing.clone()]);
    let successes = record_one(&bus, "verification:success");

    let verifier = Verifier::new(bus.clone(), arr, health, config_store, fast_config());
    verifier.start();

    // No `CorruptionDetected` was ever published for this aggregate, so
    // `EventBus::status` has no projection to consult.
    let aggregate_id = AggregateId::new();
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::SearchCompleted {
            media_id: "10".into(),
            arr_path: "/movies/a.mkv".into(),
            is_retry: false,
            media_details: None,
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    verifier.stop().await;

    let successes = successes.lock().expect("lock");
    assert_eq!(successes.len(), 1, "expected exactly one VerificationSuccess, got {successes:?}");
    match &successes[0] {
        EventType::VerificationSuccess { file_path, .. } => {
            assert_eq!(file_path.as_deref(), Some(existing.display().to_string().as_str()))
        }
        other => panic!("expected VerificationSuccess, got {other:?}"),
    }
}

#[tokio::test]
async fn search_completed_with_no_projection_and_no_arr_file_publishes_validation_failure() {
    let (bus, arr, health, config_store, _clock, _dir) = harness();
    // No file paths registered for media_id "10": the arr fallback also misses.
    let failures = record_one(&bus, "verification:failed");

    let verifier = Verifier::new(bus.clone(), arr, health, config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::SearchCompleted {
            media_id: "10".into(),
            arr_path: "/movies/a.mkv".into(),
            is_retry: false,
            media_details: None,
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    verifier.stop().await;

    let failures = failures.lock().expect("lock");
    assert_eq!(failures.len(), 1, "expected exactly one VerificationFailed, got {failures:?}");
    match &failures[0] {
        EventType::VerificationFailed { error_type, file_path, .. } => {
            assert_eq!(error_type, "validation");
            assert_eq!(*file_path, None);
        }
        other => panic!("expected VerificationFailed, got {other:?}"),
    }
    assert_eq!(verifier.active_count(), 0);
}

#[tokio::test]
async fn semaphore_timeout_publishes_verification_failed_queue_full() {
    let (bus, arr, health, config_store, _clock, _dir) = harness();
    let config = VerifierConfig { concurrency: 1, acquire_timeout: Duration::from_millis(20), ..fast_config() };
    let verifier = Verifier::new(bus.clone(), arr, health, config_store, config);
    let _permit = verifier.semaphore.clone().acquire_owned().await.unwrap();
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    verifier.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "verification:failed");
}

#[tokio::test]
async fn elapsed_timeout_emits_download_timeout() {
    let (bus, arr, health, config_store, clock, _dir) = harness();
    // Empty queue and no known file paths: each poll is a no-op "never
    // seen" observation until the clock crosses the verification timeout.
    let verifier = Verifier::new(bus.clone(), arr.clone(), health, config_store, fast_config());
    verifier.start();

    let aggregate_id = AggregateId::new();
    detect_and_complete_search(&bus, aggregate_id, PathId::new(), "/movies/a.mkv", "10").await;

    // Let the monitor capture t0 and run at least one poll before jumping
    // the fake clock past the default 6h verification_timeout.
    tokio::time::sleep(Duration::from_millis(20)).await;
    clock.advance(Duration::from_secs(6 * 3600 + 60));

    tokio::time::sleep(Duration::from_millis(50)).await;
    verifier.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "download:timeout");
}

fn blank_run_state(attempt: u32) -> RunState {
    RunState {
        t0: std::time::Instant::now(),
        was_in_queue: false,
        near_complete_retry_count: 0,
        api_failure_count: 0,
        attempt,
        last_status: None,
        meta: VerificationMeta::default(),
    }
}

proptest! {
    // `2^attempt * poll_interval` (attempt clamped via `.min(32)` before the
    // shift), capped at `poll_interval_max`, must never exceed that cap no
    // matter how many consecutive no-progress polls preceded it.
    #[test]
    fn next_interval_never_exceeds_the_configured_max(
        poll_interval_ms in 1u64..=1000,
        poll_interval_max_ms in 1u64..=100_000,
        attempt in 0u32..128,
    ) {
        let (bus, arr, health, config_store, _clock, _dir) = harness();
        let config = VerifierConfig {
            poll_interval: Duration::from_millis(poll_interval_ms),
            poll_interval_max: Duration::from_millis(poll_interval_max_ms),
            ..fast_config()
        };
        let verifier = Verifier::new(bus, arr, health, config_store, config);
        let mut state = blank_run_state(attempt);

        let interval = verifier.next_interval(&mut state, false);
        prop_assert!(interval <= Duration::from_millis(poll_interval_max_ms));
    }

    #[test]
    fn next_interval_resets_the_attempt_counter_on_progress(
        poll_interval_ms in 1u64..=1000,
        attempt in 0u32..128,
    ) {
        let (bus, arr, health, config_store, _clock, _dir) = harness();
        let config = VerifierConfig {
            poll_interval: Duration::from_millis(poll_interval_ms),
            // Large enough relative to poll_interval that progress's reset
            // interval is never itself clamped by the max.
            poll_interval_max: Duration::from_millis(poll_interval_ms * 1000),
            ..fast_config()
        };
        let verifier = Verifier::new(bus, arr, health, config_store, config);
        let mut state = blank_run_state(attempt);

        let interval = verifier.next_interval(&mut state, true);
        prop_assert_eq!(state.attempt, 0);
        prop_assert_eq!(interval, Duration::from_millis(poll_interval_ms));
    }
}
