// SPDX-License-Identifier: MIT

//! End-to-end scenario tests wiring the full engine pipeline (event bus,
//! remediator, verifier, retry monitor, health monitor) against fake
//! adapters. Each test below corresponds to one named scenario: happy
//! path, infrastructure safety gate, exhausted retries, backoff delays,
//! partial multi-file replacement, and crash-recovery reconciliation.

use std::sync::Arc;
use std::time::Duration;

use healarr_adapters::{
    DeletionMetadata, FakeArrClient, FakeHealthChecker, FakePathMapper, FakeScanner, HistoryItem, MediaId, QueueItem,
};
use healarr_core::{AggregateId, AggregateType, CorruptionType, EngineConfig, EventType, FakeClock, PathId};
use healarr_daemon::{HealthMonitor, HealthMonitorConfig, Scheduler, SchedulerConfig};
use healarr_engine::{EventBus, Remediator, RemediatorConfig, RetryMonitor, RetryMonitorConfig, Verifier, VerifierConfig};
use healarr_storage::{ConfigStore, MaterializedState, Wal};

struct Harness {
    bus: Arc<EventBus<FakeClock>>,
    arr: Arc<FakeArrClient>,
    health: Arc<FakeHealthChecker>,
    path_mapper: Arc<FakePathMapper>,
    config_store: Arc<ConfigStore>,
    clock: FakeClock,
    remediator: Arc<Remediator<FakeArrClient, FakePathMapper, FakeClock>>,
    verifier: Arc<Verifier<FakeArrClient, FakeHealthChecker, FakeClock>>,
    retry_monitor: Arc<RetryMonitor<FakeClock>>,
    _dir: tempfile::TempDir,
}

fn build(config: EngineConfig) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let wal = Wal::open(&dir.path().join("events.wal"), 0).expect("open wal");
    let clock = FakeClock::new();
    let bus = EventBus::new(wal, MaterializedState::default(), clock.clone());

    let arr = Arc::new(FakeArrClient::new());
    let health = Arc::new(FakeHealthChecker::new());
    let path_mapper = Arc::new(FakePathMapper::new());

    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, toml::to_string(&config).unwrap()).unwrap();
    let config_store = Arc::new(ConfigStore::load(config_path).expect("load config"));

    let remediator =
        Remediator::new(bus.clone(), arr.clone(), path_mapper.clone(), config_store.clone(), RemediatorConfig::default());
    let verifier = Verifier::new(
        bus.clone(),
        arr.clone(),
        health.clone(),
        config_store.clone(),
        VerifierConfig {
            poll_interval: Duration::from_millis(10),
            poll_interval_max: Duration::from_millis(100),
            ..VerifierConfig::default()
        },
    );
    let retry_monitor =
        RetryMonitor::new(bus.clone(), config_store.clone(), RetryMonitorConfig { base_delay: Duration::from_millis(10) });

    remediator.start();
    verifier.start();
    retry_monitor.start();

    Harness { bus, arr, health, path_mapper, config_store, clock, remediator, verifier, retry_monitor, _dir: dir }
}

impl Harness {
    async fn stop(&self) {
        self.retry_monitor.stop().await;
        self.verifier.stop().await;
        self.remediator.stop().await;
    }

    async fn detect(
        &self,
        aggregate_id: AggregateId,
        path_id: PathId,
        file_path: &str,
        corruption_type: CorruptionType,
        auto_remediate: bool,
    ) {
        self.bus
            .publish(
                AggregateType::Corruption,
                aggregate_id,
                EventType::CorruptionDetected { file_path: file_path.into(), path_id, corruption_type, auto_remediate, dry_run: false },
            )
            .await
            .unwrap();
    }
}

/// Records the `name()` of every event published for a given aggregate, in
/// append order, so a scenario can assert the intermediate sequence rather
/// than only the terminal state.
fn record_sequence(bus: &Arc<EventBus<FakeClock>>, aggregate_id: AggregateId) -> Arc<std::sync::Mutex<Vec<String>>> {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    for event_name in [
        "remediation:queued",
        "deletion:started",
        "deletion:completed",
        "search:started",
        "search:completed",
        "download:progress",
        "file:detected",
        "verification:success",
    ] {
        let log = log.clone();
        bus.subscribe(event_name, move |event| {
            let log = log.clone();
            async move {
                if event.aggregate_id == aggregate_id {
                    log.lock().unwrap().push(event.name().to_string());
                }
            }
        });
    }
    log
}

#[tokio::test]
async fn happy_path_single_file_reaches_verification_success() {
    let harness = build(EngineConfig::default());
    let aggregate_id = AggregateId::new();
    let path_id = PathId::new();
    let sequence = record_sequence(&harness.bus, aggregate_id);

    harness.path_mapper.map("/a.mkv", "/arr/a.mkv");
    harness.arr.set_media_for_path("/arr/a.mkv", MediaId::from("10"));
    harness.arr.set_delete_result(&MediaId::from("10"), DeletionMetadata::default());
    harness.arr.set_queue(
        "/arr/a.mkv",
        vec![QueueItem { tracked_download_state: Some("downloading".into()), progress: 50.0, ..Default::default() }],
    );

    harness.detect(aggregate_id, path_id, "/a.mkv", CorruptionType::CorruptStream, true).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    // Download finishes: queue item disappears, history shows the import,
    // and arr now reports the single replacement file present and healthy.
    harness.arr.set_queue("/arr/a.mkv", vec![]);
    harness
        .arr
        .set_history(&MediaId::from("10"), vec![HistoryItem { event_type: "movieFileImported".into(), date: chrono::Utc::now() }]);
    harness.arr.set_file_paths(&MediaId::from("10"), vec![std::path::PathBuf::from("/a.mkv")]);
    harness.health.set_healthy("/a.mkv");

    tokio::time::sleep(Duration::from_millis(80)).await;
    harness.stop().await;

    let status = harness.bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "verification:success");
    assert!(status.deletion_completed);

    let seen = sequence.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&"remediation:queued".to_string()));
    assert!(seen.contains(&"deletion:started".to_string()));
    assert!(seen.contains(&"deletion:completed".to_string()));
    assert!(seen.contains(&"search:started".to_string()));
    assert!(seen.contains(&"search:completed".to_string()));
    assert!(seen.contains(&"download:progress".to_string()));
    assert!(seen.contains(&"file:detected".to_string()));
    assert_eq!(seen.last(), Some(&"verification:success".to_string()));
}

#[tokio::test]
async fn infrastructure_corruption_is_refused_by_the_safety_gate() {
    let harness = build(EngineConfig::default());
    let aggregate_id = AggregateId::new();
    let path_id = PathId::new();

    harness.detect(aggregate_id, path_id, "/a.mkv", CorruptionType::MountLost, true).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.stop().await;

    let status = harness.bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "deletion:failed");
    assert!(harness.arr.calls().is_empty(), "an infrastructure corruption type must never reach delete_file");
}

#[tokio::test]
async fn retries_exhaust_at_the_configured_max_without_a_further_retry() {
    let harness = build(EngineConfig { default_max_retries: 2, ..EngineConfig::default() });
    let aggregate_id = AggregateId::new();
    let path_id = PathId::new();

    harness.detect(aggregate_id, path_id, "/a.mkv", CorruptionType::CorruptStream, true).await;
    for _ in 0..2 {
        harness
            .bus
            .publish(AggregateType::Corruption, aggregate_id, EventType::DeletionFailed { error: "boom".into() })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    // A third failure, at the configured max, must short-circuit to
    // MaxRetriesReached instead of scheduling yet another retry.
    harness
        .bus
        .publish(
            AggregateType::Corruption,
            aggregate_id,
            EventType::VerificationFailed { error_type: "checksum_mismatch".into(), message: "still broken".into(), file_path: None },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.stop().await;

    let status = harness.bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "retry:max_reached");
    assert_eq!(harness.retry_monitor.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn backoff_delay_doubles_with_each_successive_failure() {
    let harness = build(EngineConfig { default_max_retries: 10, ..EngineConfig::default() });
    let aggregate_id = AggregateId::new();
    let path_id = PathId::new();

    harness.detect(aggregate_id, path_id, "/a.mkv", CorruptionType::CorruptStream, true).await;

    harness
        .bus
        .publish(AggregateType::Corruption, aggregate_id, EventType::DeletionFailed { error: "boom".into() })
        .await
        .unwrap();
    tokio::task::yield_now().await;
    assert_eq!(harness.retry_monitor.pending_count(), 1);

    // Default base_delay is 15 min; 14 minutes in, the timer has not fired.
    tokio::time::advance(Duration::from_secs(14 * 60)).await;
    assert_eq!(harness.retry_monitor.pending_count(), 1);
    assert_eq!(harness.bus.status(&aggregate_id).unwrap().current_state, "deletion:failed");

    // Past 15 minutes total, the first retry fires.
    tokio::time::advance(Duration::from_secs(2 * 60)).await;
    tokio::task::yield_now().await;
    assert_eq!(harness.bus.status(&aggregate_id).unwrap().current_state, "retry:scheduled");
    assert_eq!(harness.retry_monitor.pending_count(), 0);

    // A second failure schedules the next timer at 2^1 * 15 min = 30 min.
    harness
        .bus
        .publish(AggregateType::Corruption, aggregate_id, EventType::SearchFailed { error: "boom again".into() })
        .await
        .unwrap();
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_secs(29 * 60)).await;
    assert_eq!(harness.retry_monitor.pending_count(), 1);
    tokio::time::advance(Duration::from_secs(2 * 60)).await;
    tokio::task::yield_now().await;
    assert_eq!(harness.retry_monitor.pending_count(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn partial_replacement_reports_missing_files_then_verifies_what_arrived() {
    // A one-hour verification timeout lets the fake clock stand in for
    // "past half the timeout" without waiting real wall-clock time.
    let harness = build(EngineConfig { verification_timeout_hours: 1, ..EngineConfig::default() });
    let aggregate_id = AggregateId::new();
    let path_id = PathId::new();

    harness.path_mapper.map("/show/s01", "/arr/show/s01");
    harness.arr.set_media_for_path("/arr/show/s01", MediaId::from("20"));
    harness.arr.set_delete_result(&MediaId::from("20"), DeletionMetadata::default());

    harness.detect(aggregate_id, path_id, "/show/s01", CorruptionType::CorruptStream, true).await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    // Series expected 4 episode files; only 2 have landed on disk.
    let dir = tempfile::tempdir().unwrap();
    let present_a = dir.path().join("e01.mkv");
    let present_b = dir.path().join("e02.mkv");
    std::fs::write(&present_a, b"data").unwrap();
    std::fs::write(&present_b, b"data").unwrap();
    let missing_a = dir.path().join("e03.mkv");
    let missing_b = dir.path().join("e04.mkv");
    harness.arr.set_file_paths(&MediaId::from("20"), vec![present_a.clone(), present_b.clone(), missing_a, missing_b]);
    harness.health.set_healthy(&present_a.display().to_string());
    harness.health.set_healthy(&present_b.display().to_string());

    // A few polls at t=0 observe "never seen, not all present, not past
    // half the timeout yet" and keep waiting without publishing anything.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(harness.bus.status(&aggregate_id).unwrap().current_state, "search:completed");

    // Jump the fake clock past half of the one-hour timeout; the next poll
    // should report the partial replacement and verify the present files.
    harness.clock.advance(Duration::from_secs(31 * 60));
    tokio::time::sleep(Duration::from_millis(60)).await;
    harness.stop().await;

    let status = harness.bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "verification:success");
}

#[tokio::test]
async fn crash_recovery_sweep_confirms_a_stalled_download_via_arr_sync() {
    let harness = build(EngineConfig::default());
    let aggregate_id = AggregateId::new();
    let path_id = PathId::new();

    harness.detect(aggregate_id, path_id, "/a.mkv", CorruptionType::CorruptStream, true).await;
    harness
        .bus
        .publish(
            AggregateType::Corruption,
            aggregate_id,
            EventType::SearchCompleted { media_id: "30".into(), arr_path: "/arr/a.mkv".into(), is_retry: false, media_details: None },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.verifier.stop().await;

    // Arr now reports the file present and healthy: the reconciliation
    // sweep should confirm it without a fresh search ever having run.
    let dir = tempfile::tempdir().unwrap();
    let replacement = dir.path().join("a.mkv");
    std::fs::write(&replacement, b"data").unwrap();
    harness.arr.set_file_paths(&MediaId::from("30"), vec![replacement.clone()]);
    harness.health.set_healthy(&replacement.display().to_string());

    let scheduler =
        Scheduler::new(harness.bus.clone(), harness.config_store.clone(), Arc::new(FakeScanner::new()), SchedulerConfig::default());
    let monitor = HealthMonitor::new(
        harness.bus.clone(),
        harness.arr.clone(),
        harness.health.clone(),
        scheduler,
        HealthMonitorConfig {
            reconciliation_initial_delay: Duration::from_millis(5),
            reconciliation_interval: Duration::from_secs(3600),
            reconciliation_older_than: Duration::from_millis(0),
            reconciliation_newer_than: Duration::from_secs(7 * 24 * 60 * 60),
            stale_sweep_initial_delay: Duration::from_secs(3600),
            instance_sweep_initial_delay: Duration::from_secs(3600),
            ..HealthMonitorConfig::default()
        },
    );
    monitor.start();
    tokio::time::sleep(Duration::from_millis(60)).await;
    monitor.stop().await;

    let status = harness.bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "verification:success");

    harness.retry_monitor.stop().await;
    harness.remediator.stop().await;
}
