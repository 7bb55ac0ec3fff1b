// SPDX-License-Identifier: MIT

use std::time::Duration;

use healarr_adapters::{FakeArrClient, FakePathMapper, MediaId};
use healarr_core::{AggregateType, DeletionMetadata, EngineConfig, EventType, FakeClock, PathId};
use healarr_storage::{ConfigStore, MaterializedState, Wal};

use super::*;

fn harness() -> (Arc<EventBus<FakeClock>>, Arc<FakeArrClient>, Arc<FakePathMapper>, Arc<ConfigStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let wal = Wal::open(&dir.path().join("events.wal"), 0).expect("open wal");
    let bus = EventBus::new(wal, MaterializedState::default(), FakeClock::new());
    let arr = Arc::new(FakeArrClient::new());
    let path_mapper = Arc::new(FakePathMapper::new());
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, toml::to_string(&EngineConfig::default()).unwrap()).unwrap();
    let config_store = Arc::new(ConfigStore::load(config_path).expect("load config"));
    (bus, arr, path_mapper, config_store, dir)
}

#[tokio::test]
async fn infrastructure_corruption_type_is_refused_without_calling_delete() {
    let (bus, arr, path_mapper, config_store, _dir) = harness();
    let remediator = Remediator::new(bus.clone(), arr.clone(), path_mapper, config_store, RemediatorConfig::default());
    remediator.start();

    let aggregate_id = AggregateId::new();
    let path_id = PathId::new();
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::CorruptionDetected {
            file_path: "/data/movies/a.mkv".into(),
            path_id,
            corruption_type: CorruptionType::MountLost,
            auto_remediate: true,
            dry_run: false,
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    remediator.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "deletion:failed");
    assert!(arr.calls().is_empty(), "delete must never be attempted for infrastructure corruption types");
}

#[tokio::test]
async fn manual_flow_stops_after_remediation_queued_when_auto_remediate_is_false() {
    let (bus, arr, path_mapper, config_store, _dir) = harness();
    let remediator = Remediator::new(bus.clone(), arr.clone(), path_mapper, config_store, RemediatorConfig::default());
    remediator.start();

    let aggregate_id = AggregateId::new();
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::CorruptionDetected {
            file_path: "/data/movies/a.mkv".into(),
            path_id: PathId::new(),
            corruption_type: CorruptionType::CorruptStream,
            auto_remediate: false,
            dry_run: false,
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    remediator.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "remediation:queued");
    assert!(arr.calls().is_empty());
}

#[tokio::test]
async fn dry_run_never_calls_delete_and_emits_a_second_queued_event() {
    let (bus, arr, path_mapper, config_store, _dir) = harness();
    let remediator = Remediator::new(bus.clone(), arr.clone(), path_mapper, config_store, RemediatorConfig::default());
    remediator.start();

    let aggregate_id = AggregateId::new();
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::CorruptionDetected {
            file_path: "/data/movies/a.mkv".into(),
            path_id: PathId::new(),
            corruption_type: CorruptionType::CorruptStream,
            auto_remediate: true,
            dry_run: true,
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    remediator.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "remediation:queued");
    assert!(arr.calls().is_empty());
}

#[tokio::test]
async fn happy_path_reaches_search_completed() {
    let (bus, arr, path_mapper, config_store, _dir) = harness();
    path_mapper.map("/data/movies/a.mkv", "/movies/a.mkv");
    arr.set_media_for_path("/movies/a.mkv", MediaId::from("10"));
    arr.set_delete_result(&MediaId::from("10"), DeletionMetadata::default());

    let remediator = Remediator::new(bus.clone(), arr.clone(), path_mapper, config_store, RemediatorConfig::default());
    remediator.start();

    let aggregate_id = AggregateId::new();
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::CorruptionDetected {
            file_path: "/data/movies/a.mkv".into(),
            path_id: PathId::new(),
            corruption_type: CorruptionType::CorruptStream,
            auto_remediate: true,
            dry_run: false,
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    remediator.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "search:completed");
    assert!(status.deletion_completed);
    let calls = arr.calls();
    assert!(calls.iter().any(|c| c.starts_with("find_media_by_path")));
    assert!(calls.iter().any(|c| c.starts_with("delete_file")));
    assert!(calls.iter().any(|c| c.starts_with("trigger_search")));
}

#[tokio::test]
async fn retry_scheduled_after_deletion_completed_takes_search_only_path() {
    let (bus, arr, path_mapper, config_store, _dir) = harness();
    path_mapper.map("/data/movies/a.mkv", "/movies/a.mkv");
    arr.set_media_for_path("/movies/a.mkv", MediaId::from("10"));
    arr.set_delete_result(&MediaId::from("10"), DeletionMetadata::default());

    let remediator = Remediator::new(bus.clone(), arr.clone(), path_mapper, config_store, RemediatorConfig::default());
    remediator.start();

    let aggregate_id = AggregateId::new();
    let path_id = PathId::new();
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
    tokio::time::sleep(Duration::from_millis(100)).await;

    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::RetryScheduled { file_path: "/data/movies/a.mkv".into(), path_id, auto_remediate: true },
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    remediator.stop().await;

    let delete_calls = arr.calls().iter().filter(|c| c.starts_with("delete_file")).count();
    assert_eq!(delete_calls, 1, "retry after DeletionCompleted must not delete a second time");
    let search_calls = arr.calls().iter().filter(|c| c.starts_with("trigger_search")).count();
    assert_eq!(search_calls, 2);
}

#[tokio::test]
async fn semaphore_timeout_publishes_queue_full_failure() {
    let (bus, arr, path_mapper, config_store, _dir) = harness();
    path_mapper.map("/data/movies/a.mkv", "/movies/a.mkv");
    arr.set_media_for_path("/movies/a.mkv", MediaId::from("10"));

    let config = RemediatorConfig { concurrency: 1, acquire_timeout: Duration::from_millis(20) };
    let remediator = Remediator::new(bus.clone(), arr, path_mapper, config_store, config);
    // Occupy the only slot for the whole test.
    let _permit = remediator.semaphore.clone().acquire_owned().await.unwrap();
    remediator.start();

    let aggregate_id = AggregateId::new();
    bus.publish(
        AggregateType::Corruption,
        aggregate_id,
        EventType::CorruptionDetected {
            file_path: "/data/movies/a.mkv".into(),
            path_id: PathId::new(),
            corruption_type: CorruptionType::CorruptStream,
            auto_remediate: true,
            dry_run: false,
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    remediator.stop().await;

    let status = bus.status(&aggregate_id).unwrap();
    assert_eq!(status.current_state, "deletion:failed");
}
