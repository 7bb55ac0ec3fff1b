// SPDX-License-Identifier: MIT

use super::*;
use healarr_core::{AggregateId, AggregateType, CorruptionType, EventId, EventType, PathId};
use tempfile::tempdir;

fn detected_event(seq: u64) -> healarr_core::Event {
    healarr_core::Event {
        id: EventId(seq),
        aggregate_type: AggregateType::Corruption,
        aggregate_id: AggregateId::new(),
        event_type: EventType::CorruptionDetected {
            file_path: "/movies/a.mkv".into(),
            path_id: PathId::new(),
            corruption_type: CorruptionType::CorruptStream,
            auto_remediate: true,
            dry_run: false,
        },
        event_version: 1,
        created_at: Utc::now(),
    }
}

#[test]
fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.snapshot");

    let mut state = MaterializedState::default();
    state.apply(&detected_event(1));
    let snapshot = Snapshot::new(1, state, Utc::now());

    write(&path, &snapshot).unwrap();
    let read_back = read(&path).unwrap().expect("snapshot present");

    assert_eq!(read_back.seq, 1);
    assert_eq!(read_back.version, CURRENT_SNAPSHOT_VERSION);
    assert_eq!(read_back.state.corruptions.len(), 1);
}

#[test]
fn read_missing_file_returns_none() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("does-not-exist.snapshot");
    assert!(read(&path).unwrap().is_none());
}

#[test]
fn write_rotates_previous_snapshot_into_bak() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.snapshot");

    let first = Snapshot::new(1, MaterializedState::default(), Utc::now());
    write(&path, &first).unwrap();

    let mut second_state = MaterializedState::default();
    second_state.apply(&detected_event(2));
    let second = Snapshot::new(2, second_state, Utc::now());
    write(&path, &second).unwrap();

    assert!(path.with_extension("bak").exists());
    let current = read(&path).unwrap().unwrap();
    assert_eq!(current.seq, 2);
}
