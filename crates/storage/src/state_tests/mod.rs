// SPDX-License-Identifier: MIT

use super::*;
use chrono::{Duration as ChronoDuration, Utc};
use healarr_core::{AggregateId, AggregateType, CorruptionType, DeletionMetadata, EventId, EventType, PathId};
use std::time::Duration;

fn event(aggregate_id: AggregateId, event_type: EventType, created_at: chrono::DateTime<Utc>, seq: u64) -> Event {
    Event {
        id: EventId(seq),
        aggregate_type: AggregateType::Corruption,
        aggregate_id,
        event_type,
        event_version: 1,
        created_at,
    }
}

fn detected(aggregate_id: AggregateId, at: chrono::DateTime<Utc>, seq: u64) -> Event {
    event(
        aggregate_id,
        EventType::CorruptionDetected {
            file_path: "/movies/a.mkv".into(),
            path_id: PathId::new(),
            corruption_type: CorruptionType::CorruptStream,
            auto_remediate: true,
            dry_run: false,
        },
        at,
        seq,
    )
}

#[test]
fn first_event_creates_the_projection() {
    let mut state = MaterializedState::default();
    let aggregate_id = AggregateId::new();
    let now = Utc::now();
    state.apply(&detected(aggregate_id, now, 1));

    let status = state.status(&aggregate_id).expect("projection created");
    assert_eq!(status.current_state, "corruption:detected");
    assert_eq!(status.retry_count, 0);
    assert!(!status.is_terminal);
}

#[test]
fn replaying_the_same_event_twice_is_a_no_op() {
    let mut state = MaterializedState::default();
    let aggregate_id = AggregateId::new();
    let now = Utc::now();
    let e = detected(aggregate_id, now, 1);

    state.apply(&e);
    state.apply(&e);

    // A second CorruptionDetected with the same seq must not re-create or
    // otherwise disturb the aggregate.
    assert_eq!(state.corruptions.len(), 1);
}

#[test]
fn retry_count_increments_only_on_failed_events() {
    let mut state = MaterializedState::default();
    let aggregate_id = AggregateId::new();
    let now = Utc::now();
    state.apply(&detected(aggregate_id, now, 1));
    state.apply(&event(aggregate_id, EventType::RemediationQueued { file_path: "/movies/a.mkv".into(), path_id: PathId::new(), dry_run: false }, now, 2));
    state.apply(&event(aggregate_id, EventType::DeletionFailed { error: "boom".into() }, now, 3));

    let status = state.status(&aggregate_id).unwrap();
    assert_eq!(status.retry_count, 1);
    assert_eq!(status.current_state, "deletion:failed");
    assert!(!status.is_terminal);
}

#[test]
fn deletion_completed_marks_the_search_only_flag() {
    let mut state = MaterializedState::default();
    let aggregate_id = AggregateId::new();
    let now = Utc::now();
    state.apply(&detected(aggregate_id, now, 1));
    state.apply(&event(
        aggregate_id,
        EventType::DeletionCompleted {
            media_id: "10".into(),
            metadata: DeletionMetadata { episode_ids: vec!["1".into()], album_ids: vec![] },
        },
        now,
        2,
    ));

    let status = state.status(&aggregate_id).unwrap();
    assert!(status.deletion_completed);
    assert_eq!(status.media_id.as_deref(), Some("10"));
    assert_eq!(status.metadata.episode_ids, vec!["1".to_string()]);
}

#[test]
fn verification_success_is_terminal() {
    let mut state = MaterializedState::default();
    let aggregate_id = AggregateId::new();
    let now = Utc::now();
    state.apply(&detected(aggregate_id, now, 1));
    state.apply(&event(
        aggregate_id,
        EventType::VerificationSuccess {
            file_path: Some("/movies/a.mkv".into()),
            size: None,
            quality: None,
            release_group: None,
            indexer: None,
            download_client: None,
            recovery_action: None,
        },
        now,
        2,
    ));

    let status = state.status(&aggregate_id).unwrap();
    assert!(status.is_terminal);
    assert!(state.active_corruptions().next().is_none());
}

#[test]
fn stuck_finds_non_terminal_aggregates_past_the_threshold() {
    let mut state = MaterializedState::default();
    let aggregate_id = AggregateId::new();
    let now = Utc::now();
    let detected_at = now - ChronoDuration::hours(2);
    state.apply(&detected(aggregate_id, detected_at, 1));

    let stuck = state.stuck(now, Duration::from_secs(3600), Duration::from_secs(7 * 24 * 3600));
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].aggregate_id, aggregate_id);
}

#[test]
fn stuck_excludes_aggregates_updated_recently() {
    let mut state = MaterializedState::default();
    let aggregate_id = AggregateId::new();
    let now = Utc::now();
    state.apply(&detected(aggregate_id, now - ChronoDuration::minutes(5), 1));

    let stuck = state.stuck(now, Duration::from_secs(3600), Duration::from_secs(7 * 24 * 3600));
    assert!(stuck.is_empty());
}

#[test]
fn repeated_failures_requires_distinct_aggregates() {
    let mut state = MaterializedState::default();
    let now = Utc::now();
    let a = AggregateId::new();
    let b = AggregateId::new();
    state.apply(&detected(a, now, 1));
    state.apply(&detected(b, now, 2));
    for (aggregate_id, seq) in [(a, 3u64), (b, 4u64)] {
        state.apply(&event(
            aggregate_id,
            EventType::VerificationFailed {
                error_type: "hash_mismatch".into(),
                message: "still corrupt".into(),
                file_path: Some("/movies/a.mkv".into()),
            },
            now,
            seq,
        ));
    }

    let repeated = state.repeated_failures(now, Duration::from_secs(7 * 24 * 3600), 2);
    assert_eq!(repeated, vec!["/movies/a.mkv".to_string()]);
}

#[test]
fn repeated_failures_below_threshold_is_empty() {
    let mut state = MaterializedState::default();
    let now = Utc::now();
    let a = AggregateId::new();
    state.apply(&detected(a, now, 1));
    state.apply(&event(
        a,
        EventType::VerificationFailed { error_type: "hash_mismatch".into(), message: "x".into(), file_path: Some("/movies/a.mkv".into()) },
        now,
        2,
    ));

    assert!(state.repeated_failures(now, Duration::from_secs(7 * 24 * 3600), 2).is_empty());
}

#[test]
fn reconciliation_candidates_require_a_recoverable_media_id() {
    let mut state = MaterializedState::default();
    let aggregate_id = AggregateId::new();
    let now = Utc::now();
    state.apply(&detected(aggregate_id, now - ChronoDuration::hours(3), 1));
    state.apply(&event(
        aggregate_id,
        EventType::SearchCompleted { media_id: "10".into(), arr_path: "/movies/a.mkv".into(), is_retry: false, media_details: None },
        now - ChronoDuration::hours(2),
        2,
    ));

    let candidates = state.reconciliation_candidates(now, Duration::from_secs(3600), Duration::from_secs(7 * 24 * 3600));
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].media_id.as_deref(), Some("10"));
}

#[test]
fn reconciliation_candidates_exclude_in_flight_updates() {
    let mut state = MaterializedState::default();
    let aggregate_id = AggregateId::new();
    let now = Utc::now();
    state.apply(&detected(aggregate_id, now - ChronoDuration::minutes(10), 1));
    state.apply(&event(
        aggregate_id,
        EventType::SearchCompleted { media_id: "10".into(), arr_path: "/movies/a.mkv".into(), is_retry: false, media_details: None },
        now - ChronoDuration::minutes(5),
        2,
    ));

    let candidates = state.reconciliation_candidates(now, Duration::from_secs(3600), Duration::from_secs(7 * 24 * 3600));
    assert!(candidates.is_empty());
}
