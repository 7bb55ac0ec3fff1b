// SPDX-License-Identifier: MIT

//! Folds one event into the `corruption` aggregate's projection.

use healarr_core::{Event, EventType};

use super::MaterializedState;
use crate::state::types::{CorruptionStatus, FailureRecord};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match &event.event_type {
        EventType::CorruptionDetected { file_path, path_id, corruption_type, auto_remediate, dry_run } => {
            // Idempotent: a corruption aggregate's identity is fixed by its
            // first event, so a replayed duplicate must not reset it.
            state.corruptions.entry(event.aggregate_id).or_insert_with(|| {
                CorruptionStatus::new(
                    event.aggregate_id,
                    file_path.clone(),
                    *path_id,
                    *corruption_type,
                    *auto_remediate,
                    *dry_run,
                    event.created_at,
                )
            });
            return;
        }
        _ => {}
    }

    let Some(status) = state.corruptions.get_mut(&event.aggregate_id) else {
        // An event for an aggregate we haven't seen `CorruptionDetected`
        // for yet — can only happen if the log is read starting mid-stream.
        return;
    };

    status.current_state = event.name().to_string();
    status.is_terminal = event.is_terminal();
    status.last_updated_at = event.created_at;
    if event.is_failure() {
        status.retry_count += 1;
    }

    match &event.event_type {
        EventType::DeletionStarted { media_id, arr_path } => {
            status.media_id = Some(media_id.clone());
            status.arr_path = Some(arr_path.clone());
        }
        EventType::DeletionCompleted { media_id, metadata } => {
            status.media_id = Some(media_id.clone());
            status.metadata = metadata.clone();
            status.deletion_completed = true;
        }
        EventType::SearchStarted { media_id, arr_path, .. } => {
            status.media_id = Some(media_id.clone());
            status.arr_path = Some(arr_path.clone());
        }
        EventType::SearchCompleted { media_id, arr_path, .. } => {
            status.media_id = Some(media_id.clone());
            status.arr_path = Some(arr_path.clone());
        }
        EventType::VerificationFailed { file_path, .. } => {
            let file_path = file_path.clone().unwrap_or_else(|| status.file_path.clone());
            state.verification_failures.push(FailureRecord {
                file_path,
                aggregate_id: event.aggregate_id,
                at: event.created_at,
            });
        }
        _ => {}
    }
}
