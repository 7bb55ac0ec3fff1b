// SPDX-License-Identifier: MIT

//! Types backing the materialized projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use healarr_core::{AggregateId, CorruptionType, DeletionMetadata, PathId};

/// The `corruption_status` projection (spec.md §3): the latest derived
/// state of one corruption aggregate, rebuilt by folding its event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorruptionStatus {
    pub aggregate_id: AggregateId,
    pub file_path: String,
    pub path_id: PathId,
    pub corruption_type: CorruptionType,
    pub auto_remediate: bool,
    pub dry_run: bool,

    /// `Event::name()` of the most recent event.
    pub current_state: String,
    pub is_terminal: bool,
    pub retry_count: u32,

    pub detected_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,

    pub media_id: Option<String>,
    pub arr_path: Option<String>,
    pub metadata: DeletionMetadata,
    /// Set once `DeletionCompleted` has been observed — the remediator uses
    /// this to route a later `RetryScheduled` onto the search-only path.
    pub deletion_completed: bool,
}

impl CorruptionStatus {
    pub(crate) fn new(
        aggregate_id: AggregateId,
        file_path: String,
        path_id: PathId,
        corruption_type: CorruptionType,
        auto_remediate: bool,
        dry_run: bool,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            aggregate_id,
            file_path,
            path_id,
            corruption_type,
            auto_remediate,
            dry_run,
            current_state: "corruption:detected".to_string(),
            is_terminal: false,
            retry_count: 0,
            detected_at: at,
            last_updated_at: at,
            media_id: None,
            arr_path: None,
            metadata: DeletionMetadata::default(),
            deletion_completed: false,
        }
    }
}

/// One `VerificationFailed` observation, kept to answer the health
/// monitor's "repeated failure" query (spec.md §4.6) without rescanning
/// the whole log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub file_path: String,
    pub aggregate_id: AggregateId,
    pub at: DateTime<Utc>,
}
