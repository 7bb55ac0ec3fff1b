// SPDX-License-Identifier: MIT

//! The domain event: an immutable record appended to the event log.
//!
//! `EventType` is a closed, tagged enum — one variant per name in the
//! glossary, each carrying its own statically-shaped payload — rather than
//! an untyped `event_data` map. The wire/storage form is still key/value
//! (`Event::to_kv`) so projection queries can extract fields by name; the
//! typed variants are the only representation used in-process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::corruption::CorruptionType;
use crate::ids::{AggregateId, InstanceId, PathId};

/// Monotonically increasing sequence number assigned by the write-ahead
/// log at append time. Stands in for spec.md's "monotonic `id`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which kind of aggregate an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Corruption,
    Health,
}

/// Metadata returned by `DeleteFile`, carried forward to target the search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletionMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episode_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub album_ids: Vec<String>,
}

/// Best-effort media details enrichment (`GetMediaDetails`); missing fields
/// degrade silently rather than failing the publish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

/// The closed set of domain events. Variant names match the glossary
/// exactly; `#[serde(rename)]` gives each a stable `domain:action` wire tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventType {
    #[serde(rename = "corruption:detected")]
    CorruptionDetected {
        file_path: String,
        path_id: PathId,
        corruption_type: CorruptionType,
        #[serde(default)]
        auto_remediate: bool,
        #[serde(default)]
        dry_run: bool,
    },

    #[serde(rename = "remediation:queued")]
    RemediationQueued {
        file_path: String,
        path_id: PathId,
        #[serde(default)]
        dry_run: bool,
    },

    #[serde(rename = "deletion:started")]
    DeletionStarted { media_id: String, arr_path: String },

    #[serde(rename = "deletion:completed")]
    DeletionCompleted {
        media_id: String,
        #[serde(default)]
        metadata: DeletionMetadata,
    },

    #[serde(rename = "deletion:failed")]
    DeletionFailed { error: String },

    #[serde(rename = "search:started")]
    SearchStarted {
        media_id: String,
        arr_path: String,
        #[serde(default)]
        target_ids: Vec<String>,
    },

    #[serde(rename = "search:completed")]
    SearchCompleted {
        media_id: String,
        arr_path: String,
        #[serde(default)]
        is_retry: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_details: Option<MediaDetails>,
    },

    #[serde(rename = "search:failed")]
    SearchFailed { error: String },

    #[serde(rename = "search:exhausted")]
    SearchExhausted { reason: String },

    #[serde(rename = "download:started")]
    DownloadStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue_item_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },

    #[serde(rename = "download:progress")]
    DownloadProgress {
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        indexer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_client: Option<String>,
    },

    #[serde(rename = "download:failed")]
    DownloadFailed { error: String },

    #[serde(rename = "download:timeout")]
    DownloadTimeout {
        elapsed_secs: u64,
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "download:ignored")]
    DownloadIgnored {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "import:blocked")]
    ImportBlocked {
        #[serde(default)]
        status_messages: Vec<String>,
    },

    #[serde(rename = "manual:removed")]
    ManuallyRemoved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "file:detected")]
    FileDetected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        file_paths: Vec<String>,
        file_count: u32,
        #[serde(default)]
        partial_replacement: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        missing_count: Option<u32>,
    },

    #[serde(rename = "verification:success")]
    VerificationSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        release_group: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        indexer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_client: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recovery_action: Option<String>,
    },

    #[serde(rename = "verification:failed")]
    VerificationFailed {
        error_type: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
    },

    #[serde(rename = "retry:scheduled")]
    RetryScheduled {
        file_path: String,
        path_id: PathId,
        #[serde(default)]
        auto_remediate: bool,
    },

    #[serde(rename = "retry:max_reached")]
    MaxRetriesReached { retry_count: u32 },

    #[serde(rename = "health:stuck_remediation")]
    StuckRemediation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        stuck_for_secs: u64,
    },

    #[serde(rename = "health:instance_unhealthy")]
    InstanceUnhealthy {
        instance_id: InstanceId,
        name: String,
        #[serde(rename = "type")]
        instance_type: String,
        url: String,
        error: String,
    },

    #[serde(rename = "health:system_degraded")]
    SystemHealthDegraded {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// Forward-compatibility catch-all; never produced by this engine, only
    /// ever observed when replaying a log written by a newer version.
    #[serde(other, skip_serializing)]
    Custom,
}

impl EventType {
    /// The stable wire/discriminant name, also used as the event-bus
    /// subscription key.
    pub fn name(&self) -> &'static str {
        match self {
            EventType::CorruptionDetected { .. } => "corruption:detected",
            EventType::RemediationQueued { .. } => "remediation:queued",
            EventType::DeletionStarted { .. } => "deletion:started",
            EventType::DeletionCompleted { .. } => "deletion:completed",
            EventType::DeletionFailed { .. } => "deletion:failed",
            EventType::SearchStarted { .. } => "search:started",
            EventType::SearchCompleted { .. } => "search:completed",
            EventType::SearchFailed { .. } => "search:failed",
            EventType::SearchExhausted { .. } => "search:exhausted",
            EventType::DownloadStarted { .. } => "download:started",
            EventType::DownloadProgress { .. } => "download:progress",
            EventType::DownloadFailed { .. } => "download:failed",
            EventType::DownloadTimeout { .. } => "download:timeout",
            EventType::DownloadIgnored { .. } => "download:ignored",
            EventType::ImportBlocked { .. } => "import:blocked",
            EventType::ManuallyRemoved { .. } => "manual:removed",
            EventType::FileDetected { .. } => "file:detected",
            EventType::VerificationSuccess { .. } => "verification:success",
            EventType::VerificationFailed { .. } => "verification:failed",
            EventType::RetryScheduled { .. } => "retry:scheduled",
            EventType::MaxRetriesReached { .. } => "retry:max_reached",
            EventType::StuckRemediation { .. } => "health:stuck_remediation",
            EventType::InstanceUnhealthy { .. } => "health:instance_unhealthy",
            EventType::SystemHealthDegraded { .. } => "health:system_degraded",
            EventType::Custom => "custom",
        }
    }

    /// True for the events ending in `Failed` that count against a
    /// corruption's `retry_count`.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventType::DeletionFailed { .. }
                | EventType::SearchFailed { .. }
                | EventType::VerificationFailed { .. }
                | EventType::DownloadTimeout { .. }
                | EventType::DownloadFailed { .. }
        )
    }

    /// True for events after which no automatic follow-up occurs.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::VerificationSuccess { .. }
                | EventType::MaxRetriesReached { .. }
                | EventType::SearchExhausted { .. }
                | EventType::ImportBlocked { .. }
                | EventType::DownloadIgnored { .. }
                | EventType::ManuallyRemoved { .. }
        )
    }

    /// A short human-readable summary for log lines, mirroring the
    /// teacher's `Event::log_summary`.
    pub fn log_summary(&self) -> String {
        match self {
            EventType::CorruptionDetected { file_path, corruption_type, .. } => {
                format!("{file_path} ({corruption_type})")
            }
            EventType::DeletionFailed { error }
            | EventType::SearchFailed { error }
            | EventType::DownloadFailed { error } => error.clone(),
            EventType::VerificationFailed { message, .. } => message.clone(),
            EventType::SearchExhausted { reason } => reason.clone(),
            EventType::SystemHealthDegraded { reason, .. } => reason.clone(),
            other => other.name().to_string(),
        }
    }
}

/// An immutable, persisted domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    #[serde(flatten)]
    pub event_type: EventType,
    #[serde(default = "default_event_version")]
    pub event_version: u32,
    pub created_at: DateTime<Utc>,
}

fn default_event_version() -> u32 {
    1
}

impl Event {
    pub fn name(&self) -> &'static str {
        self.event_type.name()
    }

    pub fn is_failure(&self) -> bool {
        self.event_type.is_failure()
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }

    /// Flattens `event_type`'s fields into a JSON object, exposing the
    /// key/value view spec.md's projections query against (equivalent to
    /// JSON path extraction over a stored blob).
    pub fn to_kv(&self) -> serde_json::Map<String, serde_json::Value> {
        let value = serde_json::to_value(&self.event_type).unwrap_or(serde_json::Value::Null);
        match value {
            serde_json::Value::Object(mut map) => {
                map.remove("type");
                map
            }
            _ => serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(event_type: EventType) -> Event {
        Event {
            id: EventId(1),
            aggregate_type: AggregateType::Corruption,
            aggregate_id: AggregateId::new(),
            event_type,
            event_version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn name_matches_wire_tag() {
        let event = sample_event(EventType::CorruptionDetected {
            file_path: "/a.mkv".into(),
            path_id: PathId::new(),
            corruption_type: CorruptionType::CorruptStream,
            auto_remediate: true,
            dry_run: false,
        });
        assert_eq!(event.name(), "corruption:detected");
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = sample_event(EventType::DeletionFailed { error: "boom".into() });
        let json = serde_json::to_string(&event).expect("serialize");
        let decoded: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, event);
    }

    #[test]
    fn unknown_type_tag_decodes_as_custom() {
        let json = r#"{"id":1,"aggregate_type":"corruption","aggregate_id":"crp-x","type":"future:event","created_at":"2026-01-01T00:00:00Z"}"#;
        let decoded: Event = serde_json::from_str(json).expect("deserialize forward-compat event");
        assert_eq!(decoded.event_type, EventType::Custom);
    }

    #[yare::parameterized(
        deletion_failed = { EventType::DeletionFailed { error: "x".into() }, true },
        search_failed = { EventType::SearchFailed { error: "x".into() }, true },
        download_timeout = { EventType::DownloadTimeout { elapsed_secs: 1, attempt: 1, last_status: None, reason: None }, true },
        corruption_detected = { EventType::CorruptionDetected { file_path: "/a".into(), path_id: PathId::new(), corruption_type: CorruptionType::CorruptStream, auto_remediate: true, dry_run: false }, false },
    )]
    fn is_failure_matches_glossary(event_type: EventType, expected: bool) {
        assert_eq!(event_type.is_failure(), expected);
    }

    #[yare::parameterized(
        verification_success = { EventType::VerificationSuccess { file_path: None, size: None, quality: None, release_group: None, indexer: None, download_client: None, recovery_action: None }, true },
        max_retries_reached = { EventType::MaxRetriesReached { retry_count: 5 }, true },
        deletion_failed = { EventType::DeletionFailed { error: "x".into() }, false },
    )]
    fn is_terminal_matches_glossary(event_type: EventType, expected: bool) {
        assert_eq!(event_type.is_terminal(), expected);
    }

    #[test]
    fn to_kv_strips_the_tag_field() {
        let event = sample_event(EventType::DeletionFailed { error: "boom".into() });
        let kv = event.to_kv();
        assert!(!kv.contains_key("type"));
        assert_eq!(kv.get("error").and_then(|v| v.as_str()), Some("boom"));
    }
}
