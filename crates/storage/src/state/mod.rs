// SPDX-License-Identifier: MIT

//! Materialized state derived from the event log by replay (spec.md §3:
//! "Projections... derived read views built from the event log").

mod corruption;
mod types;

pub use types::{CorruptionStatus, FailureRecord};

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use healarr_core::{AggregateId, Event};

/// The `corruption_status` and failure-history projections, kept in sync
/// one event at a time. Replaying the same event twice is a no-op —
/// `last_applied_seq` guards against double-application from both the
/// immediate post-append path and a WAL-replay path observing the same
/// event (mirrors the teacher's idempotency requirement on
/// `MaterializedState::apply_event`).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub corruptions: HashMap<AggregateId, CorruptionStatus>,
    pub verification_failures: Vec<FailureRecord>,
    last_applied_seq: u64,
}

impl MaterializedState {
    pub fn apply(&mut self, event: &Event) {
        if event.id.0 <= self.last_applied_seq {
            return;
        }
        self.last_applied_seq = event.id.0;
        corruption::apply(self, event);
    }

    pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut state = Self::default();
        for event in events {
            state.apply(event);
        }
        state
    }

    pub fn status(&self, aggregate_id: &AggregateId) -> Option<&CorruptionStatus> {
        self.corruptions.get(aggregate_id)
    }

    pub fn active_corruptions(&self) -> impl Iterator<Item = &CorruptionStatus> {
        self.corruptions.values().filter(|c| !c.is_terminal)
    }

    /// Aggregates detected within `within` of `now`, not yet terminal, whose
    /// latest event is older than `stuck_threshold` — spec.md §4.6's
    /// "stuck remediations" sweep, resolved per SPEC_FULL's Open Question
    /// decision: a plain `COUNT`/collect over the qualifying group.
    pub fn stuck(
        &self,
        now: DateTime<Utc>,
        stuck_threshold: Duration,
        within: Duration,
    ) -> Vec<&CorruptionStatus> {
        self.corruptions
            .values()
            .filter(|c| !c.is_terminal)
            .filter(|c| now.signed_duration_since(c.detected_at) <= chrono::Duration::from_std(within).unwrap_or(chrono::Duration::MAX))
            .filter(|c| {
                now.signed_duration_since(c.last_updated_at)
                    >= chrono::Duration::from_std(stuck_threshold).unwrap_or(chrono::Duration::zero())
            })
            .collect()
    }

    /// File paths with `VerificationFailed` across at least `min_count`
    /// distinct aggregates within `within` of `now`.
    pub fn repeated_failures(&self, now: DateTime<Utc>, within: Duration, min_count: usize) -> Vec<String> {
        let within = chrono::Duration::from_std(within).unwrap_or(chrono::Duration::MAX);
        let mut by_path: HashMap<&str, std::collections::HashSet<AggregateId>> = HashMap::new();
        for record in &self.verification_failures {
            if now.signed_duration_since(record.at) <= within {
                by_path.entry(record.file_path.as_str()).or_default().insert(record.aggregate_id);
            }
        }
        by_path
            .into_iter()
            .filter(|(_, aggregates)| aggregates.len() >= min_count)
            .map(|(path, _)| path.to_string())
            .collect()
    }

    /// Aggregates in an active intermediate state whose last update is
    /// older than `older_than` but newer than `newer_than` — the window the
    /// crash-recovery sweep (spec.md §4.6) reconciles against arr state.
    pub fn reconciliation_candidates(
        &self,
        now: DateTime<Utc>,
        older_than: Duration,
        newer_than: Duration,
    ) -> Vec<&CorruptionStatus> {
        let older_than = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let newer_than = chrono::Duration::from_std(newer_than).unwrap_or(chrono::Duration::MAX);
        self.corruptions
            .values()
            .filter(|c| matches!(c.current_state.as_str(), "download:progress" | "search:completed" | "download:started"))
            .filter(|c| {
                let age = now.signed_duration_since(c.last_updated_at);
                age >= older_than && age <= newer_than
            })
            .filter(|c| c.media_id.is_some())
            .collect()
    }
}

#[cfg(test)]
#[path = "../state_tests/mod.rs"]
mod tests;
