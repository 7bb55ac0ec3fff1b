// SPDX-License-Identifier: MIT

//! Identifier newtypes for the domain's durable entities.

use crate::define_id;

define_id! {
    /// Identifies one corruption's event stream. Stable for the life of
    /// the aggregate; first assigned when the remediator (or an operator)
    /// records the initial `CorruptionDetected` event.
    pub struct AggregateId("crp-");
}

define_id! {
    /// Identifies a configured scan path (`scan_paths` row).
    pub struct PathId("pth-");
}

define_id! {
    /// Identifies a cron schedule bound to a scan path.
    pub struct ScheduleId("sch-");
}

define_id! {
    /// Identifies an arr instance (sonarr/radarr/lidarr/whisparr).
    pub struct InstanceId("ins-");
}
