// SPDX-License-Identifier: MIT

//! Corruption classification.
//!
//! `CorruptionType` is shared between the scanner's detection outcome and
//! the health checker's error kind (spec.md §6): a health check that fails
//! with `mount_lost` and a scan that detects `mount_lost` describe the same
//! underlying condition, and both route through [`CorruptionType::is_infrastructure`].

use serde::{Deserialize, Serialize};

/// Closed set of detection/error outcomes.
///
/// The "infrastructure" variants are defence-in-depth: a scanner or health
/// checker that misclassifies a transient mount or permission failure as
/// corruption must not trigger destructive remediation. The remediator's
/// safety gate refuses to act on them (see `healarr_engine::remediator`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionType {
    /// Container/stream-level corruption confirmed by the scanner.
    CorruptStream,
    /// File header or container structure is malformed.
    ContainerError,
    /// File is present but zero bytes or truncated mid-stream.
    TruncatedFile,
    /// Computed hash does not match the expected/reference hash.
    HashMismatch,

    /// Scanner or health checker could not read the path (permissions).
    AccessDenied,
    /// The path does not exist.
    PathNotFound,
    /// The backing mount is not present (network share dropped, etc).
    MountLost,
    /// Unclassified I/O error surfaced while probing the file.
    IoError,
    /// The probe did not complete within its deadline.
    Timeout,
    /// The scan path or health-check configuration itself is invalid.
    InvalidConfig,
}

impl CorruptionType {
    /// True for the subset that indicates an infrastructure problem rather
    /// than confirmed file corruption. The remediator refuses to delete or
    /// search for these.
    pub fn is_infrastructure(self) -> bool {
        matches!(
            self,
            CorruptionType::AccessDenied
                | CorruptionType::PathNotFound
                | CorruptionType::MountLost
                | CorruptionType::IoError
                | CorruptionType::Timeout
                | CorruptionType::InvalidConfig
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CorruptionType::CorruptStream => "corrupt_stream",
            CorruptionType::ContainerError => "container_error",
            CorruptionType::TruncatedFile => "truncated_file",
            CorruptionType::HashMismatch => "hash_mismatch",
            CorruptionType::AccessDenied => "access_denied",
            CorruptionType::PathNotFound => "path_not_found",
            CorruptionType::MountLost => "mount_lost",
            CorruptionType::IoError => "io_error",
            CorruptionType::Timeout => "timeout",
            CorruptionType::InvalidConfig => "invalid_config",
        }
    }
}

crate::simple_display!(CorruptionType, |s| s.as_str());

#[cfg(test)]
mod tests {
    use super::*;

    #[yare::parameterized(
        access_denied = { CorruptionType::AccessDenied },
        path_not_found = { CorruptionType::PathNotFound },
        mount_lost = { CorruptionType::MountLost },
        io_error = { CorruptionType::IoError },
        timeout = { CorruptionType::Timeout },
        invalid_config = { CorruptionType::InvalidConfig },
    )]
    fn infrastructure_types_are_flagged(kind: CorruptionType) {
        assert!(kind.is_infrastructure());
    }

    #[yare::parameterized(
        corrupt_stream = { CorruptionType::CorruptStream },
        container_error = { CorruptionType::ContainerError },
        truncated_file = { CorruptionType::TruncatedFile },
        hash_mismatch = { CorruptionType::HashMismatch },
    )]
    fn content_corruption_types_are_not_infrastructure(kind: CorruptionType) {
        assert!(!kind.is_infrastructure());
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&CorruptionType::MountLost).expect("serialize");
        assert_eq!(json, "\"mount_lost\"");
    }
}
