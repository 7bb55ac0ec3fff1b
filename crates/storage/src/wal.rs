// SPDX-License-Identifier: MIT

//! Append-only write-ahead log backing the domain event stream.
//!
//! Mirrors the teacher's JSONL WAL: a line per event, group-committed
//! flushes, and `.bak` rotation on a corrupt tail. `Event::id` doubles as
//! the WAL sequence number, so there is no separate framing envelope — the
//! serialized `Event` *is* the WAL line.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use healarr_core::{AggregateId, AggregateType, Event, EventId, EventType};

use crate::error::StorageError;

const FLUSH_THRESHOLD: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const MAX_BAK_FILES: u32 = 3;

/// A still-unpersisted event. The log assigns `id` (the WAL sequence
/// number) and `created_at` at append time — spec.md §4.1's "`Publish`
/// assigns `created_at`, then appends durably".
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub event_type: EventType,
}

impl EventDraft {
    pub fn new(
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        event_type: EventType,
    ) -> Self {
        Self { aggregate_type, aggregate_id, event_type }
    }
}

/// One entry read back out of the log.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// The event log itself: an append-only file plus an in-memory mirror of
/// every entry it has ever accepted, so replay and projection queries never
/// need to re-read the file.
pub struct Wal {
    path: PathBuf,
    file: File,
    entries: Vec<Event>,
    write_seq: u64,
    processed_seq: u64,
    read_cursor: u64,
    unflushed: usize,
    last_flush: Instant,
}

impl Wal {
    /// Open (creating if absent) the log at `path`, replaying any entries
    /// already on disk. `processed_seq` seeds the read cursor — entries at
    /// or below it are treated as already consumed (recovery after a
    /// snapshot, spec.md §4.6's crash-recovery sweep picks up from there).
    pub fn open(path: &Path, processed_seq: u64) -> Result<Self, StorageError> {
        let (entries, write_seq) = Self::recover(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path).map_err(|source| {
            StorageError::Open { path: path.display().to_string(), source }
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
            write_seq,
            processed_seq,
            read_cursor: processed_seq,
            unflushed: 0,
            last_flush: Instant::now(),
        })
    }

    /// Parse the on-disk file line by line, stopping at the first line that
    /// is not valid UTF-8 JSON. The valid prefix is kept; everything from
    /// the first bad line onward is rotated into `.bak` and dropped.
    fn recover(path: &Path) -> Result<(Vec<Event>, u64), StorageError> {
        let Ok(contents) = std::fs::read(path) else {
            return Ok((Vec::new(), 0));
        };

        let mut entries = Vec::new();
        let mut offset = 0usize;
        let mut corrupt = false;

        while offset < contents.len() {
            let rest = &contents[offset..];
            let newline = rest.iter().position(|b| *b == b'\n');
            let Some(newline) = newline else {
                // Incomplete trailing line (no terminating newline): treat
                // as an in-flight write that never completed.
                corrupt = true;
                break;
            };
            let line = &rest[..newline];
            let consumed = newline + 1;

            if line.is_empty() {
                offset += consumed;
                continue;
            }

            match std::str::from_utf8(line).ok().and_then(|s| serde_json::from_str::<Event>(s).ok()) {
                Some(event) => {
                    entries.push(event);
                    offset += consumed;
                }
                None => {
                    corrupt = true;
                    break;
                }
            }
        }

        let write_seq = entries.last().map(|e| e.id.0).unwrap_or(0);

        if corrupt {
            Self::rotate_backup(path)?;
            std::fs::write(path, &contents[..offset]).map_err(|source| StorageError::Open {
                path: path.display().to_string(),
                source,
            })?;
        }

        Ok((entries, write_seq))
    }

    /// Move the (corrupt) file aside into `.bak`, shifting older backups
    /// down and evicting anything past [`MAX_BAK_FILES`].
    fn rotate_backup(path: &Path) -> Result<(), StorageError> {
        let bak = |n: u32| {
            if n == 1 {
                path.with_extension("bak")
            } else {
                path.with_extension(format!("bak.{n}"))
            }
        };

        let oldest = bak(MAX_BAK_FILES);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for n in (1..MAX_BAK_FILES).rev() {
            let src = bak(n);
            if src.exists() {
                let _ = std::fs::rename(&src, bak(n + 1));
            }
        }

        std::fs::rename(path, bak(1))
            .map_err(|source| StorageError::Open { path: path.display().to_string(), source })
    }

    /// Assign `id`/`created_at` and append durably.
    pub fn append(&mut self, draft: EventDraft, created_at: DateTime<Utc>) -> Result<Event, StorageError> {
        self.write_seq += 1;
        let event = Event {
            id: EventId(self.write_seq),
            aggregate_type: draft.aggregate_type,
            aggregate_id: draft.aggregate_id,
            event_type: draft.event_type,
            event_version: 1,
            created_at,
        };

        let line = serde_json::to_string(&event).map_err(|source| StorageError::Serialize { source })?;
        writeln!(self.file, "{line}").map_err(|source| StorageError::Append { source })?;
        self.unflushed += 1;
        self.entries.push(event.clone());

        Ok(event)
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.file.sync_all().map_err(|source| StorageError::Append { source })?;
        self.unflushed = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// True once unflushed writes cross the group-commit threshold or the
    /// flush interval has elapsed since the last flush.
    pub fn needs_flush(&self) -> bool {
        self.unflushed > 0
            && (self.unflushed >= FLUSH_THRESHOLD || self.last_flush.elapsed() >= FLUSH_INTERVAL)
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// Cheap reachability probe: re-stat the log file. Standing in for a
    /// SQL driver's connection ping (spec.md §6's `GetHealthStatus`) in an
    /// architecture with no network round trip to a database server.
    pub fn probe(&self) -> Result<(), StorageError> {
        std::fs::metadata(&self.path)
            .map(|_| ())
            .map_err(|source| StorageError::Open { path: self.path.display().to_string(), source })
    }

    /// Events appended since the last successful `flush` — the WAL's
    /// analogue of a connection pool's "in use" count. A backlog pinned at
    /// or above the group-commit threshold means appends are arriving
    /// faster than they can be durably flushed, the single-writer
    /// equivalent of every pool connection being checked out with none
    /// free (spec.md §4.6's "database pool exhausted" sweep item).
    pub fn unflushed_count(&self) -> usize {
        self.unflushed
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    pub fn mark_processed(&mut self, seq: u64) {
        self.processed_seq = self.processed_seq.max(seq);
    }

    /// Advance the read cursor by one and return that entry, or `None` if
    /// caught up to `write_seq`.
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, StorageError> {
        if self.read_cursor >= self.write_seq {
            return Ok(None);
        }
        self.read_cursor += 1;
        let event = self.entries[(self.read_cursor - 1) as usize].clone();
        Ok(Some(WalEntry { seq: self.read_cursor, event }))
    }

    pub fn entries_after(&self, seq: u64) -> Result<Vec<WalEntry>, StorageError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.id.0 > seq)
            .map(|e| WalEntry { seq: e.id.0, event: e.clone() })
            .collect())
    }

    /// Compact the log, dropping entries strictly before `seq` — used after
    /// a snapshot has captured everything up to `seq`.
    pub fn truncate_before(&mut self, seq: u64) -> Result<(), StorageError> {
        self.entries.retain(|e| e.id.0 >= seq);

        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut tmp_file = File::create(&tmp)
                .map_err(|source| StorageError::Open { path: tmp.display().to_string(), source })?;
            for event in &self.entries {
                let line =
                    serde_json::to_string(event).map_err(|source| StorageError::Serialize { source })?;
                writeln!(tmp_file, "{line}").map_err(|source| StorageError::Append { source })?;
            }
            tmp_file.sync_all().map_err(|source| StorageError::Append { source })?;
        }
        std::fs::rename(&tmp, &self.path)
            .map_err(|source| StorageError::Open { path: self.path.display().to_string(), source })?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path).map_err(|source| {
            StorageError::Open { path: self.path.display().to_string(), source }
        })?;
        self.unflushed = 0;
        Ok(())
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
