//! Append-only JSONL event sink with daily rotation.
//!
//! Each append acquires an exclusive lock on the file descriptor so the
//! audit file can be shared with sibling tooling. A write failure never
//! propagates to the caller: it is reported to stderr, counted, and the
//! caller proceeds.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use std::fs::{File, OpenOptions};
use std::io::Write;

use des_utils::clock::{SystemWallClock, WallClock};
use des_utils::error::AuditError;
use des_utils::paths::ensure_dir_all;

use crate::event::{AuditEvent, AuditRecord};
use crate::hash::{canonical_bytes, content_hash_for};

/// Audit log file name for a UTC date: `audit-YYYY-MM-DD.log`.
#[must_use]
pub fn audit_file_name(date: NaiveDate) -> String {
    format!("audit-{}.log", date.format("%Y-%m-%d"))
}

struct ActiveFile {
    date: NaiveDate,
    path: Utf8PathBuf,
    lock: fd_lock::RwLock<File>,
    next_seq: u64,
}

/// Serialised writer over the audit directory.
///
/// Holds at most one open file; rotation closes the old file and opens
/// the new one without moving any content between them.
pub struct AuditLogWriter {
    dir: Utf8PathBuf,
    clock: Box<dyn WallClock>,
    active: Option<ActiveFile>,
    dropped_events: u64,
}

impl AuditLogWriter {
    /// Writer over a resolved audit directory with the system clock.
    #[must_use]
    pub fn new(dir: Utf8PathBuf) -> Self {
        Self::with_clock(dir, Box::new(SystemWallClock))
    }

    /// Writer with an injected wall clock (tests drive rotation with it).
    #[must_use]
    pub fn with_clock(dir: Utf8PathBuf, clock: Box<dyn WallClock>) -> Self {
        Self {
            dir,
            clock,
            active: None,
            dropped_events: 0,
        }
    }

    /// The audit directory this writer appends into.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Path of the file the next append lands in, if one is open.
    #[must_use]
    pub fn active_path(&self) -> Option<&Utf8Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Number of events dropped because of write failures.
    #[must_use]
    pub const fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Append an event.
    ///
    /// Returns the persisted record (sequence number and content hash
    /// assigned) on success. On failure the event is counted as dropped
    /// and `None` is returned; the caller proceeds either way.
    pub fn log_event(
        &mut self,
        event: AuditEvent,
        feature_name: Option<&str>,
        step_id: Option<&str>,
    ) -> Option<AuditRecord> {
        match self.try_append(event, feature_name, step_id) {
            Ok(record) => Some(record),
            Err(e) => {
                self.dropped_events += 1;
                tracing::error!(
                    dropped = self.dropped_events,
                    error = %e,
                    "Audit write failed; event dropped"
                );
                None
            }
        }
    }

    /// Close the active file and open today's file when the UTC date has
    /// changed since the last append.
    pub fn rotate_if_needed(&mut self) -> Result<(), AuditError> {
        let today = self.clock.now().date_naive();
        let stale = self.active.as_ref().is_none_or(|a| a.date != today);
        if stale {
            self.active = Some(self.open_file(today)?);
        }
        Ok(())
    }

    fn open_file(&self, date: NaiveDate) -> Result<ActiveFile, AuditError> {
        ensure_dir_all(&self.dir).map_err(|e| AuditError::OpenFailed {
            path: self.dir.to_string(),
            reason: e.to_string(),
        })?;

        let path = self.dir.join(audit_file_name(date));
        let next_seq = next_sequence_number(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|e| AuditError::OpenFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(ActiveFile {
            date,
            path,
            lock: fd_lock::RwLock::new(file),
            next_seq,
        })
    }

    fn try_append(
        &mut self,
        event: AuditEvent,
        feature_name: Option<&str>,
        step_id: Option<&str>,
    ) -> Result<AuditRecord, AuditError> {
        self.rotate_if_needed()?;
        let active = self.active.as_mut().expect("active file after rotation");

        let mut record = AuditRecord {
            event,
            timestamp: self.clock.now(),
            sequence_number: active.next_seq,
            feature_name: feature_name.map(str::to_string),
            step_id: step_id.map(str::to_string),
            content_hash: None,
        };

        let mut value =
            serde_json::to_value(&record).map_err(|e| AuditError::Canonicalize(e.to_string()))?;
        let hash = content_hash_for(&value)?;
        value
            .as_object_mut()
            .expect("record serializes to an object")
            .insert("content_hash".to_string(), hash.clone().into());
        record.content_hash = Some(hash);

        let mut line = canonical_bytes(&value)?;
        line.push(b'\n');

        let path = active.path.clone();
        let mut guard = active.lock.write().map_err(|e| AuditError::AppendFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        guard
            .write_all(&line)
            .and_then(|()| guard.flush())
            .map_err(|e| AuditError::AppendFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        drop(guard);

        active.next_seq += 1;
        Ok(record)
    }
}

/// Scan an existing log file for the next sequence number.
///
/// A missing file starts at 1. A torn final line (no trailing newline or
/// unparseable) is ignored, matching reader tolerance.
fn next_sequence_number(path: &Utf8Path) -> Result<u64, AuditError> {
    let content = match std::fs::read_to_string(path.as_std_path()) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(1),
        Err(e) => {
            return Err(AuditError::OpenFailed {
                path: path.to_string(),
                reason: e.to_string(),
            });
        }
    };

    let mut last_seq = 0u64;
    for line in content.lines() {
        if line.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            if let Some(seq) = value.get("sequence_number").and_then(serde_json::Value::as_u64) {
                last_seq = last_seq.max(seq);
            }
        }
    }
    Ok(last_seq + 1)
}
