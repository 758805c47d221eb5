//! Audit log reading and integrity verification.
//!
//! Readers tolerate a partially-flushed final line: a torn tail is
//! skipped, never an error. Corruption anywhere else is.

use camino::Utf8Path;
use std::fs;

use des_utils::error::AuditError;

use crate::event::AuditRecord;
use crate::hash::hash_record;

/// A verification finding for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityIssue {
    pub line: usize,
    pub reason: String,
}

/// Read all records from one audit log file, oldest first.
pub fn read_records(path: &Utf8Path) -> Result<Vec<AuditRecord>, AuditError> {
    let content = fs::read_to_string(path.as_std_path()).map_err(|e| AuditError::OpenFailed {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    let complete = match content.rfind('\n') {
        Some(idx) => &content[..=idx],
        // No newline at all: the only line is a torn tail.
        None => "",
    };

    let mut records = Vec::new();
    let line_count = complete.lines().count();
    for (idx, line) in complete.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(line) {
            Ok(record) => records.push(record),
            // The final terminated line may still be mid-flush.
            Err(_) if idx + 1 == line_count => break,
            Err(e) => {
                return Err(AuditError::CorruptRecord {
                    path: path.to_string(),
                    line: idx + 1,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(records)
}

/// Read every record for a step across all audit files in a directory,
/// in file order then sequence order.
pub fn read_events_for_step(
    dir: &Utf8Path,
    step_id: &str,
) -> Result<Vec<AuditRecord>, AuditError> {
    let mut log_files: Vec<_> = fs::read_dir(dir.as_std_path())
        .map_err(|e| AuditError::OpenFailed {
            path: dir.to_string(),
            reason: e.to_string(),
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("audit-") && n.ends_with(".log"))
        })
        .collect();
    log_files.sort();

    let mut matching = Vec::new();
    for file in log_files {
        let utf8 = Utf8Path::from_path(&file).ok_or_else(|| AuditError::OpenFailed {
            path: file.display().to_string(),
            reason: "non-UTF-8 path".to_string(),
        })?;
        for record in read_records(utf8)? {
            if record.step_id.as_deref() == Some(step_id) {
                matching.push(record);
            }
        }
    }
    Ok(matching)
}

/// Verify one audit log file: per-record hash recomputation and
/// sequence-number contiguity from 1.
pub fn verify_file(path: &Utf8Path) -> Result<Vec<IntegrityIssue>, AuditError> {
    let records = read_records(path)?;
    let mut issues = Vec::new();

    for (idx, record) in records.iter().enumerate() {
        let line = idx + 1;

        let expected_seq = (idx + 1) as u64;
        if record.sequence_number != expected_seq {
            issues.push(IntegrityIssue {
                line,
                reason: format!(
                    "sequence_number {} breaks contiguity (expected {expected_seq})",
                    record.sequence_number
                ),
            });
        }

        match (&record.content_hash, hash_record(record)) {
            (Some(stored), Ok(computed)) if *stored == computed => {}
            (Some(stored), Ok(computed)) => issues.push(IntegrityIssue {
                line,
                reason: format!("content_hash mismatch: stored {stored}, computed {computed}"),
            }),
            (None, _) => issues.push(IntegrityIssue {
                line,
                reason: "content_hash missing".to_string(),
            }),
            (_, Err(e)) => issues.push(IntegrityIssue {
                line,
                reason: format!("hash recomputation failed: {e}"),
            }),
        }
    }

    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditEvent;
    use crate::writer::AuditLogWriter;
    use camino::Utf8PathBuf;
    use std::io::Write;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn seeded_writer(dir: &TempDir) -> AuditLogWriter {
        let mut writer = AuditLogWriter::new(utf8(dir));
        writer
            .log_event(
                AuditEvent::TaskInvocationStarted {
                    command: "execute".to_string(),
                    agent: Some("software-crafter".to_string()),
                },
                Some("auth"),
                Some("03-02"),
            )
            .unwrap();
        writer
            .log_event(AuditEvent::TaskInvocationValidated, Some("auth"), Some("03-02"))
            .unwrap();
        writer
            .log_event(AuditEvent::CommitSuccess, Some("auth"), Some("99-99"))
            .unwrap();
        writer
    }

    #[test]
    fn test_read_records_round_trip() {
        let dir = TempDir::new().unwrap();
        let writer = seeded_writer(&dir);
        let path = writer.active_path().unwrap().to_owned();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence_number, 1);
        assert_eq!(records[2].event.kind(), "COMMIT_SUCCESS");
    }

    #[test]
    fn test_torn_final_line_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let writer = seeded_writer(&dir);
        let path = writer.active_path().unwrap().to_owned();
        drop(writer);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path.as_std_path())
            .unwrap();
        file.write_all(br#"{"event":"COMMIT_"#).unwrap();
        drop(file);

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_mid_file_corruption_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir).join("audit-2026-02-05.log");
        std::fs::write(
            path.as_std_path(),
            "not json at all\n{\"also\": \"bad\"}\n",
        )
        .unwrap();

        assert!(matches!(
            read_records(&path),
            Err(AuditError::CorruptRecord { line: 1, .. })
        ));
    }

    #[test]
    fn test_read_events_for_step_filters() {
        let dir = TempDir::new().unwrap();
        let _writer = seeded_writer(&dir);

        let records = read_events_for_step(&utf8(&dir), "03-02").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.step_id.as_deref() == Some("03-02")));
    }

    #[test]
    fn test_verify_file_clean() {
        let dir = TempDir::new().unwrap();
        let writer = seeded_writer(&dir);
        let path = writer.active_path().unwrap().to_owned();

        assert!(verify_file(&path).unwrap().is_empty());
    }

    #[test]
    fn test_verify_file_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let writer = seeded_writer(&dir);
        let path = writer.active_path().unwrap().to_owned();
        drop(writer);

        let content = std::fs::read_to_string(path.as_std_path()).unwrap();
        let tampered = content.replace("\"feature_name\":\"auth\"", "\"feature_name\":\"evil\"");
        assert_ne!(content, tampered);
        std::fs::write(path.as_std_path(), tampered).unwrap();

        let issues = verify_file(&path).unwrap();
        assert!(!issues.is_empty());
        assert!(issues.iter().any(|i| i.reason.contains("content_hash mismatch")));
    }
}
