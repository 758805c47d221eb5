//! Append-only audit trail for the deterministic execution system.
//!
//! One JSONL record per event, keys sorted (RFC 8785 canonical form),
//! daily file rotation at UTC midnight, contiguous sequence numbers per
//! file, and a SHA-256 `content_hash` over every other field of the
//! record. Files are never truncated or rewritten.

mod event;
mod hash;
mod reader;
mod writer;

pub use event::{AuditEvent, AuditRecord, ts_milli};
pub use hash::{canonical_bytes, content_hash_for, hash_record, range_hash, sha256_hex};
pub use reader::{IntegrityIssue, read_events_for_step, read_records, verify_file};
pub use writer::{AuditLogWriter, audit_file_name};
