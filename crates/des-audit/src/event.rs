//! Audit event universe and record envelope.
//!
//! The event universe is closed: a tagged sum type with per-variant
//! payloads rather than a free-form map. `feature_name` and `step_id`
//! are direct top-level fields of the record; the legacy `step_path`
//! field is never emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Millisecond-precision UTC timestamps (`2026-02-05T14:30:00.000Z`).
pub mod ts_milli {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Every event the audit trail can carry.
///
/// Serialized with an internal `event` tag holding the canonical
/// SCREAMING_SNAKE name; payload fields sit beside the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum AuditEvent {
    #[serde(rename = "TASK_INVOCATION_STARTED")]
    TaskInvocationStarted {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    #[serde(rename = "TASK_INVOCATION_VALIDATED")]
    TaskInvocationValidated,
    #[serde(rename = "TASK_INVOCATION_REJECTED")]
    TaskInvocationRejected { errors: Vec<String> },

    #[serde(rename = "PHASE_STARTED")]
    PhaseStarted { phase: String },
    #[serde(rename = "PHASE_EXECUTED")]
    PhaseExecuted { phase: String },
    #[serde(rename = "PHASE_SKIPPED")]
    PhaseSkipped {
        phase: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "PHASE_FAILED")]
    PhaseFailed { phase: String, reason: String },

    #[serde(rename = "HOOK_SUBAGENT_STOP_PASSED")]
    HookSubagentStopPassed,
    #[serde(rename = "HOOK_SUBAGENT_STOP_FAILED")]
    HookSubagentStopFailed { validation_errors: Vec<String> },
    #[serde(rename = "SUBAGENT_STOP_VALIDATION")]
    SubagentStopValidation { outcome: String },
    #[serde(rename = "SUBAGENT_STOP_FAILURE")]
    SubagentStopFailure { reason: String },

    #[serde(rename = "SCOPE_VIOLATION")]
    ScopeViolation { path: String },

    #[serde(rename = "COMMIT_SUCCESS")]
    CommitSuccess,
    #[serde(rename = "COMMIT_FAILURE")]
    CommitFailure { reason: String },
    #[serde(rename = "COMMIT_CREATED")]
    CommitCreated { commit_hash: String },

    #[serde(rename = "VALIDATION_REJECTED")]
    ValidationRejected { rule: String, message: String },

    #[serde(rename = "TIMEOUT_WARNING")]
    TimeoutWarning {
        phase: String,
        threshold_pct: u8,
        budget: String,
    },

    #[serde(rename = "EXTENSION_GRANTED")]
    ExtensionGranted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_max_turns: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_max_minutes: Option<f64>,
        justification: String,
    },
    #[serde(rename = "EXTENSION_DENIED")]
    ExtensionDenied { reason: String },
}

impl AuditEvent {
    /// Canonical event name (the `event` tag value).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TaskInvocationStarted { .. } => "TASK_INVOCATION_STARTED",
            Self::TaskInvocationValidated => "TASK_INVOCATION_VALIDATED",
            Self::TaskInvocationRejected { .. } => "TASK_INVOCATION_REJECTED",
            Self::PhaseStarted { .. } => "PHASE_STARTED",
            Self::PhaseExecuted { .. } => "PHASE_EXECUTED",
            Self::PhaseSkipped { .. } => "PHASE_SKIPPED",
            Self::PhaseFailed { .. } => "PHASE_FAILED",
            Self::HookSubagentStopPassed => "HOOK_SUBAGENT_STOP_PASSED",
            Self::HookSubagentStopFailed { .. } => "HOOK_SUBAGENT_STOP_FAILED",
            Self::SubagentStopValidation { .. } => "SUBAGENT_STOP_VALIDATION",
            Self::SubagentStopFailure { .. } => "SUBAGENT_STOP_FAILURE",
            Self::ScopeViolation { .. } => "SCOPE_VIOLATION",
            Self::CommitSuccess => "COMMIT_SUCCESS",
            Self::CommitFailure { .. } => "COMMIT_FAILURE",
            Self::CommitCreated { .. } => "COMMIT_CREATED",
            Self::ValidationRejected { .. } => "VALIDATION_REJECTED",
            Self::TimeoutWarning { .. } => "TIMEOUT_WARNING",
            Self::ExtensionGranted { .. } => "EXTENSION_GRANTED",
            Self::ExtensionDenied { .. } => "EXTENSION_DENIED",
        }
    }
}

/// Immutable audit record: envelope fields plus the event payload.
///
/// `content_hash` is SHA-256 over the canonical JSON of all other
/// fields, `sequence_number` included, so a record copied to a
/// different position in a file fails verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(flatten)]
    pub event: AuditEvent,
    #[serde(with = "ts_milli")]
    pub timestamp: DateTime<Utc>,
    pub sequence_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}
