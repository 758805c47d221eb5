use std::fmt;
use thiserror::Error;

/// Library-level error type with rich context and user-friendly reporting.
///
/// `DesError` is the primary error type returned by nwave-des library
/// operations. It provides:
/// - Detailed error information for programmatic handling
/// - User-friendly messages with context and suggestions
/// - Mapping to CLI exit codes for consistent error reporting
///
/// # Error Categories
///
/// | Category | Description |
/// |----------|-------------|
/// | `Config` | Configuration file or CLI argument errors |
/// | `StepFile` | Step file parsing, invariant, or persistence errors |
/// | `Audit` | Audit log writer/reader errors |
/// | `Scope` | Scope declaration compilation errors |
/// | `Budget` | Turn/timeout budget errors |
/// | `Hooks` | Host settings hook install/uninstall errors |
///
/// # Exit Code Mapping
///
/// Use [`to_exit_code()`](Self::to_exit_code) to map errors to CLI exit
/// codes. Library code returns `DesError` and does NOT call
/// `std::process::exit()`.
#[derive(Error, Debug)]
pub enum DesError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Step file error: {0}")]
    StepFile(#[from] StepFileError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("Scope declaration error: {0}")]
    Scope(#[from] ScopeError),

    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    #[error("Hook installation error: {0}")]
    Hooks(#[from] HookInstallError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation rejected for step {step_id}: {issue_count} issue(s)")]
    ValidationRejected {
        step_id: String,
        issues: Vec<String>,
        issue_count: usize,
    },
}

/// Configuration errors for `.nwave/des-config.json` and CLI arguments.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file is not valid JSON: {path}: {reason}")]
    InvalidFile { path: String, reason: String },

    #[error("Config value out of range: {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Step file errors covering identity, parsing, invariants, and persistence.
#[derive(Error, Debug)]
pub enum StepFileError {
    #[error("Step file not found: {path}")]
    NotFound { path: String },

    #[error("Step file is not valid JSON: {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Invalid step id '{value}': expected NN-MM (two digits, dash, two digits)")]
    InvalidStepId { value: String },

    #[error("Step file name '{path}' does not start with a step id")]
    UnidentifiablePath { path: String },

    #[error("task_id '{task_id}' does not match step id '{step_id}' derived from the file path")]
    TaskIdMismatch { task_id: String, step_id: String },

    #[error("Invariant violated in {path}: {reason}")]
    InvariantViolated { path: String, reason: String },

    #[error("Failed to write step file {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

/// Audit log errors. Writer-side failures are counted and reported to
/// stderr rather than propagated; these variants surface through readers
/// and integrity checks.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("No writable audit log directory among candidates: {candidates}")]
    NoWritableDirectory { candidates: String },

    #[error("Failed to open audit log {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Failed to append to audit log {path}: {reason}")]
    AppendFailed { path: String, reason: String },

    #[error("Corrupt audit record at {path}:{line}: {reason}")]
    CorruptRecord {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Canonicalization failed: {0}")]
    Canonicalize(String),
}

/// Scope declaration errors (glob compilation only; non-matching paths are
/// violations, not errors).
#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Invalid scope glob '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },
}

/// Budget errors raised by the governor.
#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("Budget exceeded for phase {phase}: {reason}")]
    Exceeded { phase: String, reason: String },

    #[error("Extension denied: {reason}")]
    ExtensionDenied { reason: String },
}

/// Errors mutating the host assistant settings document.
#[derive(Error, Debug)]
pub enum HookInstallError {
    #[error("Settings document is not valid JSON: {path}: {reason}")]
    InvalidSettings { path: String, reason: String },

    #[error("Failed to write settings document {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    StepExecution,
    Audit,
    FileSystem,
    ResourceLimits,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::StepExecution => write!(f, "Step Execution"),
            Self::Audit => write!(f, "Audit"),
            Self::FileSystem => write!(f, "File System"),
            Self::ResourceLimits => write!(f, "Resource Limits"),
            Self::Validation => write!(f, "Validation"),
        }
    }
}

impl UserFriendlyError for DesError {
    fn user_message(&self) -> String {
        match self {
            Self::ValidationRejected {
                step_id,
                issue_count,
                ..
            } => {
                format!("Validation rejected step {step_id} with {issue_count} issue(s)")
            }
            other => other.to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(_) => Some(
                "Configuration is read from .nwave/des-config.json in the project root, \
                 overridden by environment variables and CLI arguments."
                    .to_string(),
            ),
            Self::StepFile(StepFileError::Corrupt { .. }) => Some(
                "A corrupt step file aborts the step without recovery handling; \
                 the file must be repaired or regenerated by the planning stage."
                    .to_string(),
            ),
            Self::ValidationRejected { .. } => Some(
                "The pre-tool-use validator blocked the agent invocation before any tool ran."
                    .to_string(),
            ),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(_) => vec![
                "Check .nwave/des-config.json for syntax errors".to_string(),
                "Run with defaults by removing the config file".to_string(),
            ],
            Self::StepFile(StepFileError::InvalidStepId { .. }) => vec![
                "Step ids are two digits, a dash, two digits (e.g. 03-02)".to_string(),
                "Rename the step file so it starts with its step id".to_string(),
            ],
            Self::StepFile(StepFileError::Corrupt { .. }) => vec![
                "Validate the step file with a JSON linter".to_string(),
                "Re-generate the step from the roadmap if the file cannot be repaired".to_string(),
            ],
            Self::ValidationRejected { issues, .. } => issues.clone(),
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::StepFile(_) => ErrorCategory::StepExecution,
            Self::Audit(_) => ErrorCategory::Audit,
            Self::Scope(_) | Self::ValidationRejected { .. } => ErrorCategory::Validation,
            Self::Budget(_) => ErrorCategory::ResourceLimits,
            Self::Hooks(_) | Self::Io(_) => ErrorCategory::FileSystem,
        }
    }
}

impl DesError {
    /// Render the error for end users: message, context, and suggestions.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut out = self.user_message();
        if let Some(ctx) = self.context() {
            out.push_str("\n\n");
            out.push_str(&ctx);
        }
        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            out.push_str("\n\nSuggestions:");
            for s in suggestions {
                out.push_str("\n  - ");
                out.push_str(&s);
            }
        }
        out
    }
}
