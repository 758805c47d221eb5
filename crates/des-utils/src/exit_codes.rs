//! Exit code constants and error mapping for nwave-des.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `VALIDATION_REJECTED` | Pre-tool-use validator blocked the invocation |
//! | 4 | `SCOPE_VIOLATION` | Agent modified files outside the step scope |
//! | 5 | `BUDGET_EXCEEDED` | Turn or time budget exhausted without extension |
//! | 6 | `STEP_FILE_CORRUPT` | Step file unreadable or unparseable |
//! | 9 | `LOCK_HELD` | Another process holds the audit append lock |

use crate::error::{DesError, StepFileError};

/// Exit codes matching the documented exit code table.
///
/// The numeric values are part of the public API and will not change in
/// 1.x releases. Use the named constants, or [`as_i32()`](Self::as_i32)
/// for `std::process::exit()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - operation completed successfully
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments error - invalid or missing command-line arguments or config
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Validation rejected - the pre-tool-use validator blocked the invocation
    pub const VALIDATION_REJECTED: ExitCode = ExitCode(3);

    /// Scope violation - the agent modified files outside the step scope
    pub const SCOPE_VIOLATION: ExitCode = ExitCode(4);

    /// Budget exceeded - turn or time budget exhausted without a covering extension
    pub const BUDGET_EXCEEDED: ExitCode = ExitCode(5);

    /// Step file corrupt - the step file is unreadable and recovery is not invoked
    pub const STEP_FILE_CORRUPT: ExitCode = ExitCode(6);

    /// Lock held - another process holds the exclusive append lock
    pub const LOCK_HELD: ExitCode = ExitCode(9);

    /// Get the numeric exit code value.
    ///
    /// Use this with `std::process::exit()`.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Create an `ExitCode` from a raw i32 value.
    ///
    /// Prefer using the named constants when possible.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DesError {
    /// Map an error to its CLI exit code.
    #[must_use]
    pub fn to_exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::CLI_ARGS,
            Self::ValidationRejected { .. } | Self::Scope(_) => ExitCode::VALIDATION_REJECTED,
            Self::Budget(_) => ExitCode::BUDGET_EXCEEDED,
            Self::StepFile(StepFileError::Corrupt { .. })
            | Self::StepFile(StepFileError::NotFound { .. }) => ExitCode::STEP_FILE_CORRUPT,
            Self::StepFile(_) => ExitCode::VALIDATION_REJECTED,
            Self::Audit(_) | Self::Hooks(_) | Self::Io(_) => ExitCode::INTERNAL,
        }
    }
}
