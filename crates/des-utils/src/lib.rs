pub mod atomic_write;
pub mod clock;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod paths;

pub use error::{DesError, ErrorCategory, UserFriendlyError};
pub use exit_codes::ExitCode;
