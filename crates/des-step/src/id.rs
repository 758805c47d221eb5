//! Step id grammar and parsing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use des_utils::error::StepFileError;

static STEP_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{2}-[0-9]{2}$").expect("valid regex"));

/// Composite step identifier of the form `NN-MM`.
///
/// The first pair is the roadmap position, the second the sub-step.
/// Exactly two digits each: `03-02` is valid; `1-1`, `01-1`, and
/// `01-001` are rejected.
///
/// # Example
///
/// ```rust
/// use des_step::StepId;
///
/// let id: StepId = "03-02".parse().unwrap();
/// assert_eq!(id.as_str(), "03-02");
/// assert!("01-001".parse::<StepId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId(String);

impl StepId {
    /// Parse a step id, rejecting anything outside the `NN-MM` grammar.
    pub fn parse(value: &str) -> Result<Self, StepFileError> {
        if STEP_ID_RE.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(StepFileError::InvalidStepId {
                value: value.to_string(),
            })
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StepId {
    type Err = StepFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StepId {
    type Error = StepFileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StepId> for String {
    fn from(id: StepId) -> Self {
        id.0
    }
}
