//! Step file persistence and cross-file invariant checks.

use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;

use des_utils::atomic_write::write_file_atomic;
use des_utils::error::StepFileError;

use crate::id::StepId;
use crate::model::{MappingType, StepFile};
use crate::phase::PhaseStatus;

/// Derive the step id from a step file path.
///
/// The file name must start with `NN-MM` (e.g. `03-02-execute-command.json`).
pub fn step_id_from_path(path: &Utf8Path) -> Result<StepId, StepFileError> {
    let stem = path
        .file_name()
        .ok_or_else(|| StepFileError::UnidentifiablePath {
            path: path.to_string(),
        })?;
    if stem.len() < 5 {
        return Err(StepFileError::UnidentifiablePath {
            path: path.to_string(),
        });
    }
    StepId::parse(&stem[..5]).map_err(|_| StepFileError::UnidentifiablePath {
        path: path.to_string(),
    })
}

/// Load and parse a step file.
///
/// A missing file and an unparseable file are distinct errors: the first
/// is a validation rejection, the second is fatal to the step and never
/// reaches the recovery handler.
pub fn load_step_file(path: &Utf8Path) -> Result<StepFile, StepFileError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StepFileError::NotFound {
                path: path.to_string(),
            }
        } else {
            StepFileError::Corrupt {
                path: path.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    serde_json::from_str(&content).map_err(|e| StepFileError::Corrupt {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Serialise a step file and replace the target atomically.
pub fn save_step_file_atomic(path: &Utf8Path, step: &StepFile) -> Result<(), StepFileError> {
    let mut content =
        serde_json::to_string_pretty(step).map_err(|e| StepFileError::WriteFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    content.push('\n');

    write_file_atomic(path, &content).map_err(|e| StepFileError::WriteFailed {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

static TEST_FN_RE: Lazy<Regex> = Lazy::new(|| {
    // Tolerant of pytest, Rust, and JS test sources.
    Regex::new(r"(?m)^\s*(?:async\s+)?(?:def|fn|function)\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(")
        .expect("valid regex")
});

/// Count test functions (`test_`-prefixed definitions) in a test source.
#[must_use]
pub fn count_test_functions(source: &str) -> usize {
    TEST_FN_RE
        .captures_iter(source)
        .filter(|c| c[1].starts_with("test_"))
        .count()
}

/// Whether a function definition with the exact name exists in the source.
#[must_use]
pub fn find_test_function(source: &str, name: &str) -> bool {
    TEST_FN_RE.captures_iter(source).any(|c| &c[1] == name)
}

/// Validate the append-only phase execution log.
///
/// At most one entry may be `IN_PROGRESS`, and only the final entry may
/// be in a non-terminal status.
pub fn validate_phase_log(step: &StepFile, path: &Utf8Path) -> Result<(), StepFileError> {
    let log = &step.tdd_cycle.phase_execution_log;

    let in_progress = log
        .iter()
        .filter(|e| e.status == PhaseStatus::InProgress)
        .count();
    if in_progress > 1 {
        return Err(StepFileError::InvariantViolated {
            path: path.to_string(),
            reason: format!("{in_progress} phases are IN_PROGRESS; at most one is allowed"),
        });
    }

    if let Some((idx, entry)) = log
        .iter()
        .enumerate()
        .find(|(_, e)| !e.status.is_terminal() && e.status != PhaseStatus::NotExecuted)
    {
        if idx != log.len() - 1 {
            return Err(StepFileError::InvariantViolated {
                path: path.to_string(),
                reason: format!(
                    "non-final log entry for {} is {}; only the final entry may be non-terminal",
                    entry.phase, entry.status
                ),
            });
        }
    }

    Ok(())
}

/// Validate scenario coverage across the step files of one feature.
///
/// The number of `feature`-typed steps must equal the number of test
/// functions in the shared acceptance-test source, and each
/// `feature`-typed step must carry a non-empty `scenario_function`
/// (non-feature steps must not).
pub fn validate_feature_scenario_coverage(
    steps: &[StepFile],
    acceptance_test_source: &str,
) -> Result<(), StepFileError> {
    let mut feature_steps = 0usize;

    for step in steps {
        let path = step.task_specification.task_id.to_string();
        let Some(scenario) = step.tdd_cycle.acceptance_test.mapped_scenario.as_ref() else {
            continue;
        };
        match scenario.mapping_type {
            MappingType::Feature => {
                feature_steps += 1;
                if scenario.scenario_function.is_empty() {
                    return Err(StepFileError::InvariantViolated {
                        path,
                        reason: "feature-typed step has an empty scenario_function".to_string(),
                    });
                }
                if !find_test_function(acceptance_test_source, &scenario.scenario_function) {
                    return Err(StepFileError::InvariantViolated {
                        path,
                        reason: format!(
                            "scenario_function '{}' not found in the acceptance-test file",
                            scenario.scenario_function
                        ),
                    });
                }
            }
            MappingType::Infrastructure | MappingType::Refactoring => {
                if !scenario.scenario_function.is_empty() {
                    return Err(StepFileError::InvariantViolated {
                        path,
                        reason: format!(
                            "{} step must have an empty scenario_function",
                            scenario.mapping_type.as_str()
                        ),
                    });
                }
            }
        }
    }

    let test_count = count_test_functions(acceptance_test_source);
    if feature_steps != test_count {
        return Err(StepFileError::InvariantViolated {
            path: String::new(),
            reason: format!(
                "{feature_steps} feature-typed step(s) but {test_count} acceptance-test function(s)"
            ),
        });
    }

    Ok(())
}
