//! Pre-tool-use validation.
//!
//! Runs before every agent invocation. All rules must hold for the
//! invocation to be permitted:
//!
//! 1. The prompt references a step file; the file exists and parses.
//! 2. The step file's `task_id` matches the step id derived from the path.
//! 3. The declared agent is a recognised agent identifier.
//! 4. Feature-typed steps reference an existing acceptance-test function.
//! 5. The mandatory prompt sections are present.
//! 6. The current phase is not a terminal failure state.
//!
//! Rules 1-3 are plain fatal errors; rules 4-6 are fatal but carry
//! recovery hints surfaced to the caller.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use des_step::{
    MappingType, PhaseStatus, StepFile, find_test_function, load_step_file, step_id_from_path,
};
use des_utils::error::StepFileError;

/// Agents DES will dispatch to unless the config overrides the list.
pub const DEFAULT_RECOGNIZED_AGENTS: &[&str] = &[
    "software-crafter",
    "acceptance-designer",
    "solution-architect",
    "feature-completion-coordinator",
    "researcher",
    "troubleshooter",
];

/// Section headings every rendered prompt must contain.
pub const MANDATORY_SECTIONS: &[&str] = &["## Task Specification", "## Phase Tracking", "## Scope"];

/// Consecutive failures after which a phase is a terminal failure state.
pub const TERMINAL_FAILURE_THRESHOLD: u32 = 2;

/// A rendered agent prompt awaiting validation.
#[derive(Debug, Clone, Serialize)]
pub struct Prompt {
    pub command: String,
    pub agent: String,
    pub step_file_path: Utf8PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_name: Option<String>,
    pub body: String,
}

/// Which rule a validation error violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationRule {
    StepFileMissing,
    StepFileCorrupt,
    TaskIdMismatch,
    UnrecognizedAgent,
    ScenarioFunctionMissing,
    MissingSection,
    TerminalPhase,
}

/// One failed rule with optional recovery hints.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub rule: ValidationRule,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recovery_hints: Vec<String>,
}

impl ValidationError {
    fn fatal(rule: ValidationRule, message: String) -> Self {
        Self {
            rule,
            message,
            recovery_hints: Vec::new(),
        }
    }

    fn hinted(rule: ValidationRule, message: String, hints: Vec<String>) -> Self {
        Self {
            rule,
            message,
            recovery_hints: hints,
        }
    }
}

/// Validation verdict: `allowed` is true only when `errors` is empty.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub allowed: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationOutcome {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            allowed: errors.is_empty(),
            errors,
        }
    }

    /// Error messages, one line each, for audit payloads.
    #[must_use]
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.rule, e.message))
            .collect()
    }
}

/// Pre-tool-use validator bound to a project root.
pub struct Validator {
    project_root: Utf8PathBuf,
    recognized_agents: Vec<String>,
}

impl Validator {
    #[must_use]
    pub fn new(project_root: Utf8PathBuf) -> Self {
        Self {
            project_root,
            recognized_agents: DEFAULT_RECOGNIZED_AGENTS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Replace the recognised agent list (config override).
    #[must_use]
    pub fn with_recognized_agents(mut self, agents: Vec<String>) -> Self {
        self.recognized_agents = agents;
        self
    }

    /// Validate a rendered prompt against its step file.
    #[must_use]
    pub fn validate_prompt(&self, prompt: &Prompt) -> ValidationOutcome {
        let mut errors = Vec::new();

        // Rule 1: the referenced step file exists and parses.
        let step = match load_step_file(&prompt.step_file_path) {
            Ok(step) => step,
            Err(StepFileError::NotFound { path }) => {
                errors.push(ValidationError::fatal(
                    ValidationRule::StepFileMissing,
                    format!("step file does not exist: {path}"),
                ));
                return ValidationOutcome::from_errors(errors);
            }
            Err(e) => {
                errors.push(ValidationError::fatal(
                    ValidationRule::StepFileCorrupt,
                    e.to_string(),
                ));
                return ValidationOutcome::from_errors(errors);
            }
        };

        // Rule 2: task_id matches the id derived from the file path.
        match step_id_from_path(&prompt.step_file_path) {
            Ok(path_id) if path_id == step.task_specification.task_id => {}
            Ok(path_id) => errors.push(ValidationError::fatal(
                ValidationRule::TaskIdMismatch,
                format!(
                    "task_id '{}' does not match '{}' from the file path",
                    step.task_specification.task_id, path_id
                ),
            )),
            Err(e) => errors.push(ValidationError::fatal(
                ValidationRule::TaskIdMismatch,
                e.to_string(),
            )),
        }

        // Rule 3: the declared agent is recognised.
        if !self.recognized_agents.iter().any(|a| a == &prompt.agent) {
            errors.push(ValidationError::fatal(
                ValidationRule::UnrecognizedAgent,
                format!("'{}' is not a recognised agent identifier", prompt.agent),
            ));
        }

        // Rule 4: feature-typed steps bind to a real test function.
        self.check_scenario_function(&step, &mut errors);

        // Rule 5: mandatory prompt sections.
        for section in MANDATORY_SECTIONS {
            if !prompt.body.contains(section) {
                errors.push(ValidationError::hinted(
                    ValidationRule::MissingSection,
                    format!("prompt is missing the mandatory section '{section}'"),
                    vec![format!(
                        "Re-render the prompt; '{section}' is part of the fixed checklist"
                    )],
                ));
            }
        }

        // Rule 6: the current phase is not a terminal failure state.
        let current = step.state.current_phase;
        if step.phase_status(current) == PhaseStatus::Fail
            && step.state.consecutive_failures >= TERMINAL_FAILURE_THRESHOLD
            && !step.state.allowed_despite_failure
        {
            errors.push(ValidationError::hinted(
                ValidationRule::TerminalPhase,
                format!(
                    "phase {current} failed {} consecutive time(s) and is terminal",
                    step.state.consecutive_failures
                ),
                vec![
                    "Apply the recovery suggestions recorded in the step state".to_string(),
                    "Request an extension covering the failed phase before re-running".to_string(),
                ],
            ));
        }

        ValidationOutcome::from_errors(errors)
    }

    fn check_scenario_function(&self, step: &StepFile, errors: &mut Vec<ValidationError>) {
        let Some(scenario) = step.tdd_cycle.acceptance_test.mapped_scenario.as_ref() else {
            return;
        };
        if scenario.mapping_type != MappingType::Feature {
            return;
        }

        if scenario.scenario_function.is_empty() {
            errors.push(ValidationError::hinted(
                ValidationRule::ScenarioFunctionMissing,
                "feature-typed step declares no scenario_function".to_string(),
                vec!["Set mapped_scenario.scenario_function to the acceptance-test function"
                    .to_string()],
            ));
            return;
        }

        let Some(test_file) = step.task_specification.acceptance_test_file.as_deref() else {
            errors.push(ValidationError::hinted(
                ValidationRule::ScenarioFunctionMissing,
                "feature-typed step declares no acceptance_test_file".to_string(),
                vec!["Set task_specification.acceptance_test_file".to_string()],
            ));
            return;
        };

        let test_path = self.project_root.join(test_file);
        match std::fs::read_to_string(test_path.as_std_path()) {
            Ok(source) if find_test_function(&source, &scenario.scenario_function) => {}
            Ok(_) => errors.push(ValidationError::hinted(
                ValidationRule::ScenarioFunctionMissing,
                format!(
                    "scenario_function '{}' not found in {test_file}",
                    scenario.scenario_function
                ),
                vec![
                    format!("Add the function to {test_file}"),
                    "Or correct mapped_scenario.scenario_function in the step file".to_string(),
                ],
            )),
            Err(e) => errors.push(ValidationError::hinted(
                ValidationRule::ScenarioFunctionMissing,
                format!("cannot read acceptance-test file {test_file}: {e}"),
                vec!["Check task_specification.acceptance_test_file".to_string()],
            )),
        }
    }

    /// The project root this validator reads test files relative to.
    #[must_use]
    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use des_step::save_step_file_atomic;
    use tempfile::TempDir;

    const TEST_SOURCE: &str = "def test_scenario_001_execute_command():\n    pass\n";

    fn project() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("tests/acceptance").as_std_path()).unwrap();
        std::fs::write(
            root.join("tests/acceptance/test_execute.py").as_std_path(),
            TEST_SOURCE,
        )
        .unwrap();
        std::fs::create_dir_all(root.join("steps").as_std_path()).unwrap();
        (dir, root)
    }

    fn write_step(root: &Utf8Path, file_name: &str, step: &serde_json::Value) -> Utf8PathBuf {
        let path = root.join("steps").join(file_name);
        let parsed: StepFile = serde_json::from_value(step.clone()).unwrap();
        save_step_file_atomic(&path, &parsed).unwrap();
        path
    }

    fn sample_step_value() -> serde_json::Value {
        serde_json::json!({
            "task_specification": {
                "task_id": "03-02",
                "agent": "software-crafter",
                "command": "run",
                "acceptance_test_file": "tests/acceptance/test_execute.py"
            },
            "tdd_cycle": {
                "acceptance_test": {
                    "mapped_scenario": {
                        "mapping_type": "feature",
                        "scenario_function": "test_scenario_001_execute_command",
                        "scenario_description": "Command executes"
                    }
                },
                "phase_execution_log": []
            },
            "scope": {"allow_paths": ["src/**"]}
        })
    }

    fn prompt_for(path: &Utf8Path) -> Prompt {
        Prompt {
            command: "execute-step".to_string(),
            agent: "software-crafter".to_string(),
            step_file_path: path.to_owned(),
            feature_name: Some("auth".to_string()),
            body: "## Task Specification\n...\n## Phase Tracking\n...\n## Scope\n...".to_string(),
        }
    }

    #[test]
    fn test_valid_prompt_is_allowed() {
        let (_dir, root) = project();
        let path = write_step(&root, "03-02-execute.json", &sample_step_value());

        let outcome = Validator::new(root).validate_prompt(&prompt_for(&path));
        assert!(outcome.allowed, "errors: {:?}", outcome.errors);
    }

    #[test]
    fn test_missing_step_file_is_fatal() {
        let (_dir, root) = project();
        let missing = root.join("steps/03-09-missing.json");

        let outcome = Validator::new(root).validate_prompt(&prompt_for(&missing));
        assert!(!outcome.allowed);
        assert_eq!(outcome.errors[0].rule, ValidationRule::StepFileMissing);
        assert!(outcome.errors[0].recovery_hints.is_empty());
    }

    #[test]
    fn test_corrupt_step_file_is_fatal() {
        let (_dir, root) = project();
        let path = root.join("steps/03-02-bad.json");
        std::fs::write(path.as_std_path(), "{broken").unwrap();

        let outcome = Validator::new(root).validate_prompt(&prompt_for(&path));
        assert!(!outcome.allowed);
        assert_eq!(outcome.errors[0].rule, ValidationRule::StepFileCorrupt);
    }

    #[test]
    fn test_task_id_mismatch() {
        let (_dir, root) = project();
        // File name says 04-01; task_id says 03-02.
        let path = write_step(&root, "04-01-execute.json", &sample_step_value());

        let outcome = Validator::new(root).validate_prompt(&prompt_for(&path));
        assert!(!outcome.allowed);
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.rule == ValidationRule::TaskIdMismatch));
    }

    #[test]
    fn test_unrecognized_agent() {
        let (_dir, root) = project();
        let path = write_step(&root, "03-02-execute.json", &sample_step_value());

        let mut prompt = prompt_for(&path);
        prompt.agent = "rogue-agent".to_string();

        let outcome = Validator::new(root).validate_prompt(&prompt);
        assert!(!outcome.allowed);
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.rule == ValidationRule::UnrecognizedAgent));
    }

    #[test]
    fn test_recognized_agent_override() {
        let (_dir, root) = project();
        let path = write_step(&root, "03-02-execute.json", &sample_step_value());

        let mut prompt = prompt_for(&path);
        prompt.agent = "rogue-agent".to_string();

        let outcome = Validator::new(root)
            .with_recognized_agents(vec!["rogue-agent".to_string()])
            .validate_prompt(&prompt);
        assert!(outcome.allowed, "errors: {:?}", outcome.errors);
    }

    #[test]
    fn test_missing_scenario_function_carries_hints() {
        let (_dir, root) = project();
        let mut value = sample_step_value();
        value["tdd_cycle"]["acceptance_test"]["mapped_scenario"]["scenario_function"] =
            "test_scenario_404".into();
        let path = write_step(&root, "03-02-execute.json", &value);

        let outcome = Validator::new(root).validate_prompt(&prompt_for(&path));
        assert!(!outcome.allowed);
        let error = outcome
            .errors
            .iter()
            .find(|e| e.rule == ValidationRule::ScenarioFunctionMissing)
            .unwrap();
        assert!(!error.recovery_hints.is_empty());
    }

    #[test]
    fn test_infrastructure_step_skips_scenario_check() {
        let (_dir, root) = project();
        let mut value = sample_step_value();
        value["tdd_cycle"]["acceptance_test"]["mapped_scenario"] = serde_json::json!({
            "mapping_type": "infrastructure",
            "scenario_function": "",
            "scenario_description": "wiring"
        });
        let path = write_step(&root, "03-02-execute.json", &value);

        let outcome = Validator::new(root).validate_prompt(&prompt_for(&path));
        assert!(outcome.allowed, "errors: {:?}", outcome.errors);
    }

    #[test]
    fn test_missing_section_is_reported_per_section() {
        let (_dir, root) = project();
        let path = write_step(&root, "03-02-execute.json", &sample_step_value());

        let mut prompt = prompt_for(&path);
        prompt.body = "## Task Specification\nonly".to_string();

        let outcome = Validator::new(root).validate_prompt(&prompt);
        let missing: Vec<_> = outcome
            .errors
            .iter()
            .filter(|e| e.rule == ValidationRule::MissingSection)
            .collect();
        assert_eq!(missing.len(), 2);
    }

    #[test]
    fn test_terminal_failure_state_blocks() {
        let (_dir, root) = project();
        let mut value = sample_step_value();
        value["state"] = serde_json::json!({
            "current_phase": "GREEN_UNIT",
            "consecutive_failures": 2
        });
        value["tdd_cycle"]["phase_execution_log"] = serde_json::json!([
            {"phase": "GREEN_UNIT", "status": "FAIL"}
        ]);
        let path = write_step(&root, "03-02-execute.json", &value);

        let outcome = Validator::new(root).validate_prompt(&prompt_for(&path));
        assert!(!outcome.allowed);
        let error = outcome
            .errors
            .iter()
            .find(|e| e.rule == ValidationRule::TerminalPhase)
            .unwrap();
        assert!(!error.recovery_hints.is_empty());
    }

    #[test]
    fn test_allowed_despite_failure_unblocks() {
        let (_dir, root) = project();
        let mut value = sample_step_value();
        value["state"] = serde_json::json!({
            "current_phase": "GREEN_UNIT",
            "consecutive_failures": 2,
            "allowed_despite_failure": true
        });
        value["tdd_cycle"]["phase_execution_log"] = serde_json::json!([
            {"phase": "GREEN_UNIT", "status": "FAIL"}
        ]);
        let path = write_step(&root, "03-02-execute.json", &value);

        let outcome = Validator::new(root).validate_prompt(&prompt_for(&path));
        assert!(outcome.allowed, "errors: {:?}", outcome.errors);
    }
}
