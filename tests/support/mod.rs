//! Shared fixtures for the integration suites.
//!
//! Each test binary compiles its own copy; not every binary uses every
//! helper.
#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use tempfile::TempDir;

use nwave_des::governor::Governor;
use nwave_des::orchestrator::{AgentDriver, AgentRunReport};
use nwave_des::step::{PhaseId, StepFile};
use nwave_des::utils::error::DesError;

pub const ACCEPTANCE_TEST_SOURCE: &str = "\
def test_scenario_001_execute_command(runner):
    assert runner.run()
";

/// A project tree with one feature and one step file.
pub struct Fixture {
    _dir: TempDir,
    pub root: Utf8PathBuf,
    pub audit_dir: Utf8PathBuf,
    pub step_path: Utf8PathBuf,
}

pub fn fixture() -> Fixture {
    fixture_with_scope(&["src/des/**"])
}

pub fn fixture_with_scope(allow_paths: &[&str]) -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

    std::fs::create_dir_all(root.join("tests/acceptance").as_std_path()).unwrap();
    std::fs::write(
        root.join("tests/acceptance/test_audit.py").as_std_path(),
        ACCEPTANCE_TEST_SOURCE,
    )
    .unwrap();

    std::fs::create_dir_all(root.join("src/des").as_std_path()).unwrap();
    std::fs::write(root.join("src/des/x.py").as_std_path(), b"x = 1\n").unwrap();
    std::fs::write(root.join("README.md").as_std_path(), b"# readme\n").unwrap();

    let steps_dir = root.join("steps/audit-log-refactor");
    std::fs::create_dir_all(steps_dir.as_std_path()).unwrap();
    let step_path = steps_dir.join("03-02-execute-command.json");
    let step = json!({
        "task_specification": {
            "task_id": "03-02",
            "agent": "software-crafter",
            "description": "Execute command scenario",
            "command": "true",
            "acceptance_test_scenario": "test_scenario_001_execute_command",
            "acceptance_test_file": "tests/acceptance/test_audit.py"
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
        "scope": {"allow_paths": allow_paths},
        "quality_gates": {"refactor_level": 1}
    });
    std::fs::write(
        step_path.as_std_path(),
        serde_json::to_string_pretty(&step).unwrap(),
    )
    .unwrap();

    let audit_dir = root.join(".nwave/des/logs");

    Fixture {
        _dir: dir,
        root,
        audit_dir,
        step_path,
    }
}

pub fn write_config(root: &Utf8Path, content: &str) {
    let path = root.join(".nwave/des-config.json");
    std::fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    std::fs::write(path.as_std_path(), content).unwrap();
}

/// Driver whose behaviour is a closure over (step, phase, governor).
pub struct ScriptedDriver<F>(pub F);

impl<F> AgentDriver for ScriptedDriver<F>
where
    F: FnMut(&StepFile, PhaseId, &mut Governor) -> Result<AgentRunReport, DesError>,
{
    fn run_phase(
        &mut self,
        step: &StepFile,
        phase: PhaseId,
        governor: &mut Governor,
    ) -> Result<AgentRunReport, DesError> {
        (self.0)(step, phase, governor)
    }
}

/// A clean, successful phase report with phase-appropriate test results.
pub fn passing_report(phase: PhaseId) -> AgentRunReport {
    let test_status = match phase {
        PhaseId::RedAcceptance | PhaseId::RedUnit => Some("failed"),
        PhaseId::GreenUnit | PhaseId::Validate | PhaseId::GreenAcceptance => Some("passed"),
        _ => None,
    };
    AgentRunReport {
        modified_files: vec!["src/des/x.py".to_string()],
        transcript_path: Some("/tmp/transcript.jsonl".to_string()),
        test_results: test_status.map(|s| json!({"status": s})),
        artifacts_created: Vec::new(),
        notes: None,
        phase_completed: true,
        commit_hash: (phase == PhaseId::Commit).then(|| "deadbeef42".to_string()),
        crossings: Vec::new(),
    }
}
