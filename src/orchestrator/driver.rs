//! Agent driver port.
//!
//! The agent runs out-of-process; DES only observes its stream and its
//! termination. `CommandAgentDriver` spawns the step's declared command
//! and reads stdout as NDJSON, counting `tool_use` records as turns
//! against the governor. Anything that is not a known record is
//! tolerated as plain output.

use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

use des_governor::{Governor, ThresholdCrossing};
use des_step::{PhaseId, StepFile};
use des_utils::error::DesError;

/// What one agent run reported back through its stream.
#[derive(Debug, Clone, Default)]
pub struct AgentRunReport {
    pub modified_files: Vec<String>,
    pub transcript_path: Option<String>,
    pub test_results: Option<Value>,
    pub artifacts_created: Vec<String>,
    pub notes: Option<String>,
    /// Whether the agent claimed the phase complete before terminating.
    /// An unclaimed phase is left `IN_PROGRESS` and reads as abandoned.
    pub phase_completed: bool,
    /// Commit hash reported by the agent during the COMMIT phase.
    pub commit_hash: Option<String>,
    /// Threshold crossings observed while the run was ticking.
    pub crossings: Vec<ThresholdCrossing>,
}

/// Port through which the orchestrator runs one phase of agent work.
pub trait AgentDriver {
    fn run_phase(
        &mut self,
        step: &StepFile,
        phase: PhaseId,
        governor: &mut Governor,
    ) -> Result<AgentRunReport, DesError>;
}

/// Driver that spawns `task_specification.command` in a shell.
pub struct CommandAgentDriver {
    project_root: camino::Utf8PathBuf,
}

impl CommandAgentDriver {
    #[must_use]
    pub fn new(project_root: camino::Utf8PathBuf) -> Self {
        Self { project_root }
    }
}

impl AgentDriver for CommandAgentDriver {
    fn run_phase(
        &mut self,
        step: &StepFile,
        phase: PhaseId,
        governor: &mut Governor,
    ) -> Result<AgentRunReport, DesError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&step.task_specification.command)
            .current_dir(self.project_root.as_std_path())
            .env("DES_STEP_ID", step.task_specification.task_id.as_str())
            .env("DES_PHASE", phase.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let mut report = AgentRunReport::default();

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = line?;
                apply_stream_record(&line, governor, &mut report);
                if governor.budget_exceeded() {
                    // Stop issuing new turns; the process is not killed.
                    break;
                }
            }
        }

        let status = child.wait()?;
        if !status.success() {
            tracing::warn!(
                phase = %phase,
                code = status.code().unwrap_or(-1),
                "Agent command exited non-zero"
            );
        }

        report.crossings.extend(governor.poll());
        Ok(report)
    }
}

/// Interpret one NDJSON line from the agent stream.
fn apply_stream_record(line: &str, governor: &mut Governor, report: &mut AgentRunReport) {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return;
    };
    match value.get("type").and_then(Value::as_str) {
        Some("tool_use") => {
            report.crossings.extend(governor.on_turn());
        }
        Some("file_modified") => {
            if let Some(path) = value.get("path").and_then(Value::as_str) {
                report.modified_files.push(path.to_string());
            }
        }
        Some("test_results") => {
            let mut results = value.clone();
            if let Some(map) = results.as_object_mut() {
                map.remove("type");
            }
            report.test_results = Some(results);
        }
        Some("artifact") => {
            if let Some(path) = value.get("path").and_then(Value::as_str) {
                report.artifacts_created.push(path.to_string());
            }
        }
        Some("transcript") => {
            if let Some(path) = value.get("path").and_then(Value::as_str) {
                report.transcript_path = Some(path.to_string());
            }
        }
        Some("note") => {
            if let Some(text) = value.get("text").and_then(Value::as_str) {
                report.notes = Some(text.to_string());
            }
        }
        Some("phase_completed") => {
            report.phase_completed = true;
        }
        Some("commit") => {
            if let Some(hash) = value.get("hash").and_then(Value::as_str) {
                report.commit_hash = Some(hash.to_string());
            }
        }
        _ => {}
    }
}
