//! Subagent-stop validation.
//!
//! Runs after every agent termination and inspects the step file and
//! filesystem diff. Checks run in a fixed order: abandoned phases,
//! missing artefacts, scope violations, quality gates, budget. The
//! first failing check classifies the failure for recovery handling;
//! all failing checks contribute validation errors.

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use des_recovery::FailureType;
use des_scope::ScopeMatcher;
use des_step::{PhaseExecutionEntry, PhaseId, PhaseStatus, StepFile, StepId};
use des_utils::error::DesError;

/// What the host reports when a subagent terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopContext {
    pub project_id: String,
    pub step_id: StepId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
}

/// Everything the orchestrator needs to emit events and update state.
#[derive(Debug, Clone)]
pub struct StopReport {
    pub passed: bool,
    /// The phase the agent was finishing.
    pub phase: PhaseId,
    pub validation_errors: Vec<String>,
    pub abandoned_phases: Vec<PhaseId>,
    pub missing_artifacts: Vec<String>,
    /// Out-of-scope paths, one `SCOPE_VIOLATION` event each.
    pub scope_violations: Vec<String>,
    pub failure_type: Option<FailureType>,
}

/// Post-run inspector bound to a project root.
pub struct SubagentStopService {
    project_root: camino::Utf8PathBuf,
}

impl SubagentStopService {
    #[must_use]
    pub fn new(project_root: camino::Utf8PathBuf) -> Self {
        Self { project_root }
    }

    /// Run all checks against the step file and the reported diff.
    ///
    /// `budget_exceeded` is the governor's latch for the finished run.
    pub fn evaluate(
        &self,
        step: &StepFile,
        ctx: &StopContext,
        budget_exceeded: bool,
    ) -> Result<StopReport, DesError> {
        let abandoned = step.in_progress_phases();
        let phase = step.state.current_phase;

        let mut errors = Vec::new();
        let mut failure: Option<FailureType> = None;
        // First failing check in order classifies the failure.
        fn record_failure(f: FailureType, failure: &mut Option<FailureType>) {
            failure.get_or_insert(f);
        }

        // 1. Abandoned phases.
        for p in &abandoned {
            errors.push(format!("abandoned_phase:{p}"));
        }
        if !abandoned.is_empty() {
            record_failure(FailureType::AbandonedPhase, &mut failure);
        }

        // 2. Missing artefacts for the completed phase.
        let mut missing = Vec::new();
        for artifact in step.expected_artifacts(phase) {
            let on_disk = self.project_root.join(artifact);
            if !on_disk.as_std_path().exists() {
                missing.push(artifact.clone());
                errors.push(format!("missing_artifact:{artifact}"));
            }
        }
        if !missing.is_empty() {
            record_failure(FailureType::MissingArtifacts, &mut failure);
        }

        // 3. Scope violations, one error per offending path.
        let matcher = ScopeMatcher::new(&self.project_root, &step.scope.allow_paths)?;
        let violations = matcher.violations(&ctx.modified_files);
        for path in &violations {
            errors.push(format!("scope:{path}"));
        }
        if !violations.is_empty() {
            record_failure(FailureType::ScopeViolation, &mut failure);
        }

        // 4. Phase-specific quality gates.
        let gate_errors = evaluate_quality_gates(step, phase);
        if !gate_errors.is_empty() {
            record_failure(FailureType::QualityGateFailure, &mut failure);
            errors.extend(gate_errors);
        }

        // 5. Outstanding budget flag from the governor.
        if budget_exceeded {
            record_failure(FailureType::Timeout, &mut failure);
            errors.push(format!("budget_exceeded:{phase}"));
        }

        Ok(StopReport {
            passed: errors.is_empty(),
            phase,
            validation_errors: errors,
            abandoned_phases: abandoned,
            missing_artifacts: missing,
            scope_violations: violations,
            failure_type: failure,
        })
    }
}

/// Evaluate the step's quality gates for a finished phase.
///
/// Red phases must show failing tests first; green phases must show
/// passing tests. The mock-boundary gate rejects mocks declared inside
/// the hexagon (any `domain` path segment).
fn evaluate_quality_gates(step: &StepFile, phase: PhaseId) -> Vec<String> {
    let gates = &step.quality_gates;
    let mut errors = Vec::new();

    let entry = step.latest_entry(phase);
    let test_status = entry.and_then(test_status_of);

    match phase {
        PhaseId::RedAcceptance if gates.acceptance_test_must_fail_first => {
            if test_status.as_deref() != Some("failed") {
                errors.push("quality_gate:acceptance_test_must_fail_first".to_string());
            }
        }
        PhaseId::RedUnit if gates.unit_tests_must_fail_first => {
            if test_status.as_deref() != Some("failed") {
                errors.push("quality_gate:unit_tests_must_fail_first".to_string());
            }
        }
        PhaseId::GreenUnit | PhaseId::GreenAcceptance | PhaseId::Validate => {
            if test_status.as_deref() != Some("passed") {
                errors.push(format!("quality_gate:tests_must_pass:{phase}"));
            }
        }
        _ => {}
    }

    if gates.no_mocks_inside_hexagon {
        for boundary in &step.tdd_cycle.mock_boundaries {
            let inside = Utf8Path::new(boundary)
                .components()
                .any(|c| c.as_str() == "domain");
            if inside {
                errors.push(format!("quality_gate:no_mocks_inside_hexagon:{boundary}"));
            }
        }
    }

    errors
}

fn test_status_of(entry: &PhaseExecutionEntry) -> Option<String> {
    entry
        .test_results
        .as_ref()
        .and_then(|v| v.get("status"))
        .and_then(|s| s.as_str())
        .map(ToString::to_string)
}

/// Apply a stop report to the step state: finish the phase entry and
/// maintain the retry ledger.
///
/// On the first failure the step may be re-attempted once; on the
/// second consecutive failure `allowed_despite_failure` is recorded
/// only when a covering extension was granted.
pub fn apply_outcome(
    step: &mut StepFile,
    report: &StopReport,
    now: DateTime<Utc>,
    extension_granted: bool,
) {
    let status = if report.passed {
        PhaseStatus::Pass
    } else {
        PhaseStatus::Fail
    };

    // The latest entry for the adjudicated phase is the active attempt;
    // the stop verdict is the final authority over its status.
    if let Some(entry) = step.latest_entry_mut(report.phase) {
        entry.status = status;
        entry.ended_at = Some(now);
        if let Some(started) = entry.started_at {
            entry.duration_minutes = Some((now - started).num_milliseconds() as f64 / 60_000.0);
        }
    }

    if report.passed {
        step.state.consecutive_failures = 0;
        step.state.last_outcome = Some("PASS".to_string());
        step.state.allowed_despite_failure = false;
    } else {
        step.state.consecutive_failures += 1;
        step.state.last_outcome = Some("FAIL".to_string());
        if step.state.consecutive_failures >= 2 && extension_granted {
            step.state.allowed_despite_failure = true;
        }
    }
}
