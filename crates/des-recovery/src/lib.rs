//! Recovery guidance synthesis.
//!
//! When a step fails, the failure is classified and turned into
//! WHY/HOW/ACTION suggestions persisted into `state.recovery_suggestions`
//! so the next invocation starts from an explanation instead of a stack
//! trace. `handle_failure` is idempotent per `(step, failure_type)`:
//! repeated invocation overwrites the suggestions with the latest
//! templates.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use des_step::{PhaseId, StepFile, load_step_file, save_step_file_atomic};
use des_utils::error::DesError;

/// Classification of a step failure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureType {
    AbandonedPhase,
    MissingArtifacts,
    Timeout,
    ScopeViolation,
    QualityGateFailure,
    Unknown,
}

/// Context fields available to the suggestion templates.
///
/// Missing fields degrade gracefully to generic phrasing.
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    pub phase: Option<PhaseId>,
    pub step_file: Option<String>,
    pub transcript_path: Option<String>,
    pub missing_artifacts: Vec<String>,
    pub violating_paths: Vec<String>,
    pub details: Option<String>,
}

/// Compose one suggestion in the canonical three-section shape.
#[must_use]
pub fn format_suggestion(why: &str, how: &str, action: &str) -> String {
    format!("WHY: {why}\n\nHOW: {how}\n\nACTION: {action}")
}

fn phase_name(ctx: &FailureContext) -> String {
    ctx.phase
        .map_or_else(|| "the current phase".to_string(), |p| p.as_str().to_string())
}

fn step_name(ctx: &FailureContext) -> String {
    ctx.step_file
        .clone()
        .unwrap_or_else(|| "the step file".to_string())
}

fn transcript_hint(ctx: &FailureContext) -> String {
    ctx.transcript_path.as_ref().map_or_else(
        || "the agent transcript".to_string(),
        |p| format!("the transcript at {p}"),
    )
}

/// Synthesise suggestions for a failure.
///
/// Returns at least three suggestions for `abandoned_phase` and
/// `unknown`, at least two otherwise.
#[must_use]
pub fn generate_recovery_suggestions(failure: FailureType, ctx: &FailureContext) -> Vec<String> {
    let phase = phase_name(ctx);
    let step = step_name(ctx);
    let transcript = transcript_hint(ctx);

    match failure {
        FailureType::AbandonedPhase => vec![
            format_suggestion(
                &format!("Phase {phase} was left IN_PROGRESS when the agent terminated."),
                &format!("Read {transcript} to find where the agent stopped working on {phase}."),
                &format!(
                    "Reset {phase} to NOT_EXECUTED in {step} and re-run the step from that phase."
                ),
            ),
            format_suggestion(
                "An abandoned phase usually means the agent hit its context or turn limit mid-phase.",
                "Compare the phase's started_at with the agent's last activity to estimate where the budget ran out.",
                "Request a turn extension before re-running if the phase was close to completion.",
            ),
            format_suggestion(
                "Partial work from the abandoned attempt may still be on disk.",
                &format!("Diff the working tree against the declared scope of {step}."),
                "Keep compatible partial work, revert the rest, then restart the phase cleanly.",
            ),
        ],
        FailureType::MissingArtifacts => {
            let listing = if ctx.missing_artifacts.is_empty() {
                "the artefacts the step declares as expected".to_string()
            } else {
                ctx.missing_artifacts.join(", ")
            };
            vec![
                format_suggestion(
                    &format!("Phase {phase} completed without producing: {listing}."),
                    &format!("Check {transcript} for the commands that should have written them."),
                    "Re-run the phase; the declared artefacts must exist on disk before the phase can pass.",
                ),
                format_suggestion(
                    "Artefacts may have been written outside the expected paths.",
                    &format!("Search the working tree for files created during {phase}."),
                    &format!("Move misplaced artefacts to the paths declared in {step}, or fix the declaration."),
                ),
            ]
        }
        FailureType::Timeout => vec![
            format_suggestion(
                &format!("Phase {phase} exceeded its turn or time budget."),
                &format!("Review {transcript} for repeated attempts or waiting on external systems."),
                "Request an extension with a concrete justification, or split the step into smaller steps.",
            ),
            format_suggestion(
                "Budgets bound each phase so one stuck phase cannot consume the whole run.",
                "Compare turns used against the phase budget to see how far over the phase went.",
                "Raise the phase budget in the step file if this phase is legitimately larger than planned.",
            ),
        ],
        FailureType::ScopeViolation => {
            let listing = if ctx.violating_paths.is_empty() {
                "paths outside the allow-list".to_string()
            } else {
                ctx.violating_paths.join(", ")
            };
            vec![
                format_suggestion(
                    &format!("The agent modified {listing}, outside the step's declared scope."),
                    &format!("Compare the modified paths against scope.allow_paths in {step}."),
                    "Revert the out-of-scope changes, then re-run the step.",
                ),
                format_suggestion(
                    "Scope violations often mean the step's allow-list is narrower than the work requires.",
                    "Decide whether the out-of-scope edit was necessary for the scenario.",
                    &format!("If it was, widen scope.allow_paths in {step} before re-running."),
                ),
            ]
        }
        FailureType::QualityGateFailure => vec![
            format_suggestion(
                &format!("A quality gate evaluated false after {phase}."),
                "Check which gate failed: tests that must fail first, forbidden mocks, or refactor level.",
                &format!("Fix the gate's precondition and re-run {phase}."),
            ),
            format_suggestion(
                "Gates enforce the TDD discipline; skipping them defeats the phase ordering.",
                &format!("Read the gate configuration under quality_gates in {step}."),
                "Only relax a gate in the step file when the planning stage signed off on it.",
            ),
        ],
        FailureType::Unknown => vec![
            format_suggestion(
                "The failure did not match a known classification.",
                &format!("Read {transcript} end-to-end for the first error."),
                "Re-run the step once; transient environment errors often clear.",
            ),
            format_suggestion(
                "Unknown failures can come from the environment rather than the agent.",
                "Check disk space, file permissions, and the audit log for dropped events.",
                "Fix any environment problem before re-running.",
            ),
            format_suggestion(
                &format!("The step state in {step} may be stale."),
                "Validate the step file parses and its phase log has at most one active phase.",
                "Repair the step state, then re-run from the last passed phase.",
            ),
        ],
    }
}

/// Classify, synthesise, persist.
///
/// Reads the step file, generates suggestions, overwrites
/// `state.recovery_suggestions`, and writes the file back atomically.
/// Returns the updated step.
pub fn handle_failure(
    step_file_path: &Utf8Path,
    failure: FailureType,
    ctx: &FailureContext,
) -> Result<StepFile, DesError> {
    let mut step = load_step_file(step_file_path)?;

    let mut full_ctx = ctx.clone();
    if full_ctx.step_file.is_none() {
        full_ctx.step_file = Some(step_file_path.to_string());
    }
    if full_ctx.phase.is_none() {
        full_ctx.phase = Some(step.state.current_phase);
    }

    step.state.recovery_suggestions = generate_recovery_suggestions(failure, &full_ctx);
    step.state.last_outcome = Some(failure.to_string());

    save_step_file_atomic(step_file_path, &step)?;
    Ok(step)
}
