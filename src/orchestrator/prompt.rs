//! Agent prompt composition.
//!
//! The rendered prompt carries the fixed section checklist the
//! pre-tool-use validator requires: task specification, phase tracking
//! reference, and scope declaration.

use des_step::{PhaseId, StepFile};

/// Compose the prompt body for a step.
#[must_use]
pub fn compose_prompt_body(step: &StepFile) -> String {
    let spec = &step.task_specification;
    let mut body = String::new();

    body.push_str("## Task Specification\n\n");
    body.push_str(&format!("- Step: {}\n", spec.task_id));
    body.push_str(&format!("- Agent: {}\n", spec.agent));
    if !spec.description.is_empty() {
        body.push_str(&format!("- Description: {}\n", spec.description));
    }
    body.push_str(&format!("- Command: {}\n", spec.command));
    if let Some(file) = spec.acceptance_test_file.as_deref() {
        body.push_str(&format!("- Acceptance test file: {file}\n"));
    }
    if let Some(scenario) = spec.acceptance_test_scenario.as_deref() {
        body.push_str(&format!("- Acceptance test scenario: {scenario}\n"));
    }

    body.push_str("\n## Phase Tracking\n\n");
    body.push_str(&format!("Current phase: {}\n\n", step.state.current_phase));
    let gates = &step.quality_gates;
    for phase in PhaseId::ORDER {
        if !phase.is_mandatory(gates.refactor_level, gates.all_phases_mandatory) {
            continue;
        }
        body.push_str(&format!("- {}: {}\n", phase, step.phase_status(phase)));
    }
    body.push_str(
        "\nRecord every phase transition in tdd_cycle.phase_execution_log before moving on.\n",
    );

    body.push_str("\n## Scope\n\n");
    if step.scope.allow_paths.is_empty() {
        body.push_str("No file modifications are permitted for this step.\n");
    } else {
        body.push_str("You may modify only paths matching:\n");
        for path in &step.scope.allow_paths {
            body.push_str(&format!("- {path}\n"));
        }
    }

    if !step.state.recovery_suggestions.is_empty() {
        body.push_str("\n## Recovery Notes\n\n");
        for suggestion in &step.state.recovery_suggestions {
            body.push_str(suggestion);
            body.push_str("\n\n");
        }
    }

    body
}
