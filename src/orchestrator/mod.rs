//! Step orchestration.
//!
//! The orchestrator is the sole driver of phase transitions: it renders
//! and validates prompts, walks the phase state machine, runs the agent
//! through the driver port while the governor ticks, hands every
//! termination to the subagent-stop service, and routes failures into
//! recovery. Every edge produces an audit event.

pub mod driver;
pub mod prompt;

use camino::{Utf8Path, Utf8PathBuf};

use des_audit::{AuditEvent, AuditLogWriter};
use des_config::DesConfig;
use des_governor::{ExtensionDecision, ExtensionRequest, Governor, PhaseBudget, ThresholdCrossing};
use des_recovery::{FailureContext, FailureType, handle_failure};
use des_step::{
    PhaseExecutionEntry, PhaseId, PhaseStatus, StepFile, StepId, load_step_file,
    save_step_file_atomic, step_id_from_path, validate_phase_log,
};
use des_stop::{StopContext, StopReport, SubagentStopService, apply_outcome};
use des_utils::clock::{SystemMonotonicClock, SystemWallClock, WallClock};
use des_utils::error::{DesError, StepFileError};
use des_utils::paths::resolve_audit_dir;
use des_validator::{Prompt, ValidationError, ValidationRule, Validator};

pub use driver::{AgentDriver, AgentRunReport, CommandAgentDriver};
pub use prompt::compose_prompt_body;

/// A structured pre-tool-use rejection naming the offending rules.
#[derive(Debug)]
pub struct Rejection {
    pub errors: Vec<ValidationError>,
}

impl Rejection {
    /// One-line messages for callers and audit payloads.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.rule, e.message))
            .collect()
    }
}

/// Outcome of `execute_step`.
#[derive(Debug)]
pub struct StepResult {
    pub step_id: StepId,
    /// True when every mandatory phase ended `PASS` or `SKIPPED`.
    pub completed: bool,
    /// Phase attempts in execution order with their final statuses.
    pub phases_run: Vec<(PhaseId, PhaseStatus)>,
    pub failure: Option<FailureType>,
}

/// Entry point driving step execution against one project.
pub struct Orchestrator {
    project_root: Utf8PathBuf,
    config: DesConfig,
    audit: AuditLogWriter,
    clock: Box<dyn WallClock>,
}

impl Orchestrator {
    /// Build an orchestrator for a project root, resolving config and
    /// the audit directory through their priority chains.
    pub fn new(project_root: Utf8PathBuf) -> Result<Self, DesError> {
        let config = DesConfig::load(&project_root)?;
        let audit_dir = resolve_audit_dir(config.audit_log_dir.as_deref(), &project_root)?;
        Ok(Self {
            project_root,
            config,
            audit: AuditLogWriter::new(audit_dir),
            clock: Box::new(SystemWallClock),
        })
    }

    /// Build with an explicit audit directory (test seam and CLI override).
    pub fn with_audit_dir(
        project_root: Utf8PathBuf,
        audit_dir: Utf8PathBuf,
    ) -> Result<Self, DesError> {
        let config = DesConfig::load(&project_root)?;
        Ok(Self {
            project_root,
            config,
            audit: AuditLogWriter::new(audit_dir),
            clock: Box::new(SystemWallClock),
        })
    }

    #[must_use]
    pub fn config(&self) -> &DesConfig {
        &self.config
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLogWriter {
        &self.audit
    }

    fn validator(&self) -> Validator {
        let validator = Validator::new(self.project_root.clone());
        match &self.config.recognized_agents {
            Some(agents) => validator.with_recognized_agents(agents.clone()),
            None => validator,
        }
    }

    fn emit(&mut self, event: AuditEvent, feature: Option<&str>, step_id: Option<&str>) {
        self.audit.log_event(event, feature, step_id);
    }

    /// Render and validate the agent prompt for a host command.
    ///
    /// Emits `TASK_INVOCATION_STARTED`, then either
    /// `TASK_INVOCATION_VALIDATED` or `TASK_INVOCATION_REJECTED` (with
    /// one `VALIDATION_REJECTED` per failed rule).
    pub fn render_prompt(
        &mut self,
        command: &str,
        step_file_path: Option<&Utf8Path>,
        agent: Option<&str>,
        project_id: Option<&str>,
    ) -> Result<Prompt, Rejection> {
        if let Some(project) = project_id {
            tracing::debug!(project_id = %project, command = %command, "Rendering prompt");
        }

        let Some(path) = step_file_path else {
            self.emit(
                AuditEvent::TaskInvocationStarted {
                    command: command.to_string(),
                    agent: agent.map(ToString::to_string),
                },
                None,
                None,
            );
            let error = ValidationError {
                rule: ValidationRule::StepFileMissing,
                message: "the invocation references no step file".to_string(),
                recovery_hints: Vec::new(),
            };
            self.emit(
                AuditEvent::TaskInvocationRejected {
                    errors: vec![format!("{}: {}", error.rule, error.message)],
                },
                None,
                None,
            );
            return Err(Rejection {
                errors: vec![error],
            });
        };

        let feature = feature_name_for(path);
        let step_id = step_id_from_path(path).ok().map(|id| id.to_string());
        self.emit(
            AuditEvent::TaskInvocationStarted {
                command: command.to_string(),
                agent: agent.map(ToString::to_string),
            },
            feature.as_deref(),
            step_id.as_deref(),
        );

        let loaded = load_step_file(path);
        let agent_name = agent
            .map(ToString::to_string)
            .or_else(|| loaded.as_ref().ok().map(|s| s.task_specification.agent.clone()))
            .unwrap_or_default();
        let body = loaded.as_ref().map(compose_prompt_body).unwrap_or_default();

        let rendered = Prompt {
            command: command.to_string(),
            agent: agent_name,
            step_file_path: path.to_owned(),
            feature_name: feature.clone(),
            body,
        };

        if !self.config.validation_enabled {
            self.emit(
                AuditEvent::TaskInvocationValidated,
                feature.as_deref(),
                step_id.as_deref(),
            );
            return Ok(rendered);
        }

        let outcome = self.validator().validate_prompt(&rendered);
        if outcome.allowed {
            self.emit(
                AuditEvent::TaskInvocationValidated,
                feature.as_deref(),
                step_id.as_deref(),
            );
            Ok(rendered)
        } else {
            for error in &outcome.errors {
                self.emit(
                    AuditEvent::ValidationRejected {
                        rule: error.rule.to_string(),
                        message: error.message.clone(),
                    },
                    feature.as_deref(),
                    step_id.as_deref(),
                );
            }
            self.emit(
                AuditEvent::TaskInvocationRejected {
                    errors: outcome.error_messages(),
                },
                feature.as_deref(),
                step_id.as_deref(),
            );
            Err(Rejection {
                errors: outcome.errors,
            })
        }
    }

    /// Run a single step to completion.
    ///
    /// Walks the phase state machine: each mandatory phase whose
    /// predecessors are satisfied enters `IN_PROGRESS`, the agent runs
    /// under the governor, and the subagent-stop service adjudicates the
    /// termination. A failed phase is retried once; a second consecutive
    /// failure ends the step.
    pub fn execute_step(
        &mut self,
        step_file_path: &Utf8Path,
        budget: &PhaseBudget,
        driver: &mut dyn AgentDriver,
    ) -> Result<StepResult, DesError> {
        let mut step = load_step_file(step_file_path)?;
        validate_phase_log(&step, step_file_path)?;

        let step_id = step.task_specification.task_id.clone();
        let feature = feature_name_for(step_file_path);
        let stop_service = SubagentStopService::new(self.project_root.clone());

        let mut phases_run = Vec::new();
        let mut failure: Option<FailureType> = None;
        // Each phase may run at most twice (original attempt + one retry).
        let iteration_cap = PhaseId::ORDER.len() * 2;
        let mut iterations = 0;

        while let Some(phase) = step.next_phase() {
            iterations += 1;
            if iterations > iteration_cap {
                break;
            }

            let started_at = self.clock.now();
            step.state.current_phase = phase;
            step.tdd_cycle
                .phase_execution_log
                .push(PhaseExecutionEntry::started(phase, started_at));
            save_step_file_atomic(step_file_path, &step)?;
            self.emit(
                AuditEvent::PhaseStarted {
                    phase: phase.as_str().to_string(),
                },
                feature.as_deref(),
                Some(step_id.as_str()),
            );

            let mut governor = Governor::start_phase(
                phase,
                budget.clone(),
                Box::new(SystemMonotonicClock::new()),
            );
            let run = driver.run_phase(&step, phase, &mut governor)?;
            self.emit_crossings(&run.crossings, phase, feature.as_deref(), &step_id);

            // Record what the agent reported into the active entry. The
            // claim is provisional; the stop verdict overrides it.
            if let Some(entry) = step.latest_entry_mut(phase) {
                entry.test_results = run.test_results.clone();
                entry.artifacts_created = run.artifacts_created.clone();
                entry.notes = run.notes.clone();
                if run.phase_completed {
                    entry.status = PhaseStatus::Pass;
                }
            }
            step.state.turns_used += governor.turns_used();

            let stop_ctx = StopContext {
                project_id: feature.clone().unwrap_or_default(),
                step_id: step_id.clone(),
                started_at,
                modified_files: run.modified_files.clone(),
                transcript_path: run.transcript_path.clone(),
            };
            let report = stop_service.evaluate(&step, &stop_ctx, governor.budget_exceeded())?;

            let extension_granted = step.state.extensions_granted > 0;
            apply_outcome(&mut step, &report, self.clock.now(), extension_granted);
            save_step_file_atomic(step_file_path, &step)?;
            phases_run.push((phase, step.phase_status(phase)));

            if report.passed {
                self.emit(
                    AuditEvent::PhaseExecuted {
                        phase: phase.as_str().to_string(),
                    },
                    feature.as_deref(),
                    Some(step_id.as_str()),
                );
                self.emit(
                    AuditEvent::HookSubagentStopPassed,
                    feature.as_deref(),
                    Some(step_id.as_str()),
                );
                if phase == PhaseId::Commit {
                    if let Some(hash) = run.commit_hash.clone() {
                        self.emit(
                            AuditEvent::CommitCreated { commit_hash: hash },
                            feature.as_deref(),
                            Some(step_id.as_str()),
                        );
                    }
                    self.emit(
                        AuditEvent::CommitSuccess,
                        feature.as_deref(),
                        Some(step_id.as_str()),
                    );
                }
            } else {
                failure = self.handle_phase_failure(
                    step_file_path,
                    &mut step,
                    &report,
                    &run,
                    feature.as_deref(),
                    &step_id,
                )?;
                if step.state.consecutive_failures >= 2 {
                    break;
                }
            }
        }

        let gates = &step.quality_gates;
        let completed = PhaseId::ORDER
            .iter()
            .filter(|p| p.is_mandatory(gates.refactor_level, gates.all_phases_mandatory))
            .all(|p| step.phase_status(*p).satisfies_predecessor());

        Ok(StepResult {
            step_id,
            completed,
            phases_run,
            failure,
        })
    }

    fn emit_crossings(
        &mut self,
        crossings: &[ThresholdCrossing],
        phase: PhaseId,
        feature: Option<&str>,
        step_id: &StepId,
    ) {
        for crossing in crossings {
            self.emit(
                AuditEvent::TimeoutWarning {
                    phase: phase.as_str().to_string(),
                    threshold_pct: crossing.threshold_pct,
                    budget: crossing.kind.as_str().to_string(),
                },
                feature,
                Some(step_id.as_str()),
            );
        }
    }

    fn handle_phase_failure(
        &mut self,
        step_file_path: &Utf8Path,
        step: &mut StepFile,
        report: &StopReport,
        run: &AgentRunReport,
        feature: Option<&str>,
        step_id: &StepId,
    ) -> Result<Option<FailureType>, DesError> {
        let phase = report.phase;

        for path in &report.scope_violations {
            self.emit(
                AuditEvent::ScopeViolation { path: path.clone() },
                feature,
                Some(step_id.as_str()),
            );
        }
        self.emit(
            AuditEvent::HookSubagentStopFailed {
                validation_errors: report.validation_errors.clone(),
            },
            feature,
            Some(step_id.as_str()),
        );

        let failure = report.failure_type.unwrap_or(FailureType::Unknown);
        let reason = match failure {
            FailureType::Timeout => "budget_exceeded".to_string(),
            other => other.to_string(),
        };
        self.emit(
            AuditEvent::PhaseFailed {
                phase: phase.as_str().to_string(),
                reason: reason.clone(),
            },
            feature,
            Some(step_id.as_str()),
        );
        if phase == PhaseId::Commit {
            self.emit(
                AuditEvent::CommitFailure { reason },
                feature,
                Some(step_id.as_str()),
            );
        }

        let ctx = FailureContext {
            phase: Some(phase),
            step_file: Some(step_file_path.to_string()),
            transcript_path: run.transcript_path.clone(),
            missing_artifacts: report.missing_artifacts.clone(),
            violating_paths: report.scope_violations.clone(),
            details: None,
        };
        *step = handle_failure(step_file_path, failure, &ctx)?;

        Ok(Some(failure))
    }

    /// Forward an extension request to the governor's adjudicator and
    /// persist the decision's effect on the step's request ledger.
    pub fn request_extension(
        &mut self,
        step_file_path: &Utf8Path,
        request: &ExtensionRequest,
    ) -> Result<ExtensionDecision, DesError> {
        let mut step = load_step_file(step_file_path)?;
        let step_id = step.task_specification.task_id.clone();
        let feature = feature_name_for(step_file_path);

        let phase = step.state.current_phase;
        // Extensions cover live or failed work; a passed phase needs none.
        let phase_terminal = matches!(
            step.phase_status(phase),
            PhaseStatus::Pass | PhaseStatus::Skipped
        );

        let base = PhaseBudget::default()
            .with_max_minutes(self.config.max_execution_time as f64 / 60.0)
            .with_max_turns(u32::try_from(self.config.max_execution_time / 60).unwrap_or(u32::MAX));
        let mut governor =
            Governor::start_phase(phase, base, Box::new(SystemMonotonicClock::new()));

        let decision = governor.decide(request, step.state.extension_requests, phase_terminal);

        step.state.extension_requests += 1;
        if decision.granted {
            step.state.extensions_granted += 1;
            let budget = decision.new_budget.unwrap_or_default();
            self.emit(
                AuditEvent::ExtensionGranted {
                    new_max_turns: budget.max_turns,
                    new_max_minutes: budget.max_minutes,
                    justification: request.justification.clone(),
                },
                feature.as_deref(),
                Some(step_id.as_str()),
            );
        } else {
            self.emit(
                AuditEvent::ExtensionDenied {
                    reason: decision.reason.clone(),
                },
                feature.as_deref(),
                Some(step_id.as_str()),
            );
        }
        save_step_file_atomic(step_file_path, &step)?;

        Ok(decision)
    }

    /// Adjudicate a subagent termination reported by the host hook.
    ///
    /// Locates the step by id, runs the stop checks, persists the
    /// outcome, and routes failures into recovery.
    pub fn handle_subagent_stop(&mut self, ctx: &StopContext) -> Result<StopReport, DesError> {
        let path = self
            .find_step_file(ctx.step_id.as_str())
            .ok_or_else(|| StepFileError::NotFound {
                path: format!("step {} under {}", ctx.step_id, self.project_root),
            })?;
        let mut step = load_step_file(&path)?;
        let feature = feature_name_for(&path);
        let step_id = ctx.step_id.to_string();

        let report =
            SubagentStopService::new(self.project_root.clone()).evaluate(&step, ctx, false)?;

        let extension_granted = step.state.extensions_granted > 0;
        apply_outcome(&mut step, &report, self.clock.now(), extension_granted);
        save_step_file_atomic(&path, &step)?;

        self.emit(
            AuditEvent::SubagentStopValidation {
                outcome: if report.passed { "passed" } else { "failed" }.to_string(),
            },
            feature.as_deref(),
            Some(&step_id),
        );

        if report.passed {
            self.emit(
                AuditEvent::HookSubagentStopPassed,
                feature.as_deref(),
                Some(&step_id),
            );
        } else {
            for violating in &report.scope_violations {
                self.emit(
                    AuditEvent::ScopeViolation {
                        path: violating.clone(),
                    },
                    feature.as_deref(),
                    Some(&step_id),
                );
            }
            self.emit(
                AuditEvent::HookSubagentStopFailed {
                    validation_errors: report.validation_errors.clone(),
                },
                feature.as_deref(),
                Some(&step_id),
            );
            let failure = report.failure_type.unwrap_or(FailureType::Unknown);
            self.emit(
                AuditEvent::SubagentStopFailure {
                    reason: failure.to_string(),
                },
                feature.as_deref(),
                Some(&step_id),
            );

            let rctx = FailureContext {
                phase: Some(report.phase),
                step_file: Some(path.to_string()),
                transcript_path: ctx.transcript_path.clone(),
                missing_artifacts: report.missing_artifacts.clone(),
                violating_paths: report.scope_violations.clone(),
                details: None,
            };
            handle_failure(&path, failure, &rctx)?;
        }

        Ok(report)
    }

    /// Locate a step file by id anywhere under the project root.
    #[must_use]
    pub fn find_step_file(&self, step_id: &str) -> Option<Utf8PathBuf> {
        let mut matches = Vec::new();
        collect_step_files(self.project_root.as_std_path(), step_id, &mut matches);
        matches.sort();
        matches.into_iter().next()
    }
}

/// The feature a step belongs to, derived from its parent directory.
#[must_use]
pub fn feature_name_for(step_file_path: &Utf8Path) -> Option<String> {
    let parent = step_file_path.parent()?.file_name()?;
    if parent.is_empty() || parent == "steps" || parent == "." {
        None
    } else {
        Some(parent.to_string())
    }
}

fn collect_step_files(dir: &std::path::Path, step_id: &str, out: &mut Vec<Utf8PathBuf>) {
    const SKIP: &[&str] = &[".git", "target", "node_modules"];

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_dir() {
            if !SKIP.contains(&name) {
                collect_step_files(&path, step_id, out);
            }
        } else if name.starts_with(step_id) && name.ends_with(".json") {
            if let Ok(utf8) = Utf8PathBuf::from_path_buf(path) {
                out.push(utf8);
            }
        }
    }
}
