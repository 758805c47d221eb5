//! Command-line interface.
//!
//! Hook subcommands speak JSON on stdin/stdout so the host assistant can
//! call them directly; everything else is operator tooling. Exit codes
//! follow the documented table in `des_utils::exit_codes`.

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::Read;

use des_audit::{read_events_for_step, read_records, verify_file};
use des_governor::{ExtensionRequest, PhaseBudget};
use des_recovery::FailureType;
use des_stop::StopContext;
use des_utils::error::DesError;
use des_utils::exit_codes::ExitCode;
use des_utils::paths::resolve_audit_dir;

use crate::orchestrator::{CommandAgentDriver, Orchestrator};

/// Deterministic execution system for agent-driven TDD workflows.
#[derive(Debug, Parser)]
#[command(name = "nwave-des", version, about)]
pub struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    pub project_root: Option<Utf8PathBuf>,

    /// Verbose diagnostics on stderr.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Hook endpoints invoked by the host assistant.
    Hook {
        #[command(subcommand)]
        hook: HookCommands,
    },
    /// Run a single step to completion.
    Execute {
        step_file: Utf8PathBuf,
        /// Per-phase turn budget.
        #[arg(long)]
        max_turns: Option<u32>,
        /// Per-phase wall-clock budget in minutes.
        #[arg(long)]
        max_minutes: Option<f64>,
    },
    /// Request a turn or time extension for a step.
    Extend {
        step_file: Utf8PathBuf,
        #[arg(long)]
        turns: Option<u32>,
        #[arg(long)]
        minutes: Option<f64>,
        #[arg(long)]
        justification: String,
    },
    /// Manage the DES hook entries in the host settings document.
    Hooks {
        #[command(subcommand)]
        action: HooksAction,
    },
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum HookCommands {
    /// Validate an agent invocation before any tool runs.
    PreToolUse,
    /// Adjudicate a subagent termination.
    SubagentStop,
}

#[derive(Debug, Subcommand)]
pub enum HooksAction {
    Install {
        /// Settings document path (default: <root>/.claude/settings.json).
        #[arg(long)]
        settings: Option<Utf8PathBuf>,
    },
    Uninstall {
        #[arg(long)]
        settings: Option<Utf8PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum AuditAction {
    /// Recompute hashes and sequence contiguity for every log file.
    Verify {
        #[arg(long)]
        dir: Option<Utf8PathBuf>,
    },
    /// Print audit records, optionally filtered to one step.
    Tail {
        #[arg(long)]
        step: Option<String>,
        #[arg(long)]
        dir: Option<Utf8PathBuf>,
    },
}

/// Pre-tool-use invocation payload from the host.
#[derive(Debug, Deserialize)]
struct PreToolUseInput {
    command: String,
    #[serde(default)]
    step_file_path: Option<Utf8PathBuf>,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct PreToolUseOutput {
    allowed: bool,
    errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SubagentStopOutput {
    outcome: String,
    validation_errors: Vec<String>,
}

/// Run the CLI and return the process exit code.
pub fn run(cli: Cli) -> ExitCode {
    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.display_for_user());
            e.to_exit_code()
        }
    }
}

fn project_root(cli_root: Option<Utf8PathBuf>) -> Result<Utf8PathBuf, DesError> {
    match cli_root {
        Some(root) => Ok(root),
        None => {
            let cwd = std::env::current_dir()?;
            Utf8PathBuf::from_path_buf(cwd)
                .map_err(|p| DesError::Io(std::io::Error::other(format!(
                    "current directory is not UTF-8: {}",
                    p.display()
                ))))
        }
    }
}

fn read_stdin_json<T: serde::de::DeserializeOwned>() -> Result<T, DesError> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    serde_json::from_str(&raw)
        .map_err(|e| DesError::Io(std::io::Error::other(format!("invalid hook payload: {e}"))))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode, DesError> {
    let root = project_root(cli.project_root)?;
    match cli.command {
        Commands::Hook { hook } => match hook {
            HookCommands::PreToolUse => run_pre_tool_use(root),
            HookCommands::SubagentStop => run_subagent_stop(root),
        },
        Commands::Execute {
            step_file,
            max_turns,
            max_minutes,
        } => run_execute(root, &step_file, max_turns, max_minutes),
        Commands::Extend {
            step_file,
            turns,
            minutes,
            justification,
        } => run_extend(root, &step_file, turns, minutes, justification),
        Commands::Hooks { action } => run_hooks(root, action),
        Commands::Audit { action } => run_audit(root, action),
    }
}

fn run_pre_tool_use(root: Utf8PathBuf) -> Result<ExitCode, DesError> {
    let input: PreToolUseInput = read_stdin_json()?;
    let mut orchestrator = Orchestrator::new(root)?;

    match orchestrator.render_prompt(
        &input.command,
        input.step_file_path.as_deref(),
        input.agent.as_deref(),
        input.project_id.as_deref(),
    ) {
        Ok(_prompt) => {
            print_json(&PreToolUseOutput {
                allowed: true,
                errors: Vec::new(),
            });
            Ok(ExitCode::SUCCESS)
        }
        Err(rejection) => {
            print_json(&PreToolUseOutput {
                allowed: false,
                errors: rejection.messages(),
            });
            Ok(ExitCode::VALIDATION_REJECTED)
        }
    }
}

fn run_subagent_stop(root: Utf8PathBuf) -> Result<ExitCode, DesError> {
    let ctx: StopContext = read_stdin_json()?;
    let mut orchestrator = Orchestrator::new(root)?;
    let report = orchestrator.handle_subagent_stop(&ctx)?;

    print_json(&SubagentStopOutput {
        outcome: if report.passed { "passed" } else { "failed" }.to_string(),
        validation_errors: report.validation_errors.clone(),
    });

    Ok(if report.passed {
        ExitCode::SUCCESS
    } else {
        failure_exit_code(report.failure_type)
    })
}

fn failure_exit_code(failure: Option<FailureType>) -> ExitCode {
    match failure {
        Some(FailureType::ScopeViolation) => ExitCode::SCOPE_VIOLATION,
        Some(FailureType::Timeout) => ExitCode::BUDGET_EXCEEDED,
        _ => ExitCode::VALIDATION_REJECTED,
    }
}

fn run_execute(
    root: Utf8PathBuf,
    step_file: &Utf8Path,
    max_turns: Option<u32>,
    max_minutes: Option<f64>,
) -> Result<ExitCode, DesError> {
    let mut orchestrator = Orchestrator::new(root.clone())?;

    let mut budget = PhaseBudget::default();
    budget.max_turns = max_turns;
    budget.max_minutes =
        max_minutes.or(Some(orchestrator.config().max_execution_time as f64 / 60.0));

    let mut driver = CommandAgentDriver::new(root);
    let result = orchestrator.execute_step(step_file, &budget, &mut driver)?;

    print_json(&serde_json::json!({
        "step_id": result.step_id.as_str(),
        "completed": result.completed,
        "phases_run": result.phases_run.iter()
            .map(|(p, s)| serde_json::json!({"phase": p.as_str(), "status": s.as_str()}))
            .collect::<Vec<_>>(),
        "failure": result.failure.map(|f| f.to_string()),
    }));

    Ok(if result.completed {
        ExitCode::SUCCESS
    } else {
        failure_exit_code(result.failure)
    })
}

fn run_extend(
    root: Utf8PathBuf,
    step_file: &Utf8Path,
    turns: Option<u32>,
    minutes: Option<f64>,
    justification: String,
) -> Result<ExitCode, DesError> {
    let mut orchestrator = Orchestrator::new(root)?;
    let request = ExtensionRequest {
        requested_turns: turns,
        requested_minutes: minutes,
        justification,
        context: None,
    };
    let decision = orchestrator.request_extension(step_file, &request)?;
    print_json(&decision);

    Ok(if decision.granted {
        ExitCode::SUCCESS
    } else {
        ExitCode::BUDGET_EXCEEDED
    })
}

fn run_hooks(root: Utf8PathBuf, action: HooksAction) -> Result<ExitCode, DesError> {
    let default_settings = root.join(".claude/settings.json");
    match action {
        HooksAction::Install { settings } => {
            let path = settings.unwrap_or(default_settings);
            let changed = des_hooks::install_into_file(&path)?;
            print_json(&serde_json::json!({"installed": changed, "settings": path.as_str()}));
        }
        HooksAction::Uninstall { settings } => {
            let path = settings.unwrap_or(default_settings);
            let removed = des_hooks::uninstall_from_file(&path)?;
            print_json(&serde_json::json!({"removed": removed, "settings": path.as_str()}));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn audit_dir_for(root: &Utf8Path, dir: Option<Utf8PathBuf>) -> Result<Utf8PathBuf, DesError> {
    Ok(resolve_audit_dir(dir.as_deref(), root)?)
}

fn run_audit(root: Utf8PathBuf, action: AuditAction) -> Result<ExitCode, DesError> {
    match action {
        AuditAction::Verify { dir } => {
            let dir = audit_dir_for(&root, dir)?;
            let mut total_issues = 0usize;
            let mut files: Vec<_> = std::fs::read_dir(dir.as_std_path())?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("audit-") && n.ends_with(".log"))
                })
                .collect();
            files.sort();

            for file in files {
                let utf8 = Utf8PathBuf::from_path_buf(file)
                    .map_err(|p| DesError::Io(std::io::Error::other(format!(
                        "non-UTF-8 audit path: {}",
                        p.display()
                    ))))?;
                let issues = verify_file(&utf8)?;
                for issue in &issues {
                    println!("{utf8}:{}: {}", issue.line, issue.reason);
                }
                total_issues += issues.len();
            }

            if total_issues == 0 {
                println!("audit trail verified: no issues");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("audit trail verification found {total_issues} issue(s)");
                Ok(ExitCode::INTERNAL)
            }
        }
        AuditAction::Tail { step, dir } => {
            let dir = audit_dir_for(&root, dir)?;
            let records = match step {
                Some(step_id) => read_events_for_step(&dir, &step_id)?,
                None => {
                    let mut files: Vec<_> = std::fs::read_dir(dir.as_std_path())?
                        .filter_map(Result::ok)
                        .map(|e| e.path())
                        .filter(|p| {
                            p.file_name()
                                .and_then(|n| n.to_str())
                                .is_some_and(|n| n.starts_with("audit-") && n.ends_with(".log"))
                        })
                        .collect();
                    files.sort();
                    let mut all = Vec::new();
                    for file in files {
                        let utf8 = Utf8PathBuf::from_path_buf(file).map_err(|p| {
                            DesError::Io(std::io::Error::other(format!(
                                "non-UTF-8 audit path: {}",
                                p.display()
                            )))
                        })?;
                        all.extend(read_records(&utf8)?);
                    }
                    all
                }
            };
            for record in records {
                print_json(&record);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
