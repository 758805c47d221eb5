//! nwave-des: the deterministic execution system for the nWave
//! agent-driven TDD methodology.
//!
//! DES sits in front of the assistant's tool-use surface: a pre-tool-use
//! validator gates every agent invocation, a subagent-stop service
//! inspects every termination, a governor bounds turns and wall-clock
//! time, an append-only JSONL audit trail records every edge, and a
//! recovery handler turns failures into WHY/HOW/ACTION guidance.

pub mod cli;
pub mod orchestrator;

pub use orchestrator::{
    AgentDriver, AgentRunReport, CommandAgentDriver, Orchestrator, Rejection, StepResult,
    compose_prompt_body, feature_name_for,
};

// Re-export the member crates under one roof for embedders.
pub use des_audit as audit;
pub use des_config as config;
pub use des_governor as governor;
pub use des_hooks as hooks;
pub use des_recovery as recovery;
pub use des_scope as scope;
pub use des_step as step;
pub use des_stop as stop;
pub use des_utils as utils;
pub use des_validator as validator;

pub use des_utils::exit_codes::ExitCode;
pub use des_utils::error::DesError;
