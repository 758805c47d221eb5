//! Step file model for the deterministic execution system.
//!
//! A step is the unit of agent work: one acceptance-test scenario plus
//! its TDD phases. This crate owns the step id grammar, the phase state
//! machine, the serde model (lossless for unknown fields), and the
//! invariant checks the validator and stop service rely on.

mod id;
mod model;
mod phase;
mod store;

pub use id::StepId;
pub use model::{
    AcceptanceTest, MappedScenario, MappingType, PhaseExecutionEntry, QualityGates,
    ScopeDeclaration, StepFile, StepState, TaskSpecification, TddCycle,
};
pub use phase::{PhaseId, PhaseStatus};
pub use store::{
    count_test_functions, find_test_function, load_step_file, save_step_file_atomic,
    step_id_from_path, validate_feature_scenario_coverage, validate_phase_log,
};
