//! Step file value objects.
//!
//! Every struct carries a flattened `extra` map so fields the host
//! runtime adds survive a read-modify-write cycle unchanged. DES only
//! ever rewrites the fields it owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::id::StepId;
use crate::phase::{PhaseId, PhaseStatus};

/// The unit of work: one acceptance-test scenario plus its TDD phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFile {
    pub task_specification: TaskSpecification,
    pub tdd_cycle: TddCycle,
    #[serde(default)]
    pub scope: ScopeDeclaration,
    #[serde(default)]
    pub quality_gates: QualityGates,
    #[serde(default)]
    pub state: StepState,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What to run and who runs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpecification {
    pub task_id: StepId,
    pub agent: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_test_scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_test_file: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// TDD cycle declaration and execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TddCycle {
    #[serde(default)]
    pub acceptance_test: AcceptanceTest,
    #[serde(default)]
    pub expected_unit_tests: Vec<String>,
    #[serde(default)]
    pub mock_boundaries: Vec<String>,
    /// Expected artefact paths per phase name, declared by planning.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expected_artifacts: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tdd_phase_tracking: Option<Value>,
    /// Append-only; existing entries are immutable and only the final
    /// entry may be in a non-terminal status.
    #[serde(default)]
    pub phase_execution_log: Vec<PhaseExecutionEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TddCycle {
    fn default() -> Self {
        Self {
            acceptance_test: AcceptanceTest::default(),
            expected_unit_tests: Vec::new(),
            mock_boundaries: Vec::new(),
            expected_artifacts: BTreeMap::new(),
            tdd_phase_tracking: None,
            phase_execution_log: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Acceptance-test binding for the step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AcceptanceTest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_scenario: Option<MappedScenario>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How the step maps onto the feature's acceptance-test file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedScenario {
    pub mapping_type: MappingType,
    /// Non-empty exactly when `mapping_type` is `feature`.
    #[serde(default)]
    pub scenario_function: String,
    #[serde(default)]
    pub scenario_description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Scenario mapping kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    /// Implements one acceptance-test scenario.
    Feature,
    /// Wiring, adapters, setup; no scenario of its own.
    Infrastructure,
    /// Structural change behind passing tests; no scenario of its own.
    Refactoring,
}

impl MappingType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Infrastructure => "infrastructure",
            Self::Refactoring => "refactoring",
        }
    }
}

/// Allow-list of paths and globs the step may modify.
///
/// An empty list permits no modifications at all.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScopeDeclaration {
    #[serde(default)]
    pub allow_paths: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Boolean and threshold gates evaluated by the subagent-stop service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGates {
    #[serde(default = "default_true")]
    pub acceptance_test_must_fail_first: bool,
    #[serde(default = "default_true")]
    pub unit_tests_must_fail_first: bool,
    #[serde(default = "default_true")]
    pub no_mocks_inside_hexagon: bool,
    #[serde(default = "default_refactor_level")]
    pub refactor_level: u8,
    #[serde(default)]
    pub all_phases_mandatory: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

fn default_refactor_level() -> u8 {
    1
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            acceptance_test_must_fail_first: true,
            unit_tests_must_fail_first: true,
            no_mocks_inside_hexagon: true,
            refactor_level: 1,
            all_phases_mandatory: false,
            extra: Map::new(),
        }
    }
}

/// Live status fields mutated by the orchestrator and recovery handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    #[serde(default = "default_phase")]
    pub current_phase: PhaseId,
    #[serde(default)]
    pub recovery_suggestions: Vec<String>,
    #[serde(default)]
    pub turns_used: u32,
    #[serde(default)]
    pub extension_requests: u32,
    #[serde(default)]
    pub extensions_granted: u32,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<String>,
    #[serde(default)]
    pub allowed_despite_failure: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_phase() -> PhaseId {
    PhaseId::Prepare
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            current_phase: PhaseId::Prepare,
            recovery_suggestions: Vec::new(),
            turns_used: 0,
            extension_requests: 0,
            extensions_granted: 0,
            consecutive_failures: 0,
            last_outcome: None,
            allowed_despite_failure: false,
            extra: Map::new(),
        }
    }
}

/// One attempt record in the append-only phase execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecutionEntry {
    pub phase: PhaseId,
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<Value>,
    #[serde(default)]
    pub artifacts_created: Vec<String>,
    #[serde(default)]
    pub artifacts_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    /// Prior attempts of this phase, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PhaseExecutionEntry {
    /// Fresh entry for a phase entering `IN_PROGRESS`.
    #[must_use]
    pub fn started(phase: PhaseId, at: DateTime<Utc>) -> Self {
        Self {
            phase,
            status: PhaseStatus::InProgress,
            started_at: Some(at),
            ended_at: None,
            duration_minutes: None,
            test_results: None,
            artifacts_created: Vec::new(),
            artifacts_modified: Vec::new(),
            notes: None,
            blocked_by: None,
            history: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl StepFile {
    /// Latest execution entry for a phase, if any.
    #[must_use]
    pub fn latest_entry(&self, phase: PhaseId) -> Option<&PhaseExecutionEntry> {
        self.tdd_cycle
            .phase_execution_log
            .iter()
            .rev()
            .find(|e| e.phase == phase)
    }

    /// Mutable access to the latest execution entry for a phase.
    pub fn latest_entry_mut(&mut self, phase: PhaseId) -> Option<&mut PhaseExecutionEntry> {
        self.tdd_cycle
            .phase_execution_log
            .iter_mut()
            .rev()
            .find(|e| e.phase == phase)
    }

    /// Effective status of a phase: its latest log entry, else `NOT_EXECUTED`.
    #[must_use]
    pub fn phase_status(&self, phase: PhaseId) -> PhaseStatus {
        self.latest_entry(phase)
            .map_or(PhaseStatus::NotExecuted, |e| e.status)
    }

    /// Phases currently stuck in `IN_PROGRESS`.
    #[must_use]
    pub fn in_progress_phases(&self) -> Vec<PhaseId> {
        let mut seen = Vec::new();
        for phase in PhaseId::ORDER {
            if self.phase_status(phase) == PhaseStatus::InProgress && !seen.contains(&phase) {
                seen.push(phase);
            }
        }
        seen
    }

    /// Next phase eligible to run: the first mandatory phase in declared
    /// order that is not yet terminal and whose mandatory predecessors
    /// are all `PASS` or `SKIPPED`. Returns `None` when the step is done.
    #[must_use]
    pub fn next_phase(&self) -> Option<PhaseId> {
        let gates = &self.quality_gates;
        for phase in PhaseId::ORDER {
            if !phase.is_mandatory(gates.refactor_level, gates.all_phases_mandatory) {
                continue;
            }
            let status = self.phase_status(phase);
            if status.satisfies_predecessor() {
                continue;
            }
            let ready = phase
                .predecessors()
                .iter()
                .filter(|p| p.is_mandatory(gates.refactor_level, gates.all_phases_mandatory))
                .all(|p| self.phase_status(*p).satisfies_predecessor());
            return if ready { Some(phase) } else { None };
        }
        None
    }

    /// Expected artefacts declared for a phase.
    #[must_use]
    pub fn expected_artifacts(&self, phase: PhaseId) -> &[String] {
        self.tdd_cycle
            .expected_artifacts
            .get(phase.as_str())
            .map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_step() -> StepFile {
        StepFile {
            task_specification: TaskSpecification {
                task_id: "03-02".parse().unwrap(),
                agent: "software-crafter".to_string(),
                description: "Implement command execution".to_string(),
                command: "claude --agent software-crafter".to_string(),
                acceptance_test_scenario: Some("test_scenario_001_execute_command".to_string()),
                acceptance_test_file: Some("tests/acceptance/test_execute.py".to_string()),
                extra: Map::new(),
            },
            tdd_cycle: TddCycle {
                acceptance_test: AcceptanceTest {
                    mapped_scenario: Some(MappedScenario {
                        mapping_type: MappingType::Feature,
                        scenario_function: "test_scenario_001_execute_command".to_string(),
                        scenario_description: "Command executes".to_string(),
                        extra: Map::new(),
                    }),
                    extra: Map::new(),
                },
                ..TddCycle::default()
            },
            scope: ScopeDeclaration {
                allow_paths: vec!["src/des/**".to_string()],
                extra: Map::new(),
            },
            quality_gates: QualityGates::default(),
            state: StepState::default(),
            extra: Map::new(),
        }
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let json = r#"{
            "task_specification": {
                "task_id": "03-02",
                "agent": "software-crafter",
                "command": "run",
                "planner_note": "added by host"
            },
            "tdd_cycle": {"phase_execution_log": []},
            "host_metadata": {"revision": 7}
        }"#;

        let step: StepFile = serde_json::from_str(json).unwrap();
        assert_eq!(step.extra.get("host_metadata").unwrap()["revision"], 7);
        assert_eq!(
            step.task_specification.extra.get("planner_note").unwrap(),
            "added by host"
        );

        let back = serde_json::to_value(&step).unwrap();
        assert_eq!(back["host_metadata"]["revision"], 7);
        assert_eq!(
            back["task_specification"]["planner_note"],
            "added by host"
        );
    }

    #[test]
    fn test_next_phase_walks_declared_order() {
        let mut step = sample_step();
        assert_eq!(step.next_phase(), Some(PhaseId::Prepare));

        step.tdd_cycle.phase_execution_log.push(PhaseExecutionEntry {
            status: PhaseStatus::Pass,
            ..PhaseExecutionEntry::started(PhaseId::Prepare, Utc::now())
        });
        assert_eq!(step.next_phase(), Some(PhaseId::RedAcceptance));
    }

    #[test]
    fn test_next_phase_skips_optional_refactor_levels() {
        let mut step = sample_step();
        step.quality_gates.refactor_level = 1;
        for phase in &PhaseId::ORDER[..6] {
            step.tdd_cycle.phase_execution_log.push(PhaseExecutionEntry {
                status: PhaseStatus::Pass,
                ..PhaseExecutionEntry::started(*phase, Utc::now())
            });
        }
        // L1 passed; L2-L4 are optional at level 1, so VALIDATE is next.
        assert_eq!(step.next_phase(), Some(PhaseId::Validate));
    }

    #[test]
    fn test_next_phase_blocked_by_failed_predecessor() {
        let mut step = sample_step();
        step.tdd_cycle.phase_execution_log.push(PhaseExecutionEntry {
            status: PhaseStatus::Fail,
            ..PhaseExecutionEntry::started(PhaseId::Prepare, Utc::now())
        });
        assert_eq!(step.next_phase(), None);
    }

    #[test]
    fn test_in_progress_phases() {
        let mut step = sample_step();
        assert!(step.in_progress_phases().is_empty());

        step.tdd_cycle
            .phase_execution_log
            .push(PhaseExecutionEntry::started(PhaseId::GreenUnit, Utc::now()));
        assert_eq!(step.in_progress_phases(), vec![PhaseId::GreenUnit]);
    }

    #[test]
    fn test_quality_gate_defaults() {
        let gates: QualityGates = serde_json::from_str("{}").unwrap();
        assert!(gates.acceptance_test_must_fail_first);
        assert!(gates.unit_tests_must_fail_first);
        assert!(gates.no_mocks_inside_hexagon);
        assert_eq!(gates.refactor_level, 1);
        assert!(!gates.all_phases_mandatory);
    }

    #[test]
    fn test_mapping_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MappingType::Feature).unwrap(),
            "\"feature\""
        );
        assert_eq!(
            serde_json::to_string(&MappingType::Infrastructure).unwrap(),
            "\"infrastructure\""
        );
    }
}
