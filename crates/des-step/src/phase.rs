//! TDD phase identifiers and the phase status state machine.

use serde::{Deserialize, Serialize};

/// Phase identifiers for the TDD execution workflow.
///
/// Phases execute in a fixed order:
///
/// ```text
/// PREPARE → RED_ACCEPTANCE → RED_UNIT → GREEN_UNIT → REVIEW
///         → REFACTOR_L1 → REFACTOR_L2 → REFACTOR_L3 → REFACTOR_L4
///         → VALIDATE → GREEN_ACCEPTANCE → COMMIT
/// ```
///
/// Refactor levels above the step's `quality_gates.refactor_level` are
/// optional and may be skipped; every other phase is mandatory. Entering
/// a phase requires all mandatory predecessors to be `PASS` or `SKIPPED`.
///
/// # Serialization
///
/// `PhaseId` serializes to its canonical SCREAMING_SNAKE name
/// (e.g. `"RED_ACCEPTANCE"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseId {
    /// Load the step, verify preconditions, stage the working context.
    Prepare,
    /// Write the acceptance test and watch it fail.
    RedAcceptance,
    /// Write the unit tests and watch them fail.
    RedUnit,
    /// Make the unit tests pass with the simplest implementation.
    GreenUnit,
    /// Self-review the diff before refactoring.
    Review,
    /// Refactor level 1: readability (names, comments, dead code).
    RefactorL1,
    /// Refactor level 2: method extraction and duplication removal.
    RefactorL2,
    /// Refactor level 3: class/module reorganization.
    RefactorL3,
    /// Refactor level 4: architectural boundary adjustments.
    RefactorL4,
    /// Run the full verification suite.
    Validate,
    /// Watch the acceptance test pass.
    GreenAcceptance,
    /// Commit the step's changes.
    Commit,
}

impl PhaseId {
    /// All phases in execution order.
    pub const ORDER: [PhaseId; 12] = [
        PhaseId::Prepare,
        PhaseId::RedAcceptance,
        PhaseId::RedUnit,
        PhaseId::GreenUnit,
        PhaseId::Review,
        PhaseId::RefactorL1,
        PhaseId::RefactorL2,
        PhaseId::RefactorL3,
        PhaseId::RefactorL4,
        PhaseId::Validate,
        PhaseId::GreenAcceptance,
        PhaseId::Commit,
    ];

    /// Canonical SCREAMING_SNAKE name used in step files and audit events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "PREPARE",
            Self::RedAcceptance => "RED_ACCEPTANCE",
            Self::RedUnit => "RED_UNIT",
            Self::GreenUnit => "GREEN_UNIT",
            Self::Review => "REVIEW",
            Self::RefactorL1 => "REFACTOR_L1",
            Self::RefactorL2 => "REFACTOR_L2",
            Self::RefactorL3 => "REFACTOR_L3",
            Self::RefactorL4 => "REFACTOR_L4",
            Self::Validate => "VALIDATE",
            Self::GreenAcceptance => "GREEN_ACCEPTANCE",
            Self::Commit => "COMMIT",
        }
    }

    /// Position in the declared phase order.
    #[must_use]
    pub fn index(&self) -> usize {
        Self::ORDER
            .iter()
            .position(|p| p == self)
            .expect("phase present in ORDER")
    }

    /// Phases that precede this one in the declared order.
    #[must_use]
    pub fn predecessors(&self) -> &'static [PhaseId] {
        &Self::ORDER[..self.index()]
    }

    /// The refactor level, for `REFACTOR_L1..L4`.
    #[must_use]
    pub const fn refactor_level(&self) -> Option<u8> {
        match self {
            Self::RefactorL1 => Some(1),
            Self::RefactorL2 => Some(2),
            Self::RefactorL3 => Some(3),
            Self::RefactorL4 => Some(4),
            _ => None,
        }
    }

    /// Whether this phase is mandatory for a step with the given
    /// required refactor level and `all_phases_mandatory` gate.
    #[must_use]
    pub fn is_mandatory(&self, refactor_level: u8, all_phases_mandatory: bool) -> bool {
        if all_phases_mandatory {
            return true;
        }
        match self.refactor_level() {
            Some(level) => level <= refactor_level,
            None => true,
        }
    }

    /// Parse a canonical phase name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ORDER.iter().copied().find(|p| p.as_str() == name)
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a phase within the step lifecycle.
///
/// Legal transitions: `NOT_EXECUTED → IN_PROGRESS → {PASS, FAIL, SKIPPED}`.
/// At most one phase is `IN_PROGRESS` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    #[default]
    NotExecuted,
    InProgress,
    Pass,
    Fail,
    Skipped,
}

impl PhaseStatus {
    /// Canonical SCREAMING_SNAKE name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotExecuted => "NOT_EXECUTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skipped => "SKIPPED",
        }
    }

    /// Terminal statuses end a phase attempt.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Pass | Self::Fail | Self::Skipped)
    }

    /// A phase is satisfied as a predecessor when passed or skipped.
    #[must_use]
    pub const fn satisfies_predecessor(&self) -> bool {
        matches!(self, Self::Pass | Self::Skipped)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: PhaseStatus) -> bool {
        matches!(
            (self, next),
            (Self::NotExecuted, Self::InProgress)
                | (Self::NotExecuted, Self::Skipped)
                | (Self::InProgress, Self::Pass)
                | (Self::InProgress, Self::Fail)
                | (Self::InProgress, Self::Skipped)
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_complete_and_stable() {
        assert_eq!(PhaseId::ORDER.len(), 12);
        assert_eq!(PhaseId::ORDER[0], PhaseId::Prepare);
        assert_eq!(PhaseId::ORDER[11], PhaseId::Commit);
    }

    #[test]
    fn test_as_str_round_trips_through_parse() {
        for phase in PhaseId::ORDER {
            assert_eq!(PhaseId::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(PhaseId::parse("REFACTOR_L5"), None);
    }

    #[test]
    fn test_serde_names_match_canonical() {
        let json = serde_json::to_string(&PhaseId::RedAcceptance).unwrap();
        assert_eq!(json, "\"RED_ACCEPTANCE\"");
        let json = serde_json::to_string(&PhaseId::RefactorL3).unwrap();
        assert_eq!(json, "\"REFACTOR_L3\"");
        let back: PhaseId = serde_json::from_str("\"GREEN_ACCEPTANCE\"").unwrap();
        assert_eq!(back, PhaseId::GreenAcceptance);
    }

    #[test]
    fn test_predecessors() {
        assert!(PhaseId::Prepare.predecessors().is_empty());
        assert_eq!(
            PhaseId::RedUnit.predecessors(),
            &[PhaseId::Prepare, PhaseId::RedAcceptance]
        );
        assert_eq!(PhaseId::Commit.predecessors().len(), 11);
    }

    #[test]
    fn test_refactor_mandatoriness() {
        assert!(PhaseId::RefactorL1.is_mandatory(1, false));
        assert!(!PhaseId::RefactorL2.is_mandatory(1, false));
        assert!(PhaseId::RefactorL2.is_mandatory(2, false));
        assert!(PhaseId::RefactorL4.is_mandatory(1, true));
        assert!(PhaseId::GreenUnit.is_mandatory(0, false));
    }

    #[test]
    fn test_status_transitions() {
        use PhaseStatus::*;
        assert!(NotExecuted.can_transition_to(InProgress));
        assert!(NotExecuted.can_transition_to(Skipped));
        assert!(InProgress.can_transition_to(Pass));
        assert!(InProgress.can_transition_to(Fail));
        assert!(!NotExecuted.can_transition_to(Pass));
        assert!(!Pass.can_transition_to(InProgress));
        assert!(!Fail.can_transition_to(Pass));
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(
            serde_json::to_string(&PhaseStatus::NotExecuted).unwrap(),
            "\"NOT_EXECUTED\""
        );
        assert_eq!(
            serde_json::to_string(&PhaseStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
    }
}
