//! Turn and timeout governor.
//!
//! Bounds resource use per phase: a turn counter incremented on each
//! observed agent tool use and wall-clock elapsed tracked in monotonic
//! time. Crossing a warning threshold reports exactly once per
//! threshold, in ascending order. Exceeding a budget latches
//! `budget_exceeded`, which the subagent-stop service treats as a
//! validation failure. The governor holds a single active-phase
//! reference; concurrent phases are not allowed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use des_step::PhaseId;
use des_utils::clock::MonotonicClock;

/// Default warning thresholds, in percent of budget.
pub const DEFAULT_WARNING_THRESHOLDS: [u8; 3] = [50, 75, 90];

/// Hard cap on extended budgets, as a multiple of the original budget.
pub const DEFAULT_EXTENSION_CAP_FACTOR: f64 = 2.0;

/// Maximum number of extension requests honoured per step.
pub const MAX_EXTENSION_REQUESTS: u32 = 2;

/// Per-phase resource limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_minutes: Option<f64>,
    #[serde(default = "default_thresholds")]
    pub warning_thresholds: Vec<u8>,
}

fn default_thresholds() -> Vec<u8> {
    DEFAULT_WARNING_THRESHOLDS.to_vec()
}

impl Default for PhaseBudget {
    fn default() -> Self {
        Self {
            max_turns: None,
            max_minutes: None,
            warning_thresholds: default_thresholds(),
        }
    }
}

impl PhaseBudget {
    #[must_use]
    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    #[must_use]
    pub fn with_max_minutes(mut self, minutes: f64) -> Self {
        self.max_minutes = Some(minutes);
        self
    }
}

/// Which budget a warning or exceedance refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetKind {
    Turns,
    Minutes,
}

impl BudgetKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Turns => "turns",
            Self::Minutes => "minutes",
        }
    }
}

/// A threshold crossing to be reported exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdCrossing {
    pub kind: BudgetKind,
    pub threshold_pct: u8,
}

/// A request to raise the active phase's budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_minutes: Option<f64>,
    pub justification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// The adjudicator's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDecision {
    pub granted: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_budget: Option<NewBudget>,
}

/// Budget in force after a granted extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_minutes: Option<f64>,
}

/// Governor for the single active phase.
pub struct Governor {
    phase: PhaseId,
    original: PhaseBudget,
    max_turns: Option<u32>,
    max_minutes: Option<f64>,
    thresholds: Vec<u8>,
    turns_used: u32,
    clock: Box<dyn MonotonicClock>,
    phase_start: Duration,
    warned: BTreeSet<(BudgetKind, u8)>,
    budget_exceeded: bool,
    extensions_granted: u32,
}

impl Governor {
    /// Begin governing a phase. The previous phase, if any, is over; the
    /// caller constructs a fresh governor per phase.
    #[must_use]
    pub fn start_phase(phase: PhaseId, budget: PhaseBudget, clock: Box<dyn MonotonicClock>) -> Self {
        let mut thresholds = budget.warning_thresholds.clone();
        thresholds.sort_unstable();
        thresholds.dedup();
        let phase_start = clock.elapsed();
        Self {
            phase,
            max_turns: budget.max_turns,
            max_minutes: budget.max_minutes,
            original: budget,
            thresholds,
            turns_used: 0,
            clock,
            phase_start,
            warned: BTreeSet::new(),
            budget_exceeded: false,
            extensions_granted: 0,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> PhaseId {
        self.phase
    }

    #[must_use]
    pub const fn turns_used(&self) -> u32 {
        self.turns_used
    }

    /// Minutes of wall-clock time since the phase started.
    #[must_use]
    pub fn elapsed_minutes(&self) -> f64 {
        (self.clock.elapsed() - self.phase_start).as_secs_f64() / 60.0
    }

    #[must_use]
    pub const fn budget_exceeded(&self) -> bool {
        self.budget_exceeded
    }

    /// Extensions granted against this phase's budget.
    #[must_use]
    pub const fn extensions_granted(&self) -> u32 {
        self.extensions_granted
    }

    /// Record one agent tool use and report any newly crossed thresholds.
    pub fn on_turn(&mut self) -> Vec<ThresholdCrossing> {
        self.turns_used += 1;
        self.evaluate()
    }

    /// Re-check elapsed time without recording a turn.
    pub fn poll(&mut self) -> Vec<ThresholdCrossing> {
        self.evaluate()
    }

    fn evaluate(&mut self) -> Vec<ThresholdCrossing> {
        let mut crossings = Vec::new();

        if let Some(max_turns) = self.max_turns {
            let pct = if max_turns == 0 {
                100.0
            } else {
                f64::from(self.turns_used) / f64::from(max_turns) * 100.0
            };
            self.collect_crossings(BudgetKind::Turns, pct, &mut crossings);
            if self.turns_used > max_turns {
                self.budget_exceeded = true;
            }
        }

        if let Some(max_minutes) = self.max_minutes {
            let elapsed = self.elapsed_minutes();
            let pct = if max_minutes <= 0.0 {
                100.0
            } else {
                elapsed / max_minutes * 100.0
            };
            self.collect_crossings(BudgetKind::Minutes, pct, &mut crossings);
            if elapsed > max_minutes {
                self.budget_exceeded = true;
            }
        }

        crossings
    }

    fn collect_crossings(&mut self, kind: BudgetKind, pct: f64, out: &mut Vec<ThresholdCrossing>) {
        // Thresholds are pre-sorted, so emission order is ascending.
        for &threshold in &self.thresholds {
            if pct >= f64::from(threshold) && self.warned.insert((kind, threshold)) {
                out.push(ThresholdCrossing {
                    kind,
                    threshold_pct: threshold,
                });
            }
        }
    }

    /// Adjudicate an extension request.
    ///
    /// Approval requires all of: the phase is not terminal, this is the
    /// first or second request within the step, the justification is
    /// non-empty, and the requested total stays within the hard cap
    /// (2x the original budget). A grant atomically raises the budget
    /// and clears the exceeded latch when the new budget covers current
    /// usage; a denial changes nothing.
    pub fn decide(
        &mut self,
        request: &ExtensionRequest,
        prior_requests: u32,
        phase_terminal: bool,
    ) -> ExtensionDecision {
        if phase_terminal {
            return denied("the phase is already terminal");
        }
        if prior_requests >= MAX_EXTENSION_REQUESTS {
            return denied("extension limit reached for this step (2 requests)");
        }
        if request.justification.trim().is_empty() {
            return denied("a non-empty justification is required");
        }
        if request.requested_turns.is_none() && request.requested_minutes.is_none() {
            return denied("the request names neither turns nor minutes");
        }

        let mut new_turns = self.max_turns;
        if let Some(extra) = request.requested_turns {
            match (self.max_turns, self.original.max_turns) {
                (Some(current), Some(original)) => {
                    let requested_total = current + extra;
                    let cap = (f64::from(original) * DEFAULT_EXTENSION_CAP_FACTOR) as u32;
                    if requested_total > cap {
                        return denied(&format!(
                            "requested turn total {requested_total} exceeds the hard cap {cap}"
                        ));
                    }
                    new_turns = Some(requested_total);
                }
                _ => return denied("no turn budget is in force for this phase"),
            }
        }

        let mut new_minutes = self.max_minutes;
        if let Some(extra) = request.requested_minutes {
            match (self.max_minutes, self.original.max_minutes) {
                (Some(current), Some(original)) => {
                    let requested_total = current + extra;
                    let cap = original * DEFAULT_EXTENSION_CAP_FACTOR;
                    if requested_total > cap {
                        return denied(&format!(
                            "requested minute total {requested_total} exceeds the hard cap {cap}"
                        ));
                    }
                    new_minutes = Some(requested_total);
                }
                _ => return denied("no minute budget is in force for this phase"),
            }
        }

        self.max_turns = new_turns;
        self.max_minutes = new_minutes;
        self.extensions_granted += 1;

        // Clear the latch when the raised budget now covers usage.
        let turns_ok = self.max_turns.is_none_or(|m| self.turns_used <= m);
        let minutes_ok = self.max_minutes.is_none_or(|m| self.elapsed_minutes() <= m);
        if turns_ok && minutes_ok {
            self.budget_exceeded = false;
        }

        ExtensionDecision {
            granted: true,
            reason: format!("granted: {}", request.justification.trim()),
            new_budget: Some(NewBudget {
                max_turns: self.max_turns,
                max_minutes: self.max_minutes,
            }),
        }
    }
}

fn denied(reason: &str) -> ExtensionDecision {
    ExtensionDecision {
        granted: false,
        reason: reason.to_string(),
        new_budget: None,
    }
}
