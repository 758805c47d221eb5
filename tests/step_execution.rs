//! End-to-end step execution scenarios.

mod support;

use serde_json::json;

use nwave_des::Orchestrator;
use nwave_des::audit::read_records;
use nwave_des::governor::PhaseBudget;
use nwave_des::orchestrator::AgentRunReport;
use nwave_des::recovery::FailureType;
use nwave_des::step::{PhaseId, PhaseStatus, load_step_file};

use support::{ScriptedDriver, fixture, fixture_with_scope, passing_report};

const HAPPY_PATH_PHASES: [PhaseId; 9] = [
    PhaseId::Prepare,
    PhaseId::RedAcceptance,
    PhaseId::RedUnit,
    PhaseId::GreenUnit,
    PhaseId::Review,
    PhaseId::RefactorL1,
    PhaseId::Validate,
    PhaseId::GreenAcceptance,
    PhaseId::Commit,
];

#[test]
fn happy_path_runs_all_phases_with_ordered_audit_trail() {
    let fx = fixture();
    let mut orchestrator =
        Orchestrator::with_audit_dir(fx.root.clone(), fx.audit_dir.clone()).unwrap();

    // The host command first renders and validates the prompt.
    let prompt = orchestrator
        .render_prompt(
            "execute-step",
            Some(&fx.step_path),
            Some("software-crafter"),
            Some("audit-log-refactor"),
        )
        .expect("prompt must validate");
    assert!(prompt.body.contains("## Scope"));

    let mut driver = ScriptedDriver(
        |_step: &nwave_des::step::StepFile, phase: PhaseId, _gov: &mut nwave_des::governor::Governor| {
            Ok(passing_report(phase))
        },
    );
    let budget = PhaseBudget::default().with_max_turns(50);
    let result = orchestrator
        .execute_step(&fx.step_path, &budget, &mut driver)
        .unwrap();

    assert!(result.completed);
    assert!(result.failure.is_none());
    let phases: Vec<PhaseId> = result.phases_run.iter().map(|(p, _)| *p).collect();
    assert_eq!(phases, HAPPY_PATH_PHASES);
    assert!(result.phases_run.iter().all(|(_, s)| *s == PhaseStatus::Pass));

    // Audit trail: the declared event ladder with strictly increasing
    // sequence numbers.
    let log_path = orchestrator.audit().active_path().unwrap().to_owned();
    let records = read_records(&log_path).unwrap();
    let kinds: Vec<&str> = records.iter().map(|r| r.event.kind()).collect();

    assert_eq!(kinds[0], "TASK_INVOCATION_STARTED");
    assert_eq!(kinds[1], "TASK_INVOCATION_VALIDATED");
    assert_eq!(
        kinds.iter().filter(|k| **k == "PHASE_STARTED").count(),
        9
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == "PHASE_EXECUTED").count(),
        9
    );
    assert!(kinds.contains(&"HOOK_SUBAGENT_STOP_PASSED"));
    assert!(kinds.contains(&"COMMIT_CREATED"));
    assert_eq!(*kinds.last().unwrap(), "COMMIT_SUCCESS");

    let seqs: Vec<u64> = records.iter().map(|r| r.sequence_number).collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(seqs[0], 1);

    // PHASE_STARTED for P precedes its PHASE_EXECUTED.
    for phase in HAPPY_PATH_PHASES {
        let started = kinds_position(&records, "PHASE_STARTED", phase);
        let executed = kinds_position(&records, "PHASE_EXECUTED", phase);
        assert!(started.unwrap() < executed.unwrap(), "{phase}");
    }

    // Step file reflects the finished state and remains parseable.
    let step = load_step_file(&fx.step_path).unwrap();
    assert_eq!(step.phase_status(PhaseId::Commit), PhaseStatus::Pass);
    assert_eq!(step.state.last_outcome.as_deref(), Some("PASS"));
}

fn kinds_position(
    records: &[nwave_des::audit::AuditRecord],
    kind: &str,
    phase: PhaseId,
) -> Option<usize> {
    records.iter().position(|r| {
        r.event.kind() == kind
            && serde_json::to_value(&r.event).unwrap()["phase"] == phase.as_str()
    })
}

#[test]
fn scope_violation_emits_one_event_per_path_and_fails_the_phase() {
    let fx = fixture_with_scope(&["src/des/**"]);
    let mut orchestrator =
        Orchestrator::with_audit_dir(fx.root.clone(), fx.audit_dir.clone()).unwrap();

    let mut violated_once = false;
    let mut driver = ScriptedDriver(
        move |_step: &nwave_des::step::StepFile,
              phase: PhaseId,
              _gov: &mut nwave_des::governor::Governor| {
        let mut report = passing_report(phase);
        if phase == PhaseId::GreenUnit && !violated_once {
            violated_once = true;
            report.modified_files =
                vec!["src/des/x.py".to_string(), "README.md".to_string()];
        }
        Ok(report)
    },
    );

    let budget = PhaseBudget::default().with_max_turns(50);
    let result = orchestrator
        .execute_step(&fx.step_path, &budget, &mut driver)
        .unwrap();

    // The retry succeeds, so the step still completes.
    assert!(result.completed);
    let green_attempts: Vec<&PhaseStatus> = result
        .phases_run
        .iter()
        .filter(|(p, _)| *p == PhaseId::GreenUnit)
        .map(|(_, s)| s)
        .collect();
    assert_eq!(green_attempts, vec![&PhaseStatus::Fail, &PhaseStatus::Pass]);

    let log_path = orchestrator.audit().active_path().unwrap().to_owned();
    let records = read_records(&log_path).unwrap();

    let violations: Vec<_> = records
        .iter()
        .filter(|r| r.event.kind() == "SCOPE_VIOLATION")
        .collect();
    assert_eq!(violations.len(), 1);
    assert_eq!(
        serde_json::to_value(&violations[0].event).unwrap()["path"],
        "README.md"
    );

    let failed = records
        .iter()
        .find(|r| r.event.kind() == "HOOK_SUBAGENT_STOP_FAILED")
        .unwrap();
    assert_eq!(
        serde_json::to_value(&failed.event).unwrap()["validation_errors"],
        json!(["scope:README.md"])
    );

    // Recovery suggestions were persisted by the failed attempt.
    let step = load_step_file(&fx.step_path).unwrap();
    assert!(!step.state.recovery_suggestions.is_empty());
    assert_eq!(
        step.state.recovery_suggestions.len(),
        step.state
            .recovery_suggestions
            .iter()
            .filter(|s| s.contains("WHY:") && s.contains("HOW:") && s.contains("ACTION:"))
            .count()
    );
}

#[test]
fn abandoned_phase_stops_the_step_and_persists_guidance() {
    let fx = fixture();
    let mut orchestrator =
        Orchestrator::with_audit_dir(fx.root.clone(), fx.audit_dir.clone()).unwrap();

    let mut driver = ScriptedDriver(
        |_step: &nwave_des::step::StepFile,
         phase: PhaseId,
         _gov: &mut nwave_des::governor::Governor| {
        let mut report = passing_report(phase);
        if phase == PhaseId::GreenUnit {
            // Agent dies mid-phase without claiming completion.
            report.phase_completed = false;
            report.test_results = None;
        }
        Ok(report)
    },
    );

    let budget = PhaseBudget::default().with_max_turns(50);
    let result = orchestrator
        .execute_step(&fx.step_path, &budget, &mut driver)
        .unwrap();

    assert!(!result.completed);
    assert_eq!(result.failure, Some(FailureType::AbandonedPhase));

    let step = load_step_file(&fx.step_path).unwrap();
    assert!(step.state.recovery_suggestions.len() >= 3);
    for suggestion in &step.state.recovery_suggestions {
        assert!(suggestion.starts_with("WHY: "));
        assert!(suggestion.contains("\n\nHOW: "));
        assert!(suggestion.contains("\n\nACTION: "));
    }
    // Two attempts, both failed; the step records the consecutive failures.
    assert_eq!(step.state.consecutive_failures, 2);
    assert_eq!(step.state.last_outcome.as_deref(), Some("abandoned_phase"));
}

#[test]
fn turn_budget_ladder_warns_once_per_threshold_then_fails() {
    let fx = fixture();
    let mut orchestrator =
        Orchestrator::with_audit_dir(fx.root.clone(), fx.audit_dir.clone()).unwrap();

    let mut exhausted_once = false;
    let mut driver = ScriptedDriver(
        move |_step: &nwave_des::step::StepFile,
              phase: PhaseId,
              gov: &mut nwave_des::governor::Governor| {
        let mut report: AgentRunReport = passing_report(phase);
        if phase == PhaseId::GreenUnit && !exhausted_once {
            exhausted_once = true;
            for _ in 0..21 {
                report.crossings.extend(gov.on_turn());
            }
        }
        Ok(report)
    },
    );

    let budget = PhaseBudget::default().with_max_turns(20);
    let result = orchestrator
        .execute_step(&fx.step_path, &budget, &mut driver)
        .unwrap();
    assert!(result.completed, "retry after the budget failure succeeds");

    let log_path = orchestrator.audit().active_path().unwrap().to_owned();
    let records = read_records(&log_path).unwrap();

    let warnings: Vec<u64> = records
        .iter()
        .filter(|r| r.event.kind() == "TIMEOUT_WARNING")
        .map(|r| serde_json::to_value(&r.event).unwrap()["threshold_pct"].as_u64().unwrap())
        .collect();
    assert_eq!(warnings, vec![50, 75, 90]);

    let failed = records
        .iter()
        .find(|r| r.event.kind() == "PHASE_FAILED")
        .unwrap();
    let value = serde_json::to_value(&failed.event).unwrap();
    assert_eq!(value["phase"], "GREEN_UNIT");
    assert_eq!(value["reason"], "budget_exceeded");
}

#[test]
fn corrupt_step_file_is_fatal_without_recovery() {
    let fx = fixture();
    std::fs::write(fx.step_path.as_std_path(), "{truncated").unwrap();

    let mut orchestrator =
        Orchestrator::with_audit_dir(fx.root.clone(), fx.audit_dir.clone()).unwrap();
    let mut driver = ScriptedDriver(
        |_s: &nwave_des::step::StepFile, phase: PhaseId, _g: &mut nwave_des::governor::Governor| {
            Ok(passing_report(phase))
        },
    );

    let err = orchestrator
        .execute_step(&fx.step_path, &PhaseBudget::default(), &mut driver)
        .unwrap_err();
    assert_eq!(
        err.to_exit_code(),
        nwave_des::ExitCode::STEP_FILE_CORRUPT
    );

    // The corrupt file was not rewritten with recovery suggestions.
    let raw = std::fs::read_to_string(fx.step_path.as_std_path()).unwrap();
    assert_eq!(raw, "{truncated");
}

#[test]
fn rejection_names_the_offending_rule_and_is_audited() {
    let fx = fixture();
    // Break the scenario binding: point at a function that does not exist.
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fx.step_path.as_std_path()).unwrap())
            .unwrap();
    value["tdd_cycle"]["acceptance_test"]["mapped_scenario"]["scenario_function"] =
        "test_scenario_404_missing".into();
    std::fs::write(
        fx.step_path.as_std_path(),
        serde_json::to_string_pretty(&value).unwrap(),
    )
    .unwrap();

    let mut orchestrator =
        Orchestrator::with_audit_dir(fx.root.clone(), fx.audit_dir.clone()).unwrap();
    let rejection = orchestrator
        .render_prompt("execute-step", Some(&fx.step_path), None, None)
        .unwrap_err();

    assert!(rejection
        .messages()
        .iter()
        .any(|m| m.contains("scenario_function_missing")));

    let log_path = orchestrator.audit().active_path().unwrap().to_owned();
    let records = read_records(&log_path).unwrap();
    let kinds: Vec<&str> = records.iter().map(|r| r.event.kind()).collect();
    assert!(kinds.contains(&"VALIDATION_REJECTED"));
    assert_eq!(*kinds.last().unwrap(), "TASK_INVOCATION_REJECTED");
}
