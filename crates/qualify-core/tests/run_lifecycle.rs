use proptest::prelude::*;
use qualify_core::model::{
    NewMeasurement, PhaseStatus, ProtocolDefinition, RunStatus, StepOutcome, StepStatus,
    TestResult, TestRun,
};
use qualify_core::protocol::{parse, ProtocolFormat};

const PROTOCOL: &str = r#"
id: HF-10
version: 1.0.0
name: Humidity freeze
category: environmental
phases:
  - id: p1
    steps:
      - { id: p1-s1, sequence: 1, action: measure }
      - { id: p1-s2, sequence: 2, action: expose }
      - { id: p1-s3, sequence: 3, action: inspect }
  - id: p2
    steps:
      - { id: p2-s1, sequence: 1, action: measure }
      - { id: p2-s2, sequence: 2, action: measure }
acceptance_criteria:
  - id: AC-1
    severity: critical
    threshold: { parameter: pmax, operator: ">=", value: 280 }
  - id: AC-2
    severity: warning
    threshold: { parameter: wet_leakage, operator: ">=", value: 40 }
"#;

fn protocol() -> ProtocolDefinition {
    parse(PROTOCOL, ProtocolFormat::Yaml).unwrap()
}

const STEPS: [&str; 5] = ["p1-s1", "p1-s2", "p1-s3", "p2-s1", "p2-s2"];

#[derive(Debug, Clone)]
enum Op {
    Start(usize),
    Finish(usize, StepOutcome),
}

fn op() -> impl Strategy<Value = Op> {
    let outcome = prop_oneof![
        Just(StepOutcome::Passed),
        Just(StepOutcome::Failed),
        Just(StepOutcome::Completed),
        Just(StepOutcome::Skipped),
    ];
    prop_oneof![
        (0..STEPS.len()).prop_map(Op::Start),
        (0..STEPS.len(), outcome).prop_map(|(i, o)| Op::Finish(i, o)),
    ]
}

fn check_invariants(run: &TestRun) {
    let in_progress = run
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::InProgress)
        .count();
    assert!(in_progress <= 1, "more than one step in progress");

    for step in run.steps.iter().filter(|s| s.status != StepStatus::Pending) {
        for earlier in run
            .steps_in_phase(&step.phase_id)
            .filter(|s| s.sequence < step.sequence)
        {
            assert!(
                earlier.status.is_terminal(),
                "{} started before {} finished",
                step.step_id,
                earlier.step_id
            );
        }
    }

    for (i, phase) in run.phases.iter().enumerate() {
        if phase.status != PhaseStatus::Pending {
            assert!(run.phases[..i].iter().all(|p| p.status.is_closed()));
        }
        if phase.status == PhaseStatus::Completed {
            assert!(run.steps_in_phase(&phase.phase_id).all(|s| s.status.is_terminal()));
        }
    }
}

proptest! {
    #[test]
    fn arbitrary_operation_sequences_keep_ordering_invariants(
        ops in proptest::collection::vec(op(), 0..40)
    ) {
        let p = protocol();
        let mut run = TestRun::new(&p, "MOD", "op").unwrap();
        run.start().unwrap();

        for op in ops {
            let before = run.clone();
            let result = match op {
                Op::Start(i) => run.start_step(STEPS[i]),
                Op::Finish(i, outcome) => run.finish_step(STEPS[i], outcome, None),
            };
            if result.is_err() {
                prop_assert_eq!(&run, &before, "rejected transition mutated the run");
            }
            check_invariants(&run);
        }

        let all_closed = run.phases.iter().all(|p| p.status.is_closed());
        prop_assert_eq!(run.complete(&p).is_ok(), all_closed);
    }
}

#[test]
fn complete_with_open_phase_is_invalid_transition() {
    let p = protocol();
    let mut run = TestRun::new(&p, "MOD", "op").unwrap();
    run.start().unwrap();
    for s in ["p1-s1", "p1-s2", "p1-s3"] {
        run.start_step(s).unwrap();
        run.finish_step(s, StepOutcome::Completed, None).unwrap();
    }
    let err = run.complete(&p).unwrap_err();
    assert!(err.is_invalid_transition());
    assert!(err.to_string().contains("p2"));
}

#[test]
fn pending_run_rejects_step_and_measurement() {
    let p = protocol();
    let mut run = TestRun::new(&p, "MOD", "op").unwrap();
    assert!(run.start_step("p1-s1").unwrap_err().is_invalid_transition());
    assert!(run
        .record_measurement(&p, NewMeasurement::numeric("pmax", 1.0))
        .unwrap_err()
        .is_invalid_transition());
    assert!(run.abort("nope").unwrap_err().is_invalid_transition());
}

#[test]
fn unmeasured_warning_criterion_gives_conditional() {
    let p = protocol();
    let mut run = TestRun::new(&p, "MOD", "op").unwrap();
    run.start().unwrap();
    for s in STEPS {
        run.start_step(s).unwrap();
        if s == "p2-s2" {
            run.record_measurement(&p, NewMeasurement::numeric("pmax", 300.0))
                .unwrap();
        }
        run.finish_step(s, StepOutcome::Completed, None).unwrap();
    }
    assert_eq!(run.complete(&p).unwrap(), TestResult::Conditional);
    assert_eq!(run.status, RunStatus::Completed);
    let undetermined = run.acceptance.iter().find(|e| e.criterion_id == "AC-2").unwrap();
    assert_eq!(undetermined.passed, None);
    assert!(undetermined.failure_reason.is_some());
}

#[test]
fn failed_run_keeps_ledger_and_reason() {
    let p = protocol();
    let mut run = TestRun::new(&p, "MOD", "op").unwrap();
    run.start().unwrap();
    run.start_step("p1-s1").unwrap();
    run.record_measurement(&p, NewMeasurement::numeric("pmax", 200.0))
        .unwrap();
    run.fail("specimen cracked").unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.status_reason.as_deref(), Some("specimen cracked"));
    assert_eq!(run.ledger.len(), 1);
    assert_eq!(run.result, TestResult::NotEvaluated);
}
