use qualify_core::engine::{ActionRegistry, StepInputs};
use qualify_core::model::{
    MeasurementValue, NewMeasurement, QcCategory, QcCheckResult, QualityFlag, RunStatus,
    Severity, TestResult, TestRun,
};
use qualify_core::protocol::{parse, ProtocolFormat};
use qualify_core::storage::Store;

const PROTOCOL: &str = r#"{
  "id": "WET-LEAK", "version": "2.1.0", "name": "Wet leakage current", "category": "electrical",
  "parameters": [{ "name": "test_voltage", "type": "float", "unit": "V", "default": 1000 }],
  "phases": [
    { "id": "prep", "steps": [{ "id": "p1", "sequence": 1, "action": "inspect" }] },
    { "id": "test", "steps": [
        { "id": "t1", "sequence": 1, "action": "measure" },
        { "id": "t2", "sequence": 2, "action": "wait" }
    ]}
  ],
  "acceptance_criteria": [{
    "id": "AC-R", "severity": "critical",
    "threshold": { "parameter": "insulation_resistance", "operator": ">=", "value": 40 }
  }]
}"#;

fn completed_run() -> TestRun {
    let p = parse(PROTOCOL, ProtocolFormat::Json).unwrap();
    let actions = ActionRegistry::with_builtins();
    let mut run = TestRun::new(&p, "MOD-42", "carol").unwrap();
    run.start().unwrap();

    let inspect = StepInputs {
        verdict: Some(true),
        observations: Some("no visible defects".into()),
        ..Default::default()
    };
    run.execute_step(&p, "p1", &inspect, &actions).unwrap();

    let readings = StepInputs {
        readings: vec![
            NewMeasurement::numeric("insulation_resistance", 412.5)
                .unit("MOhm")
                .meta("instrument", "HT-500"),
            NewMeasurement::new("surface", "wet"),
            NewMeasurement::new("leak_detected", false),
            NewMeasurement::new(
                "iv_curve",
                MeasurementValue::Json(serde_json::json!({ "v": [0, 40.1], "i": [9.2, 0] })),
            ),
        ],
        ..Default::default()
    };
    run.execute_step(&p, "t1", &readings, &actions).unwrap();
    run.execute_step(&p, "t2", &StepInputs::default(), &actions)
        .unwrap();
    let surface = run.ledger.as_slice()[1].measurement_id.clone();
    run.flag_measurement(&surface, QualityFlag::Suspect, Some("operator note".into()))
        .unwrap();
    assert_eq!(run.complete(&p).unwrap(), TestResult::Pass);
    run
}

#[test]
fn run_round_trips_exactly() {
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    let run = completed_run();

    store.save_run(&run).unwrap();
    let loaded = store.load_run(&run.run_id).unwrap().unwrap();
    assert_eq!(loaded, run);
    assert_eq!(loaded.status, RunStatus::Completed);
    assert_eq!(loaded.ledger.len(), 4);
}

#[test]
fn inexact_floats_round_trip_bit_for_bit() {
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    let p = parse(PROTOCOL, ProtocolFormat::Json).unwrap();
    let actions = ActionRegistry::with_builtins();

    let pmax = 405.741_689_461_693_97_f64;
    let voltage = 999.123_456_789_012_3_f64;
    let overrides = [("test_voltage".to_string(), serde_json::json!(voltage))]
        .into_iter()
        .collect();
    let mut run = TestRun::with_parameters(&p, "MOD-7", "erin", overrides).unwrap();
    run.start().unwrap();
    let inspect = StepInputs {
        verdict: Some(true),
        ..Default::default()
    };
    run.execute_step(&p, "p1", &inspect, &actions).unwrap();

    let thirds: Vec<f64> = (1..=40).map(|k| f64::from(k) / 3.0 + 0.1).collect();
    let readings = StepInputs {
        readings: vec![
            NewMeasurement::numeric("insulation_resistance", pmax)
                .meta("elapsed_hours", pmax)
                .meta("samples", thirds.clone()),
        ],
        ..Default::default()
    };
    run.execute_step(&p, "t1", &readings, &actions).unwrap();
    run.execute_step(&p, "t2", &StepInputs::default(), &actions)
        .unwrap();
    run.complete(&p).unwrap();
    store.save_run(&run).unwrap();

    let loaded = store.load_run(&run.run_id).unwrap().unwrap();
    assert_eq!(loaded, run);
    assert_eq!(loaded.parameters["test_voltage"].as_f64(), Some(voltage));
    let m = &loaded.ledger.as_slice()[0];
    assert_eq!(
        m.metadata["elapsed_hours"].as_f64().map(f64::to_bits),
        Some(pmax.to_bits())
    );
    assert_eq!(m.metadata["samples"], serde_json::json!(thirds));

    let qc = vec![
        QcCheckResult::new(
            "repeatability:pmax",
            QcCategory::Repeatability,
            true,
            Severity::Info,
        )
        .with_expected(serde_json::json!({ "max_cv": 2.0 / 3.0 }))
        .with_actual(serde_json::json!({ "cv": 0.1 + 0.2, "mean": pmax })),
    ];
    store.save_qc_results(&run.run_id, &qc).unwrap();
    assert_eq!(store.load_qc_results(&run.run_id).unwrap(), qc);
}

#[test]
fn save_is_an_upsert() {
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    let p = parse(PROTOCOL, ProtocolFormat::Json).unwrap();
    let mut run = TestRun::new(&p, "MOD-1", "dave").unwrap();
    store.save_run(&run).unwrap();

    run.start().unwrap();
    run.record_measurement(&p, NewMeasurement::numeric("insulation_resistance", 12.0))
        .unwrap();
    run.abort("chamber door opened").unwrap();
    store.save_run(&run).unwrap();

    let loaded = store.load_run(&run.run_id).unwrap().unwrap();
    assert_eq!(loaded, run);
    assert_eq!(store.list_runs().unwrap().len(), 1);
}

#[test]
fn qc_results_round_trip_in_order() {
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    let run = completed_run();
    store.save_run(&run).unwrap();

    let results = vec![
        QcCheckResult::new("completeness", QcCategory::Completeness, true, Severity::Info)
            .with_expected(95.0)
            .with_actual(100.0)
            .with_message("4/4 measurements"),
        QcCheckResult::new("outliers:pmax", QcCategory::Outlier, false, Severity::Warning)
            .with_actual(serde_json::json!([5])),
    ];
    store.save_qc_results(&run.run_id, &results).unwrap();
    assert_eq!(store.load_qc_results(&run.run_id).unwrap(), results);

    store.save_qc_results(&run.run_id, &results[..1]).unwrap();
    assert_eq!(store.load_qc_results(&run.run_id).unwrap().len(), 1);
}

#[test]
fn missing_run_is_none() {
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    assert!(store.load_run("nope").unwrap().is_none());
    assert!(store.list_runs().unwrap().is_empty());
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("qualify.db");
    let run = completed_run();
    {
        let store = Store::open(&path).unwrap();
        store.init_schema().unwrap();
        store.save_run(&run).unwrap();
    }
    let store = Store::open(&path).unwrap();
    store.init_schema().unwrap();
    let summaries = store.list_runs().unwrap();
    assert_eq!(summaries[0].run_id, run.run_id);
    assert_eq!(summaries[0].result, TestResult::Pass);
    assert_eq!(store.load_run(&run.run_id).unwrap().unwrap(), run);
}
